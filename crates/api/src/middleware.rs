use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use paybook_core::ActorId;

use crate::context::ActorContext;

/// Header carrying the actor id set by the identity collaborator upstream.
pub const ACTOR_HEADER: &str = "x-actor-id";

pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let actor_id = extract_actor(req.headers())?;

    req.extensions_mut().insert(ActorContext::new(actor_id));

    Ok(next.run(req).await)
}

fn extract_actor(headers: &HeaderMap) -> Result<ActorId, StatusCode> {
    let header = headers.get(ACTOR_HEADER).ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let raw = header.trim();
    if raw.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    raw.parse().map_err(|_| StatusCode::UNAUTHORIZED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn actor_header_must_be_a_uuid() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_actor(&headers), Err(StatusCode::UNAUTHORIZED));

        headers.insert(ACTOR_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert_eq!(extract_actor(&headers), Err(StatusCode::UNAUTHORIZED));

        let id = ActorId::new();
        headers.insert(ACTOR_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(extract_actor(&headers), Ok(id));
    }
}
