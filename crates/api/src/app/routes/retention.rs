use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use paybook_core::{AgreementId, ReleaseId};
use paybook_payments::{ReleaseTransition, TransitionRelease};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::ActorContext;

/// Retention is tracked per agreement; `:agreement_id` is the work order's agreement.
pub fn router() -> Router {
    Router::new()
        .route("/:agreement_id/release", post(release_retention))
        .route("/:agreement_id/releases", get(list_releases))
        .route("/releases/:id/approve", post(approve_release))
        .route("/releases/:id/paid", post(mark_release_paid))
        .route("/releases/:id/reject", post(reject_release))
}

pub async fn release_retention(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(agreement_id): Path<String>,
    Json(body): Json<dto::ReleaseRetentionRequest>,
) -> axum::response::Response {
    let agreement_id: AgreementId = match errors::parse_id(&agreement_id, "agreement id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = body.into_command(agreement_id, actor.actor_id(), Utc::now());
    match services.ledger.release_retention(cmd).await {
        Ok(release) => (StatusCode::CREATED, Json(release)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_releases(
    Extension(services): Extension<Arc<AppServices>>,
    Path(agreement_id): Path<String>,
) -> axum::response::Response {
    let agreement_id: AgreementId = match errors::parse_id(&agreement_id, "agreement id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.releases(agreement_id).await {
        Ok(releases) => Json(releases).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn approve_release(
    services: Extension<Arc<AppServices>>,
    actor: Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    transition(services, actor, &id, ReleaseTransition::Approve).await
}

pub async fn mark_release_paid(
    services: Extension<Arc<AppServices>>,
    actor: Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    transition(services, actor, &id, ReleaseTransition::MarkPaid).await
}

pub async fn reject_release(
    services: Extension<Arc<AppServices>>,
    actor: Extension<ActorContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    transition(services, actor, &id, ReleaseTransition::Reject).await
}

async fn transition(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    raw_id: &str,
    transition: ReleaseTransition,
) -> axum::response::Response {
    let release_id: ReleaseId = match errors::parse_id(raw_id, "release id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = TransitionRelease {
        release_id,
        transition,
        actor: actor.actor_id(),
        occurred_at: Utc::now(),
    };
    match services.ledger.transition_release(cmd).await {
        Ok(release) => Json(release).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
