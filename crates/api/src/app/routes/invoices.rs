use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use paybook_core::TaxInvoiceId;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/generate", post(generate_invoice))
        .route("/:id", get(get_invoice))
}

pub async fn generate_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::GenerateInvoiceRequest>,
) -> axum::response::Response {
    let cmd = match body.into_command(actor.actor_id(), Utc::now()) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.ledger.generate_invoice(cmd).await {
        Ok(invoice) => (StatusCode::CREATED, Json(invoice)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: TaxInvoiceId = match errors::parse_id(&id, "invoice id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.invoice(id).await {
        Ok(invoice) => Json(invoice).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
