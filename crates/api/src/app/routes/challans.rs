use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use paybook_core::{ChallanId, TransactionId};
use paybook_infra::RenderedDocument;
use paybook_payments::IssueChallan;

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/generate/:transaction_id", post(issue_challan))
        .route("/search", post(search_challans))
        .route("/download/:id", get(download_challan))
        .route("/bulk-download", post(bulk_download))
        .route("/:id", get(get_challan))
}

pub async fn issue_challan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(transaction_id): Path<String>,
) -> axum::response::Response {
    let transaction_id: TransactionId = match errors::parse_id(&transaction_id, "transaction id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = IssueChallan {
        challan_id: ChallanId::new(),
        transaction_id,
        actor: actor.actor_id(),
        occurred_at: Utc::now(),
    };
    match services.ledger.issue_challan(cmd).await {
        Ok(challan) => (StatusCode::CREATED, Json(challan)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_challan(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: ChallanId = match errors::parse_id(&id, "challan id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.challan(id).await {
        Ok(challan) => Json(challan).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn search_challans(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ChallanSearchRequest>,
) -> axum::response::Response {
    let filter = match body.into_filter() {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    match services.ledger.search_challans(&filter).await {
        Ok(challans) => Json(challans).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn download_challan(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: ChallanId = match errors::parse_id(&id, "challan id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.render_challan(id).await {
        Ok(doc) => attachment(doc),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn bulk_download(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::BulkDownloadRequest>,
) -> axum::response::Response {
    let ids = match dto::parse_challan_ids(&body.ids) {
        Ok(ids) => ids,
        Err(resp) => return resp,
    };

    match services.ledger.generate_bulk_archive(&ids).await {
        Ok(doc) => attachment(doc),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

fn attachment(doc: RenderedDocument) -> axum::response::Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, doc.content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", doc.file_name),
            ),
        ],
        doc.bytes,
    )
        .into_response()
}
