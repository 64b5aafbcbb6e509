use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use paybook_core::{AgreementId, ProjectId, ScheduleLineId, TransactionId};

use crate::app::{dto, errors};
use crate::app::services::AppServices;
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/design", post(create_agreement))
        .route("/design/project/:project_id", get(get_project_agreement))
        .route("/design/:id", get(get_agreement))
        .route("/design/:id/retention-terms", post(set_retention_terms))
        .route("/design/:id/refresh", post(refresh_schedule))
        .route("/schedule/:schedule_id/transactions", post(record_transaction))
        .route("/transactions/:id", get(get_transaction))
        .route("/transactions/:id/reverse", post(reverse_transaction))
        .route("/transactions/:id/amend", post(amend_transaction))
        .route("/history", get(transaction_history))
        .route("/all", get(list_agreements))
        .route("/pending", get(pending_agreements))
}

pub async fn create_agreement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Json(body): Json<dto::CreateAgreementRequest>,
) -> axum::response::Response {
    let cmd = match body.into_command(actor.actor_id(), Utc::now()) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.ledger.create_agreement(cmd).await {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_agreement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: AgreementId = match errors::parse_id(&id, "agreement id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.agreement(id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_project_agreement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project_id): Path<String>,
) -> axum::response::Response {
    let project_id: ProjectId = match errors::parse_id(&project_id, "project id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.agreement_for_project(project_id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn set_retention_terms(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RetentionTermsRequest>,
) -> axum::response::Response {
    let id: AgreementId = match errors::parse_id(&id, "agreement id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = body.into_command(id, actor.actor_id(), Utc::now());
    match services.ledger.set_retention_terms(cmd).await {
        Ok(agreement) => Json(agreement).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn refresh_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::RefreshRequest>>,
) -> axum::response::Response {
    let id: AgreementId = match errors::parse_id(&id, "agreement id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let as_of = body.and_then(|Json(b)| b.as_of).unwrap_or_else(Utc::now);

    match services.ledger.refresh_schedule(id, actor.actor_id(), as_of).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn record_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(schedule_id): Path<String>,
    Json(body): Json<dto::RecordTransactionRequest>,
) -> axum::response::Response {
    let line_id: ScheduleLineId = match errors::parse_id(&schedule_id, "schedule id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = body.into_command(line_id, actor.actor_id(), Utc::now());
    match services.ledger.record_transaction(cmd).await {
        Ok(txn) => (StatusCode::CREATED, Json(txn)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: TransactionId = match errors::parse_id(&id, "transaction id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.ledger.transaction(id).await {
        Ok(txn) => Json(txn).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn reverse_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReverseTransactionRequest>,
) -> axum::response::Response {
    let id: TransactionId = match errors::parse_id(&id, "transaction id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = body.into_command(id, actor.actor_id(), Utc::now());
    match services.ledger.reverse_transaction(cmd).await {
        Ok(reversal) => (StatusCode::CREATED, Json(reversal)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn amend_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AmendTransactionRequest>,
) -> axum::response::Response {
    let id: TransactionId = match errors::parse_id(&id, "transaction id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let cmd = body.into_command(id, actor.actor_id(), Utc::now());
    match services.ledger.amend_transaction(cmd).await {
        Ok(txn) => Json(txn).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn transaction_history(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::HistoryQuery>,
) -> axum::response::Response {
    let filter = match query.filter() {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    match services.ledger.transaction_history(&filter, query.pagination()).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_agreements(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::AgreementListQuery>,
) -> axum::response::Response {
    match services.ledger.list_agreements(&query.filter(), query.pagination()).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn pending_agreements(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::AgreementListQuery>,
) -> axum::response::Response {
    match services.ledger.pending_agreements(query.pagination()).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
