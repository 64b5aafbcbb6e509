use axum::{routing::get, Router};

pub mod challans;
pub mod invoices;
pub mod payments;
pub mod retention;
pub mod system;

/// Router for all actor-scoped endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest(
            "/payments",
            payments::router()
                .nest("/retention", retention::router())
                .nest("/invoices", invoices::router()),
        )
        .nest("/challans", challans::router())
}
