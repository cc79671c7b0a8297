//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        CategorizePayload, CategoryResponse, ChatPayload, ChatResponse, CreateTransactionPayload,
        ErrorResponse, InsightResponse, SourceResponse, SpeechPayload, SpeechResponse,
        SummaryResponse, TransactionKind, TransactionResponse,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_transactions,
        handlers::create_transaction,
        handlers::delete_transaction,
        handlers::get_summary,
        handlers::get_insight,
        handlers::categorize,
        handlers::chat,
        handlers::speech,
    ),
    components(
        schemas(
            TransactionResponse, TransactionKind, CreateTransactionPayload, SummaryResponse,
            InsightResponse, CategorizePayload, CategoryResponse, ChatPayload, ChatResponse,
            SourceResponse, SpeechPayload, SpeechResponse, ErrorResponse
        )
    ),
    tags(
        (name = "Aijaz API", description = "Ledger, dashboard and assistant endpoints for the Aijaz finance app")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route(
            "/transactions",
            get(handlers::list_transactions).post(handlers::create_transaction),
        )
        .route("/transactions/{id}", delete(handlers::delete_transaction))
        .route("/summary", get(handlers::get_summary))
        .route("/insight", get(handlers::get_insight))
        .route("/categorize", post(handlers::categorize))
        .route("/chat", post(handlers::chat))
        .route("/speech", post(handlers::speech))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
