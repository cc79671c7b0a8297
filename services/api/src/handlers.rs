//! Axum Handlers for the REST API
//!
//! Ledger, dashboard and assistant endpoints. Assistant failures never
//! surface as errors: each endpoint falls back to a fixed reply.

use aijaz_core::{
    assistant::{CHAT_FALLBACK, DEFAULT_CATEGORY, INSIGHT_FALLBACK},
    audio::{PLAYBACK_SAMPLE_RATE, decode_pcm16},
    ledger::Transaction,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    models::{
        CategorizePayload, CategoryResponse, ChatPayload, ChatResponse, CreateTransactionPayload,
        ErrorResponse, InsightResponse, SpeechPayload, SpeechResponse, SummaryResponse,
        TransactionQuery, TransactionResponse,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// List transactions, newest first.
#[utoipa::path(
    get,
    path = "/transactions",
    params(TransactionQuery),
    responses(
        (status = 200, description = "Matching transactions", body = [TransactionResponse])
    )
)]
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TransactionQuery>,
) -> Json<Vec<TransactionResponse>> {
    let ledger = state.ledger.lock().await;
    let transactions = ledger
        .filter(query.kind.map(Into::into), query.search.as_deref().unwrap_or(""))
        .into_iter()
        .map(TransactionResponse::from)
        .collect();
    Json(transactions)
}

/// Record a transaction. The category is suggested by the assistant when missing.
#[utoipa::path(
    post,
    path = "/transactions",
    request_body = CreateTransactionPayload,
    responses(
        (status = 201, description = "Transaction recorded", body = TransactionResponse),
        (status = 400, description = "Bad request", body = ErrorResponse)
    )
)]
pub async fn create_transaction(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateTransactionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let description = payload.description.trim().to_string();
    if description.is_empty() {
        return Err(ApiError::BadRequest("description must not be empty".to_string()));
    }
    if !payload.amount.is_finite() || payload.amount <= 0.0 {
        return Err(ApiError::BadRequest(
            "amount must be a positive number".to_string(),
        ));
    }

    let category = match payload.category.map(|c| c.trim().to_string()) {
        Some(category) if !category.is_empty() => category,
        _ => suggest_category(&state, &description).await,
    };
    let date = payload
        .date
        .unwrap_or_else(|| chrono::Local::now().date_naive());

    let transaction = Transaction::new(description, payload.amount, payload.kind.into(), category, date);
    info!(id = %transaction.id, category = %transaction.category, "Recorded transaction.");
    state.ledger.lock().await.add(transaction.clone());

    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse::from(transaction)),
    ))
}

/// Delete a transaction.
#[utoipa::path(
    delete,
    path = "/transactions/{id}",
    responses(
        (status = 204, description = "Transaction deleted"),
        (status = 404, description = "Transaction not found", body = ErrorResponse)
    ),
    params(
        ("id" = String, Path, description = "Transaction ID")
    )
)]
pub async fn delete_transaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .ledger
        .lock()
        .await
        .delete(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Transaction with id '{}' not found", id)))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Totals, budget usage and spending per category.
#[utoipa::path(
    get,
    path = "/summary",
    responses(
        (status = 200, description = "Dashboard figures", body = SummaryResponse)
    )
)]
pub async fn get_summary(State(state): State<Arc<AppState>>) -> Json<SummaryResponse> {
    let ledger = state.ledger.lock().await;
    Json(SummaryResponse::new(
        ledger.summary(),
        ledger.expenses_by_category(),
    ))
}

/// A one-sentence tip based on the newest transactions.
#[utoipa::path(
    get,
    path = "/insight",
    responses(
        (status = 200, description = "Financial tip", body = InsightResponse)
    )
)]
pub async fn get_insight(State(state): State<Arc<AppState>>) -> Json<InsightResponse> {
    let transactions = state.ledger.lock().await.list().to_vec();
    let insight = match state.assistant.generate_insight(&transactions).await {
        Ok(insight) => insight,
        Err(e) => {
            warn!(error = ?e, "Insight generation failed.");
            INSIGHT_FALLBACK.to_string()
        }
    };
    Json(InsightResponse { insight })
}

/// Suggest a category for a description.
#[utoipa::path(
    post,
    path = "/categorize",
    request_body = CategorizePayload,
    responses(
        (status = 200, description = "Suggested category", body = CategoryResponse)
    )
)]
pub async fn categorize(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CategorizePayload>,
) -> Json<CategoryResponse> {
    let category = suggest_category(&state, &payload.description).await;
    Json(CategoryResponse { category })
}

/// Ask the assistant a question, grounded with web search.
#[utoipa::path(
    post,
    path = "/chat",
    request_body = ChatPayload,
    responses(
        (status = 200, description = "Assistant reply", body = ChatResponse),
        (status = 400, description = "Bad request", body = ErrorResponse)
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    let response = match state.assistant.chat(&payload.message, &payload.history).await {
        Ok(reply) => ChatResponse::from(reply),
        Err(e) => {
            warn!(error = ?e, "Chat request failed.");
            ChatResponse {
                text: CHAT_FALLBACK.to_string(),
                sources: Vec::new(),
            }
        }
    };
    Ok(Json(response))
}

/// Read text aloud.
#[utoipa::path(
    post,
    path = "/speech",
    request_body = SpeechPayload,
    responses(
        (status = 200, description = "Synthesized audio, if any", body = SpeechResponse)
    )
)]
pub async fn speech(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SpeechPayload>,
) -> Json<SpeechResponse> {
    let audio = match state.assistant.synthesize_speech(&payload.text).await {
        Ok(audio) => audio,
        Err(e) => {
            warn!(error = ?e, "Speech synthesis failed.");
            None
        }
    };
    // Only hand out audio a client can actually play.
    let audio = audio.filter(|payload| match decode_pcm16(payload, 1, PLAYBACK_SAMPLE_RATE) {
        Ok(frame) => !frame.samples().is_empty(),
        Err(e) => {
            warn!(error = %e, "Dropping unplayable speech audio.");
            false
        }
    });
    Json(SpeechResponse { audio })
}

async fn suggest_category(state: &AppState, description: &str) -> String {
    match state.assistant.categorize(description).await {
        Ok(category) => category,
        Err(e) => {
            warn!(error = ?e, "Categorization failed.");
            DEFAULT_CATEGORY.to_string()
        }
    }
}
