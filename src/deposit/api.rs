//! Deposit intent HTTP handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::DepositError;
use super::types::NewDepositIntent;
use crate::gateway::{ApiResponse, AppState, error_codes, numeric_code, status_from_u16};
use crate::ledger::UserId;

#[derive(Debug, Deserialize)]
pub struct IntentApiRequest {
    pub user_id: UserId,
    /// Client idempotency key; redeclaring the same session returns the
    /// existing intent.
    pub session_id: String,
    pub amount_usd: Decimal,
    pub sender_address: String,
    pub expected_native_value: i64,
}

#[derive(Debug, Serialize)]
pub struct IntentApiResponse {
    pub intent_id: i64,
    pub session_id: String,
    pub amount_usd: Decimal,
    pub processed: bool,
}

fn validate(req: &IntentApiRequest) -> Result<(), String> {
    if req.user_id <= 0 {
        return Err("user_id must be positive".to_string());
    }
    if req.session_id.trim().is_empty() {
        return Err("session_id must not be empty".to_string());
    }
    if req.amount_usd <= Decimal::ZERO {
        return Err("amount_usd must be greater than zero".to_string());
    }
    if req.expected_native_value <= 0 {
        return Err("expected_native_value must be positive".to_string());
    }
    if req.sender_address.trim().is_empty() {
        return Err("sender_address must not be empty".to_string());
    }
    Ok(())
}

/// POST /api/v1/deposit/intent
pub async fn create_intent(
    State(state): State<AppState>,
    Json(req): Json<IntentApiRequest>,
) -> (StatusCode, Json<ApiResponse<IntentApiResponse>>) {
    if let Err(msg) = validate(&req) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(error_codes::INVALID_PARAMETER, msg)),
        );
    }

    let intent = NewDepositIntent {
        user_id: req.user_id,
        session_id: req.session_id,
        amount_usd: req.amount_usd,
        sender_address: req.sender_address,
        expected_native_value: req.expected_native_value,
    };

    match state.intents.create(intent).await {
        Ok(created) => {
            let processed = created.is_processed();
            (
                StatusCode::OK,
                Json(ApiResponse::success(IntentApiResponse {
                    intent_id: created.id,
                    session_id: created.session_id,
                    amount_usd: created.amount_usd,
                    processed,
                })),
            )
        }
        Err(e) => reject(&e),
    }
}

fn reject(e: &DepositError) -> (StatusCode, Json<ApiResponse<IntentApiResponse>>) {
    (
        status_from_u16(e.http_status()),
        Json(ApiResponse::error(numeric_code(e.code()), e)),
    )
}
