//! Invoice and webhook HTTP handlers.
//!
//! The webhook endpoint is the externally reachable surface the payment
//! gateway retries against; its status codes drive the gateway's retry
//! machine (2xx stops retries, anything else keeps them coming).

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::processor::WebhookOutcome;
use crate::gateway::{ApiResponse, AppState, error_codes, numeric_code, status_from_u16};
use crate::ledger::UserId;

#[derive(Debug, Deserialize)]
pub struct InvoiceApiRequest {
    pub user_id: UserId,
    pub amount_usd: Decimal,
}

#[derive(Debug, Serialize)]
pub struct InvoiceApiResponse {
    pub order_number: String,
    pub status: String,
    pub amount_usd: Decimal,
}

/// POST /api/v1/invoice
pub async fn create_invoice(
    State(state): State<AppState>,
    Json(req): Json<InvoiceApiRequest>,
) -> (StatusCode, Json<ApiResponse<InvoiceApiResponse>>) {
    if req.user_id <= 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                error_codes::INVALID_PARAMETER,
                "user_id must be positive",
            )),
        );
    }
    if req.amount_usd <= Decimal::ZERO {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                error_codes::INVALID_AMOUNT,
                "amount_usd must be greater than zero",
            )),
        );
    }

    match state.invoices.create(req.user_id, req.amount_usd).await {
        Ok(invoice) => (
            StatusCode::OK,
            Json(ApiResponse::success(InvoiceApiResponse {
                order_number: invoice.order_number,
                status: invoice.status.as_str().to_string(),
                amount_usd: invoice.amount_usd,
            })),
        ),
        Err(e) => (
            status_from_u16(e.http_status()),
            Json(ApiResponse::error(numeric_code(e.code()), e)),
        ),
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookApiResponse {
    pub outcome: &'static str,
}

fn outcome_label(outcome: WebhookOutcome) -> &'static str {
    match outcome {
        WebhookOutcome::Completed => "completed",
        WebhookOutcome::Replay => "replay",
        WebhookOutcome::MarkedFailed => "marked_failed",
        WebhookOutcome::Ignored => "ignored",
    }
}

/// POST /api/v1/webhook/gateway
///
/// 200 acknowledges the delivery (including replays). 401 for a bad
/// signature, 404 for an unknown invoice, 422 for a payload that verified
/// but cannot be applied, 5xx asks the gateway to retry.
pub async fn gateway_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<ApiResponse<WebhookApiResponse>>) {
    match state.webhooks.handle(payload).await {
        Ok(outcome) => {
            info!(outcome = outcome_label(outcome), "webhook applied");
            (
                StatusCode::OK,
                Json(ApiResponse::success(WebhookApiResponse {
                    outcome: outcome_label(outcome),
                })),
            )
        }
        Err(e) => {
            let status = status_from_u16(e.http_status());
            (
                status,
                Json(ApiResponse::error(numeric_code(e.code()), e)),
            )
        }
    }
}
