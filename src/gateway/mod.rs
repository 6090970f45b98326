//! HTTP Gateway
//!
//! Thin axum surface over the reconciliation modules. Handlers validate,
//! delegate, and wrap results in the standard `ApiResponse` envelope; all
//! business rules live below this layer.

pub mod state;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::Serialize;
use tracing::info;

pub use state::AppState;

/// Standard response envelope. `code` is 0 on success, a stable negative
/// error code otherwise.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            data: Some(data),
            msg: None,
        }
    }

    pub fn error(code: i32, msg: impl ToString) -> Self {
        Self {
            code,
            data: None,
            msg: Some(msg.to_string()),
        }
    }
}

/// Stable numeric error codes for API clients.
pub mod error_codes {
    pub const INVALID_PARAMETER: i32 = -1001;
    pub const INVALID_AMOUNT: i32 = -1002;
    pub const INVALID_ADDRESS: i32 = -1003;
    pub const SAME_ACCOUNT: i32 = -1004;
    pub const INSUFFICIENT_BALANCE: i32 = -2001;
    pub const UNAUTHORIZED: i32 = -4001;
    pub const SIGNATURE_INVALID: i32 = -4002;
    pub const NOT_FOUND: i32 = -6001;
    pub const SERVICE_UNAVAILABLE: i32 = -5001;
    pub const INTERNAL_ERROR: i32 = -9000;
}

pub fn status_from_u16(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Map a stable error code string to its numeric API code.
pub fn numeric_code(code: &str) -> i32 {
    match code {
        "UNAUTHORIZED" => error_codes::UNAUTHORIZED,
        "SIGNATURE_INVALID" => error_codes::SIGNATURE_INVALID,
        "SAME_ACCOUNT" => error_codes::SAME_ACCOUNT,
        "INVALID_AMOUNT" => error_codes::INVALID_AMOUNT,
        "INVALID_ADDRESS" => error_codes::INVALID_ADDRESS,
        "INSUFFICIENT_FUNDS" | "INSUFFICIENT_BALANCE" => error_codes::INSUFFICIENT_BALANCE,
        "UNKNOWN_INVOICE" | "SETTLEMENT_NOT_FOUND" => error_codes::NOT_FOUND,
        "EXTERNAL_UNAVAILABLE" | "PRICE_FEED_UNAVAILABLE" => error_codes::SERVICE_UNAVAILABLE,
        "MALFORMED_PAYLOAD" | "INVALID_INTENT" => error_codes::INVALID_PARAMETER,
        _ => error_codes::INTERNAL_ERROR,
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Build the full API surface.
pub fn build_router(state: AppState) -> Router {
    let api_v1 = Router::new()
        .route("/deposit/intent", post(crate::deposit::api::create_intent))
        .route("/invoice", post(crate::invoice::api::create_invoice))
        .route(
            "/webhook/gateway",
            post(crate::invoice::api::gateway_webhook),
        )
        .route("/transfer", post(crate::transfer::api::create_transfer))
        .route(
            "/settlement",
            post(crate::settlement::api::create_settlement),
        )
        .route(
            "/settlement/{id}",
            get(crate::settlement::api::get_settlement),
        )
        .route(
            "/operations/{user_id}",
            get(crate::ledger::api::list_operations),
        );

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1)
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
