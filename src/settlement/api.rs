//! Settlement HTTP handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::SettlementError;
use super::types::{SettlementRecord, SettlementRequest};
use crate::gateway::{ApiResponse, AppState, numeric_code, status_from_u16};
use crate::ledger::UserId;

#[derive(Debug, Deserialize)]
pub struct SettlementApiRequest {
    pub user_id: UserId,
    pub amount_usd: Decimal,
    pub destination: String,
    pub cid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SettlementApiResponse {
    pub settlement_id: String,
    pub state: String,
    pub amount_usd: Decimal,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

impl From<SettlementRecord> for SettlementApiResponse {
    fn from(rec: SettlementRecord) -> Self {
        Self {
            settlement_id: rec.id,
            state: rec.state.as_str().to_string(),
            amount_usd: rec.amount_usd,
            tx_hash: rec.tx_hash,
            error: rec.error,
        }
    }
}

fn reject(e: &SettlementError) -> (StatusCode, Json<ApiResponse<SettlementApiResponse>>) {
    (
        status_from_u16(e.http_status()),
        Json(ApiResponse::error(numeric_code(e.code()), e)),
    )
}

/// POST /api/v1/settlement
///
/// Synchronous: the response carries the terminal state, CONFIRMED or the
/// error after compensation already restored the wallet.
pub async fn create_settlement(
    State(state): State<AppState>,
    Json(req): Json<SettlementApiRequest>,
) -> (StatusCode, Json<ApiResponse<SettlementApiResponse>>) {
    let core_req = SettlementRequest {
        user_id: req.user_id,
        amount_usd: req.amount_usd,
        destination: req.destination,
        cid: req.cid,
    };

    match state.broadcaster.submit(core_req).await {
        Ok(rec) => (StatusCode::OK, Json(ApiResponse::success(rec.into()))),
        Err(e) => reject(&e),
    }
}

/// GET /api/v1/settlement/{id}
pub async fn get_settlement(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<SettlementApiResponse>>) {
    match state.settlements.get(&id).await {
        Ok(Some(rec)) => (StatusCode::OK, Json(ApiResponse::success(rec.into()))),
        Ok(None) => reject(&SettlementError::NotFound(id)),
        Err(e) => reject(&e),
    }
}
