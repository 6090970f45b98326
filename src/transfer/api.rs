//! Transfer HTTP handlers.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::coordinator::{TransferRequest, TransferTarget};
use super::error::TransferError;
use crate::gateway::{ApiResponse, AppState, error_codes, numeric_code, status_from_u16};
use crate::ledger::UserId;

#[derive(Debug, Deserialize)]
pub struct TransferApiRequest {
    pub sender_id: UserId,
    /// Receiving user for a peer transfer; omitted for a core reinvestment.
    pub receiver_id: Option<UserId>,
    /// "peer" or "core".
    pub target: String,
    pub amount: Decimal,
    pub memo: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransferApiResponse {
    pub sender_balance: Decimal,
    pub receiver_balance: Decimal,
}

fn parse_target(req: &TransferApiRequest) -> Result<TransferTarget, String> {
    match req.target.as_str() {
        "peer" => {
            let receiver = req
                .receiver_id
                .filter(|id| *id > 0)
                .ok_or_else(|| "peer transfer requires a positive receiver_id".to_string())?;
            Ok(TransferTarget::PeerWallet(receiver))
        }
        "core" => Ok(TransferTarget::OwnCore),
        other => Err(format!("unknown target '{other}', use 'peer' or 'core'")),
    }
}

fn reject(e: &TransferError) -> (StatusCode, Json<ApiResponse<TransferApiResponse>>) {
    (
        status_from_u16(e.http_status()),
        Json(ApiResponse::error(numeric_code(e.code()), e)),
    )
}

/// POST /api/v1/transfer
pub async fn create_transfer(
    State(state): State<AppState>,
    Json(req): Json<TransferApiRequest>,
) -> (StatusCode, Json<ApiResponse<TransferApiResponse>>) {
    let target = match parse_target(&req) {
        Ok(t) => t,
        Err(msg) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(error_codes::INVALID_PARAMETER, msg)),
            );
        }
    };

    let core_req = TransferRequest {
        sender_id: req.sender_id,
        target,
        amount: req.amount,
        memo: req.memo,
    };

    match state.transfers.transfer(core_req).await {
        Ok(receipt) => (
            StatusCode::OK,
            Json(ApiResponse::success(TransferApiResponse {
                sender_balance: receipt.sender_balance,
                receiver_balance: receipt.receiver_balance,
            })),
        ),
        Err(e) => reject(&e),
    }
}
