//! Journal audit listing.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use super::store::{UserId, WalletOperation};
use crate::gateway::{ApiResponse, AppState, error_codes};

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 500;

#[derive(Debug, Deserialize)]
pub struct OperationsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct OperationsResponse {
    pub user_id: UserId,
    pub operations: Vec<WalletOperation>,
}

/// GET /api/v1/operations/{user_id}
pub async fn list_operations(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<OperationsQuery>,
) -> (StatusCode, Json<ApiResponse<OperationsResponse>>) {
    if user_id <= 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                error_codes::INVALID_PARAMETER,
                "user_id must be positive",
            )),
        );
    }

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    match state.ledger.recent_operations(user_id, limit).await {
        Ok(operations) => (
            StatusCode::OK,
            Json(ApiResponse::success(OperationsResponse {
                user_id,
                operations,
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(error_codes::INTERNAL_ERROR, e)),
        ),
    }
}
