use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::StaffUser;
use crate::entities::{dining_table, table_hold};
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::{ApiResponse, ApiResult};

#[derive(Debug, Deserialize, IntoParams)]
pub struct AvailabilityParams {
    /// Window start (RFC 3339)
    pub start: DateTime<Utc>,
    /// Window end, exclusive (RFC 3339)
    pub end: DateTime<Utc>,
    pub party_size: i32,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct HoldTableRequest {
    /// Defaults to the configured turnover hold
    pub minutes: Option<i64>,
}

/// Tables free for the whole window that seat the party
#[utoipa::path(
    get,
    path = "/api/v1/tables/availability",
    params(AvailabilityParams),
    responses(
        (status = 200, description = "Available tables, smallest first", body = ApiResponse<Vec<dining_table::Model>>),
        (status = 400, description = "Invalid window or party size", body = crate::errors::ErrorResponse)
    ),
    tag = "Tables"
)]
pub async fn table_availability(
    State(state): State<AppState>,
    Query(params): Query<AvailabilityParams>,
) -> ApiResult<Vec<dining_table::Model>> {
    let tables = state
        .services
        .reservations
        .availability(params.start, params.end, params.party_size)
        .await?;
    Ok(Json(ApiResponse::success(tables)))
}

/// Hold a table from now, e.g. for a walk-in
#[utoipa::path(
    post,
    path = "/api/v1/tables/:id/hold",
    params(("id" = Uuid, Path, description = "Table ID")),
    request_body = HoldTableRequest,
    responses(
        (status = 201, description = "Table held", body = ApiResponse<table_hold::Model>),
        (status = 403, description = "Staff role required", body = crate::errors::ErrorResponse),
        (status = 409, description = "A reservation falls inside the hold", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Tables"
)]
pub async fn hold_table(
    State(state): State<AppState>,
    StaffUser(_staff): StaffUser,
    Path(table_id): Path<Uuid>,
    request: Option<Json<HoldTableRequest>>,
) -> Result<(StatusCode, Json<ApiResponse<table_hold::Model>>), ServiceError> {
    let minutes = request
        .and_then(|Json(body)| body.minutes)
        .unwrap_or(state.config.turnover_hold_minutes);
    let hold = state
        .services
        .reservations
        .hold_table(table_id, minutes)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(hold))))
}

pub fn table_routes() -> Router<AppState> {
    Router::new()
        .route("/availability", get(table_availability))
        .route("/:id/hold", post(hold_table))
}
