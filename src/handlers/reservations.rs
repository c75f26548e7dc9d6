use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{AuthUser, StaffUser};
use crate::entities::reservation::{self, ReservationStatus};
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::reservations::{CreateReservationRequest, DepositCheckout};
use crate::ApiResponse;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateReservationStatusRequest {
    pub status: ReservationStatus,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DepositSuccessParams {
    /// Provider session id appended to the success redirect
    pub session_id: String,
}

/// Caller identity for ownership checks. Staff subjects need not be
/// customer ids.
fn caller_id(user: &AuthUser) -> Result<Uuid, ServiceError> {
    if user.is_staff() {
        Ok(user.customer_id().unwrap_or(Uuid::nil()))
    } else {
        user.customer_id()
    }
}

/// Book a table
#[utoipa::path(
    post,
    path = "/api/v1/reservations",
    request_body = CreateReservationRequest,
    responses(
        (status = 201, description = "Reservation created", body = ApiResponse<reservation::Model>),
        (status = 400, description = "Invalid window or party size", body = crate::errors::ErrorResponse),
        (status = 403, description = "Booking blocked by no-show policy", body = crate::errors::ErrorResponse),
        (status = 409, description = "Table already booked or guest at overlap limit", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Reservations"
)]
pub async fn create_reservation(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<reservation::Model>>), ServiceError> {
    let customer_id = user.customer_id()?;
    let created = state
        .services
        .reservations
        .create(customer_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// Get a reservation
#[utoipa::path(
    get,
    path = "/api/v1/reservations/:id",
    params(("id" = Uuid, Path, description = "Reservation ID")),
    responses(
        (status = 200, description = "Reservation", body = ApiResponse<reservation::Model>),
        (status = 403, description = "Reservation belongs to another guest", body = crate::errors::ErrorResponse),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Reservations"
)]
pub async fn get_reservation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<ApiResponse<reservation::Model>>, ServiceError> {
    let found = state.services.reservations.get(reservation_id).await?;
    if !user.is_staff() && user.customer_id()? != found.customer_id {
        return Err(ServiceError::Forbidden(
            "Reservation belongs to another guest".to_string(),
        ));
    }
    Ok(Json(ApiResponse::success(found)))
}

/// Move a reservation through its lifecycle
#[utoipa::path(
    post,
    path = "/api/v1/reservations/:id/status",
    params(("id" = Uuid, Path, description = "Reservation ID")),
    request_body = UpdateReservationStatusRequest,
    responses(
        (status = 200, description = "Reservation updated", body = ApiResponse<reservation::Model>),
        (status = 400, description = "Transition not allowed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Staff role required", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Reservations"
)]
pub async fn update_reservation_status(
    State(state): State<AppState>,
    StaffUser(_staff): StaffUser,
    Path(reservation_id): Path<Uuid>,
    Json(request): Json<UpdateReservationStatusRequest>,
) -> Result<Json<ApiResponse<reservation::Model>>, ServiceError> {
    let updated = state
        .services
        .reservations
        .transition_status(reservation_id, request.status)
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}

/// Open a checkout session for the reservation deposit
#[utoipa::path(
    post,
    path = "/api/v1/reservations/:id/deposit",
    params(("id" = Uuid, Path, description = "Reservation ID")),
    responses(
        (status = 200, description = "Deposit session opened", body = ApiResponse<DepositCheckout>),
        (status = 400, description = "No deposit owed", body = crate::errors::ErrorResponse),
        (status = 409, description = "Deposit already paid", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Reservations"
)]
pub async fn start_deposit(
    State(state): State<AppState>,
    user: AuthUser,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<ApiResponse<DepositCheckout>>, ServiceError> {
    let checkout = state
        .services
        .reservations
        .start_deposit_checkout(reservation_id, caller_id(&user)?, user.is_staff())
        .await?;
    Ok(Json(ApiResponse::success(checkout)))
}

/// Success redirect target for the deposit session
///
/// The session is verified with the provider before the deposit is marked
/// paid.
#[utoipa::path(
    get,
    path = "/api/v1/reservations/:id/deposit/success",
    params(
        ("id" = Uuid, Path, description = "Reservation ID"),
        DepositSuccessParams
    ),
    responses(
        (status = 200, description = "Deposit recorded", body = ApiResponse<reservation::Model>),
        (status = 400, description = "Session unknown or unpaid", body = crate::errors::ErrorResponse)
    ),
    tag = "Reservations"
)]
pub async fn deposit_success(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
    Query(params): Query<DepositSuccessParams>,
) -> Result<Json<ApiResponse<reservation::Model>>, ServiceError> {
    let updated = state
        .services
        .reservations
        .complete_deposit_checkout(reservation_id, params.session_id.trim())
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}

pub fn reservation_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_reservation))
        .route("/:id", get(get_reservation))
        .route("/:id/status", post(update_reservation_status))
        .route("/:id/deposit", post(start_deposit))
        .route("/:id/deposit/success", get(deposit_success))
}
