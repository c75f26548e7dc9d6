use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

use crate::auth::OptionalAuthUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::checkout::{CheckoutRequest, CheckoutResponse};
use crate::ApiResponse;

/// Price a cart, persist the order and open a payment session
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Order created and session opened", body = ApiResponse<CheckoutResponse>),
        (status = 400, description = "Invalid cart or unavailable item", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider error", body = crate::errors::ErrorResponse),
        (status = 504, description = "Payment provider timed out", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    OptionalAuthUser(user): OptionalAuthUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResponse>>), ServiceError> {
    // Staff tokens carry non-customer subjects; those check out as guests.
    let customer_id = user.and_then(|u| u.customer_id().ok());
    let response = state.services.checkout.checkout(customer_id, request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(response))))
}

pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/", post(checkout))
}
