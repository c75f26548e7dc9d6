use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OptionalAuthUser, StaffUser};
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::orders::OrderSnapshot;
use crate::services::payments::{PaymentSource, ProviderRefs, Transition};
use crate::ApiResponse;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderTransitionResponse {
    pub transition: Transition,
    pub order: OrderSnapshot,
}

/// Get an order with its items and extras ledger
#[utoipa::path(
    get,
    path = "/api/v1/orders/:id",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order snapshot", body = ApiResponse<OrderSnapshot>),
        (status = 403, description = "Order belongs to another guest", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    OptionalAuthUser(user): OptionalAuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderSnapshot>>, ServiceError> {
    let snapshot = state.services.orders.get_snapshot(order_id).await?;

    // Guest-checkout orders are readable by id; owned orders need the owner or staff.
    if let Some(owner) = snapshot.order.customer_id {
        let allowed = user.as_ref().is_some_and(|u| {
            u.is_staff() || u.customer_id().map_or(false, |id| id == owner)
        });
        if !allowed {
            return Err(ServiceError::Forbidden(
                "Order belongs to another guest".to_string(),
            ));
        }
    }

    Ok(Json(ApiResponse::success(snapshot)))
}

/// Record a cash or card-terminal payment taken by staff
#[utoipa::path(
    post,
    path = "/api/v1/orders/:id/offline-payment",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order paid (or already paid)", body = ApiResponse<OrderTransitionResponse>),
        (status = 403, description = "Staff role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn record_offline_payment(
    State(state): State<AppState>,
    StaffUser(staff): StaffUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderTransitionResponse>>, ServiceError> {
    let transition = state
        .services
        .payments
        .mark_paid(
            order_id,
            PaymentSource::Offline {
                staff_id: staff.user_id.clone(),
            },
            ProviderRefs::default(),
        )
        .await?;
    info!(%order_id, staff_id = %staff.user_id, ?transition, "Offline payment recorded");

    let order = state.services.orders.get_snapshot(order_id).await?;
    Ok(Json(ApiResponse::success(OrderTransitionResponse {
        transition,
        order,
    })))
}

/// Cancel an unpaid order
#[utoipa::path(
    post,
    path = "/api/v1/orders/:id/cancel",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order cancelled (or already cancelled)", body = ApiResponse<OrderTransitionResponse>),
        (status = 400, description = "Order already paid or failed", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    StaffUser(_staff): StaffUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderTransitionResponse>>, ServiceError> {
    let transition = state.services.payments.cancel(order_id).await?;
    let order = state.services.orders.get_snapshot(order_id).await?;
    Ok(Json(ApiResponse::success(OrderTransitionResponse {
        transition,
        order,
    })))
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_order))
        .route("/:id/offline-payment", post(record_offline_payment))
        .route("/:id/cancel", post(cancel_order))
}
