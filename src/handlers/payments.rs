use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::entities::payment_intent;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::payments::CreateIntentRequest;
use crate::{ApiResponse, ApiResult};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, ServiceError> {
    match headers.get(IDEMPOTENCY_KEY_HEADER) {
        None => Ok(None),
        Some(value) => {
            let key = value
                .to_str()
                .map_err(|_| ServiceError::BadRequest("Idempotency-Key must be ASCII".to_string()))?
                .trim();
            if key.is_empty() || key.len() > 255 {
                return Err(ServiceError::BadRequest(
                    "Idempotency-Key must be 1-255 characters".to_string(),
                ));
            }
            Ok(Some(key.to_string()))
        }
    }
}

/// Create a provider payment intent
///
/// Retrying with the same `Idempotency-Key` returns the original intent.
#[utoipa::path(
    post,
    path = "/api/v1/payment-intents",
    request_body = CreateIntentRequest,
    params(("Idempotency-Key" = Option<String>, Header, description = "Client retry key")),
    responses(
        (status = 201, description = "Intent created", body = ApiResponse<payment_intent::Model>),
        (status = 200, description = "Existing intent for this key", body = ApiResponse<payment_intent::Model>),
        (status = 400, description = "Invalid amount or order state", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider error", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateIntentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<payment_intent::Model>>), ServiceError> {
    let key = idempotency_key(&headers)?;
    let (intent, created) = state.services.payments.create_intent(key, request).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ApiResponse::success(intent))))
}

/// Get a payment intent
#[utoipa::path(
    get,
    path = "/api/v1/payment-intents/:id",
    params(("id" = Uuid, Path, description = "Payment intent ID")),
    responses(
        (status = 200, description = "Payment intent", body = ApiResponse<payment_intent::Model>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn get_payment_intent(
    State(state): State<AppState>,
    Path(intent_id): Path<Uuid>,
) -> ApiResult<payment_intent::Model> {
    let intent = state.services.payments.get_intent(intent_id).await?;
    Ok(Json(ApiResponse::success(intent)))
}

pub fn payment_intent_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_payment_intent))
        .route("/:id", get(get_payment_intent))
}
