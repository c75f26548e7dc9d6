use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::webhooks::{SignatureHeader, WebhookOutcome};
use crate::ApiResponse;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub outcome: WebhookOutcome,
}

fn signature_header(headers: &HeaderMap) -> Option<SignatureHeader<'_>> {
    if let Some(value) = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        return Some(SignatureHeader::Stripe(value));
    }
    headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(SignatureHeader::Plain)
}

/// Provider webhook receiver
///
/// Acknowledges processed, duplicate and ignored events with 200. A bad
/// signature or payload is a 400; anything else is a 500 so the provider
/// retries.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted", body = ApiResponse<WebhookAck>),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorResponse),
        (status = 500, description = "Processing failed; provider should retry", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state
        .services
        .webhooks
        .handle(&body, signature_header(&headers))
        .await
    {
        Ok(outcome) => Json(ApiResponse::success(WebhookAck { outcome })).into_response(),
        Err(err @ (ServiceError::InvalidSignature(_) | ServiceError::BadRequest(_))) => {
            warn!(error = %err, "Payment webhook rejected");
            err.into_response()
        }
        Err(err) => {
            error!(error = %err, "Payment webhook processing failed");
            ServiceError::InternalError(err.to_string()).into_response()
        }
    }
}

pub fn payment_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook", post(payment_webhook))
}
