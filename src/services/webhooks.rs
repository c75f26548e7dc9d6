use chrono::Utc;
use hmac::{Hmac, Mac};
use metrics::counter;
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::order::{Entity as OrderEntity, OrderStatus};
use crate::entities::payment_intent::IntentStatus;
use crate::entities::webhook_event::{self, Entity as WebhookEventEntity};
use crate::errors::ServiceError;
use crate::services::payment_provider::{
    KIND_RESERVATION_DEPOSIT, METADATA_KIND, METADATA_ORDER_ID, METADATA_RESERVATION_ID,
};
use crate::services::payments::{PaymentService, PaymentSource, ProviderRefs, Transition};
use crate::services::reservations::ReservationService;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a `stripe-signature` timestamp.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Signature header as received.
#[derive(Debug, Clone, Copy)]
pub enum SignatureHeader<'a> {
    /// `x-signature: [sha256=]<hex>` over the raw body
    Plain(&'a str),
    /// `stripe-signature: t=<ts>,v1=<hex>` over `"<ts>.<body>"`
    Stripe(&'a str),
}

fn mac_for(secret: &str) -> Result<HmacSha256, ServiceError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::InternalError("invalid webhook secret".to_string()))
}

fn invalid(reason: &str) -> ServiceError {
    ServiceError::InvalidSignature(reason.to_string())
}

/// Constant-time HMAC-SHA256 check of the raw request body.
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    header: SignatureHeader<'_>,
) -> Result<(), ServiceError> {
    match header {
        SignatureHeader::Plain(value) => {
            let value = value.trim();
            let hex_sig = value.strip_prefix("sha256=").unwrap_or(value);
            let expected = hex::decode(hex_sig).map_err(|_| invalid("signature is not hex"))?;
            let mut mac = mac_for(secret)?;
            mac.update(body);
            mac.verify_slice(&expected)
                .map_err(|_| invalid("signature mismatch"))
        }
        SignatureHeader::Stripe(value) => {
            let mut timestamp = None;
            let mut candidates = Vec::new();
            for part in value.split(',') {
                let part = part.trim();
                if let Some(t) = part.strip_prefix("t=") {
                    timestamp = Some(t);
                } else if let Some(v) = part.strip_prefix("v1=") {
                    candidates.push(v);
                }
            }
            let timestamp = timestamp.ok_or_else(|| invalid("missing timestamp"))?;
            if candidates.is_empty() {
                return Err(invalid("missing v1 signature"));
            }
            let ts: i64 = timestamp.parse().map_err(|_| invalid("bad timestamp"))?;
            if (Utc::now().timestamp() - ts).abs() > SIGNATURE_TOLERANCE_SECS {
                return Err(invalid("timestamp outside tolerance"));
            }

            let matched = candidates.into_iter().any(|candidate| {
                let Ok(expected) = hex::decode(candidate) else {
                    return false;
                };
                let Ok(mut mac) = mac_for(secret) else {
                    return false;
                };
                mac.update(timestamp.as_bytes());
                mac.update(b".");
                mac.update(body);
                mac.verify_slice(&expected).is_ok()
            });
            if matched {
                Ok(())
            } else {
                Err(invalid("signature mismatch"))
            }
        }
    }
}

/// Hex HMAC-SHA256 of `body`, as sent in `x-signature`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, ServiceError> {
    let mut mac = mac_for(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Minimal view of a provider event.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEvent {
    pub id: String,
    pub event_type: String,
    pub object: serde_json::Value,
}

impl ProviderEvent {
    fn object_str(&self, key: &str) -> Option<&str> {
        self.object.get(key).and_then(|v| v.as_str())
    }

    fn metadata(&self, key: &str) -> Option<&str> {
        self.object
            .get("metadata")
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
    }

    fn metadata_uuid(&self, key: &str) -> Option<Uuid> {
        self.metadata(key).and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

pub fn parse_event(body: &[u8]) -> Result<ProviderEvent, ServiceError> {
    let raw: RawEvent = serde_json::from_slice(body)
        .map_err(|e| ServiceError::BadRequest(format!("Malformed webhook payload: {}", e)))?;
    if raw.id.trim().is_empty() {
        return Err(ServiceError::BadRequest("Webhook event has no id".to_string()));
    }
    Ok(ProviderEvent {
        id: raw.id,
        event_type: raw.event_type,
        object: raw.data.object,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed,
    Duplicate,
    Ignored,
}

impl WebhookOutcome {
    fn label(self) -> &'static str {
        match self {
            WebhookOutcome::Processed => "processed",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
        }
    }
}

/// Verifies, records and routes provider webhooks.
#[derive(Clone)]
pub struct WebhookService {
    db: Arc<DatabaseConnection>,
    payments: Arc<PaymentService>,
    reservations: Arc<ReservationService>,
    secret: Option<String>,
}

impl WebhookService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        payments: Arc<PaymentService>,
        reservations: Arc<ReservationService>,
        secret: Option<String>,
    ) -> Self {
        Self {
            db,
            payments,
            reservations,
            secret: secret.filter(|s| !s.trim().is_empty()),
        }
    }

    /// Full webhook pipeline. Nothing is written before the signature and
    /// payload are accepted; a processed event id is never routed twice.
    #[instrument(skip(self, body, header), fields(bytes = body.len()))]
    pub async fn handle(
        &self,
        body: &[u8],
        header: Option<SignatureHeader<'_>>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let result = self.verify_and_route(body, header).await;
        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(ServiceError::InvalidSignature(_)) => "invalid_signature",
            Err(ServiceError::BadRequest(_)) => "bad_payload",
            Err(_) => "error",
        };
        counter!("bistro.webhooks.received", 1, "outcome" => label);
        result
    }

    async fn verify_and_route(
        &self,
        body: &[u8],
        header: Option<SignatureHeader<'_>>,
    ) -> Result<WebhookOutcome, ServiceError> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| invalid("webhook secret not configured"))?;
        let header = header.ok_or_else(|| invalid("missing signature header"))?;
        verify_signature(secret, body, header)?;

        let event = parse_event(body)?;
        let record = self.record_event(&event).await?;
        if record.processed {
            debug!(event_id = %event.id, "Duplicate webhook ignored");
            return Ok(WebhookOutcome::Duplicate);
        }

        match self.route(&event).await {
            Ok(outcome) => {
                WebhookEventEntity::update_many()
                    .col_expr(webhook_event::Column::Processed, Expr::value(true))
                    .col_expr(webhook_event::Column::ProcessedAt, Expr::value(Utc::now()))
                    .col_expr(
                        webhook_event::Column::Attempts,
                        Expr::col(webhook_event::Column::Attempts).add(1),
                    )
                    .col_expr(
                        webhook_event::Column::LastError,
                        Expr::value(Option::<String>::None),
                    )
                    .filter(webhook_event::Column::Id.eq(record.id))
                    .exec(&*self.db)
                    .await?;
                info!(event_id = %event.id, event_type = %event.event_type, outcome = outcome.label(), "Webhook handled");
                Ok(outcome)
            }
            Err(err) => {
                warn!(event_id = %event.id, event_type = %event.event_type, error = %err, "Webhook processing failed");
                WebhookEventEntity::update_many()
                    .col_expr(
                        webhook_event::Column::Attempts,
                        Expr::col(webhook_event::Column::Attempts).add(1),
                    )
                    .col_expr(
                        webhook_event::Column::LastError,
                        Expr::value(Some(err.to_string())),
                    )
                    .filter(webhook_event::Column::Id.eq(record.id))
                    .exec(&*self.db)
                    .await?;
                Err(err)
            }
        }
    }

    /// Creates the event record if it does not exist yet and returns it.
    async fn record_event(&self, event: &ProviderEvent) -> Result<webhook_event::Model, ServiceError> {
        let model = webhook_event::ActiveModel {
            id: Set(Uuid::new_v4()),
            event_id: Set(event.id.clone()),
            event_type: Set(event.event_type.clone()),
            processed: Set(false),
            attempts: Set(0),
            last_error: Set(None),
            processed_at: Set(None),
            created_at: Set(Utc::now()),
        };
        WebhookEventEntity::insert(model)
            .on_conflict(
                OnConflict::column(webhook_event::Column::EventId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        self.find_event(&event.id)
            .await?
            .ok_or_else(|| ServiceError::InternalError(format!("Webhook event {} not recorded", event.id)))
    }

    pub async fn find_event(&self, event_id: &str) -> Result<Option<webhook_event::Model>, ServiceError> {
        Ok(WebhookEventEntity::find()
            .filter(webhook_event::Column::EventId.eq(event_id))
            .one(&*self.db)
            .await?)
    }

    async fn route(&self, event: &ProviderEvent) -> Result<WebhookOutcome, ServiceError> {
        match event.event_type.as_str() {
            "payment_intent.succeeded" => self.intent_succeeded(event).await,
            "payment_intent.payment_failed" => self.intent_failed(event).await,
            "payment_intent.canceled" => self.intent_canceled(event).await,
            "payment_intent.processing" => self.intent_progress(event, IntentStatus::Processing).await,
            "payment_intent.requires_action" => {
                self.intent_progress(event, IntentStatus::RequiresAction).await
            }
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                self.session_completed(event).await
            }
            "checkout.session.expired" => self.session_expired(event).await,
            "checkout.session.async_payment_failed" => self.session_payment_failed(event).await,
            other => {
                debug!(event_type = other, "Unhandled webhook type acknowledged");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    fn source(event: &ProviderEvent) -> PaymentSource {
        PaymentSource::Webhook {
            event_id: event.id.clone(),
        }
    }

    /// Order referenced by an intent event, via the local intent or metadata.
    async fn intent_order(&self, event: &ProviderEvent) -> Result<Option<Uuid>, ServiceError> {
        if let Some(order_id) = event.metadata_uuid(METADATA_ORDER_ID) {
            return Ok(Some(order_id));
        }
        let Some(intent_id) = event.object_str("id") else {
            return Ok(None);
        };
        Ok(self
            .payments
            .find_intent_by_provider_id(intent_id)
            .await?
            .and_then(|intent| intent.order_id))
    }

    async fn intent_succeeded(&self, event: &ProviderEvent) -> Result<WebhookOutcome, ServiceError> {
        let intent_id = event.object_str("id").map(String::from);
        if let Some(id) = intent_id.as_deref() {
            self.payments
                .advance_intent(id, IntentStatus::Succeeded, Some(&event.id))
                .await?;
        }
        let Some(order_id) = self.intent_order(event).await? else {
            return Ok(WebhookOutcome::Ignored);
        };
        let refs = ProviderRefs {
            session_id: None,
            intent_id,
        };
        self.pay_order(event, order_id, refs).await
    }

    async fn pay_order(
        &self,
        event: &ProviderEvent,
        order_id: Uuid,
        refs: ProviderRefs,
    ) -> Result<WebhookOutcome, ServiceError> {
        match self.payments.mark_paid(order_id, Self::source(event), refs).await {
            Ok(Transition::Applied) => Ok(WebhookOutcome::Processed),
            Ok(Transition::Unchanged) => Ok(WebhookOutcome::Ignored),
            Err(ServiceError::NotFound(msg)) => {
                warn!(event_id = %event.id, %msg, "Webhook references unknown order");
                Ok(WebhookOutcome::Ignored)
            }
            Err(err) => Err(err),
        }
    }

    /// A declined attempt. The customer may retry on the same intent, so the
    /// order stays `created`; only the intent's attempt counter moves.
    async fn intent_failed(&self, event: &ProviderEvent) -> Result<WebhookOutcome, ServiceError> {
        if let Some(id) = event.object_str("id") {
            self.payments
                .record_intent_failure(id, Some(&event.id))
                .await?;
        }
        let Some(order_id) = self.intent_order(event).await? else {
            return Ok(WebhookOutcome::Ignored);
        };
        let reason = event
            .object
            .get("last_payment_error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("payment failed");
        match OrderEntity::find_by_id(order_id).one(&*self.db).await? {
            Some(order) if order.status == OrderStatus::Created => {
                info!(%order_id, reason, "Payment attempt declined; order stays open");
                Ok(WebhookOutcome::Processed)
            }
            _ => Ok(WebhookOutcome::Ignored),
        }
    }

    /// Terminal session failure (delayed payment methods).
    async fn session_payment_failed(
        &self,
        event: &ProviderEvent,
    ) -> Result<WebhookOutcome, ServiceError> {
        if event.metadata(METADATA_KIND) == Some(KIND_RESERVATION_DEPOSIT) {
            return Ok(WebhookOutcome::Ignored);
        }
        let Some(order_id) = Self::session_order(event) else {
            return Ok(WebhookOutcome::Ignored);
        };
        match self
            .payments
            .mark_failed(order_id, "asynchronous payment failed")
            .await
        {
            Ok(Transition::Applied) => Ok(WebhookOutcome::Processed),
            Ok(Transition::Unchanged) | Err(ServiceError::NotFound(_)) => Ok(WebhookOutcome::Ignored),
            Err(err) => Err(err),
        }
    }

    async fn cancel_order(&self, order_id: Uuid) -> Result<WebhookOutcome, ServiceError> {
        match self.payments.cancel(order_id).await {
            Ok(Transition::Applied) => Ok(WebhookOutcome::Processed),
            Ok(Transition::Unchanged) => Ok(WebhookOutcome::Ignored),
            Err(ServiceError::InvalidStatus(msg)) | Err(ServiceError::NotFound(msg)) => {
                debug!(%order_id, %msg, "Cancellation not applicable");
                Ok(WebhookOutcome::Ignored)
            }
            Err(err) => Err(err),
        }
    }

    async fn intent_canceled(&self, event: &ProviderEvent) -> Result<WebhookOutcome, ServiceError> {
        if let Some(id) = event.object_str("id") {
            self.payments
                .advance_intent(id, IntentStatus::Canceled, Some(&event.id))
                .await?;
        }
        match self.intent_order(event).await? {
            Some(order_id) => self.cancel_order(order_id).await,
            None => Ok(WebhookOutcome::Processed),
        }
    }

    async fn intent_progress(
        &self,
        event: &ProviderEvent,
        next: IntentStatus,
    ) -> Result<WebhookOutcome, ServiceError> {
        let Some(id) = event.object_str("id") else {
            return Ok(WebhookOutcome::Ignored);
        };
        match self.payments.advance_intent(id, next, Some(&event.id)).await? {
            Some((_, Transition::Applied)) => Ok(WebhookOutcome::Processed),
            _ => Ok(WebhookOutcome::Ignored),
        }
    }

    fn session_order(event: &ProviderEvent) -> Option<Uuid> {
        event
            .metadata_uuid(METADATA_ORDER_ID)
            .or_else(|| {
                event
                    .object_str("client_reference_id")
                    .and_then(|s| Uuid::parse_str(s).ok())
            })
    }

    async fn session_completed(&self, event: &ProviderEvent) -> Result<WebhookOutcome, ServiceError> {
        let session_id = event.object_str("id").map(String::from);
        if event.object_str("payment_status") != Some("paid") {
            debug!(event_id = %event.id, "Session completed without payment yet");
            return Ok(WebhookOutcome::Ignored);
        }

        if event.metadata(METADATA_KIND) == Some(KIND_RESERVATION_DEPOSIT) {
            let Some(reservation_id) = event.metadata_uuid(METADATA_RESERVATION_ID) else {
                return Ok(WebhookOutcome::Ignored);
            };
            let applied = self
                .reservations
                .mark_deposit_paid(reservation_id, session_id.as_deref())
                .await?;
            return Ok(if applied {
                WebhookOutcome::Processed
            } else {
                WebhookOutcome::Ignored
            });
        }

        let Some(order_id) = Self::session_order(event) else {
            return Ok(WebhookOutcome::Ignored);
        };
        let refs = ProviderRefs {
            session_id,
            intent_id: event.object_str("payment_intent").map(String::from),
        };
        self.pay_order(event, order_id, refs).await
    }

    async fn session_expired(&self, event: &ProviderEvent) -> Result<WebhookOutcome, ServiceError> {
        if event.metadata(METADATA_KIND) == Some(KIND_RESERVATION_DEPOSIT) {
            return Ok(WebhookOutcome::Ignored);
        }
        match Self::session_order(event) {
            Some(order_id) => self.cancel_order(order_id).await,
            None => Ok(WebhookOutcome::Ignored),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    const SECRET: &str = "whsec_test";

    fn stripe_header(secret: &str, ts: i64, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.", ts).as_bytes());
        mac.update(body);
        format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn plain_signature_accepts_optional_prefix() {
        let body = br#"{"id":"evt_1"}"#;
        let sig = sign_payload(SECRET, body).unwrap();
        assert!(verify_signature(SECRET, body, SignatureHeader::Plain(&sig)).is_ok());
        let prefixed = format!("sha256={}", sig);
        assert!(verify_signature(SECRET, body, SignatureHeader::Plain(&prefixed)).is_ok());
    }

    #[test]
    fn tampered_body_or_wrong_secret_is_rejected() {
        let body = br#"{"id":"evt_1"}"#;
        let sig = sign_payload(SECRET, body).unwrap();
        assert_matches!(
            verify_signature(SECRET, br#"{"id":"evt_2"}"#, SignatureHeader::Plain(&sig)),
            Err(ServiceError::InvalidSignature(_))
        );
        assert_matches!(
            verify_signature("other", body, SignatureHeader::Plain(&sig)),
            Err(ServiceError::InvalidSignature(_))
        );
        assert_matches!(
            verify_signature(SECRET, body, SignatureHeader::Plain("not-hex")),
            Err(ServiceError::InvalidSignature(_))
        );
    }

    #[test]
    fn stripe_header_is_checked_with_timestamp() {
        let body = br#"{"id":"evt_1"}"#;
        let now = Utc::now().timestamp();
        let header = stripe_header(SECRET, now, body);
        assert!(verify_signature(SECRET, body, SignatureHeader::Stripe(&header)).is_ok());

        let stale = stripe_header(SECRET, now - 3_600, body);
        assert_matches!(
            verify_signature(SECRET, body, SignatureHeader::Stripe(&stale)),
            Err(ServiceError::InvalidSignature(_))
        );
        assert_matches!(
            verify_signature(SECRET, body, SignatureHeader::Stripe("t=1")),
            Err(ServiceError::InvalidSignature(_))
        );
    }

    #[test]
    fn parse_event_extracts_object() {
        let body = json!({
            "id": "evt_123",
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi_1", "metadata": {"order_id": "abc"}}}
        })
        .to_string();
        let event = parse_event(body.as_bytes()).unwrap();
        assert_eq!(event.id, "evt_123");
        assert_eq!(event.object_str("id"), Some("pi_1"));
        assert_eq!(event.metadata("order_id"), Some("abc"));
        assert_eq!(event.metadata_uuid("order_id"), None);
    }

    #[test]
    fn malformed_payload_is_a_bad_request() {
        assert_matches!(parse_event(b"not json"), Err(ServiceError::BadRequest(_)));
        assert_matches!(
            parse_event(br#"{"id":"","type":"x","data":{"object":{}}}"#),
            Err(ServiceError::BadRequest(_))
        );
    }
}
