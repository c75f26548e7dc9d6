mod common;

use axum::http::{Method, StatusCode};
use std::sync::Arc;

use bistro_api::entities::reservation::ReservationStatus;
use bistro_api::entities::{coupon, invoice, menu_item, order, order::OrderStatus, webhook_event};
use bistro_api::services::payment_provider::SimulatedProvider;
use bistro_api::services::reservations::CreateReservationRequest;
use bistro_api::message_queue::Job;
use bistro_api::services::payments::{PaymentSource, ProviderRefs, Transition};
use bistro_api::services::webhooks::{sign_payload, SignatureHeader, WebhookOutcome};
use chrono::{Duration, Utc};
use common::{cart_line, json_body, test_config, TestApp, WEBHOOK_SECRET};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use serde_json::json;
use uuid::Uuid;

async fn open_order(app: &TestApp, item: &menu_item::Model, quantity: i64) -> Uuid {
    let (status, body) = json_body(
        app.request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({
                "items": [cart_line(item.id, quantity)],
                "tip_cents": 0,
                "delivery_mode": "takeaway"
            })),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["order"]["order"]["status"], "created");
    body["data"]["order"]["order"]["id"]
        .as_str()
        .and_then(|id| Uuid::parse_str(id).ok())
        .expect("order id")
}

fn succeeded_event(event_id: &str, order_id: Uuid) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "data": {
            "object": {
                "id": "pi_test_1",
                "metadata": { "order_id": order_id.to_string(), "kind": "order" }
            }
        }
    }))
    .unwrap()
}

fn session_event(event_id: &str, kind: &str, object: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": kind,
        "data": { "object": object }
    }))
    .unwrap()
}

async fn status_of(app: &TestApp, order_id: Uuid) -> OrderStatus {
    order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
        .status
}

fn signature(body: &[u8]) -> String {
    format!("sha256={}", sign_payload(WEBHOOK_SECRET, body).unwrap())
}

async fn stock_of(app: &TestApp, id: Uuid) -> Option<i32> {
    menu_item::Entity::find_by_id(id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .and_then(|item| item.stock_quantity)
}

#[tokio::test]
async fn duplicate_success_webhook_pays_once_and_decrements_stock_once() {
    let app = TestApp::pending().await;
    let item = app.seed_menu_item("Ramen", 1_200, Some(10)).await;
    let order_id = open_order(&app, &item, 2).await;
    assert_eq!(stock_of(&app, item.id).await, Some(10));

    let body = succeeded_event("evt_1", order_id);
    let sig = signature(&body);

    let (status, ack) = json_body(app.post_webhook(&body, &sig).await).await;
    assert_eq!(status, StatusCode::OK, "{ack}");
    assert_eq!(ack["data"]["outcome"], "processed");

    let (status, ack) = json_body(app.post_webhook(&body, &sig).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["data"]["outcome"], "duplicate");

    // A different event reporting the same payment changes nothing either.
    let replay = succeeded_event("evt_2", order_id);
    let (status, ack) = json_body(app.post_webhook(&replay, &signature(&replay)).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["data"]["outcome"], "ignored");

    let paid = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    assert!(paid.stock_committed);
    assert_eq!(paid.provider_intent_id.as_deref(), Some("pi_test_1"));
    assert_eq!(stock_of(&app, item.id).await, Some(8));

    let invoices = invoice::Entity::find()
        .filter(invoice::Column::OrderId.eq(order_id))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(invoices, 1);

    let receipts = app
        .queue
        .snapshot()
        .await
        .into_iter()
        .filter(|job| matches!(job, Job::SendReceipt { .. }))
        .count();
    assert_eq!(receipts, 1);
}

#[tokio::test]
async fn concurrent_duplicate_deliveries_apply_one_transition() {
    let app = TestApp::pending().await;
    let item = app.seed_menu_item("Ramen", 1_200, Some(5)).await;
    let order_id = open_order(&app, &item, 1).await;

    let body = succeeded_event("evt_race", order_id);
    let sig = signature(&body);
    let webhooks = app.state.services.webhooks.clone();
    let header = SignatureHeader::Plain(&sig);

    let (first, second) = tokio::join!(
        webhooks.handle(&body, Some(header)),
        webhooks.handle(&body, Some(header)),
    );
    let outcomes = [first.unwrap(), second.unwrap()];
    let processed = outcomes
        .iter()
        .filter(|o| **o == WebhookOutcome::Processed)
        .count();
    assert_eq!(processed, 1, "{outcomes:?}");
    assert_eq!(stock_of(&app, item.id).await, Some(4));
}

#[tokio::test]
async fn bad_signature_is_rejected_before_anything_is_recorded() {
    let app = TestApp::pending().await;
    let item = app.seed_menu_item("Ramen", 1_200, None).await;
    let order_id = open_order(&app, &item, 1).await;

    let body = succeeded_event("evt_forged", order_id);
    let forged = format!("sha256={}", sign_payload("not-the-secret", &body).unwrap());

    let (status, err) = json_body(app.post_webhook(&body, &forged).await).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["details"], "invalid_signature");

    let recorded = webhook_event::Entity::find()
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(recorded, 0);
    let order = app.state.services.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Created);
}

#[tokio::test]
async fn malformed_payload_with_valid_signature_is_a_bad_request() {
    let app = TestApp::pending().await;
    let body = br#"{"not":"an event"}"#;

    let response = app.post_webhook(body, &signature(body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let recorded = webhook_event::Entity::find()
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(recorded, 0);
}

#[tokio::test]
async fn webhook_for_unknown_order_is_acknowledged() {
    let app = TestApp::pending().await;
    let body = succeeded_event("evt_orphan", Uuid::new_v4());

    let (status, ack) = json_body(app.post_webhook(&body, &signature(&body)).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["data"]["outcome"], "ignored");
}

#[tokio::test]
async fn mark_paid_is_idempotent_and_redeems_coupon_once() {
    let app = TestApp::pending().await;
    let customer = app.seed_customer(None).await;
    let promo = app.seed_fixed_coupon("TENOFF", 1_000).await;
    let item = app.seed_menu_item("Set menu", 4_000, None).await;

    let (status, body) = json_body(
        app.request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({
                "items": [cart_line(item.id, 1)],
                "tip_cents": 500,
                "coupon_code": "TENOFF",
                "delivery_mode": "takeaway"
            })),
            Some(&app.customer_token(customer.id)),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let order_id = Uuid::parse_str(body["data"]["order"]["order"]["id"].as_str().unwrap()).unwrap();

    let payments = app.state.services.payments.clone();
    let first = payments
        .mark_paid(order_id, PaymentSource::Simulation, ProviderRefs::default())
        .await
        .unwrap();
    let second = payments
        .mark_paid(order_id, PaymentSource::Simulation, ProviderRefs::default())
        .await
        .unwrap();
    assert_eq!(first, Transition::Applied);
    assert_eq!(second, Transition::Unchanged);

    let snapshot = app.state.services.orders.get_snapshot(order_id).await.unwrap();
    assert_eq!(snapshot.order.status, OrderStatus::Paid);
    assert_eq!(snapshot.order.total_cents, 3_500);
    assert_eq!(snapshot.extra("tip"), 500);
    assert_eq!(snapshot.extra("coupon_discount"), 1_000);
    assert_eq!(snapshot.extra("final_total_excl_tip"), 3_000);

    let redeemed = coupon::Entity::find_by_id(promo.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(redeemed.times_used, 1);

    let invoice = app
        .state
        .services
        .invoices
        .find_for_order(order_id)
        .await
        .unwrap()
        .expect("invoice issued");
    assert_eq!(invoice.total_cents, 3_500);
}

#[tokio::test]
async fn offline_payment_requires_staff_and_is_idempotent() {
    let app = TestApp::pending().await;
    let customer = app.seed_customer(None).await;
    let item = app.seed_menu_item("Ramen", 1_200, None).await;
    let order_id = open_order(&app, &item, 1).await;
    let uri = format!("/api/v1/orders/{}/offline-payment", order_id);

    let response = app.request(Method::POST, &uri, None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::POST, &uri, None, Some(&app.customer_token(customer.id)))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let staff = app.staff_token();
    let (status, body) = json_body(app.request(Method::POST, &uri, None, Some(&staff)).await).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["transition"], "applied");
    assert_eq!(body["data"]["order"]["order"]["status"], "paid");
    assert_eq!(
        body["data"]["order"]["order"]["metadata"]["offline_payment"]["staff_id"],
        "staff-1"
    );

    let (status, body) = json_body(app.request(Method::POST, &uri, None, Some(&staff)).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["transition"], "unchanged");
}

#[tokio::test]
async fn paid_orders_cannot_be_cancelled() {
    let app = TestApp::pending().await;
    let item = app.seed_menu_item("Ramen", 1_200, None).await;
    let open = open_order(&app, &item, 1).await;
    let paid = open_order(&app, &item, 1).await;
    app.state
        .services
        .payments
        .mark_paid(paid, PaymentSource::Simulation, ProviderRefs::default())
        .await
        .unwrap();
    let staff = app.staff_token();

    let response = app
        .request(Method::POST, &format!("/api/v1/orders/{}/cancel", open), None, Some(&staff))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(Method::POST, &format!("/api/v1/orders/{}/cancel", paid), None, Some(&staff))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Late success for a cancelled order is ignored.
    let body = succeeded_event("evt_late", open);
    let (status, ack) = json_body(app.post_webhook(&body, &signature(&body)).await).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["data"]["outcome"], "ignored");
    let order = app.state.services.orders.get_order(open).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn declined_attempt_keeps_order_open_for_a_later_success() {
    let app = TestApp::pending().await;
    let item = app.seed_menu_item("Ramen", 1_200, Some(5)).await;
    let order_id = open_order(&app, &item, 1).await;

    let declined = serde_json::to_vec(&json!({
        "id": "evt_decline",
        "type": "payment_intent.payment_failed",
        "data": {
            "object": {
                "id": "pi_test_1",
                "metadata": { "order_id": order_id.to_string(), "kind": "order" },
                "last_payment_error": { "message": "Your card was declined." }
            }
        }
    }))
    .unwrap();
    let (status, ack) = json_body(app.post_webhook(&declined, &signature(&declined)).await).await;
    assert_eq!(status, StatusCode::OK, "{ack}");
    assert_eq!(ack["data"]["outcome"], "processed");
    assert_eq!(status_of(&app, order_id).await, OrderStatus::Created);
    assert_eq!(stock_of(&app, item.id).await, Some(5));

    let retried = succeeded_event("evt_retry", order_id);
    let (status, ack) = json_body(app.post_webhook(&retried, &signature(&retried)).await).await;
    assert_eq!(status, StatusCode::OK, "{ack}");
    assert_eq!(ack["data"]["outcome"], "processed");
    assert_eq!(status_of(&app, order_id).await, OrderStatus::Paid);
    assert_eq!(stock_of(&app, item.id).await, Some(4));
}

#[tokio::test]
async fn expired_session_cancels_the_open_order() {
    let app = TestApp::pending().await;
    let item = app.seed_menu_item("Udon", 900, Some(3)).await;
    let order_id = open_order(&app, &item, 1).await;

    let body = session_event(
        "evt_expired",
        "checkout.session.expired",
        json!({
            "id": "cs_test_1",
            "client_reference_id": order_id.to_string()
        }),
    );
    let (status, ack) = json_body(app.post_webhook(&body, &signature(&body)).await).await;
    assert_eq!(status, StatusCode::OK, "{ack}");
    assert_eq!(ack["data"]["outcome"], "processed");
    assert_eq!(status_of(&app, order_id).await, OrderStatus::Cancelled);

    // A late success cannot resurrect it.
    let late = succeeded_event("evt_late", order_id);
    let (_, ack) = json_body(app.post_webhook(&late, &signature(&late)).await).await;
    assert_eq!(ack["data"]["outcome"], "ignored");
    assert_eq!(status_of(&app, order_id).await, OrderStatus::Cancelled);
    assert_eq!(stock_of(&app, item.id).await, Some(3));
}

#[tokio::test]
async fn async_payment_failure_fails_the_order() {
    let app = TestApp::pending().await;
    let item = app.seed_menu_item("Soba", 1_000, None).await;
    let order_id = open_order(&app, &item, 1).await;

    let body = session_event(
        "evt_async_failed",
        "checkout.session.async_payment_failed",
        json!({
            "id": "cs_test_1",
            "payment_status": "unpaid",
            "metadata": { "order_id": order_id.to_string(), "kind": "order" }
        }),
    );
    let (status, ack) = json_body(app.post_webhook(&body, &signature(&body)).await).await;
    assert_eq!(status, StatusCode::OK, "{ack}");
    assert_eq!(ack["data"]["outcome"], "processed");
    assert_eq!(status_of(&app, order_id).await, OrderStatus::Failed);
}

#[tokio::test]
async fn paid_deposit_session_confirms_the_reservation() {
    let mut cfg = test_config();
    cfg.deposit_flat_cents = 1_500;
    let app = TestApp::with_provider(cfg, Arc::new(SimulatedProvider)).await;
    let table = app.seed_table("T9", 4).await;
    let guest = app.seed_customer(None).await;
    let start_at = Utc::now() + Duration::days(2);

    let reservations = app.state.services.reservations.clone();
    let booked = reservations
        .create(
            guest.id,
            CreateReservationRequest {
                table_id: table.id,
                party_size: 2,
                start_at,
                end_at: start_at + Duration::minutes(90),
            },
        )
        .await
        .unwrap();
    assert_eq!(booked.status, ReservationStatus::Pending);

    let body = session_event(
        "evt_deposit",
        "checkout.session.completed",
        json!({
            "id": "cs_deposit_1",
            "payment_status": "paid",
            "metadata": {
                "kind": "reservation_deposit",
                "reservation_id": booked.id.to_string()
            }
        }),
    );
    let (status, ack) = json_body(app.post_webhook(&body, &signature(&body)).await).await;
    assert_eq!(status, StatusCode::OK, "{ack}");
    assert_eq!(ack["data"]["outcome"], "processed");

    let confirmed = reservations.get(booked.id).await.unwrap();
    assert_eq!(confirmed.status, ReservationStatus::Confirmed);
    assert!(confirmed.deposit_paid);
    assert_eq!(confirmed.deposit_session_id.as_deref(), Some("cs_deposit_1"));
}

#[tokio::test]
async fn stalled_post_payment_effects_are_replayed_once() {
    let app = TestApp::pending().await;
    let item = app.seed_menu_item("Tempura", 1_100, Some(6)).await;
    let order_id = open_order(&app, &item, 2).await;

    // Paid row committed, but the process died before any hook ran.
    let open = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut stalled: order::ActiveModel = open.into();
    stalled.status = Set(OrderStatus::Paid);
    stalled.paid_at = Set(Some(Utc::now() - Duration::minutes(10)));
    stalled.hooks_dispatched = Set(false);
    stalled.update(&*app.state.db).await.unwrap();

    let payments = app.state.services.payments.clone();
    assert_eq!(payments.recover_stalled_dispatches(Utc::now()).await.unwrap(), 1);
    assert_eq!(stock_of(&app, item.id).await, Some(4));

    let invoices = invoice::Entity::find()
        .filter(invoice::Column::OrderId.eq(order_id))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(invoices, 1);
    let queued = app.queue.snapshot().await;
    assert!(queued.contains(&Job::SendReceipt { order_id }));

    assert_eq!(payments.recover_stalled_dispatches(Utc::now()).await.unwrap(), 0);
    assert_eq!(stock_of(&app, item.id).await, Some(4));
}

#[tokio::test]
async fn recently_paid_orders_are_left_to_their_own_dispatch() {
    let app = TestApp::pending().await;
    let item = app.seed_menu_item("Katsu", 1_400, Some(2)).await;
    let order_id = open_order(&app, &item, 1).await;

    let open = order::Entity::find_by_id(order_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    let mut fresh: order::ActiveModel = open.into();
    fresh.status = Set(OrderStatus::Paid);
    fresh.paid_at = Set(Some(Utc::now()));
    fresh.update(&*app.state.db).await.unwrap();

    let payments = app.state.services.payments.clone();
    assert_eq!(payments.recover_stalled_dispatches(Utc::now()).await.unwrap(), 0);
    assert_eq!(stock_of(&app, item.id).await, Some(2));
}
