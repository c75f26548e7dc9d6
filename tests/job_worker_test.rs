mod common;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use bistro_api::entities::customer;
use bistro_api::integrations::LoggingSyncGateway;
use bistro_api::jobs::Poll;
use bistro_api::message_queue::Job;
use common::{cart_line, json_body, TestApp};
use sea_orm::EntityTrait;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn paid_order_fans_out_jobs_that_the_worker_drains() {
    let app = TestApp::simulated().await;
    let guest = app.seed_customer(None).await;
    let table = app.seed_table("T7", 2).await;
    let dish = app.seed_menu_item("Risotto", 1_450, Some(3)).await;

    let (status, body) = json_body(
        app.request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({
                "items": [cart_line(dish.id, 2)],
                "tip_cents": 100,
                "delivery_mode": "dine_in",
                "table_id": table.id
            })),
            Some(&app.customer_token(guest.id)),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let order_id: Uuid = body["data"]["order"]["order"]["id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let queued = app.queue.snapshot().await;
    assert_eq!(queued, Job::post_payment_jobs(order_id).to_vec());

    // Dine-in payment keeps the table busy for the turnover window.
    let now = chrono::Utc::now();
    let free = app
        .state
        .services
        .reservations
        .availability(now, now + chrono::Duration::minutes(10), 2)
        .await
        .unwrap();
    assert!(free.iter().all(|t| t.id != table.id));

    let worker = app.state.job_worker(Arc::new(LoggingSyncGateway));
    let mut completed = 0;
    loop {
        match worker.poll_once().await.unwrap() {
            Poll::Idle => break,
            Poll::Completed => completed += 1,
            other => panic!("unexpected poll outcome {other:?}"),
        }
    }
    assert_eq!(completed, 6);

    let receipts = app.notifier.receipts();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].order_id, order_id);
    assert_eq!(receipts[0].recipient.as_deref(), Some(guest.email.as_str()));
    assert_eq!(receipts[0].total_cents, 3_000);
    assert_eq!(app.notifier.notices().len(), 1);

    let credited = customer::Entity::find_by_id(guest.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credited.loyalty_points, 30);

    // Replaying the loyalty job credits nothing more.
    worker
        .execute(Job::AccrueLoyalty { order_id })
        .await
        .unwrap();
    let again = customer::Entity::find_by_id(guest.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.loyalty_points, 30);
}

#[tokio::test]
async fn health_reports_database_and_queue() {
    let app = TestApp::simulated().await;
    let (status, body) = json_body(
        app.request(Method::GET, "/health", None, None).await,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "up");
    assert_eq!(body["simulation_mode"], true);
    assert_eq!(body["database"]["status"], "up");
}
