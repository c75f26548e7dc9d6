use axum::{routing::get, Json, Router};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::AppState;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bistro API",
        version = "1.0.0",
        description = r#"
# Bistro API

Restaurant backend covering checkout, payment reconciliation and table
reservations.

## Money

Every amount is an integer in minor units (cents) of the order currency.
`total_cents = max(0, subtotal_cents + tax_cents + tip_cents - discount_cents)`.

## Authentication

Guests and staff send a JWT in the Authorization header:

```
Authorization: Bearer <your-jwt-token>
```

Checkout and order lookup also accept anonymous guests. Staff actions
require the `staff` or `admin` role.

## Webhooks

`POST /api/v1/payments/webhook` expects the raw provider body signed with
HMAC-SHA256, either as `x-signature: sha256=<hex>` or as a
`stripe-signature: t=<ts>,v1=<hex>` header.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Checkout", description = "Cart pricing and payment sessions"),
        (name = "Orders", description = "Order snapshots and staff payment actions"),
        (name = "Payments", description = "Payment intents and provider webhooks"),
        (name = "Reservations", description = "Table bookings and deposits"),
        (name = "Tables", description = "Availability and holds")
    ),
    paths(
        crate::handlers::checkout::checkout,

        crate::handlers::orders::get_order,
        crate::handlers::orders::record_offline_payment,
        crate::handlers::orders::cancel_order,

        crate::handlers::payments::create_payment_intent,
        crate::handlers::payments::get_payment_intent,
        crate::handlers::payment_webhooks::payment_webhook,

        crate::handlers::reservations::create_reservation,
        crate::handlers::reservations::get_reservation,
        crate::handlers::reservations::update_reservation_status,
        crate::handlers::reservations::start_deposit,
        crate::handlers::reservations::deposit_success,

        crate::handlers::tables::table_availability,
        crate::handlers::tables::hold_table,
    ),
    components(
        schemas(
            crate::services::pricing::CartLine,
            crate::entities::order::DeliveryMode,
            crate::entities::order::OrderStatus,
            crate::entities::reservation::ReservationStatus,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

/// Serves the generated document at `/api-docs/openapi.json`.
pub fn openapi_routes() -> Router<AppState> {
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}
