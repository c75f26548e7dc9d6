//! Domain services. Each service owns its slice of the schema and holds a
//! shared connection; handlers and jobs only talk to these.

pub mod catalog;
pub mod checkout;
pub mod invoicing;
pub mod loyalty;
pub mod orders;
pub mod payment_provider;
pub mod payments;
pub mod post_payment;
pub mod pricing;
pub mod reservations;
pub mod webhooks;
