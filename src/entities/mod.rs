pub mod coupon;
pub mod customer;
pub mod dining_table;
pub mod invoice;
pub mod loyalty_rank;
pub mod menu_item;
pub mod order;
pub mod order_extra;
pub mod order_item;
pub mod payment_intent;
pub mod pending_tip;
pub mod reservation;
pub mod table_hold;
pub mod webhook_event;
