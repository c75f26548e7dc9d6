use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Events pushed to live dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrderPaid {
        order_id: Uuid,
        total_cents: i64,
        currency: String,
        paid_at: DateTime<Utc>,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    ReservationCreated {
        reservation_id: Uuid,
        table_id: Uuid,
        start_at: DateTime<Utc>,
    },
    ReservationStatusChanged {
        reservation_id: Uuid,
        old_status: String,
        new_status: String,
    },
    TableHeld {
        table_id: Uuid,
        expires_at: DateTime<Utc>,
    },
}

impl Event {
    pub fn topic(&self) -> &'static str {
        match self {
            Event::OrderPaid { .. } | Event::OrderStatusChanged { .. } => "orders",
            Event::ReservationCreated { .. } | Event::ReservationStatusChanged { .. } => {
                "reservations"
            }
            Event::TableHeld { .. } => "tables",
        }
    }
}

/// Best-effort broadcast channel. Publishing never fails the caller;
/// dashboards that lag or are absent simply miss events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        match self.sender.send(event) {
            Ok(receivers) => debug!(topic, receivers, "Event broadcast"),
            Err(_) => debug!(topic, "Event dropped; no subscribers"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let order_id = Uuid::new_v4();

        bus.publish(Event::OrderStatusChanged {
            order_id,
            old_status: "created".into(),
            new_status: "cancelled".into(),
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic(), "orders");
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        let bus = EventBus::new(1);
        bus.publish(Event::TableHeld {
            table_id: Uuid::new_v4(),
            expires_at: Utc::now(),
        });
    }
}
