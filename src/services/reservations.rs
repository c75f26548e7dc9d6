/*!
 * # Reservation Guard
 *
 * Table bookings, holds, deposits and the no-show policy. Every booking
 * decision runs inside one transaction that first locks the table row, so
 * two requests for the same table are serialized and the overlap check
 * cannot race. Windows are half-open: `[start_at, end_at)`.
 */

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::{NoShowAction, ReservationPolicy};
use crate::entities::customer::Entity as CustomerEntity;
use crate::entities::dining_table::{self, Entity as DiningTableEntity};
use crate::entities::reservation::{self, Entity as ReservationEntity, ReservationStatus};
use crate::entities::table_hold::{self, Entity as TableHoldEntity};
use crate::errors::ServiceError;
use crate::events::{Event, EventBus};
use crate::services::payment_provider::{
    build_deposit_session_request, CheckoutSession, PaymentProvider,
};

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateReservationRequest {
    pub table_id: Uuid,
    #[validate(range(min = 1, max = 100))]
    pub party_size: i32,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DepositCheckout {
    pub reservation_id: Uuid,
    pub deposit_cents: i64,
    pub session: CheckoutSession,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SweepReport {
    pub no_shows: u64,
    pub holds_released: u64,
}

#[derive(Clone)]
pub struct ReservationService {
    db: Arc<DatabaseConnection>,
    provider: Arc<dyn PaymentProvider>,
    events: EventBus,
    policy: ReservationPolicy,
    currency: String,
    success_url: String,
    cancel_url: String,
}

fn active_statuses() -> Vec<ReservationStatus> {
    ReservationStatus::ACTIVE.to_vec()
}

/// Active reservations on `table_id` overlapping `[start, end)`.
fn overlapping_on_table(table_id: Uuid, start: DateTime<Utc>, end: DateTime<Utc>) -> Condition {
    Condition::all()
        .add(reservation::Column::TableId.eq(table_id))
        .add(reservation::Column::Status.is_in(active_statuses()))
        .add(reservation::Column::StartAt.lt(end))
        .add(reservation::Column::EndAt.gt(start))
}

/// Unreleased, unexpired holds on `table_id` overlapping `[start, end)`.
fn live_holds_on_table(
    table_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Condition {
    Condition::all()
        .add(table_hold::Column::TableId.eq(table_id))
        .add(table_hold::Column::ReleasedAt.is_null())
        .add(table_hold::Column::ExpiresAt.gt(now))
        .add(table_hold::Column::StartsAt.lt(end))
        .add(table_hold::Column::ExpiresAt.gt(start))
}

impl ReservationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        provider: Arc<dyn PaymentProvider>,
        events: EventBus,
        policy: ReservationPolicy,
        currency: String,
        success_url: String,
        cancel_url: String,
    ) -> Self {
        Self {
            db,
            provider,
            events,
            policy,
            currency,
            success_url,
            cancel_url,
        }
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    pub async fn get(&self, reservation_id: Uuid) -> Result<reservation::Model, ServiceError> {
        ReservationEntity::find_by_id(reservation_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Reservation {} not found", reservation_id))
            })
    }

    /// No-shows by the customer inside the lookback window.
    pub async fn recent_no_shows(&self, customer_id: Uuid) -> Result<u64, ServiceError> {
        let since = Utc::now() - self.policy.no_show_lookback;
        Ok(ReservationEntity::find()
            .filter(reservation::Column::CustomerId.eq(customer_id))
            .filter(reservation::Column::Status.eq(ReservationStatus::NoShow))
            .filter(reservation::Column::StartAt.gte(since))
            .count(&*self.db)
            .await?)
    }

    /// Deposit owed for a new booking, after applying the no-show policy.
    async fn deposit_for_booking(
        &self,
        customer_id: Uuid,
        party_size: i32,
    ) -> Result<i64, ServiceError> {
        let mut deposit = self.policy.deposit_for(party_size);
        if self.policy.no_show_limit == 0 {
            return Ok(deposit);
        }
        let no_shows = self.recent_no_shows(customer_id).await?;
        if no_shows < u64::from(self.policy.no_show_limit) {
            return Ok(deposit);
        }
        match self.policy.no_show_action {
            NoShowAction::Block => {
                warn!(%customer_id, no_shows, "Booking blocked by no-show policy");
                Err(ServiceError::Forbidden(
                    "Too many recent no-shows to book online".to_string(),
                ))
            }
            NoShowAction::RequirePrepayment => {
                deposit = deposit.max(self.policy.no_show_prepayment_cents);
                info!(%customer_id, no_shows, deposit, "Prepayment required by no-show policy");
                Ok(deposit)
            }
        }
    }

    async fn lock_table(
        txn: &DatabaseTransaction,
        table_id: Uuid,
    ) -> Result<dining_table::Model, ServiceError> {
        DiningTableEntity::find_by_id(table_id)
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Table {} not found", table_id)))
    }

    /// Books a table. Rejects overlapping active reservations or holds on
    /// the table and enforces the per-customer overlap cap. A booking that
    /// owes a deposit starts `pending`; otherwise it is `confirmed`.
    #[instrument(skip(self, request), fields(table_id = %request.table_id))]
    pub async fn create(
        &self,
        customer_id: Uuid,
        request: CreateReservationRequest,
    ) -> Result<reservation::Model, ServiceError> {
        request.validate()?;
        let now = Utc::now();
        if request.end_at <= request.start_at {
            return Err(ServiceError::ValidationError(
                "end_at must be after start_at".to_string(),
            ));
        }
        if request.start_at < now {
            return Err(ServiceError::ValidationError(
                "reservation must start in the future".to_string(),
            ));
        }

        let deposit = self
            .deposit_for_booking(customer_id, request.party_size)
            .await?;

        let txn = self.db.begin().await?;

        let table = Self::lock_table(&txn, request.table_id).await?;
        if !table.is_active {
            return Err(ServiceError::ValidationError(format!(
                "Table {} is not bookable",
                table.label
            )));
        }
        if request.party_size > table.capacity {
            return Err(ServiceError::ValidationError(format!(
                "Party of {} exceeds capacity {} of table {}",
                request.party_size, table.capacity, table.label
            )));
        }

        let clashing = ReservationEntity::find()
            .filter(overlapping_on_table(table.id, request.start_at, request.end_at))
            .lock_exclusive()
            .all(&txn)
            .await?;
        if !clashing.is_empty() {
            counter!("bistro.reservations.conflicts", 1, "kind" => "table");
            debug!(existing = clashing.len(), "Table already booked");
            return Err(ServiceError::AlreadyBooked(format!(
                "Table {} is already booked for that time",
                table.label
            )));
        }

        let holds = TableHoldEntity::find()
            .filter(live_holds_on_table(table.id, request.start_at, request.end_at, now))
            .count(&txn)
            .await?;
        if holds > 0 {
            counter!("bistro.reservations.conflicts", 1, "kind" => "hold");
            return Err(ServiceError::AlreadyBooked(format!(
                "Table {} is held for that time",
                table.label
            )));
        }

        // The customer row is the lock that serializes the per-guest cap, so
        // it must exist.
        if CustomerEntity::find_by_id(customer_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .is_none()
        {
            return Err(ServiceError::Unauthorized(
                "Reservations require a registered customer account".to_string(),
            ));
        }
        let own_overlapping = ReservationEntity::find()
            .filter(reservation::Column::CustomerId.eq(customer_id))
            .filter(reservation::Column::Status.is_in(active_statuses()))
            .filter(reservation::Column::StartAt.lt(request.end_at))
            .filter(reservation::Column::EndAt.gt(request.start_at))
            .count(&txn)
            .await?;
        if own_overlapping >= u64::from(self.policy.max_overlapping_reservations) {
            counter!("bistro.reservations.conflicts", 1, "kind" => "customer_cap");
            return Err(ServiceError::Conflict(format!(
                "At most {} overlapping reservation(s) per guest",
                self.policy.max_overlapping_reservations
            )));
        }

        let status = if deposit > 0 {
            ReservationStatus::Pending
        } else {
            ReservationStatus::Confirmed
        };
        let created = reservation::ActiveModel {
            id: Set(Uuid::new_v4()),
            table_id: Set(table.id),
            customer_id: Set(customer_id),
            party_size: Set(request.party_size),
            start_at: Set(request.start_at),
            end_at: Set(request.end_at),
            status: Set(status),
            deposit_cents: Set((deposit > 0).then_some(deposit)),
            deposit_paid: Set(false),
            deposit_session_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        info!(reservation_id = %created.id, %status, deposit, "Reservation created");
        self.events.publish(Event::ReservationCreated {
            reservation_id: created.id,
            table_id: created.table_id,
            start_at: created.start_at,
        });
        Ok(created)
    }

    /// Staff-driven lifecycle move. Confirming requires a paid deposit when
    /// one is owed.
    #[instrument(skip(self))]
    pub async fn transition_status(
        &self,
        reservation_id: Uuid,
        next: ReservationStatus,
    ) -> Result<reservation::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let current = ReservationEntity::find_by_id(reservation_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Reservation {} not found", reservation_id))
            })?;

        if !current.status.can_transition_to(next) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot move reservation from {} to {}",
                current.status, next
            )));
        }
        if next == ReservationStatus::Confirmed && current.requires_deposit() && !current.deposit_paid
        {
            return Err(ServiceError::InvalidStatus(
                "Deposit must be paid before confirming".to_string(),
            ));
        }

        let previous = current.status;
        let mut active: reservation::ActiveModel = current.into();
        active.status = Set(next);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        self.events.publish(Event::ReservationStatusChanged {
            reservation_id,
            old_status: previous.to_string(),
            new_status: next.to_string(),
        });
        Ok(updated)
    }

    /// Opens a provider checkout session for the reservation's deposit.
    #[instrument(skip(self))]
    pub async fn start_deposit_checkout(
        &self,
        reservation_id: Uuid,
        customer_id: Uuid,
        is_staff: bool,
    ) -> Result<DepositCheckout, ServiceError> {
        let reservation = self.get(reservation_id).await?;
        if reservation.customer_id != customer_id && !is_staff {
            return Err(ServiceError::Forbidden(
                "Reservation belongs to another guest".to_string(),
            ));
        }
        let deposit_cents = match reservation.deposit_cents {
            Some(cents) if cents > 0 => cents,
            _ => {
                return Err(ServiceError::BadRequest(
                    "Reservation has no deposit".to_string(),
                ))
            }
        };
        if reservation.deposit_paid {
            return Err(ServiceError::Conflict("Deposit already paid".to_string()));
        }
        if !reservation.status.is_active() {
            return Err(ServiceError::InvalidStatus(format!(
                "Reservation is {}",
                reservation.status
            )));
        }

        let separator = if self.success_url.contains('?') { '&' } else { '?' };
        let success_url = format!(
            "{}{}reservation_id={}",
            self.success_url, separator, reservation_id
        );
        let request = build_deposit_session_request(
            reservation_id,
            deposit_cents,
            &self.currency,
            &success_url,
            &self.cancel_url,
        );
        let session = self.provider.create_checkout_session(&request).await?;

        ReservationEntity::update_many()
            .col_expr(
                reservation::Column::DepositSessionId,
                Expr::value(session.id.clone()),
            )
            .col_expr(reservation::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(reservation::Column::Id.eq(reservation_id))
            .exec(&*self.db)
            .await?;

        info!(%reservation_id, session_id = %session.id, "Deposit checkout started");
        Ok(DepositCheckout {
            reservation_id,
            deposit_cents,
            session,
        })
    }

    /// Success callback: asks the provider whether the session was paid
    /// before flipping the deposit flag.
    #[instrument(skip(self))]
    pub async fn complete_deposit_checkout(
        &self,
        reservation_id: Uuid,
        session_id: &str,
    ) -> Result<reservation::Model, ServiceError> {
        let reservation = self.get(reservation_id).await?;
        if reservation.deposit_paid {
            return Ok(reservation);
        }
        if reservation.deposit_session_id.as_deref() != Some(session_id) {
            return Err(ServiceError::BadRequest(
                "Session does not belong to this reservation".to_string(),
            ));
        }
        if !self.provider.session_is_paid(session_id).await? {
            return Err(ServiceError::InvalidStatus(
                "Deposit session is not paid".to_string(),
            ));
        }
        self.mark_deposit_paid(reservation_id, Some(session_id))
            .await?;
        self.get(reservation_id).await
    }

    /// Records a verified deposit payment; a pending reservation becomes
    /// confirmed. Returns `false` when nothing changed.
    #[instrument(skip(self))]
    pub async fn mark_deposit_paid(
        &self,
        reservation_id: Uuid,
        session_id: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;
        let Some(current) = ReservationEntity::find_by_id(reservation_id)
            .lock_exclusive()
            .one(&txn)
            .await?
        else {
            txn.commit().await?;
            warn!(%reservation_id, "Deposit paid for unknown reservation");
            return Ok(false);
        };

        if current.deposit_paid {
            txn.commit().await?;
            return Ok(false);
        }
        if !current.status.is_active() {
            txn.commit().await?;
            warn!(%reservation_id, status = %current.status, "Deposit paid for inactive reservation; staff refund needed");
            return Ok(false);
        }

        let previous = current.status;
        let mut active: reservation::ActiveModel = current.into();
        active.deposit_paid = Set(true);
        if let Some(session_id) = session_id {
            active.deposit_session_id = Set(Some(session_id.to_string()));
        }
        if previous == ReservationStatus::Pending {
            active.status = Set(ReservationStatus::Confirmed);
        }
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;
        txn.commit().await?;

        info!(%reservation_id, "Deposit paid");
        if previous == ReservationStatus::Pending {
            self.events.publish(Event::ReservationStatusChanged {
                reservation_id,
                old_status: previous.to_string(),
                new_status: ReservationStatus::Confirmed.to_string(),
            });
        }
        Ok(true)
    }

    /// Keeps a table free after a dine-in order is paid. One hold per order.
    #[instrument(skip(self))]
    pub async fn place_turnover_hold(
        &self,
        table_id: Uuid,
        order_id: Uuid,
    ) -> Result<table_hold::Model, ServiceError> {
        let txn = self.db.begin().await?;
        Self::lock_table(&txn, table_id).await?;

        if let Some(existing) = TableHoldEntity::find()
            .filter(table_hold::Column::OrderId.eq(order_id))
            .one(&txn)
            .await?
        {
            txn.commit().await?;
            debug!(%order_id, "Turnover hold already placed");
            return Ok(existing);
        }

        let now = Utc::now();
        let hold = Self::insert_hold(&txn, table_id, Some(order_id), now, now + self.policy.turnover_hold)
            .await?;
        txn.commit().await?;

        self.events.publish(Event::TableHeld {
            table_id,
            expires_at: hold.expires_at,
        });
        Ok(hold)
    }

    /// Staff hold from now for `minutes`; rejected if it would cut into an
    /// active reservation.
    #[instrument(skip(self))]
    pub async fn hold_table(
        &self,
        table_id: Uuid,
        minutes: i64,
    ) -> Result<table_hold::Model, ServiceError> {
        if !(1..=24 * 60).contains(&minutes) {
            return Err(ServiceError::ValidationError(
                "hold must last between 1 minute and 24 hours".to_string(),
            ));
        }
        let now = Utc::now();
        let expires_at = now + Duration::minutes(minutes);

        let txn = self.db.begin().await?;
        Self::lock_table(&txn, table_id).await?;
        let clashing = ReservationEntity::find()
            .filter(overlapping_on_table(table_id, now, expires_at))
            .count(&txn)
            .await?;
        if clashing > 0 {
            counter!("bistro.reservations.conflicts", 1, "kind" => "hold");
            return Err(ServiceError::AlreadyBooked(
                "Table has a reservation inside the hold window".to_string(),
            ));
        }
        let hold = Self::insert_hold(&txn, table_id, None, now, expires_at).await?;
        txn.commit().await?;

        self.events.publish(Event::TableHeld {
            table_id,
            expires_at,
        });
        Ok(hold)
    }

    async fn insert_hold(
        txn: &DatabaseTransaction,
        table_id: Uuid,
        order_id: Option<Uuid>,
        starts_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<table_hold::Model, ServiceError> {
        let hold = table_hold::ActiveModel {
            id: Set(Uuid::new_v4()),
            table_id: Set(table_id),
            order_id: Set(order_id),
            starts_at: Set(starts_at),
            expires_at: Set(expires_at),
            released_at: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(txn)
        .await?;
        info!(%table_id, hold_id = %hold.id, %expires_at, "Table held");
        Ok(hold)
    }

    /// Active tables seating `party_size` that are free for the whole window.
    #[instrument(skip(self))]
    pub async fn availability(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        party_size: i32,
    ) -> Result<Vec<dining_table::Model>, ServiceError> {
        if end <= start {
            return Err(ServiceError::ValidationError(
                "end must be after start".to_string(),
            ));
        }
        if party_size < 1 {
            return Err(ServiceError::ValidationError(
                "party_size must be at least 1".to_string(),
            ));
        }
        let now = Utc::now();

        let tables = DiningTableEntity::find()
            .filter(dining_table::Column::IsActive.eq(true))
            .filter(dining_table::Column::Capacity.gte(party_size))
            .order_by_asc(dining_table::Column::Capacity)
            .order_by_asc(dining_table::Column::Label)
            .all(&*self.db)
            .await?;

        let booked: HashSet<Uuid> = ReservationEntity::find()
            .select_only()
            .column(reservation::Column::TableId)
            .filter(reservation::Column::Status.is_in(active_statuses()))
            .filter(reservation::Column::StartAt.lt(end))
            .filter(reservation::Column::EndAt.gt(start))
            .into_tuple::<Uuid>()
            .all(&*self.db)
            .await?
            .into_iter()
            .collect();

        let held: HashSet<Uuid> = TableHoldEntity::find()
            .select_only()
            .column(table_hold::Column::TableId)
            .filter(table_hold::Column::ReleasedAt.is_null())
            .filter(table_hold::Column::ExpiresAt.gt(now))
            .filter(table_hold::Column::StartsAt.lt(end))
            .filter(table_hold::Column::ExpiresAt.gt(start))
            .into_tuple::<Uuid>()
            .all(&*self.db)
            .await?
            .into_iter()
            .collect();

        Ok(tables
            .into_iter()
            .filter(|t| !booked.contains(&t.id) && !held.contains(&t.id))
            .collect())
    }

    /// Active reservations whose start passed more than the grace period ago
    /// become no-shows.
    #[instrument(skip(self))]
    pub async fn sweep_no_shows(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let cutoff = now - self.policy.no_show_grace;
        let result = ReservationEntity::update_many()
            .col_expr(
                reservation::Column::Status,
                Expr::value(ReservationStatus::NoShow.to_string()),
            )
            .col_expr(reservation::Column::UpdatedAt, Expr::value(now))
            .filter(reservation::Column::Status.is_in(active_statuses()))
            .filter(reservation::Column::StartAt.lt(cutoff))
            .exec(&*self.db)
            .await?;
        if result.rows_affected > 0 {
            info!(count = result.rows_affected, "Reservations marked no-show");
        }
        Ok(result.rows_affected)
    }

    /// Marks expired holds as released.
    #[instrument(skip(self))]
    pub async fn release_expired_holds(&self, now: DateTime<Utc>) -> Result<u64, ServiceError> {
        let result = TableHoldEntity::update_many()
            .col_expr(table_hold::Column::ReleasedAt, Expr::value(now))
            .filter(table_hold::Column::ReleasedAt.is_null())
            .filter(table_hold::Column::ExpiresAt.lte(now))
            .exec(&*self.db)
            .await?;
        if result.rows_affected > 0 {
            debug!(count = result.rows_affected, "Expired holds released");
        }
        Ok(result.rows_affected)
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ServiceError> {
        Ok(SweepReport {
            no_shows: self.sweep_no_shows(now).await?,
            holds_released: self.release_expired_holds(now).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::entities::customer;
    use crate::message_queue::InMemoryJobQueue;
    use crate::notifications::InMemoryNotifier;
    use crate::services::payment_provider::SimulatedProvider;
    use chrono::DurationRound;
    use proptest::prelude::*;

    const SECRET: &str =
        "reservation-unit-secret-0123456789abcdefghijklmnopqrstuvwxyzABCDEFGH";

    /// Half-open interval overlap.
    fn overlaps(
        a_start: DateTime<Utc>,
        a_end: DateTime<Utc>,
        b_start: DateTime<Utc>,
        b_end: DateTime<Utc>,
    ) -> bool {
        a_start < b_end && a_end > b_start
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default()
            + Duration::minutes(minutes)
    }

    #[test]
    fn touching_windows_do_not_overlap() {
        assert!(!overlaps(at(0), at(60), at(60), at(120)));
        assert!(!overlaps(at(60), at(120), at(0), at(60)));
        assert!(overlaps(at(0), at(61), at(60), at(120)));
        assert!(overlaps(at(10), at(20), at(0), at(120)));
    }

    /// Books every window at once on a single table, one guest per window.
    async fn book_concurrently(
        windows: &[(i64, i64)],
    ) -> (
        DateTime<Utc>,
        Vec<Result<reservation::Model, ServiceError>>,
        Vec<reservation::Model>,
    ) {
        let db = crate::db::establish_in_memory().await.unwrap();
        let state = crate::AppState::new(
            Arc::new(db),
            AppConfig::new("sqlite::memory:".into(), SECRET.into(), "test".into()),
            Arc::new(SimulatedProvider),
            Arc::new(InMemoryJobQueue::new()),
            Arc::new(InMemoryNotifier::new()),
        );
        let now = Utc::now();
        let table = dining_table::ActiveModel {
            id: Set(Uuid::new_v4()),
            label: Set("P1".into()),
            capacity: Set(4),
            is_active: Set(true),
            created_at: Set(now),
        }
        .insert(&*state.db)
        .await
        .unwrap();

        let base = now.duration_trunc(Duration::minutes(1)).unwrap() + Duration::days(1);
        let mut requests = Vec::new();
        for (n, (offset, length)) in windows.iter().enumerate() {
            let guest = customer::ActiveModel {
                id: Set(Uuid::new_v4()),
                email: Set(format!("guest{}@example.com", n)),
                name: Set(format!("Guest {}", n)),
                loyalty_rank_id: Set(None),
                loyalty_points: Set(0),
                created_at: Set(now),
            }
            .insert(&*state.db)
            .await
            .unwrap();
            let start_at = base + Duration::minutes(*offset);
            requests.push((
                guest.id,
                CreateReservationRequest {
                    table_id: table.id,
                    party_size: 2,
                    start_at,
                    end_at: start_at + Duration::minutes(*length),
                },
            ));
        }

        let service = state.services.reservations.clone();
        let results = futures::future::join_all(
            requests
                .into_iter()
                .map(|(guest, request)| service.create(guest, request)),
        )
        .await;
        let stored = ReservationEntity::find()
            .filter(reservation::Column::TableId.eq(table.id))
            .filter(reservation::Column::Status.is_in(active_statuses()))
            .all(&*state.db)
            .await
            .unwrap();
        (base, results, stored)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn concurrent_bookings_never_double_book_a_table(
            windows in prop::collection::vec((0i64..480, 15i64..180), 2..8)
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let (base, results, stored) = runtime.block_on(book_concurrently(&windows));

            let accepted = results.iter().filter(|r| r.is_ok()).count();
            prop_assert!(accepted >= 1);
            prop_assert_eq!(accepted, stored.len());
            for (i, a) in stored.iter().enumerate() {
                for b in &stored[i + 1..] {
                    prop_assert!(!overlaps(a.start_at, a.end_at, b.start_at, b.end_at));
                }
            }

            // Every refusal is explained by a booking that won the slot.
            for ((offset, length), result) in windows.iter().zip(&results) {
                if let Err(err) = result {
                    prop_assert!(matches!(err, ServiceError::AlreadyBooked(_)), "{:?}", err);
                    let start = base + Duration::minutes(*offset);
                    let end = start + Duration::minutes(*length);
                    prop_assert!(stored.iter().any(|r| overlaps(start, end, r.start_at, r.end_at)));
                }
            }
        }
    }
}
