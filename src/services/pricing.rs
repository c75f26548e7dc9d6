//! Pricing engine.
//!
//! The server is the only source of truth for money: subtotal, tax, tip and
//! the single winning discount are derived here from catalog prices and the
//! customer's history. Client-submitted totals are never read.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{DatabaseConnection, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::PricingConfig;
use crate::entities::coupon::{self, CouponKind, Entity as CouponEntity};
use crate::errors::ServiceError;
use crate::services::loyalty::LoyaltyService;

/// Cart line as submitted by the client. `quantity` is kept raw so that
/// malformed entries can be dropped instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartLine {
    pub menu_item_id: Uuid,
    #[schema(value_type = Object)]
    pub quantity: serde_json::Value,
}

/// Cart line with a catalog price attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedLine {
    pub menu_item_id: Uuid,
    pub name: String,
    pub unit_amount_cents: i64,
    pub quantity: i32,
}

impl PricedLine {
    pub fn line_total_cents(&self) -> i64 {
        self.unit_amount_cents * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DiscountSource {
    None,
    Coupon,
    Loyalty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Discount {
    pub amount_cents: i64,
    pub source: DiscountSource,
}

impl Discount {
    pub const NONE: Discount = Discount {
        amount_cents: 0,
        source: DiscountSource::None,
    };

    pub fn coupon_cents(&self) -> i64 {
        if self.source == DiscountSource::Coupon {
            self.amount_cents
        } else {
            0
        }
    }

    pub fn loyalty_cents(&self) -> i64 {
        if self.source == DiscountSource::Loyalty {
            self.amount_cents
        } else {
            0
        }
    }

    /// Same source, amount reduced so it never exceeds `cap`.
    pub fn capped_at(self, cap: i64) -> Discount {
        let amount_cents = self.amount_cents.min(cap.max(0));
        if amount_cents == 0 {
            Discount::NONE
        } else {
            Discount {
                amount_cents,
                source: self.source,
            }
        }
    }
}

/// Authoritative money breakdown for one checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Quote {
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub tip_cents: i64,
    pub discount: Discount,
    pub total_cents: i64,
    /// Coupon that produced the winning discount, redeemed on payment
    pub coupon_id: Option<Uuid>,
}

/// Rounds to whole cents, halves away from zero.
pub fn round_half_up(value: Decimal) -> i64 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

fn parse_quantity(raw: &serde_json::Value) -> Option<i32> {
    let quantity = match raw {
        serde_json::Value::Number(n) => n.as_i64()?,
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    if quantity <= 0 {
        return None;
    }
    i32::try_from(quantity).ok()
}

/// Drops non-positive and non-numeric quantities and merges repeated items.
/// A cart that nets to zero items is rejected.
pub fn normalize_cart(lines: &[CartLine]) -> Result<Vec<(Uuid, i32)>, ServiceError> {
    let mut merged: BTreeMap<Uuid, i32> = BTreeMap::new();
    let mut order: Vec<Uuid> = Vec::new();

    for line in lines {
        let Some(quantity) = parse_quantity(&line.quantity) else {
            debug!(menu_item_id = %line.menu_item_id, "Dropping cart line with invalid quantity");
            continue;
        };
        let entry = merged.entry(line.menu_item_id).or_insert_with(|| {
            order.push(line.menu_item_id);
            0
        });
        *entry = entry
            .checked_add(quantity)
            .ok_or_else(|| ServiceError::ValidationError("quantity too large".to_string()))?;
    }

    if order.is_empty() {
        return Err(ServiceError::ValidationError(
            "cart contains no valid items".to_string(),
        ));
    }

    Ok(order
        .into_iter()
        .filter_map(|id| merged.get(&id).map(|qty| (id, *qty)))
        .collect())
}

/// Subtotal is the sum of line totals; tax is the subtotal times the rate,
/// rounded half up to whole cents.
pub fn compute_subtotal_and_tax(lines: &[PricedLine], tax_rate: Decimal) -> (i64, i64) {
    let subtotal: i64 = lines.iter().map(PricedLine::line_total_cents).sum();
    let tax = round_half_up(Decimal::from(subtotal) * tax_rate).max(0);
    (subtotal, tax)
}

/// An explicit client tip (zero included) always wins; otherwise the rank default.
pub fn resolve_tip(client_tip: Option<i64>, rank_default_tip: Option<i64>) -> i64 {
    match client_tip {
        Some(tip) => tip.max(0),
        None => rank_default_tip.unwrap_or(0).max(0),
    }
}

/// Fixed loyalty discount, capped at the subtotal, once the cumulative tip
/// total reaches the threshold.
pub fn loyalty_discount(
    cumulative_tip_cents: i64,
    threshold_cents: i64,
    discount_cents: i64,
    subtotal_cents: i64,
) -> i64 {
    if cumulative_tip_cents >= threshold_cents {
        discount_cents.min(subtotal_cents).max(0)
    } else {
        0
    }
}

/// Coupon discount at `now`; zero for inactive, expired or exhausted coupons.
pub fn coupon_discount(coupon: &coupon::Model, subtotal_cents: i64, now: DateTime<Utc>) -> i64 {
    if !coupon.is_redeemable_at(now) {
        return 0;
    }
    let amount = match coupon.kind {
        CouponKind::Percent => {
            let pct = Decimal::from(coupon.value.clamp(0, 100)) / Decimal::from(100);
            round_half_up(Decimal::from(subtotal_cents) * pct)
        }
        CouponKind::Fixed => coupon.value,
    };
    amount.min(subtotal_cents).max(0)
}

/// Coupon and loyalty never stack: the strictly larger amount wins and a tie
/// (including both zero) yields no discount.
pub fn select_discount(coupon_cents: i64, loyalty_cents: i64) -> Discount {
    if loyalty_cents > coupon_cents {
        Discount {
            amount_cents: loyalty_cents,
            source: DiscountSource::Loyalty,
        }
    } else if coupon_cents > loyalty_cents {
        Discount {
            amount_cents: coupon_cents,
            source: DiscountSource::Coupon,
        }
    } else {
        Discount::NONE
    }
}

pub fn compute_total(subtotal: i64, tax: i64, tip: i64, discount: i64) -> i64 {
    (subtotal + tax + tip - discount).max(0)
}

/// Reads coupons and loyalty history to price a cart.
#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
    loyalty: Arc<LoyaltyService>,
    config: PricingConfig,
}

impl PricingService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        loyalty: Arc<LoyaltyService>,
        config: PricingConfig,
    ) -> Self {
        Self {
            db,
            loyalty,
            config,
        }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    pub async fn find_coupon(&self, code: &str) -> Result<Option<coupon::Model>, ServiceError> {
        let code = code.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Ok(None);
        }
        Ok(CouponEntity::find()
            .filter(Expr::expr(Func::upper(Expr::col(coupon::Column::Code))).eq(code))
            .one(&*self.db)
            .await?)
    }

    /// Resolves the single winning discount for `customer_id` on `subtotal_cents`.
    #[instrument(skip(self))]
    pub async fn resolve_discount(
        &self,
        customer_id: Option<Uuid>,
        subtotal_cents: i64,
        coupon_code: Option<&str>,
    ) -> Result<(Discount, Option<Uuid>), ServiceError> {
        let loyalty_cents = match customer_id {
            Some(id) => {
                let tips = self.loyalty.cumulative_tip_cents(id).await?;
                loyalty_discount(
                    tips,
                    self.config.loyalty_tip_threshold_cents,
                    self.config.loyalty_discount_cents,
                    subtotal_cents,
                )
            }
            None => 0,
        };

        let coupon = match coupon_code {
            Some(code) => self.find_coupon(code).await?,
            None => None,
        };
        let coupon_cents = coupon
            .as_ref()
            .map(|c| coupon_discount(c, subtotal_cents, Utc::now()))
            .unwrap_or(0);

        let discount = select_discount(coupon_cents, loyalty_cents);
        let coupon_id = match discount.source {
            DiscountSource::Coupon => coupon.map(|c| c.id),
            _ => None,
        };
        debug!(
            coupon_cents,
            loyalty_cents,
            chosen = ?discount.source,
            "Discount resolved"
        );
        Ok((discount, coupon_id))
    }

    /// Full quote for already-priced lines.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub async fn quote(
        &self,
        customer_id: Option<Uuid>,
        lines: &[PricedLine],
        client_tip: Option<i64>,
        coupon_code: Option<&str>,
    ) -> Result<Quote, ServiceError> {
        let (subtotal_cents, tax_cents) = compute_subtotal_and_tax(lines, self.config.tax_rate);

        let rank_default = match (client_tip, customer_id) {
            (None, Some(id)) => self.loyalty.rank_default_tip(id).await?,
            _ => None,
        };
        let tip_cents = resolve_tip(client_tip, rank_default);

        let (discount, coupon_id) = self
            .resolve_discount(customer_id, subtotal_cents, coupon_code)
            .await?;

        Ok(Quote {
            subtotal_cents,
            tax_cents,
            tip_cents,
            discount,
            total_cents: compute_total(subtotal_cents, tax_cents, tip_cents, discount.amount_cents),
            coupon_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::prelude::FromStr;
    use serde_json::json;

    fn line(unit: i64, qty: i32) -> PricedLine {
        PricedLine {
            menu_item_id: Uuid::new_v4(),
            name: "dish".into(),
            unit_amount_cents: unit,
            quantity: qty,
        }
    }

    fn coupon(kind: CouponKind, value: i64) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE".into(),
            kind,
            value,
            is_active: true,
            valid_from: None,
            valid_until: None,
            max_uses: None,
            times_used: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn two_item_cart_without_extras_totals_its_subtotal() {
        let lines = vec![line(1000, 2), line(500, 1)];
        let (subtotal, tax) = compute_subtotal_and_tax(&lines, Decimal::ZERO);
        assert_eq!(subtotal, 2500);
        assert_eq!(tax, 0);
        assert_eq!(compute_total(subtotal, tax, 0, 0), 2500);
    }

    #[test]
    fn loyalty_beats_smaller_coupon() {
        let discount = select_discount(200, 500);
        assert_eq!(discount.source, DiscountSource::Loyalty);
        assert_eq!(compute_total(2500, 0, 300, discount.amount_cents), 2300);
    }

    #[test]
    fn ties_and_zeros_yield_no_discount() {
        assert_eq!(select_discount(0, 0), Discount::NONE);
        assert_eq!(select_discount(300, 300), Discount::NONE);
    }

    #[test]
    fn explicit_zero_tip_wins_over_rank_default() {
        assert_eq!(resolve_tip(Some(0), Some(1000)), 0);
        assert_eq!(resolve_tip(None, Some(1000)), 1000);
        assert_eq!(resolve_tip(None, None), 0);
        assert_eq!(resolve_tip(Some(-50), Some(1000)), 0);
    }

    #[test]
    fn tax_rounds_half_up() {
        let rate = Decimal::from_str("0.1").unwrap();
        // 1005 * 0.1 = 100.5 -> 101
        let (_, tax) = compute_subtotal_and_tax(&[line(1005, 1)], rate);
        assert_eq!(tax, 101);
        // 1004 * 0.1 = 100.4 -> 100
        let (_, tax) = compute_subtotal_and_tax(&[line(1004, 1)], rate);
        assert_eq!(tax, 100);
    }

    #[test]
    fn loyalty_requires_threshold_and_is_capped_at_subtotal() {
        assert_eq!(loyalty_discount(4_999, 5_000, 500, 2_500), 0);
        assert_eq!(loyalty_discount(5_000, 5_000, 500, 2_500), 500);
        assert_eq!(loyalty_discount(9_000, 5_000, 500, 300), 300);
    }

    #[test]
    fn coupon_percent_and_fixed() {
        let now = Utc::now();
        assert_eq!(coupon_discount(&coupon(CouponKind::Percent, 10), 2_505, now), 251);
        assert_eq!(coupon_discount(&coupon(CouponKind::Fixed, 200), 2_500, now), 200);
        assert_eq!(coupon_discount(&coupon(CouponKind::Fixed, 9_000), 2_500, now), 2_500);
    }

    #[test]
    fn unusable_coupons_are_worth_nothing() {
        let now = Utc::now();

        let mut inactive = coupon(CouponKind::Fixed, 200);
        inactive.is_active = false;
        assert_eq!(coupon_discount(&inactive, 2_500, now), 0);

        let mut expired = coupon(CouponKind::Fixed, 200);
        expired.valid_until = Some(now - chrono::Duration::days(1));
        assert_eq!(coupon_discount(&expired, 2_500, now), 0);

        let mut not_yet = coupon(CouponKind::Fixed, 200);
        not_yet.valid_from = Some(now + chrono::Duration::days(1));
        assert_eq!(coupon_discount(&not_yet, 2_500, now), 0);

        let mut exhausted = coupon(CouponKind::Fixed, 200);
        exhausted.max_uses = Some(3);
        exhausted.times_used = 3;
        assert_eq!(coupon_discount(&exhausted, 2_500, now), 0);
    }

    #[test]
    fn normalize_cart_drops_invalid_quantities_and_merges() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let lines = vec![
            CartLine { menu_item_id: a, quantity: json!(2) },
            CartLine { menu_item_id: b, quantity: json!(0) },
            CartLine { menu_item_id: b, quantity: json!(-3) },
            CartLine { menu_item_id: b, quantity: json!("lots") },
            CartLine { menu_item_id: b, quantity: json!(1.5) },
            CartLine { menu_item_id: a, quantity: json!("1") },
        ];
        assert_eq!(normalize_cart(&lines).unwrap(), vec![(a, 3)]);
    }

    #[test]
    fn cart_that_nets_to_zero_is_rejected() {
        let lines = vec![CartLine {
            menu_item_id: Uuid::new_v4(),
            quantity: json!(0),
        }];
        assert!(matches!(
            normalize_cart(&lines),
            Err(ServiceError::ValidationError(_))
        ));
        assert!(normalize_cart(&[]).is_err());
    }

    #[test]
    fn capped_discount_keeps_source_until_zero() {
        let d = Discount {
            amount_cents: 500,
            source: DiscountSource::Loyalty,
        };
        assert_eq!(d.capped_at(300).amount_cents, 300);
        assert_eq!(d.capped_at(300).source, DiscountSource::Loyalty);
        assert_eq!(d.capped_at(0), Discount::NONE);
    }

    proptest! {
        #[test]
        fn total_is_never_negative(
            subtotal in 0i64..1_000_000,
            tax in 0i64..100_000,
            tip in 0i64..100_000,
            discount in 0i64..2_000_000,
        ) {
            let total = compute_total(subtotal, tax, tip, discount);
            prop_assert!(total >= 0);
            prop_assert_eq!(total, (subtotal + tax + tip - discount).max(0));
        }

        #[test]
        fn discount_is_the_strict_max_and_never_both(
            coupon in 0i64..10_000,
            loyalty in 0i64..10_000,
        ) {
            let d = select_discount(coupon, loyalty);
            prop_assert!(d.coupon_cents() == 0 || d.loyalty_cents() == 0);
            if coupon != loyalty {
                prop_assert_eq!(d.amount_cents, coupon.max(loyalty));
            } else {
                prop_assert_eq!(d.amount_cents, 0);
            }
        }

        #[test]
        fn subtotal_is_sum_of_line_totals(
            lines in proptest::collection::vec((1i64..50_000, 1i32..20), 1..12)
        ) {
            let priced: Vec<PricedLine> = lines.iter().map(|(u, q)| line(*u, *q)).collect();
            let (subtotal, _) = compute_subtotal_and_tax(&priced, Decimal::ZERO);
            let expected: i64 = lines.iter().map(|(u, q)| u * i64::from(*q)).sum();
            prop_assert_eq!(subtotal, expected);
        }
    }
}
