//! Coupon validation
//!
//! Validation is read-only. Usage is only counted when an order commits, via
//! the conditional increment in [`crate::store::OrderStore::commit_order`];
//! the cap check here is advisory and the store enforces the real one.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use pediu_shared::ParseEnumError;

use crate::error::{CheckoutResult, CouponRejection};
use crate::store::CouponStore;

/// How a coupon's `value` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// `value` is a whole percentage of the subtotal (0..=100)
    Percent,
    /// `value` is an amount in minor currency units
    Fixed,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountKind::Percent => "percent",
            DiscountKind::Fixed => "fixed",
        }
    }
}

impl FromStr for DiscountKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percent" => Ok(DiscountKind::Percent),
            "fixed" => Ok(DiscountKind::Fixed),
            other => Err(ParseEnumError {
                kind: "discount_type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for DiscountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A store coupon as persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coupon {
    pub id: Uuid,
    pub store_id: Uuid,
    /// Always upper-cased
    pub code: String,
    pub kind: DiscountKind,
    pub value: i64,
    pub is_active: bool,
    pub starts_at: Option<OffsetDateTime>,
    pub ends_at: Option<OffsetDateTime>,
    pub max_uses: Option<i32>,
    pub uses_count: i32,
    pub min_order_cents: Option<i64>,
}

impl Coupon {
    /// Raw discount for `subtotal_cents`. Not clamped to the subtotal;
    /// bounding happens once, in [`crate::pricing::price`].
    ///
    /// Percentages round half-up to the nearest minor unit.
    pub fn discount_for(&self, subtotal_cents: i64) -> i64 {
        match self.kind {
            DiscountKind::Fixed => self.value.max(0),
            DiscountKind::Percent => {
                let raw = (i128::from(subtotal_cents.max(0)) * i128::from(self.value.max(0)) + 50)
                    / 100;
                i64::try_from(raw).unwrap_or(i64::MAX)
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|cap| self.uses_count >= cap)
    }
}

/// Canonical form of a customer-typed coupon code
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// A coupon that passed validation for a given subtotal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub coupon_id: Uuid,
    pub code: String,
    pub discount_cents: i64,
}

/// Run the ordered checks against an already-loaded coupon.
///
/// Order: belongs to store, active, started, not ended, minimum order,
/// usage cap. The first failing check decides the rejection.
pub fn check_coupon(
    coupon: Option<&Coupon>,
    store_id: Uuid,
    subtotal_cents: i64,
    now: OffsetDateTime,
) -> Result<AppliedCoupon, CouponRejection> {
    let coupon = match coupon {
        Some(c) if c.store_id == store_id => c,
        _ => return Err(CouponRejection::NotFound),
    };

    if !coupon.is_active {
        return Err(CouponRejection::Inactive);
    }
    if coupon.starts_at.is_some_and(|start| now < start) {
        return Err(CouponRejection::NotStarted);
    }
    if coupon.ends_at.is_some_and(|end| now > end) {
        return Err(CouponRejection::Expired);
    }
    if let Some(min) = coupon.min_order_cents.filter(|min| *min > 0) {
        if subtotal_cents < min {
            return Err(CouponRejection::BelowMinimum {
                min_order_cents: min,
            });
        }
    }
    if coupon.is_exhausted() {
        return Err(CouponRejection::Exhausted);
    }

    Ok(AppliedCoupon {
        coupon_id: coupon.id,
        code: coupon.code.clone(),
        discount_cents: coupon.discount_for(subtotal_cents),
    })
}

/// Looks coupons up and validates them against a server-computed subtotal
#[derive(Clone)]
pub struct CouponValidator {
    store: Arc<dyn CouponStore>,
}

impl CouponValidator {
    pub fn new(store: Arc<dyn CouponStore>) -> Self {
        Self { store }
    }

    /// Validate `code` for `store_id`.
    ///
    /// The outer result carries storage failures; the inner one is the
    /// business decision.
    pub async fn validate(
        &self,
        store_id: Uuid,
        code: &str,
        subtotal_cents: i64,
        now: OffsetDateTime,
    ) -> CheckoutResult<Result<AppliedCoupon, CouponRejection>> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Ok(Err(CouponRejection::NotFound));
        }

        let coupon = self.store.find_coupon(store_id, &code).await?;
        let decision = check_coupon(coupon.as_ref(), store_id, subtotal_cents, now);

        if let Err(rejection) = &decision {
            tracing::debug!(
                store_id = %store_id,
                code = %code,
                reason = rejection.reason(),
                "Coupon rejected"
            );
        }

        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2025-03-10 12:00 UTC);

    fn coupon(store_id: Uuid) -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            store_id,
            code: "PROMO10".to_string(),
            kind: DiscountKind::Percent,
            value: 10,
            is_active: true,
            starts_at: None,
            ends_at: None,
            max_uses: None,
            uses_count: 0,
            min_order_cents: None,
        }
    }

    #[test]
    fn test_percent_discount() {
        let store = Uuid::new_v4();
        let applied = check_coupon(Some(&coupon(store)), store, 3500, NOW).unwrap();
        assert_eq!(applied.discount_cents, 350);
        assert_eq!(applied.code, "PROMO10");
    }

    #[test]
    fn test_percent_rounds_half_up() {
        let store = Uuid::new_v4();
        let c = coupon(store);
        assert_eq!(c.discount_for(1005), 101);
        assert_eq!(c.discount_for(1004), 100);
    }

    #[test]
    fn test_fixed_discount_is_not_clamped_here() {
        let store = Uuid::new_v4();
        let mut c = coupon(store);
        c.kind = DiscountKind::Fixed;
        c.value = 5_000;
        let applied = check_coupon(Some(&c), store, 1_000, NOW).unwrap();
        assert_eq!(applied.discount_cents, 5_000);
    }

    #[test]
    fn test_coupon_from_other_store_is_not_found() {
        let c = coupon(Uuid::new_v4());
        assert_eq!(
            check_coupon(Some(&c), Uuid::new_v4(), 1_000, NOW),
            Err(CouponRejection::NotFound)
        );
        assert_eq!(
            check_coupon(None, Uuid::new_v4(), 1_000, NOW),
            Err(CouponRejection::NotFound)
        );
    }

    #[test]
    fn test_checks_short_circuit_in_order() {
        let store = Uuid::new_v4();
        let mut c = coupon(store);
        // Inactive and expired and exhausted: inactive wins
        c.is_active = false;
        c.ends_at = Some(datetime!(2025-03-01 00:00 UTC));
        c.max_uses = Some(1);
        c.uses_count = 1;
        assert_eq!(
            check_coupon(Some(&c), store, 1_000, NOW),
            Err(CouponRejection::Inactive)
        );

        c.is_active = true;
        assert_eq!(
            check_coupon(Some(&c), store, 1_000, NOW),
            Err(CouponRejection::Expired)
        );

        c.ends_at = None;
        assert_eq!(
            check_coupon(Some(&c), store, 1_000, NOW),
            Err(CouponRejection::Exhausted)
        );
    }

    #[test]
    fn test_not_started_window() {
        let store = Uuid::new_v4();
        let mut c = coupon(store);
        c.starts_at = Some(datetime!(2025-03-11 00:00 UTC));
        assert_eq!(
            check_coupon(Some(&c), store, 1_000, NOW),
            Err(CouponRejection::NotStarted)
        );
    }

    #[test]
    fn test_minimum_order_uses_subtotal() {
        let store = Uuid::new_v4();
        let mut c = coupon(store);
        c.min_order_cents = Some(4_000);
        assert_eq!(
            check_coupon(Some(&c), store, 3_999, NOW),
            Err(CouponRejection::BelowMinimum {
                min_order_cents: 4_000
            })
        );
        assert!(check_coupon(Some(&c), store, 4_000, NOW).is_ok());
    }

    #[test]
    fn test_last_use_still_valid() {
        let store = Uuid::new_v4();
        let mut c = coupon(store);
        c.max_uses = Some(3);
        c.uses_count = 2;
        assert!(check_coupon(Some(&c), store, 1_000, NOW).is_ok());
    }

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code("  promo10 "), "PROMO10");
    }
}
