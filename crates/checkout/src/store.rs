//! Storage seams for checkout
//!
//! Every coordination guarantee lives behind these traits: uniqueness of
//! `(tenant, idempotency key)`, uniqueness of the order code per store and
//! the capped coupon increment. Implementations: [`crate::pg::PgCheckoutStore`]
//! and [`crate::memory::InMemoryCheckoutStore`].

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use pediu_shared::StoreSettings;

use crate::coupons::{AppliedCoupon, Coupon};
use crate::error::CheckoutResult;
use crate::idempotency::{IdempotencyRecord, NewIdempotencyRecord};
use crate::orders::OrderSubmission;
use crate::pricing::Totals;

/// The parts of a store checkout needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreProfile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub settings: StoreSettings,
}

/// Everything written by one order commit
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub code: String,
    pub submission: OrderSubmission,
    pub totals: Totals,
    pub coupon: Option<AppliedCoupon>,
    pub idempotency: NewIdempotencyRecord,
    pub created_at: OffsetDateTime,
}

/// Result of the atomic order write. Anything but `Committed` means no rows
/// were written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Another request already holds `(tenant, idempotency key)`
    KeyTaken,
    /// The generated order code already exists for this store
    CodeTaken,
    /// The coupon's usage cap was reached before this increment
    CouponExhausted,
}

#[async_trait]
pub trait StoreDirectory: Send + Sync {
    async fn find_store(&self, store_id: Uuid) -> CheckoutResult<Option<StoreProfile>>;
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    /// Look a coupon up by store and upper-cased code
    async fn find_coupon(&self, store_id: Uuid, code: &str) -> CheckoutResult<Option<Coupon>>;
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn find_record(
        &self,
        tenant_id: Uuid,
        key: Uuid,
    ) -> CheckoutResult<Option<IdempotencyRecord>>;

    async fn purge_expired(&self, now: OffsetDateTime) -> CheckoutResult<u64>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Write the idempotency record, order, items, modifiers, creation event
    /// and coupon increment as one unit.
    async fn commit_order(&self, order: &NewOrder) -> CheckoutResult<CommitOutcome>;
}

/// Convenience bound for a backend that provides every checkout seam
pub trait CheckoutStore: StoreDirectory + CouponStore + IdempotencyStore + OrderStore {}

impl<T> CheckoutStore for T where T: StoreDirectory + CouponStore + IdempotencyStore + OrderStore {}
