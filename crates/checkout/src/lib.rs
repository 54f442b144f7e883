// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Pediu Checkout
//!
//! Turns a submitted cart into exactly one persisted order, no matter how
//! many times the client resends it.
//!
//! ## Components
//!
//! - **Pricing**: subtotal, bounded discount, delivery fee and total in
//!   integer minor units
//! - **Coupons**: ordered validity checks with a distinct reason per failure
//! - **Idempotency**: replay or conflict detection keyed by
//!   `(tenant, idempotency key)` and a hash of the request body
//! - **Orders**: the commit state machine and its single atomic write
//!
//! Storage is behind the traits in [`store`], with Postgres and in-memory
//! implementations.

pub mod coupons;
pub mod error;
pub mod idempotency;
pub mod memory;
pub mod orders;
pub mod pg;
pub mod pricing;
pub mod store;


// Coupons
pub use coupons::{
    check_coupon, normalize_code, AppliedCoupon, Coupon, CouponValidator, DiscountKind,
};

// Error
pub use error::{CheckoutError, CheckoutResult, CouponRejection, ValidationError};

// Idempotency
pub use idempotency::{
    request_hash, Admission, IdempotencyGuard, IdempotencyPolicy, IdempotencyRecord,
    NewIdempotencyRecord, StoredResponse, DEFAULT_IDEMPOTENCY_TTL, MAX_IDEMPOTENCY_TTL_HOURS,
};

// Orders
pub use orders::{
    generate_order_code, Caller, CommitReceipt, CustomerContact, DeliveryAddress,
    OrderCommitService, OrderSubmission,
};

// Pricing
pub use pricing::{AppliedModifier, CartLineItem, Totals};

// Stores
pub use memory::InMemoryCheckoutStore;
pub use pg::PgCheckoutStore;
pub use store::{
    CheckoutStore, CommitOutcome, CouponStore, IdempotencyStore, NewOrder, OrderStore,
    StoreDirectory, StoreProfile,
};
