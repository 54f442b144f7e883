//! Idempotent order commit
//!
//! `commit` walks RECEIVED -> PRICED -> COMMITTED, or ends early in REPLAYED
//! (stored response returned) or REJECTED (classified error). Validation and
//! coupon failures never reach the write. The write itself is a single call
//! into [`OrderStore::commit_order`], which lands every row or none.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use pediu_shared::{Channel, OrderStatus, PaymentMethod, StoreSettings};

use crate::coupons::{normalize_code, AppliedCoupon, CouponValidator};
use crate::error::{CheckoutError, CheckoutResult, CouponRejection, ValidationError};
use crate::idempotency::{
    self, Admission, IdempotencyGuard, IdempotencyPolicy, NewIdempotencyRecord, StoredResponse,
};
use crate::pricing::{self, CartLineItem, Totals};
use crate::store::{
    CommitOutcome, CouponStore, IdempotencyStore, NewOrder, OrderStore, StoreDirectory,
};

/// Characters used in order codes. No 0/O or 1/I.
pub const ORDER_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const ORDER_CODE_LENGTH: usize = 6;

/// Attempts at finding an unused order code before giving up
const MAX_CODE_ATTEMPTS: usize = 5;

/// Status code stored with a freshly committed order
const CREATED_STATUS: u16 = 201;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContact {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub street: String,
    pub number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complement: Option<String>,
    pub district: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

/// A cart submitted for checkout.
///
/// Client totals are never trusted: `declared_discount_cents` is only
/// compared against the server's figure and logged when they differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSubmission {
    pub store_id: Uuid,
    pub idempotency_key: Uuid,
    pub channel: Channel,
    pub payment_method: PaymentMethod,
    pub customer: CustomerContact,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<DeliveryAddress>,
    pub items: Vec<CartLineItem>,
    #[serde(default)]
    pub declared_discount_cents: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl OrderSubmission {
    /// Shape checks that need no store data
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.idempotency_key.is_nil() {
            return Err(ValidationError::InvalidIdempotencyKey);
        }
        if self.items.is_empty() {
            return Err(ValidationError::EmptyCart);
        }
        for item in &self.items {
            item.validate()?;
        }
        if self.declared_discount_cents < 0 {
            return Err(ValidationError::NegativeAmount);
        }

        match (&self.delivery_address, self.channel.requires_address()) {
            (None, true) => Err(ValidationError::DeliveryAddressRequired),
            (Some(address), true) if address.street.trim().is_empty() => {
                Err(ValidationError::DeliveryAddressRequired)
            }
            (Some(_), false) => Err(ValidationError::UnexpectedDeliveryAddress),
            _ => Ok(()),
        }
    }

    /// Checks against the target store's settings
    fn validate_against(&self, settings: &StoreSettings) -> Result<(), ValidationError> {
        if self.channel == Channel::Delivery && !settings.delivery.is_enabled() {
            return Err(ValidationError::DeliveryUnavailable);
        }
        if self.payment_method == PaymentMethod::Pix && !settings.pix.is_enabled() {
            return Err(ValidationError::PaymentMethodUnavailable);
        }
        Ok(())
    }
}

/// Authenticated identity the commit runs on behalf of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
}

/// What `commit` returns, and what is stored for replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub order_id: Uuid,
    pub order_code: String,
    pub status: OrderStatus,
    pub totals: Totals,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// True when this receipt is a replay of an earlier commit
    pub idempotent: bool,
}

/// Random order code from [`ORDER_CODE_ALPHABET`]
pub fn generate_order_code() -> String {
    let mut rng = rand::rng();
    (0..ORDER_CODE_LENGTH)
        .map(|_| ORDER_CODE_ALPHABET[rng.random_range(0..ORDER_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Turns carts into orders exactly once per idempotency key
#[derive(Clone)]
pub struct OrderCommitService {
    stores: Arc<dyn StoreDirectory>,
    orders: Arc<dyn OrderStore>,
    coupons: CouponValidator,
    guard: IdempotencyGuard,
}

impl OrderCommitService {
    pub fn new<S>(store: Arc<S>, policy: IdempotencyPolicy) -> Self
    where
        S: StoreDirectory + CouponStore + IdempotencyStore + OrderStore + 'static,
    {
        let stores: Arc<dyn StoreDirectory> = store.clone();
        let orders: Arc<dyn OrderStore> = store.clone();
        let coupon_store: Arc<dyn CouponStore> = store.clone();
        let keys: Arc<dyn IdempotencyStore> = store;

        Self {
            stores,
            orders,
            coupons: CouponValidator::new(coupon_store),
            guard: IdempotencyGuard::new(keys, policy),
        }
    }

    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.guard
    }

    /// Commit `submission` for `caller` at the current time
    pub async fn commit(
        &self,
        caller: &Caller,
        submission: OrderSubmission,
    ) -> CheckoutResult<CommitReceipt> {
        self.commit_at(caller, submission, OffsetDateTime::now_utc())
            .await
    }

    pub async fn commit_at(
        &self,
        caller: &Caller,
        mut submission: OrderSubmission,
        now: OffsetDateTime,
    ) -> CheckoutResult<CommitReceipt> {
        submission.validate()?;
        // Case and padding of a typed code must not change the request hash
        submission.coupon_code = submission.coupon_code.as_deref().map(normalize_code);

        let key = submission.idempotency_key;
        let request_hash = idempotency::request_hash(&submission)?;

        match self.guard.check(caller.tenant_id, key, &request_hash).await? {
            Admission::Proceed => {}
            Admission::Replay(stored) => {
                tracing::info!(
                    tenant_id = %caller.tenant_id,
                    idempotency_key = %key,
                    "Replaying committed order"
                );
                return replay(stored);
            }
            Admission::Conflict => {
                tracing::warn!(
                    tenant_id = %caller.tenant_id,
                    idempotency_key = %key,
                    "Idempotency key reused with a different body"
                );
                return Err(CheckoutError::Conflict);
            }
        }

        let store = self
            .stores
            .find_store(submission.store_id)
            .await?
            .ok_or(CheckoutError::StoreNotFound)?;
        if store.tenant_id != caller.tenant_id {
            tracing::warn!(
                tenant_id = %caller.tenant_id,
                store_id = %store.id,
                "Order submitted to a store owned by another tenant"
            );
            return Err(CheckoutError::StoreForbidden);
        }
        submission.validate_against(&store.settings)?;

        let totals_and_coupon = self.price(&submission, &store.settings, now).await;
        let (totals, coupon) = match totals_and_coupon {
            Ok(priced) => priced,
            Err(CheckoutError::Coupon(rejection)) => {
                tracing::info!(
                    tenant_id = %caller.tenant_id,
                    store_id = %store.id,
                    reason = rejection.reason(),
                    "Coupon rejected at checkout"
                );
                return Err(CheckoutError::Coupon(rejection));
            }
            Err(e) => return Err(e),
        };

        if submission.declared_discount_cents != totals.discount_cents {
            tracing::debug!(
                store_id = %store.id,
                declared = submission.declared_discount_cents,
                computed = totals.discount_cents,
                "Declared discount differs from computed discount"
            );
        }

        let mut order = NewOrder {
            id: Uuid::new_v4(),
            tenant_id: caller.tenant_id,
            code: String::new(),
            submission,
            totals,
            coupon,
            idempotency: NewIdempotencyRecord {
                key,
                request_hash: request_hash.clone(),
                response: StoredResponse {
                    status_code: CREATED_STATUS,
                    body: serde_json::Value::Null,
                },
                expires_at: now,
            },
            created_at: now,
        };

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            order.code = generate_order_code();
            let receipt = receipt_for(&order);
            let body = serde_json::to_value(&receipt).map_err(|e| {
                CheckoutError::TransientStore(format!("Failed to encode receipt: {}", e))
            })?;
            order.idempotency = self.guard.prepare(
                key,
                request_hash.clone(),
                StoredResponse {
                    status_code: CREATED_STATUS,
                    body,
                },
                now,
            )?;

            let outcome = self.orders.commit_order(&order).await.map_err(|e| {
                tracing::error!(
                    tenant_id = %caller.tenant_id,
                    idempotency_key = %key,
                    error = %e,
                    "Order write failed"
                );
                e
            })?;

            match outcome {
                CommitOutcome::Committed => {
                    tracing::info!(
                        tenant_id = %caller.tenant_id,
                        store_id = %order.submission.store_id,
                        order_id = %order.id,
                        order_code = %order.code,
                        total_cents = order.totals.total_cents,
                        "Order committed"
                    );
                    return Ok(receipt);
                }
                CommitOutcome::CodeTaken => {
                    tracing::debug!(attempt, code = %order.code, "Order code collision");
                }
                CommitOutcome::CouponExhausted => {
                    tracing::info!(
                        tenant_id = %caller.tenant_id,
                        coupon = ?order.coupon.as_ref().map(|c| c.code.as_str()),
                        "Coupon usage cap reached during commit"
                    );
                    return Err(CheckoutError::Coupon(CouponRejection::Exhausted));
                }
                CommitOutcome::KeyTaken => {
                    return self
                        .resolve_key_race(caller.tenant_id, key, &request_hash)
                        .await;
                }
            }
        }

        Err(CheckoutError::TransientStore(
            "Could not allocate a unique order code".to_string(),
        ))
    }

    /// Subtotal, delivery fee and coupon discount from server-side data only
    async fn price(
        &self,
        submission: &OrderSubmission,
        settings: &StoreSettings,
        now: OffsetDateTime,
    ) -> CheckoutResult<(Totals, Option<AppliedCoupon>)> {
        let subtotal = pricing::subtotal_cents(&submission.items)?;

        let delivery_fee = if submission.channel == Channel::Delivery {
            if let Some(min) = settings.delivery.min_order_cents() {
                if subtotal < min {
                    return Err(ValidationError::BelowDeliveryMinimum {
                        min_order_cents: min,
                    }
                    .into());
                }
            }
            settings
                .delivery
                .fee_for_subtotal(subtotal)
                .ok_or(ValidationError::DeliveryUnavailable)?
        } else {
            0
        };

        let coupon = match submission.coupon_code.as_deref() {
            Some(code) => Some(
                self.coupons
                    .validate(submission.store_id, code, subtotal, now)
                    .await??,
            ),
            None => None,
        };

        let proposed = coupon.as_ref().map_or(0, |c| c.discount_cents);
        let totals = pricing::price(&submission.items, delivery_fee, proposed)?;
        Ok((totals, coupon))
    }

    /// The store refused our idempotency insert: someone else holds the key.
    /// Re-read and replay the winner when the bodies match.
    async fn resolve_key_race(
        &self,
        tenant_id: Uuid,
        key: Uuid,
        request_hash: &str,
    ) -> CheckoutResult<CommitReceipt> {
        match self.guard.check(tenant_id, key, request_hash).await? {
            Admission::Replay(stored) => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    idempotency_key = %key,
                    "Lost commit race, replaying winner"
                );
                replay(stored)
            }
            Admission::Conflict => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    idempotency_key = %key,
                    "Concurrent commit with same key and different body"
                );
                Err(CheckoutError::Conflict)
            }
            // Record purged while an order still carries the key
            Admission::Proceed => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    idempotency_key = %key,
                    "Idempotency key belongs to an order whose record was purged"
                );
                Err(CheckoutError::Conflict)
            }
        }
    }
}

fn receipt_for(order: &NewOrder) -> CommitReceipt {
    CommitReceipt {
        order_id: order.id,
        order_code: order.code.clone(),
        status: OrderStatus::Pending,
        totals: order.totals,
        coupon_code: order.coupon.as_ref().map(|c| c.code.clone()),
        created_at: order.created_at,
        idempotent: false,
    }
}

fn replay(stored: StoredResponse) -> CheckoutResult<CommitReceipt> {
    let mut receipt: CommitReceipt = serde_json::from_value(stored.body).map_err(|e| {
        CheckoutError::TransientStore(format!("Stored response is unreadable: {}", e))
    })?;
    receipt.idempotent = true;
    Ok(receipt)
}
