//! In-memory checkout backend
//!
//! One mutex guards all state, so `commit_order` is atomic the same way the
//! Postgres transaction is: uniqueness checks and the capped coupon
//! increment happen before any row is recorded. Used by tests and local runs
//! without a database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::coupons::Coupon;
use crate::error::{CheckoutError, CheckoutResult};
use crate::idempotency::IdempotencyRecord;
use crate::store::{
    CommitOutcome, CouponStore, IdempotencyStore, NewOrder, OrderStore, StoreDirectory,
    StoreProfile,
};

#[derive(Default)]
struct MemoryState {
    stores: HashMap<Uuid, StoreProfile>,
    coupons: HashMap<(Uuid, String), Coupon>,
    records: HashMap<(Uuid, Uuid), IdempotencyRecord>,
    orders: Vec<NewOrder>,
    order_keys: HashSet<(Uuid, Uuid)>,
    order_codes: HashSet<(Uuid, String)>,
}

#[derive(Default)]
pub struct InMemoryCheckoutStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl InMemoryCheckoutStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_store(&self, store: StoreProfile) {
        self.state.lock().await.stores.insert(store.id, store);
    }

    pub async fn insert_coupon(&self, coupon: Coupon) {
        self.state
            .lock()
            .await
            .coupons
            .insert((coupon.store_id, coupon.code.clone()), coupon);
    }

    /// Make every subsequent `commit_order` fail as if the database were down
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Reserve an order code so the next commit that draws it collides
    pub async fn reserve_order_code(&self, store_id: Uuid, code: &str) {
        self.state
            .lock()
            .await
            .order_codes
            .insert((store_id, code.to_string()));
    }

    pub async fn orders(&self) -> Vec<NewOrder> {
        self.state.lock().await.orders.clone()
    }

    pub async fn coupon_uses(&self, store_id: Uuid, code: &str) -> Option<i32> {
        self.state
            .lock()
            .await
            .coupons
            .get(&(store_id, code.to_string()))
            .map(|c| c.uses_count)
    }

    pub async fn record_count(&self) -> usize {
        self.state.lock().await.records.len()
    }
}

#[async_trait]
impl StoreDirectory for InMemoryCheckoutStore {
    async fn find_store(&self, store_id: Uuid) -> CheckoutResult<Option<StoreProfile>> {
        Ok(self.state.lock().await.stores.get(&store_id).cloned())
    }
}

#[async_trait]
impl CouponStore for InMemoryCheckoutStore {
    async fn find_coupon(&self, store_id: Uuid, code: &str) -> CheckoutResult<Option<Coupon>> {
        Ok(self
            .state
            .lock()
            .await
            .coupons
            .get(&(store_id, code.to_string()))
            .cloned())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryCheckoutStore {
    async fn find_record(
        &self,
        tenant_id: Uuid,
        key: Uuid,
    ) -> CheckoutResult<Option<IdempotencyRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .records
            .get(&(tenant_id, key))
            .cloned())
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> CheckoutResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.records.len();
        state.records.retain(|_, record| record.expires_at > now);
        Ok((before - state.records.len()) as u64)
    }
}

#[async_trait]
impl OrderStore for InMemoryCheckoutStore {
    async fn commit_order(&self, order: &NewOrder) -> CheckoutResult<CommitOutcome> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CheckoutError::TransientStore(
                "simulated write failure".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        let store_id = order.submission.store_id;
        let key = (order.tenant_id, order.idempotency.key);

        if state.records.contains_key(&key) || state.order_keys.contains(&key) {
            return Ok(CommitOutcome::KeyTaken);
        }
        if state.order_codes.contains(&(store_id, order.code.clone())) {
            return Ok(CommitOutcome::CodeTaken);
        }

        if let Some(applied) = &order.coupon {
            let coupon = state
                .coupons
                .values_mut()
                .find(|c| c.id == applied.coupon_id);
            match coupon {
                Some(c) if c.max_uses.map_or(true, |cap| c.uses_count < cap) => {
                    c.uses_count += 1;
                }
                _ => return Ok(CommitOutcome::CouponExhausted),
            }
        }

        state.records.insert(
            key,
            IdempotencyRecord {
                tenant_id: order.tenant_id,
                key: order.idempotency.key,
                request_hash: order.idempotency.request_hash.clone(),
                response: order.idempotency.response.clone(),
                created_at: order.created_at,
                expires_at: order.idempotency.expires_at,
            },
        );
        state.order_keys.insert(key);
        state.order_codes.insert((store_id, order.code.clone()));
        state.orders.push(order.clone());

        Ok(CommitOutcome::Committed)
    }
}
