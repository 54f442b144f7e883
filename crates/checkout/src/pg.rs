//! Postgres checkout backend
//!
//! `commit_order` runs in one transaction. The idempotency record goes in
//! first with `ON CONFLICT DO NOTHING RETURNING`, so a concurrent commit with
//! the same key blocks on the unique index until the winner finishes and
//! then sees the conflict. The coupon increment is a conditional `UPDATE`,
//! which re-checks the cap under the row lock.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use pediu_shared::{DeliveryConfig, PixConfig, StoreSettings};

use crate::coupons::{Coupon, DiscountKind};
use crate::error::{CheckoutError, CheckoutResult};
use crate::idempotency::{IdempotencyRecord, StoredResponse};
use crate::store::{
    CommitOutcome, CouponStore, IdempotencyStore, NewOrder, OrderStore, StoreDirectory,
    StoreProfile,
};

const ORDER_CODE_CONSTRAINT: &str = "orders_store_code_unique";
const ORDER_KEY_CONSTRAINT: &str = "orders_tenant_idempotency_unique";

/// Event type appended when an order is created
const ORDER_CREATED_EVENT: &str = "CREATED";

#[derive(Debug, sqlx::FromRow)]
struct StoreRow {
    id: Uuid,
    tenant_id: Uuid,
    delivery_config: Json<DeliveryConfig>,
    pix_config: Json<PixConfig>,
}

#[derive(Debug, sqlx::FromRow)]
struct CouponRow {
    id: Uuid,
    store_id: Uuid,
    code: String,
    discount_type: String,
    value: i64,
    is_active: bool,
    starts_at: Option<OffsetDateTime>,
    ends_at: Option<OffsetDateTime>,
    max_uses: Option<i32>,
    uses_count: i32,
    min_order_cents: Option<i64>,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = CheckoutError;

    fn try_from(row: CouponRow) -> Result<Self, Self::Error> {
        let kind: DiscountKind = row
            .discount_type
            .parse()
            .map_err(|e| CheckoutError::TransientStore(format!("Corrupt coupon row: {}", e)))?;

        Ok(Coupon {
            id: row.id,
            store_id: row.store_id,
            code: row.code,
            kind,
            value: row.value,
            is_active: row.is_active,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            max_uses: row.max_uses,
            uses_count: row.uses_count,
            min_order_cents: row.min_order_cents,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct IdempotencyRow {
    tenant_id: Uuid,
    key: Uuid,
    request_hash: String,
    response: serde_json::Value,
    status_code: i32,
    created_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

/// Name of the unique constraint a failed statement violated, if any
fn violated_unique_constraint(err: &sqlx::Error) -> Option<&str> {
    err.as_database_error()
        .filter(|db| db.is_unique_violation())
        .and_then(|db| db.constraint())
}

#[derive(Clone)]
pub struct PgCheckoutStore {
    pool: PgPool,
}

impl PgCheckoutStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StoreDirectory for PgCheckoutStore {
    async fn find_store(&self, store_id: Uuid) -> CheckoutResult<Option<StoreProfile>> {
        let row: Option<StoreRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, delivery_config, pix_config
            FROM stores
            WHERE id = $1
            "#,
        )
        .bind(store_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| StoreProfile {
            id: row.id,
            tenant_id: row.tenant_id,
            settings: StoreSettings {
                delivery: row.delivery_config.0,
                pix: row.pix_config.0,
            },
        }))
    }
}

#[async_trait]
impl CouponStore for PgCheckoutStore {
    async fn find_coupon(&self, store_id: Uuid, code: &str) -> CheckoutResult<Option<Coupon>> {
        let row: Option<CouponRow> = sqlx::query_as(
            r#"
            SELECT id, store_id, code, discount_type, value, is_active,
                   starts_at, ends_at, max_uses, uses_count, min_order_cents
            FROM coupons
            WHERE store_id = $1 AND code = $2
            "#,
        )
        .bind(store_id)
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Coupon::try_from).transpose()
    }
}

#[async_trait]
impl IdempotencyStore for PgCheckoutStore {
    async fn find_record(
        &self,
        tenant_id: Uuid,
        key: Uuid,
    ) -> CheckoutResult<Option<IdempotencyRecord>> {
        let row: Option<IdempotencyRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, key, request_hash, response, status_code, created_at, expires_at
            FROM idempotency_keys
            WHERE tenant_id = $1 AND key = $2
            "#,
        )
        .bind(tenant_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let status_code = u16::try_from(row.status_code).map_err(|_| {
                CheckoutError::TransientStore(format!(
                    "Corrupt idempotency record status {}",
                    row.status_code
                ))
            })?;
            Ok(IdempotencyRecord {
                tenant_id: row.tenant_id,
                key: row.key,
                request_hash: row.request_hash,
                response: StoredResponse {
                    status_code,
                    body: row.response,
                },
                created_at: row.created_at,
                expires_at: row.expires_at,
            })
        })
        .transpose()
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> CheckoutResult<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl OrderStore for PgCheckoutStore {
    async fn commit_order(&self, order: &NewOrder) -> CheckoutResult<CommitOutcome> {
        let submission = &order.submission;
        let mut tx = self.pool.begin().await?;

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO idempotency_keys
                (tenant_id, key, request_hash, response, status_code, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tenant_id, key) DO NOTHING
            RETURNING key
            "#,
        )
        .bind(order.tenant_id)
        .bind(order.idempotency.key)
        .bind(&order.idempotency.request_hash)
        .bind(&order.idempotency.response.body)
        .bind(i32::from(order.idempotency.response.status_code))
        .bind(order.created_at)
        .bind(order.idempotency.expires_at)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            tx.rollback().await?;
            return Ok(CommitOutcome::KeyTaken);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO orders (
                id, tenant_id, store_id, code, idempotency_key, channel, status,
                payment_method, customer_name, customer_phone, customer_email,
                delivery_address, notes, subtotal_cents, discount_cents,
                delivery_fee_cents, total_cents, coupon_id, coupon_code, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', $7, $8, $9, $10, $11, $12,
                    $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(order.id)
        .bind(order.tenant_id)
        .bind(submission.store_id)
        .bind(&order.code)
        .bind(submission.idempotency_key)
        .bind(submission.channel.as_str())
        .bind(submission.payment_method.as_str())
        .bind(&submission.customer.name)
        .bind(&submission.customer.phone)
        .bind(&submission.customer.email)
        .bind(submission.delivery_address.as_ref().map(Json))
        .bind(&submission.notes)
        .bind(order.totals.subtotal_cents)
        .bind(order.totals.discount_cents)
        .bind(order.totals.delivery_fee_cents)
        .bind(order.totals.total_cents)
        .bind(order.coupon.as_ref().map(|c| c.coupon_id))
        .bind(order.coupon.as_ref().map(|c| c.code.as_str()))
        .bind(order.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            let outcome = match violated_unique_constraint(&e) {
                Some(ORDER_CODE_CONSTRAINT) => CommitOutcome::CodeTaken,
                Some(ORDER_KEY_CONSTRAINT) => CommitOutcome::KeyTaken,
                _ => return Err(e.into()),
            };
            tx.rollback().await?;
            return Ok(outcome);
        }

        if let Some(coupon) = &order.coupon {
            let redeemed: Option<(Uuid,)> = sqlx::query_as(
                r#"
                UPDATE coupons
                SET uses_count = uses_count + 1, updated_at = NOW()
                WHERE id = $1
                  AND (max_uses IS NULL OR uses_count < max_uses)
                RETURNING id
                "#,
            )
            .bind(coupon.coupon_id)
            .fetch_optional(&mut *tx)
            .await?;

            if redeemed.is_none() {
                tx.rollback().await?;
                return Ok(CommitOutcome::CouponExhausted);
            }
        }

        for (position, item) in submission.items.iter().enumerate() {
            let line_total = item.line_total_cents()?;
            let (item_id,): (Uuid,) = sqlx::query_as(
                r#"
                INSERT INTO order_items
                    (order_id, position, product_id, title_snapshot, unit_price_cents,
                     quantity, line_total_cents, notes)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING id
                "#,
            )
            .bind(order.id)
            .bind(position as i32)
            .bind(item.product_id)
            .bind(&item.title)
            .bind(item.unit_price_cents)
            .bind(item.quantity)
            .bind(line_total)
            .bind(&item.notes)
            .fetch_one(&mut *tx)
            .await?;

            for modifier in &item.modifiers {
                sqlx::query(
                    r#"
                    INSERT INTO order_item_modifiers
                        (order_item_id, modifier_option_id, name_snapshot, extra_price_cents)
                    VALUES ($1, $2, $3, $4)
                    "#,
                )
                .bind(item_id)
                .bind(modifier.option_id)
                .bind(&modifier.name)
                .bind(modifier.extra_price_cents)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO order_events (order_id, event_type, message, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(order.id)
        .bind(ORDER_CREATED_EVENT)
        .bind(format!("Order {} created", order.code))
        .bind(order.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CommitOutcome::Committed)
    }
}

#[cfg(test)]
mod tests {
    //! Run against a real database when `DATABASE_URL` is set; skipped otherwise.

    use std::sync::Arc;

    use serial_test::serial;

    use super::*;
    use crate::error::CouponRejection;
    use crate::idempotency::IdempotencyPolicy;
    use crate::orders::{Caller, CustomerContact, OrderCommitService, OrderSubmission};
    use crate::pricing::CartLineItem;
    use pediu_shared::{Channel, PaymentMethod};

    async fn test_pool() -> Option<PgPool> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = pediu_shared::create_pool(&url).await.ok()?;
        pediu_shared::run_migrations(&pool).await.ok()?;
        Some(pool)
    }

    /// Insert a tenant and a store, returning `(tenant_id, store_id)`
    async fn seed_store(pool: &PgPool) -> (Uuid, Uuid) {
        let tenant_id = Uuid::new_v4();
        let store_id = Uuid::new_v4();
        sqlx::query("INSERT INTO tenants (id, name) VALUES ($1, 'Test tenant')")
            .bind(tenant_id)
            .execute(pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO stores (id, tenant_id, slug, name) VALUES ($1, $2, $3, 'Test')")
            .bind(store_id)
            .bind(tenant_id)
            .bind(format!("store-{}", store_id))
            .execute(pool)
            .await
            .unwrap();
        (tenant_id, store_id)
    }

    fn takeaway(store_id: Uuid) -> OrderSubmission {
        OrderSubmission {
            store_id,
            idempotency_key: Uuid::new_v4(),
            channel: Channel::Takeaway,
            payment_method: PaymentMethod::Card,
            customer: CustomerContact {
                name: "João".to_string(),
                phone: "+5521988887777".to_string(),
                email: None,
            },
            delivery_address: None,
            items: vec![CartLineItem {
                product_id: Uuid::new_v4(),
                title: "Açaí 500ml".to_string(),
                unit_price_cents: 2_200,
                quantity: 2,
                modifiers: vec![],
                notes: None,
            }],
            declared_discount_cents: 0,
            coupon_code: None,
            notes: None,
        }
    }

    #[tokio::test]
    #[serial]
    async fn test_pg_commit_replay_and_conflict() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let (tenant_id, store_id) = seed_store(&pool).await;
        let store = Arc::new(PgCheckoutStore::new(pool.clone()));
        let service = OrderCommitService::new(store, IdempotencyPolicy::default());
        let caller = Caller {
            user_id: Uuid::new_v4(),
            tenant_id,
        };

        let submission = takeaway(store_id);
        let first = service.commit(&caller, submission.clone()).await.unwrap();
        let second = service.commit(&caller, submission.clone()).await.unwrap();
        assert!(!first.idempotent);
        assert!(second.idempotent);
        assert_eq!(first.order_id, second.order_id);

        let mut changed = submission;
        changed.items[0].quantity = 3;
        let err = service.commit(&caller, changed).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Conflict));

        let (orders,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE store_id = $1")
            .bind(store_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(orders, 1);

        let (events,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM order_events WHERE order_id = $1 AND event_type = 'CREATED'",
        )
        .bind(first.order_id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(events, 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_pg_coupon_cap_enforced_by_update() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let (tenant_id, store_id) = seed_store(&pool).await;
        sqlx::query(
            r#"
            INSERT INTO coupons (store_id, code, discount_type, value, max_uses)
            VALUES ($1, 'ONCE', 'fixed', 500, 1)
            "#,
        )
        .bind(store_id)
        .execute(&pool)
        .await
        .unwrap();

        let store = Arc::new(PgCheckoutStore::new(pool.clone()));
        let service = OrderCommitService::new(store, IdempotencyPolicy::default());
        let caller = Caller {
            user_id: Uuid::new_v4(),
            tenant_id,
        };

        let mut first = takeaway(store_id);
        first.coupon_code = Some("once".to_string());
        let receipt = service.commit(&caller, first).await.unwrap();
        assert_eq!(receipt.totals.discount_cents, 500);

        let mut second = takeaway(store_id);
        second.coupon_code = Some("ONCE".to_string());
        let err = service.commit(&caller, second).await.unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::Coupon(CouponRejection::Exhausted)
        ));

        let (uses,): (i32,) =
            sqlx::query_as("SELECT uses_count FROM coupons WHERE store_id = $1 AND code = 'ONCE'")
                .bind(store_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(uses, 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_pg_purge_removes_only_expired_records() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let (tenant_id, store_id) = seed_store(&pool).await;
        let store = Arc::new(PgCheckoutStore::new(pool.clone()));
        let service = OrderCommitService::new(store.clone(), IdempotencyPolicy::with_ttl_hours(1));
        let caller = Caller {
            user_id: Uuid::new_v4(),
            tenant_id,
        };
        let submission = takeaway(store_id);
        let key = submission.idempotency_key;
        service.commit(&caller, submission).await.unwrap();

        let later = OffsetDateTime::now_utc() + time::Duration::hours(2);
        let purged = store.purge_expired(later).await.unwrap();
        assert!(purged >= 1);
        assert!(store.find_record(tenant_id, key).await.unwrap().is_none());
    }
}
