//! Router harness over the in-memory stores

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, Response},
    Router,
};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use pediu_billing::{BillingPolicy, InMemoryBillingStore, SubscriptionRecord};
use pediu_checkout::{InMemoryCheckoutStore, StoreProfile};
use pediu_shared::{DeliveryConfig, PixConfig, StoreSettings, SubscriptionStatus};

use crate::{config::Config, routes::create_router, state::AppState};

pub const CRON_SECRET: &str = "cron-secret";

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        bind_address: "127.0.0.1:0".to_string(),
        jwt_secret: "test-secret".to_string(),
        cron_secret: Some(CRON_SECRET.to_string()),
        idempotency_ttl_hours: 24,
        allowed_origins: vec![],
        run_migrations: false,
    }
}

pub struct TestApp {
    pub state: AppState,
    pub checkout: Arc<InMemoryCheckoutStore>,
    pub billing: Arc<InMemoryBillingStore>,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub store_id: Uuid,
}

impl TestApp {
    /// One tenant with one counter/takeaway store and an active subscription
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let checkout = Arc::new(InMemoryCheckoutStore::new());
        let billing = Arc::new(InMemoryBillingStore::new());
        let state = AppState::with_stores(
            config,
            checkout.clone(),
            billing.clone(),
            BillingPolicy::default(),
        );

        let tenant_id = Uuid::new_v4();
        let store_id = Uuid::new_v4();
        checkout
            .insert_store(StoreProfile {
                id: store_id,
                tenant_id,
                settings: StoreSettings {
                    delivery: DeliveryConfig::Disabled,
                    pix: PixConfig::Disabled,
                },
            })
            .await;

        let app = Self {
            state,
            checkout,
            billing,
            tenant_id,
            user_id: Uuid::new_v4(),
            store_id,
        };
        app.set_subscription(SubscriptionStatus::Active).await;
        app
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    pub fn token(&self) -> String {
        self.state
            .jwt_manager
            .generate_access_token(self.user_id, self.tenant_id)
            .unwrap()
    }

    pub fn orders_path(&self) -> String {
        format!("/api/v1/stores/{}/orders", self.store_id)
    }

    pub async fn set_subscription(&self, status: SubscriptionStatus) {
        self.set_subscription_record(record(self.tenant_id, status))
            .await;
    }

    pub async fn set_subscription_record(&self, record: SubscriptionRecord) {
        self.billing.upsert_subscription(record).await;
    }
}

pub fn record(tenant_id: Uuid, status: SubscriptionStatus) -> SubscriptionRecord {
    let now = OffsetDateTime::now_utc();
    SubscriptionRecord {
        tenant_id,
        status,
        trial_ends_at: (status == SubscriptionStatus::Trialing).then(|| now + Duration::days(7)),
        grace_period_ends_at: (status == SubscriptionStatus::PastDue)
            .then(|| now + Duration::days(2) - Duration::hours(1)),
        current_period_end: None,
        suspended_at: None,
        suspension_reason: None,
    }
}

/// Counter order for two items, 1000 x 2 and 1500 x 1
pub fn order_body() -> Value {
    serde_json::json!({
        "channel": "COUNTER",
        "payment_method": "CASH",
        "customer": { "name": "Ana", "phone": "+5511912345678" },
        "items": [
            {
                "product_id": Uuid::new_v4(),
                "title": "Pizza Margherita",
                "unit_price_cents": 1000,
                "quantity": 2
            },
            {
                "product_id": Uuid::new_v4(),
                "title": "Guaraná",
                "unit_price_cents": 1500,
                "quantity": 1
            }
        ]
    })
}

pub fn post_json(path: &str, token: Option<&str>, key: Option<Uuid>, body: &Value) -> Request<Body> {
    let mut builder = Request::post(path).header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    if let Some(key) = key {
        builder = builder.header("idempotency-key", key.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
