//! Request de-duplication keyed by `(tenant, idempotency key)`
//!
//! The guard itself holds no state. At-most-once execution comes from the
//! store: the record is inserted inside the same transaction as the work it
//! protects, and the `(tenant_id, key)` primary key rejects the second
//! writer. The loser re-reads the winner's record and replays it.
//!
//! Records are honoured until they are purged. Once purged, the key value
//! is free again and nothing guarantees a later request with it is rejected.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{CheckoutError, CheckoutResult};
use crate::store::IdempotencyStore;

/// Default record lifetime
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest accepted record lifetime, one year
pub const MAX_IDEMPOTENCY_TTL_HOURS: u64 = 24 * 365;

/// Response captured for replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
}

/// A persisted idempotency record
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub tenant_id: Uuid,
    pub key: Uuid,
    pub request_hash: String,
    pub response: StoredResponse,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

/// Record to be written together with the protected operation
#[derive(Debug, Clone, PartialEq)]
pub struct NewIdempotencyRecord {
    pub key: Uuid,
    pub request_hash: String,
    pub response: StoredResponse,
    pub expires_at: OffsetDateTime,
}

/// Outcome of looking a key up before doing any work
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// No record: execute the request
    Proceed,
    /// Same key, same body: return the stored response untouched
    Replay(StoredResponse),
    /// Same key, different body
    Conflict,
}

/// Record lifetime settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyPolicy {
    pub ttl: Duration,
}

impl Default for IdempotencyPolicy {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_IDEMPOTENCY_TTL,
        }
    }
}

impl IdempotencyPolicy {
    /// Lifetime in hours, clamped to `1..=MAX_IDEMPOTENCY_TTL_HOURS`
    pub fn with_ttl_hours(hours: u64) -> Self {
        let hours = hours.clamp(1, MAX_IDEMPOTENCY_TTL_HOURS);
        Self {
            ttl: Duration::from_secs(hours.saturating_mul(60 * 60)),
        }
    }

    /// When a record written at `now` expires
    pub fn expires_at(&self, now: OffsetDateTime) -> CheckoutResult<OffsetDateTime> {
        time::Duration::try_from(self.ttl)
            .ok()
            .and_then(|ttl| now.checked_add(ttl))
            .ok_or_else(|| {
                CheckoutError::Config(format!(
                    "idempotency TTL of {}s is out of range",
                    self.ttl.as_secs()
                ))
            })
    }
}

/// SHA-256 (hex) of the canonical JSON encoding of `body`.
///
/// Hashing the typed value rather than raw bytes makes the fingerprint
/// insensitive to whitespace and key order in the client's JSON.
pub fn request_hash<T: Serialize>(body: &T) -> CheckoutResult<String> {
    let canonical = serde_json::to_vec(body)
        .map_err(|e| CheckoutError::TransientStore(format!("Failed to encode request: {}", e)))?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

/// Compare an existing record (if any) against the incoming body hash
pub fn admit(existing: Option<&IdempotencyRecord>, request_hash: &str) -> Admission {
    match existing {
        None => Admission::Proceed,
        Some(record) if record.request_hash == request_hash => {
            Admission::Replay(record.response.clone())
        }
        Some(_) => Admission::Conflict,
    }
}

#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    policy: IdempotencyPolicy,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>, policy: IdempotencyPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> IdempotencyPolicy {
        self.policy
    }

    /// Look up `(tenant_id, key)` and decide whether the request may run
    pub async fn check(
        &self,
        tenant_id: Uuid,
        key: Uuid,
        request_hash: &str,
    ) -> CheckoutResult<Admission> {
        let existing = self.store.find_record(tenant_id, key).await?;
        Ok(admit(existing.as_ref(), request_hash))
    }

    /// Build the record that will be inserted alongside the work
    pub fn prepare(
        &self,
        key: Uuid,
        request_hash: String,
        response: StoredResponse,
        now: OffsetDateTime,
    ) -> CheckoutResult<NewIdempotencyRecord> {
        Ok(NewIdempotencyRecord {
            key,
            request_hash,
            response,
            expires_at: self.policy.expires_at(now)?,
        })
    }

    /// Delete records whose TTL has passed. Returns the number removed.
    pub async fn purge_expired(&self, now: OffsetDateTime) -> CheckoutResult<u64> {
        let purged = self.store.purge_expired(now).await?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired idempotency records");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record(hash: &str) -> IdempotencyRecord {
        IdempotencyRecord {
            tenant_id: Uuid::new_v4(),
            key: Uuid::new_v4(),
            request_hash: hash.to_string(),
            response: StoredResponse {
                status_code: 201,
                body: serde_json::json!({"order_code": "ABC234"}),
            },
            created_at: datetime!(2025-03-10 12:00 UTC),
            expires_at: datetime!(2025-03-11 12:00 UTC),
        }
    }

    #[test]
    fn test_admit_without_record_proceeds() {
        assert_eq!(admit(None, "abc"), Admission::Proceed);
    }

    #[test]
    fn test_admit_same_hash_replays_stored_response() {
        let rec = record("abc");
        match admit(Some(&rec), "abc") {
            Admission::Replay(response) => {
                assert_eq!(response.status_code, 201);
                assert_eq!(response.body["order_code"], "ABC234");
            }
            other => panic!("expected replay, got {:?}", other),
        }
    }

    #[test]
    fn test_admit_different_hash_conflicts() {
        assert_eq!(admit(Some(&record("abc")), "def"), Admission::Conflict);
    }

    #[test]
    fn test_request_hash_is_stable_and_sensitive() {
        let a = serde_json::json!({"items": [1, 2], "channel": "DELIVERY"});
        let b = serde_json::json!({"items": [1, 2], "channel": "TAKEAWAY"});
        assert_eq!(request_hash(&a).unwrap(), request_hash(&a).unwrap());
        assert_ne!(request_hash(&a).unwrap(), request_hash(&b).unwrap());
        assert_eq!(request_hash(&a).unwrap().len(), 64);
    }

    #[test]
    fn test_ttl_hours_clamped() {
        assert_eq!(
            IdempotencyPolicy::with_ttl_hours(0).ttl,
            Duration::from_secs(3600)
        );
        assert_eq!(
            IdempotencyPolicy::with_ttl_hours(100_000_000).ttl,
            Duration::from_secs(MAX_IDEMPOTENCY_TTL_HOURS * 3600)
        );
        assert_eq!(
            IdempotencyPolicy::with_ttl_hours(u64::MAX).ttl,
            Duration::from_secs(MAX_IDEMPOTENCY_TTL_HOURS * 3600)
        );
        assert_eq!(IdempotencyPolicy::default().ttl, DEFAULT_IDEMPOTENCY_TTL);
    }

    #[test]
    fn test_expires_at_out_of_range_is_an_error() {
        let now = datetime!(2025-03-10 12:00 UTC);
        assert_eq!(
            IdempotencyPolicy::default().expires_at(now).unwrap(),
            datetime!(2025-03-11 12:00 UTC)
        );

        let huge = IdempotencyPolicy {
            ttl: Duration::from_secs(u64::MAX),
        };
        assert!(matches!(huge.expires_at(now), Err(CheckoutError::Config(_))));
    }
}
