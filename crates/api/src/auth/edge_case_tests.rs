// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Authentication
//!
//! Tests boundary conditions in:
//! - JWT token handling (AUTH-J01 to AUTH-J06)
//! - Cron secret comparison (AUTH-C01 to AUTH-C03)

#[cfg(test)]
mod jwt_tests {
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    use super::super::jwt::*;

    const SECRET: &str = "test-jwt-secret-key-for-testing-only";

    fn claims_expiring_in(offset: Duration) -> Claims {
        let now = OffsetDateTime::now_utc();
        Claims {
            sub: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            exp: (now + offset).unix_timestamp(),
            iat: now.unix_timestamp(),
        }
    }

    // =========================================================================
    // AUTH-J01: Issued token round-trips user and tenant
    // =========================================================================
    #[test]
    fn test_generated_token_validates() {
        let manager = JwtManager::new(SECRET, 24);
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();

        let token = manager.generate_access_token(user_id, tenant_id).unwrap();
        let claims = manager.validate_access_token(&token).unwrap();

        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.tenant_id, tenant_id);
        assert!(claims.exp > claims.iat);
    }

    // =========================================================================
    // AUTH-J02: Token expired beyond the leeway is rejected as expired
    // =========================================================================
    #[test]
    fn test_expired_token_rejected() {
        let manager = JwtManager::new(SECRET, 24);
        let token = manager
            .encode(&claims_expiring_in(Duration::minutes(-5)))
            .unwrap();

        assert!(matches!(
            manager.validate_access_token(&token),
            Err(JwtError::Expired)
        ));
    }

    // =========================================================================
    // AUTH-J03: Token expired within the 60s leeway is still accepted
    // =========================================================================
    #[test]
    fn test_expiry_within_leeway_accepted() {
        let manager = JwtManager::new(SECRET, 24);
        let token = manager
            .encode(&claims_expiring_in(Duration::seconds(-30)))
            .unwrap();

        assert!(manager.validate_access_token(&token).is_ok());
    }

    // =========================================================================
    // AUTH-J04: Token signed with another secret is invalid
    // =========================================================================
    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = JwtManager::new("some-other-secret", 24);
        let verifier = JwtManager::new(SECRET, 24);
        let token = issuer
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4())
            .unwrap();

        assert!(matches!(
            verifier.validate_access_token(&token),
            Err(JwtError::Invalid(_))
        ));
    }

    // =========================================================================
    // AUTH-J05: Garbage and tampered tokens are invalid
    // =========================================================================
    #[test]
    fn test_malformed_tokens_rejected() {
        let manager = JwtManager::new(SECRET, 24);
        assert!(manager.validate_access_token("").is_err());
        assert!(manager.validate_access_token("a.b.c").is_err());

        let token = manager
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4())
            .unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[2] = "AAAA";
        assert!(manager.validate_access_token(&parts.join(".")).is_err());
    }

    // =========================================================================
    // AUTH-J06: Token without a tenant claim is invalid
    // =========================================================================
    #[test]
    fn test_missing_tenant_claim_rejected() {
        #[derive(serde::Serialize)]
        struct NoTenant {
            sub: Uuid,
            exp: i64,
        }

        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &NoTenant {
                sub: Uuid::new_v4(),
                exp: (OffsetDateTime::now_utc() + Duration::hours(1)).unix_timestamp(),
            },
            &jsonwebtoken::EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let manager = JwtManager::new(SECRET, 24);
        assert!(matches!(
            manager.validate_access_token(&token),
            Err(JwtError::Invalid(_))
        ));
    }
}

#[cfg(test)]
mod cron_secret_tests {
    use super::super::middleware::secrets_match;

    // =========================================================================
    // AUTH-C01: Exact match only
    // =========================================================================
    #[test]
    fn test_exact_match() {
        assert!(secrets_match("cron-secret", "cron-secret"));
        assert!(!secrets_match("cron-secreT", "cron-secret"));
    }

    // =========================================================================
    // AUTH-C02: Prefix and extension of the secret do not match
    // =========================================================================
    #[test]
    fn test_length_mismatch() {
        assert!(!secrets_match("cron", "cron-secret"));
        assert!(!secrets_match("cron-secret-2", "cron-secret"));
    }

    // =========================================================================
    // AUTH-C03: Empty input never matches a configured secret
    // =========================================================================
    #[test]
    fn test_empty_never_matches() {
        assert!(!secrets_match("", "cron-secret"));
    }
}
