//! Authentication and access gating

#[cfg(test)]
mod edge_case_tests;
pub mod jwt;
pub mod middleware;
#[cfg(test)]
mod middleware_tests;

pub use jwt::{Claims, JwtError, JwtManager};
pub use middleware::{
    require_auth, require_cron_secret, require_subscription_access, AuthError, AuthUser,
    HEADER_BILLING_MODE, HEADER_BILLING_REASON, HEADER_GRACE_DAYS_REMAINING,
};
