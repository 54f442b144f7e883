// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Pediu API Library
//!
//! HTTP surface for the order commit and subscription access core.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
