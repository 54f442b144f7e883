// Test code patterns:
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Pediu Shared Types
//!
//! Types and database helpers used by every Pediu crate:
//!
//! - **Order vocabulary**: sales channel, payment method, order status
//! - **Billing vocabulary**: subscription and invoice status
//! - **Store settings**: closed enums for delivery and Pix configuration
//! - **Database**: connection pools and embedded migrations

pub mod db;
pub mod settings;
pub mod types;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use settings::{DeliveryConfig, PixConfig, PixKeyKind, StoreSettings};
pub use types::{
    Channel, InvoiceStatus, OrderStatus, ParseEnumError, PaymentMethod, SubscriptionStatus,
};
