//! Store settings
//!
//! Each concern gets its own closed enum instead of a free-form JSON map.
//! Columns are stored as JSONB and decoded with serde; an unknown `mode`
//! tag is a decode error rather than a silently ignored field.

use serde::{Deserialize, Serialize};

/// Delivery configuration for a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DeliveryConfig {
    /// Store does not deliver
    #[default]
    Disabled,
    /// Flat delivery fee, optionally waived above a subtotal threshold
    Flat {
        /// Fee in minor currency units
        fee_cents: i64,
        /// Subtotal at or above which delivery is free
        #[serde(default, skip_serializing_if = "Option::is_none")]
        free_above_cents: Option<i64>,
        /// Minimum subtotal accepted for delivery orders
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_order_cents: Option<i64>,
    },
}

impl DeliveryConfig {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, DeliveryConfig::Disabled)
    }

    /// Fee charged for a delivery order with the given subtotal.
    /// Returns `None` when the store does not deliver.
    pub fn fee_for_subtotal(&self, subtotal_cents: i64) -> Option<i64> {
        match self {
            DeliveryConfig::Disabled => None,
            DeliveryConfig::Flat {
                fee_cents,
                free_above_cents,
                ..
            } => match free_above_cents {
                Some(threshold) if *threshold > 0 && subtotal_cents >= *threshold => Some(0),
                _ => Some(*fee_cents),
            },
        }
    }

    /// Minimum subtotal for delivery, if one is configured
    pub fn min_order_cents(&self) -> Option<i64> {
        match self {
            DeliveryConfig::Disabled => None,
            DeliveryConfig::Flat {
                min_order_cents, ..
            } => min_order_cents.filter(|min| *min > 0),
        }
    }
}

/// Kind of Pix key registered by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixKeyKind {
    Cpf,
    Cnpj,
    Email,
    Phone,
    Random,
}

/// Pix (instant payment) configuration for a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PixConfig {
    #[default]
    Disabled,
    Enabled {
        key_kind: PixKeyKind,
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        holder_name: Option<String>,
    },
}

impl PixConfig {
    pub fn is_enabled(&self) -> bool {
        matches!(self, PixConfig::Enabled { .. })
    }
}

/// Immutable snapshot of the settings checkout needs for one store
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub pix: PixConfig,
}
