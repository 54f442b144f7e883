//! Checkout error types
//!
//! Business-rule failures (`Validation`, `Coupon`, `Conflict`) are never
//! retried. `TransientStore` is the only retryable variant: the caller resends
//! the identical body with the same idempotency key and either gets the
//! committed result replayed or the write attempted again.

use thiserror::Error;

/// Result alias used across the checkout crate
pub type CheckoutResult<T> = Result<T, CheckoutError>;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Invalid submission: {0}")]
    Validation(#[from] ValidationError),

    #[error("Coupon rejected: {0}")]
    Coupon(#[from] CouponRejection),

    #[error("Idempotency key was already used with a different request body")]
    Conflict,

    #[error("Store not found")]
    StoreNotFound,

    #[error("Store belongs to another tenant")]
    StoreForbidden,

    #[error("Storage unavailable: {0}")]
    TransientStore(String),

    #[error("Checkout misconfigured: {0}")]
    Config(String),
}

impl CheckoutError {
    /// Whether resubmitting the identical request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, CheckoutError::TransientStore(_))
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            CheckoutError::Validation(e) => e.as_code(),
            CheckoutError::Coupon(_) => "coupon_rejected",
            CheckoutError::Conflict => "idempotency_conflict",
            CheckoutError::StoreNotFound => "store_not_found",
            CheckoutError::StoreForbidden => "store_forbidden",
            CheckoutError::TransientStore(_) => "storage_unavailable",
            CheckoutError::Config(_) => "checkout_misconfigured",
        }
    }
}

impl From<sqlx::Error> for CheckoutError {
    fn from(err: sqlx::Error) -> Self {
        CheckoutError::TransientStore(err.to_string())
    }
}

/// Malformed or unacceptable order submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Cart has no items")]
    EmptyCart,

    #[error("Item quantity must be positive")]
    NonPositiveQuantity,

    #[error("Amounts cannot be negative")]
    NegativeAmount,

    #[error("Delivery orders require an address")]
    DeliveryAddressRequired,

    #[error("Only delivery orders may carry an address")]
    UnexpectedDeliveryAddress,

    #[error("Store does not deliver")]
    DeliveryUnavailable,

    #[error("Delivery requires a subtotal of at least {min_order_cents}")]
    BelowDeliveryMinimum { min_order_cents: i64 },

    #[error("Payment method is not accepted by this store")]
    PaymentMethodUnavailable,

    #[error("Idempotency key must be a UUID")]
    InvalidIdempotencyKey,

    #[error("Order amount is too large")]
    AmountOverflow,
}

impl ValidationError {
    pub fn as_code(&self) -> &'static str {
        match self {
            ValidationError::EmptyCart => "empty_cart",
            ValidationError::NonPositiveQuantity => "non_positive_quantity",
            ValidationError::NegativeAmount => "negative_amount",
            ValidationError::DeliveryAddressRequired => "delivery_address_required",
            ValidationError::UnexpectedDeliveryAddress => "unexpected_delivery_address",
            ValidationError::DeliveryUnavailable => "delivery_unavailable",
            ValidationError::BelowDeliveryMinimum { .. } => "below_delivery_minimum",
            ValidationError::PaymentMethodUnavailable => "payment_method_unavailable",
            ValidationError::InvalidIdempotencyKey => "invalid_idempotency_key",
            ValidationError::AmountOverflow => "amount_overflow",
        }
    }
}

/// Reason a coupon could not be applied. Each variant has its own reason
/// code so the storefront can show a specific message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CouponRejection {
    #[error("Coupon not found")]
    NotFound,

    #[error("Coupon is inactive")]
    Inactive,

    #[error("Coupon is not valid yet")]
    NotStarted,

    #[error("Coupon has expired")]
    Expired,

    #[error("Order subtotal is below the coupon minimum of {min_order_cents}")]
    BelowMinimum { min_order_cents: i64 },

    #[error("Coupon usage limit reached")]
    Exhausted,
}

impl CouponRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            CouponRejection::NotFound => "not_found",
            CouponRejection::Inactive => "inactive",
            CouponRejection::NotStarted => "not_started",
            CouponRejection::Expired => "expired",
            CouponRejection::BelowMinimum { .. } => "below_minimum",
            CouponRejection::Exhausted => "exhausted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_are_retryable() {
        assert!(CheckoutError::TransientStore("timeout".into()).is_retryable());
        assert!(!CheckoutError::Conflict.is_retryable());
        assert!(!CheckoutError::Validation(ValidationError::EmptyCart).is_retryable());
        assert!(!CheckoutError::Coupon(CouponRejection::Exhausted).is_retryable());
    }

    #[test]
    fn test_validation_code_surfaces_through_checkout_error() {
        let err: CheckoutError = ValidationError::DeliveryAddressRequired.into();
        assert_eq!(err.code(), "delivery_address_required");
    }

    #[test]
    fn test_coupon_reasons_are_distinct() {
        let reasons = [
            CouponRejection::NotFound.reason(),
            CouponRejection::Inactive.reason(),
            CouponRejection::NotStarted.reason(),
            CouponRejection::Expired.reason(),
            CouponRejection::BelowMinimum { min_order_cents: 1 }.reason(),
            CouponRejection::Exhausted.reason(),
        ];
        let unique: std::collections::HashSet<_> = reasons.iter().collect();
        assert_eq!(unique.len(), reasons.len());
    }
}
