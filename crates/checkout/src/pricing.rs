//! Order pricing
//!
//! Pure integer arithmetic over minor currency units. Amounts are `i64`, so a
//! fractional value in a request body fails deserialization before it gets
//! here. Identical inputs always produce identical totals, which replay
//! verification relies on.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// A modifier option applied to a cart line (e.g. "extra cheese")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedModifier {
    pub option_id: Uuid,
    pub name: String,
    pub extra_price_cents: i64,
}

/// One line of a submitted cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineItem {
    pub product_id: Uuid,
    pub title: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
    #[serde(default)]
    pub modifiers: Vec<AppliedModifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CartLineItem {
    /// Reject non-positive quantities and negative prices
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity);
        }
        if self.unit_price_cents < 0 || self.modifiers.iter().any(|m| m.extra_price_cents < 0) {
            return Err(ValidationError::NegativeAmount);
        }
        Ok(())
    }

    /// `(unit price + sum of modifier prices) * quantity`
    pub fn line_total_cents(&self) -> Result<i64, ValidationError> {
        let modifiers = self
            .modifiers
            .iter()
            .try_fold(0i64, |acc, m| acc.checked_add(m.extra_price_cents))
            .ok_or(ValidationError::AmountOverflow)?;

        self.unit_price_cents
            .checked_add(modifiers)
            .and_then(|unit| unit.checked_mul(i64::from(self.quantity)))
            .ok_or(ValidationError::AmountOverflow)
    }
}

/// Computed order totals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal_cents: i64,
    pub discount_cents: i64,
    pub delivery_fee_cents: i64,
    pub total_cents: i64,
}

/// Sum of all line totals
pub fn subtotal_cents(items: &[CartLineItem]) -> Result<i64, ValidationError> {
    items.iter().try_fold(0i64, |acc, item| {
        acc.checked_add(item.line_total_cents()?)
            .ok_or(ValidationError::AmountOverflow)
    })
}

/// Clamp a proposed discount into `[0, subtotal]`
pub fn bounded_discount(proposed_cents: i64, subtotal_cents: i64) -> i64 {
    proposed_cents.clamp(0, subtotal_cents.max(0))
}

/// Price a validated cart.
///
/// `delivery_fee_cents` is zero for non-delivery channels; the caller decides.
pub fn price(
    items: &[CartLineItem],
    delivery_fee_cents: i64,
    proposed_discount_cents: i64,
) -> Result<Totals, ValidationError> {
    if delivery_fee_cents < 0 {
        return Err(ValidationError::NegativeAmount);
    }

    let subtotal = subtotal_cents(items)?;
    let discount = bounded_discount(proposed_discount_cents, subtotal);
    let total = subtotal
        .checked_add(delivery_fee_cents)
        .ok_or(ValidationError::AmountOverflow)?
        - discount;

    Ok(Totals {
        subtotal_cents: subtotal,
        discount_cents: discount,
        delivery_fee_cents,
        total_cents: total.max(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(unit: i64, qty: i32, modifiers: &[i64]) -> CartLineItem {
        CartLineItem {
            product_id: Uuid::new_v4(),
            title: "X-Burger".to_string(),
            unit_price_cents: unit,
            quantity: qty,
            modifiers: modifiers
                .iter()
                .map(|price| AppliedModifier {
                    option_id: Uuid::new_v4(),
                    name: "Bacon".to_string(),
                    extra_price_cents: *price,
                })
                .collect(),
            notes: None,
        }
    }

    #[test]
    fn test_subtotal_and_total_with_delivery_fee() {
        let items = vec![item(1000, 2, &[]), item(1500, 1, &[])];
        let totals = price(&items, 500, 0).unwrap();
        assert_eq!(totals.subtotal_cents, 3500);
        assert_eq!(totals.total_cents, 4000);
    }

    #[test]
    fn test_modifiers_are_multiplied_by_quantity() {
        let line = item(1000, 3, &[200, 50]);
        assert_eq!(line.line_total_cents().unwrap(), 3750);
    }

    #[test]
    fn test_discount_is_bounded_by_subtotal() {
        let items = vec![item(1000, 1, &[])];
        let totals = price(&items, 500, 5000).unwrap();
        assert_eq!(totals.discount_cents, 1000);
        assert_eq!(totals.total_cents, 500);
    }

    #[test]
    fn test_negative_discount_is_ignored() {
        let items = vec![item(1000, 1, &[])];
        let totals = price(&items, 0, -300).unwrap();
        assert_eq!(totals.discount_cents, 0);
        assert_eq!(totals.total_cents, 1000);
    }

    #[test]
    fn test_total_never_negative_for_any_discount() {
        let items = vec![item(250, 2, &[25])];
        for discount in [i64::MIN, -1, 0, 1, 549, 550, 551, i64::MAX] {
            let totals = price(&items, 0, discount).unwrap();
            assert!(totals.total_cents >= 0);
            assert!(totals.discount_cents <= totals.subtotal_cents);
            assert!(totals.discount_cents >= 0);
        }
    }

    #[test]
    fn test_overflow_is_reported() {
        let items = vec![item(i64::MAX / 2, 3, &[])];
        assert_eq!(price(&items, 0, 0), Err(ValidationError::AmountOverflow));
    }

    #[test]
    fn test_line_validation() {
        assert_eq!(
            item(100, 0, &[]).validate(),
            Err(ValidationError::NonPositiveQuantity)
        );
        assert_eq!(
            item(100, 1, &[-5]).validate(),
            Err(ValidationError::NegativeAmount)
        );
        assert!(item(0, 1, &[]).validate().is_ok());
    }

    #[test]
    fn test_fractional_amount_fails_to_decode() {
        let json = serde_json::json!({
            "product_id": Uuid::new_v4(),
            "title": "Soda",
            "unit_price_cents": 10.5,
            "quantity": 1
        });
        assert!(serde_json::from_value::<CartLineItem>(json).is_err());
    }
}
