//! Product Catalog
//!
//! Fixed, read-only set of purchasable digital items.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};

/// A purchasable digital item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub price: Decimal,
    pub description: String,
}

impl Product {
    pub fn new(id: impl Into<String>, price: Decimal, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            price: price.round_dp(2),
            description: description.into(),
        }
    }

    /// Price as sent on the wire, always two decimal places ("3.00")
    pub fn amount(&self) -> String {
        format_amount(self.price)
    }
}

/// Render a decimal the way the gateway expects amounts
pub fn format_amount(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

/// Catalog service
#[derive(Clone, Debug)]
pub struct Catalog {
    products: BTreeMap<String, Product>,
}

impl Catalog {
    pub fn new(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Look up a product by id
    pub fn get(&self, item_id: &str) -> Result<&Product> {
        self.products
            .get(item_id)
            .ok_or_else(|| CheckoutError::UnknownProduct(item_id.to_string()))
    }

    /// All products, ordered by id
    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new([
            Product::new("invoice_template1", dec!(3.00), "Super Simple Invoice Template"),
            Product::new(
                "letter_of_resignation1",
                dec!(2.50),
                "Unapologetic Letter of Resignation",
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let catalog = Catalog::default();
        assert_eq!(catalog.len(), 2);

        let invoice = catalog.get("invoice_template1").unwrap();
        assert_eq!(invoice.amount(), "3.00");
        assert_eq!(invoice.description, "Super Simple Invoice Template");

        let letter = catalog.get("letter_of_resignation1").unwrap();
        assert_eq!(letter.amount(), "2.50");
    }

    #[test]
    fn test_unknown_product() {
        let catalog = Catalog::default();
        let err = catalog.get("time_machine").unwrap_err();
        assert!(matches!(err, CheckoutError::UnknownProduct(ref id) if id == "time_machine"));
    }

    #[test]
    fn test_amount_formatting() {
        assert_eq!(format_amount(dec!(3)), "3.00");
        assert_eq!(format_amount(dec!(2.5)), "2.50");
        assert_eq!(format_amount(dec!(19.999)), "20.00");
    }
}
