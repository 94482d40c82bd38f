//! Catalog product as seen by the cart.

use serde::{Deserialize, Serialize};

use zalo_shop_core::{Money, ProductId};

/// A product offered in the storefront.
///
/// The cart keeps a read-only copy; order items snapshot the fields they need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Primary image URI.
    pub image: String,
    /// Unit price.
    pub price: Money,
    /// Declared sizes, first one is the default.
    #[serde(default)]
    pub sizes: Vec<String>,
    /// Declared colors, first one is the default.
    #[serde(default)]
    pub colors: Vec<String>,
}

/// Variant options chosen for a cart line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectedOptions {
    pub size: Option<String>,
    pub color: Option<String>,
}

impl SelectedOptions {
    /// The options a product starts with: each field's first declared value.
    #[must_use]
    pub fn defaults_for(product: &Product) -> Self {
        Self {
            size: product.sizes.first().cloned(),
            color: product.colors.first().cloned(),
        }
    }

    /// Fill absent fields with the product's defaults.
    ///
    /// Two option sets are compared only after normalisation, so leaving a
    /// field out and choosing its default explicitly are the same selection.
    #[must_use]
    pub fn normalized_for(self, product: &Product) -> Self {
        let defaults = Self::defaults_for(product);
        Self {
            size: self.size.or(defaults.size),
            color: self.color.or(defaults.color),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shirt() -> Product {
        Product {
            id: ProductId::new(1),
            name: "Áo thun".to_string(),
            image: "https://cdn.example.vn/ao-thun.jpg".to_string(),
            price: Money::vnd(150_000),
            sizes: vec!["M".to_string(), "L".to_string()],
            colors: vec!["Trắng".to_string()],
        }
    }

    #[test]
    fn test_defaults_use_first_declared_value() {
        let defaults = SelectedOptions::defaults_for(&shirt());
        assert_eq!(defaults.size.as_deref(), Some("M"));
        assert_eq!(defaults.color.as_deref(), Some("Trắng"));
    }

    #[test]
    fn test_absent_equals_explicit_default() {
        let product = shirt();
        let implicit = SelectedOptions::default().normalized_for(&product);
        let explicit = SelectedOptions {
            size: Some("M".to_string()),
            color: None,
        }
        .normalized_for(&product);

        assert_eq!(implicit, explicit);
    }

    #[test]
    fn test_product_without_variants() {
        let product = Product {
            sizes: Vec::new(),
            colors: Vec::new(),
            ..shirt()
        };
        assert_eq!(
            SelectedOptions::default().normalized_for(&product),
            SelectedOptions::default()
        );
    }
}
