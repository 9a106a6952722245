use super::{ValidationError, require_text};
use crate::db::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SHOP_DATABASE: &str = "loja";
pub const USERS_COLLECTION: &str = "users";
pub const PRODUCTS_COLLECTION: &str = "products";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub name: String,
    pub age: u32,
}

impl User {
    pub fn new(name: impl Into<String>, age: u32) -> Self {
        Self {
            id: None,
            name: name.into(),
            age,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name)
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - age: {}", self.name, self.age)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    pub name: String,
    pub price: f64,
}

impl Product {
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        Self {
            id: None,
            name: name.into(),
            price,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("name", &self.name)?;
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(ValidationError::InvalidNumber {
                field: "price",
                value: self.price,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - price: {:.2}", self.name, self.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_price_must_be_finite_and_non_negative() {
        assert!(Product::new("pen", 2.5).validate().is_ok());
        assert!(Product::new("pen", -1.0).validate().is_err());
        assert!(Product::new("pen", f64::NAN).validate().is_err());
        assert_eq!(
            Product::new("", 1.0).validate(),
            Err(ValidationError::Empty("name"))
        );
    }

    #[test]
    fn display_matches_listing_format() {
        assert_eq!(User::new("Ana", 31).to_string(), "Ana - age: 31");
        assert_eq!(Product::new("Pen", 2.5).to_string(), "Pen - price: 2.50");
    }
}
