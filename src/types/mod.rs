//! Record models stored by the bundled front end.

pub mod catalog;
pub mod task;

pub use catalog::{PRODUCTS_COLLECTION, Product, SHOP_DATABASE, USERS_COLLECTION, User};
pub use task::{Priority, TASKS_COLLECTION, TASKS_DATABASE, Task};

use thiserror::Error as ThisError;

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum ValidationError {
    #[error("`{0}` must not be empty")]
    Empty(&'static str),

    #[error("`{field}` must be a finite, non-negative number, got {value}")]
    InvalidNumber { field: &'static str, value: f64 },

    #[error("unknown priority `{0}` (expected low, medium or high)")]
    UnknownPriority(String),
}

fn require_text(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty(field));
    }
    Ok(())
}
