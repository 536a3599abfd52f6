mod entity;
pub mod types;

pub use types::{Customer, Product, Recommendation, Shop, ShoppingListItem, User};
