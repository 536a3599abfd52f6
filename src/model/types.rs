use serde::{Deserialize, Serialize};

use crate::cache::UNSAVED_ID;

fn unsaved_id() -> i64 {
  UNSAVED_ID
}

/// Catalog product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
  #[serde(default = "unsaved_id")]
  pub id: i64,
  pub name: String,
  #[serde(default)]
  pub barcode: Option<String>,
  #[serde(default)]
  pub description: Option<String>,
  /// Unit of sale (e.g., "kg", "l", "pcs")
  #[serde(default)]
  pub unit: Option<String>,
  #[serde(default)]
  pub price_cents: Option<i64>,
  #[serde(default)]
  pub shop_id: Option<i64>,
}

/// Shop directory entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shop {
  #[serde(default = "unsaved_id")]
  pub id: i64,
  pub name: String,
  #[serde(default)]
  pub address: Option<String>,
  #[serde(default)]
  pub latitude: Option<f64>,
  #[serde(default)]
  pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
  #[serde(default = "unsaved_id")]
  pub id: i64,
  pub name: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub phone: Option<String>,
}

/// Application user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  #[serde(default = "unsaved_id")]
  pub id: i64,
  pub username: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub first_name: String,
  #[serde(default)]
  pub last_name: String,
}

/// One line of a shopping list.
///
/// `list_id`, `product_id` and `product_name` are flat here; on the wire the
/// list is named `shopping_list` and the product is nested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingListItem {
  #[serde(default = "unsaved_id")]
  pub id: i64,
  pub list_id: i64,
  pub product_id: i64,
  #[serde(default)]
  pub product_name: String,
  #[serde(default = "default_quantity")]
  pub quantity: u32,
  #[serde(default)]
  pub checked: bool,
}

fn default_quantity() -> u32 {
  1
}

/// Product recommended to a customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
  #[serde(default = "unsaved_id")]
  pub id: i64,
  pub customer_id: i64,
  pub product_id: i64,
  #[serde(default)]
  pub product_name: String,
  #[serde(default)]
  pub reason: Option<String>,
}
