//! Serde types matching the remote API's payloads.
//!
//! Most entities travel as their canonical type. The ones defined here have
//! a wire shape that differs from the canonical one.

use serde::{Deserialize, Serialize};

use crate::model::ShoppingListItem;

/// Product reference nested inside other resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
  pub id: i64,
  #[serde(default)]
  pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingListItemResource {
  pub id: i64,
  pub shopping_list: i64,
  pub product: ProductSummary,
  pub quantity: u32,
  #[serde(default)]
  pub checked: bool,
}

impl From<ShoppingListItemResource> for ShoppingListItem {
  fn from(resource: ShoppingListItemResource) -> Self {
    Self {
      id: resource.id,
      list_id: resource.shopping_list,
      product_id: resource.product.id,
      product_name: resource.product.name,
      quantity: resource.quantity,
      checked: resource.checked,
    }
  }
}

impl From<&ShoppingListItem> for ShoppingListItemResource {
  fn from(item: &ShoppingListItem) -> Self {
    Self {
      id: item.id,
      shopping_list: item.list_id,
      product: ProductSummary {
        id: item.product_id,
        name: item.product_name.clone(),
      },
      quantity: item.quantity,
      checked: item.checked,
    }
  }
}

/// Collection response: either a bare array or a paginated envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListBody<R> {
  Page { results: Vec<R> },
  Plain(Vec<R>),
}

impl<R> ListBody<R> {
  pub fn into_items(self) -> Vec<R> {
    match self {
      ListBody::Page { results } => results,
      ListBody::Plain(items) => items,
    }
  }
}
