//! Caching implementations for the shop domain types.

use crate::api::resources::ShoppingListItemResource;
use crate::cache::Entity;

use super::types::{Customer, Product, Recommendation, Shop, ShoppingListItem, User};

impl Entity for Product {
  type Resource = Product;

  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "product"
  }

  fn resource_path() -> &'static str {
    "products"
  }

  fn search_text(&self) -> String {
    self.name.clone()
  }

  fn unique_key(&self) -> Option<String> {
    self.barcode.clone()
  }

  fn to_resource(&self) -> Self::Resource {
    self.clone()
  }
}

impl Entity for Shop {
  type Resource = Shop;

  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "shop"
  }

  fn resource_path() -> &'static str {
    "shops"
  }

  fn search_text(&self) -> String {
    match &self.address {
      Some(address) => format!("{} {}", self.name, address),
      None => self.name.clone(),
    }
  }

  fn unique_key(&self) -> Option<String> {
    Some(self.name.trim().to_lowercase())
  }

  fn to_resource(&self) -> Self::Resource {
    self.clone()
  }
}

impl Entity for Customer {
  type Resource = Customer;

  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "customer"
  }

  fn resource_path() -> &'static str {
    "customers"
  }

  fn search_text(&self) -> String {
    match &self.email {
      Some(email) => format!("{} {}", self.name, email),
      None => self.name.clone(),
    }
  }

  fn unique_key(&self) -> Option<String> {
    self.email.as_ref().map(|e| e.to_lowercase())
  }

  fn to_resource(&self) -> Self::Resource {
    self.clone()
  }
}

impl Entity for User {
  type Resource = User;

  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "user"
  }

  fn resource_path() -> &'static str {
    "users"
  }

  fn search_text(&self) -> String {
    format!("{} {} {}", self.username, self.first_name, self.last_name)
  }

  fn unique_key(&self) -> Option<String> {
    Some(self.username.clone())
  }

  fn to_resource(&self) -> Self::Resource {
    self.clone()
  }
}

impl Entity for ShoppingListItem {
  type Resource = ShoppingListItemResource;

  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "shopping_list_item"
  }

  fn resource_path() -> &'static str {
    "shopping-list-items"
  }

  fn search_text(&self) -> String {
    self.product_name.clone()
  }

  fn to_resource(&self) -> Self::Resource {
    ShoppingListItemResource::from(self)
  }
}

impl Entity for Recommendation {
  type Resource = Recommendation;

  fn id(&self) -> i64 {
    self.id
  }

  fn entity_type() -> &'static str {
    "recommendation"
  }

  fn resource_path() -> &'static str {
    "recommendations"
  }

  fn search_text(&self) -> String {
    self.product_name.clone()
  }

  fn to_resource(&self) -> Self::Resource {
    self.clone()
  }
}
