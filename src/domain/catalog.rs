use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A menu item as exposed by the commerce backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Unit price in minor currency units.
    pub unit_amount: u64,
    /// Backend-formatted unit price, e.g. `500.00 ₽`.
    pub display_price: String,
    #[serde(default)]
    pub main_image_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    /// Line identifier, distinct from the product id.
    pub id: String,
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub quantity: u32,
    /// Unit price in minor currency units.
    pub unit_amount: u64,
    /// Backend-formatted line total.
    pub display_total: String,
}

impl CartItem {
    pub fn line_amount(&self) -> u64 {
        self.unit_amount * u64::from(self.quantity)
    }
}

/// Cart contents read fresh from the backend at decision time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub items: Vec<CartItem>,
    /// Backend-formatted cart total.
    pub display_total: String,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    pub fn total_amount(&self) -> u64 {
        self.items.iter().map(CartItem::line_amount).sum()
    }
}

/// A record in one of the backend's free-form collections ("flows").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Entry {
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
    pub email: String,
}
