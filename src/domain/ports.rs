//! Traits at the boundary between the dialog core and its collaborators.

use super::catalog::{Cart, Customer, Entry, Product};
use super::geo::GeoPoint;
use super::message::OutgoingText;
use super::pricing::Invoice;
use super::session::{ChatId, Session};
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Durable mapping from chat identity to its session record.
///
/// Only single-key atomic get/put is required; each dispatch touches exactly
/// one record.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn store(&self, session: Session) -> Result<()>;
    async fn get(&self, chat_id: ChatId) -> Result<Option<Session>>;
    async fn get_all(&self) -> Result<Vec<Session>>;
}

/// Products, carts, customers and free-form entries on the commerce backend.
#[async_trait]
pub trait CommerceGateway: Send + Sync {
    async fn get_products(&self) -> Result<Vec<Product>>;
    async fn get_product(&self, product_id: &str) -> Result<Product>;
    /// Public URL of an uploaded file, used for product photos.
    async fn get_image_link(&self, file_id: &str) -> Result<String>;

    async fn get_cart(&self, cart_id: &str) -> Result<Cart>;
    async fn get_cart_items(&self, cart_id: &str) -> Result<Cart>;
    /// Adds to the cart; adding a product already present increments its quantity.
    async fn add_product_to_cart(
        &self,
        cart_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> Result<Cart>;
    async fn remove_cart_item(&self, cart_id: &str, item_id: &str) -> Result<Cart>;

    async fn create_customer(&self, name: &str, email: &str) -> Result<Customer>;

    async fn create_entry(&self, collection: &str, fields: Map<String, Value>) -> Result<Entry>;
    async fn get_an_entry(&self, collection: &str, entry_id: &str) -> Result<Entry>;
    /// All entries of a collection, in backend order.
    async fn get_all_entries(&self, collection: &str) -> Result<Vec<Entry>>;
}

/// Outbound side of the messaging transport.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, message: OutgoingText) -> Result<()>;
    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo_url: &str,
        caption: OutgoingText,
    ) -> Result<()>;
    async fn send_invoice(&self, chat_id: ChatId, invoice: &Invoice) -> Result<()>;
    async fn send_location(&self, chat_id: ChatId, location: GeoPoint) -> Result<()>;
    async fn answer_callback(&self, query_id: &str, text: Option<&str>) -> Result<()>;
    /// `Err` carries the failure reason shown to the payer.
    async fn answer_pre_checkout(
        &self,
        query_id: &str,
        verdict: std::result::Result<(), String>,
    ) -> Result<()>;
    async fn delete_message(&self, chat_id: ChatId, message_id: i64) -> Result<()>;
}

/// Free-text address lookup returning candidates most relevant first.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<Vec<GeoPoint>>;
}

pub type SessionStoreBox = Box<dyn SessionStore>;
pub type CommerceGatewayRef = Arc<dyn CommerceGateway>;
pub type MessengerRef = Arc<dyn Messenger>;
pub type GeocoderRef = Arc<dyn Geocoder>;
