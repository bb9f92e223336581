use crate::domain::catalog::{Cart, CartItem, Customer, Entry, Product};
use crate::domain::geo::GeoPoint;
use crate::domain::message::OutgoingText;
use crate::domain::ports::{CommerceGateway, Geocoder, Messenger, SessionStore};
use crate::domain::pricing::{Invoice, to_minor_units};
use crate::domain::session::{ChatId, Session};
use crate::error::{BotError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::RwLock;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A thread-safe in-memory session store.
///
/// Uses `Arc<RwLock<HashMap<ChatId, Session>>>` for shared concurrent access.
/// Sessions are lost when the process exits.
#[derive(Default, Clone)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<ChatId, Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn store(&self, session: Session) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.chat_id, session);
        Ok(())
    }

    async fn get(&self, chat_id: ChatId) -> Result<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&chat_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Session>> {
        let sessions = self.sessions.read().await;
        let mut all: Vec<Session> = sessions.values().cloned().collect();
        all.sort_by_key(|session| session.chat_id);
        Ok(all)
    }
}

/// Catalog, service points and known addresses for an offline shop.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSeed {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub products: Vec<ProductSeed>,
    #[serde(default)]
    pub pizzerias: Vec<Map<String, Value>>,
    #[serde(default)]
    pub addresses: HashMap<String, GeoPoint>,
}

fn default_currency() -> String {
    "RUB".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProductSeed {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Price in major currency units.
    pub price: Decimal,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Default)]
struct Shop {
    products: Vec<Product>,
    files: HashMap<String, String>,
    carts: HashMap<String, Vec<CartItem>>,
    customers: Vec<Customer>,
    entries: HashMap<String, Vec<Entry>>,
}

/// Commerce backend kept in process memory.
///
/// Mirrors the behaviour the dialog relies on: carts spring into existence on
/// first read, adding a product already in the cart increments its quantity,
/// removing a missing line is a no-op.
#[derive(Clone)]
pub struct InMemoryCommerceGateway {
    shop: Arc<Mutex<Shop>>,
    currency: String,
    next_id: Arc<AtomicU64>,
    unavailable: Arc<AtomicBool>,
}

impl Default for InMemoryCommerceGateway {
    fn default() -> Self {
        Self {
            shop: Arc::default(),
            currency: default_currency(),
            next_id: Arc::new(AtomicU64::new(1)),
            unavailable: Arc::default(),
        }
    }
}

impl InMemoryCommerceGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: &CatalogSeed) -> Result<Self> {
        let gateway = Self {
            currency: seed.currency.clone(),
            ..Self::default()
        };
        for product in &seed.products {
            gateway.seed_product(product)?;
        }
        for pizzeria in &seed.pizzerias {
            gateway.seed_entry(
                crate::config::SERVICE_POINT_COLLECTION,
                Value::Object(pizzeria.clone()),
            );
        }
        Ok(gateway)
    }

    pub fn seed_product(&self, seed: &ProductSeed) -> Result<()> {
        let unit_amount = to_minor_units(seed.price)?;
        let mut shop = locked(&self.shop);

        let main_image_id = seed.image_url.as_ref().map(|url| {
            let file_id = format!("file-{}", seed.id);
            shop.files.insert(file_id.clone(), url.clone());
            file_id
        });

        shop.products.push(Product {
            id: seed.id.clone(),
            name: seed.name.clone(),
            description: seed.description.clone(),
            unit_amount,
            display_price: self.display(unit_amount),
            main_image_id,
        });
        Ok(())
    }

    /// Adds an entry to a collection; non-object values are stored empty.
    pub fn seed_entry(&self, collection: &str, fields: Value) -> Entry {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.insert_entry(collection, fields)
    }

    /// Makes every call fail as if the backend were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(BotError::external("commerce", "503 Service Unavailable"))
        } else {
            Ok(())
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn insert_entry(&self, collection: &str, fields: Map<String, Value>) -> Entry {
        let entry = Entry {
            id: self.next_id("entry"),
            fields,
        };
        locked(&self.shop)
            .entries
            .entry(collection.to_string())
            .or_default()
            .push(entry.clone());
        entry
    }

    fn display(&self, amount: u64) -> String {
        format!("{} {}", Decimal::new(amount as i64, 2), self.currency)
    }

    fn cart_view(&self, items: &[CartItem]) -> Cart {
        let cart = Cart {
            items: items.to_vec(),
            display_total: String::new(),
        };
        Cart {
            display_total: self.display(cart.total_amount()),
            ..cart
        }
    }

    fn not_found(what: &str, id: &str) -> BotError {
        BotError::external("commerce", format!("404 Not Found: {what} {id}"))
    }
}

#[async_trait]
impl CommerceGateway for InMemoryCommerceGateway {
    async fn get_products(&self) -> Result<Vec<Product>> {
        self.check_available()?;
        Ok(locked(&self.shop).products.clone())
    }

    async fn get_product(&self, product_id: &str) -> Result<Product> {
        self.check_available()?;
        locked(&self.shop)
            .products
            .iter()
            .find(|product| product.id == product_id)
            .cloned()
            .ok_or_else(|| Self::not_found("product", product_id))
    }

    async fn get_image_link(&self, file_id: &str) -> Result<String> {
        self.check_available()?;
        locked(&self.shop)
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| Self::not_found("file", file_id))
    }

    async fn get_cart(&self, cart_id: &str) -> Result<Cart> {
        self.get_cart_items(cart_id).await
    }

    async fn get_cart_items(&self, cart_id: &str) -> Result<Cart> {
        self.check_available()?;
        let mut shop = locked(&self.shop);
        let items = shop.carts.entry(cart_id.to_string()).or_default().clone();
        drop(shop);
        Ok(self.cart_view(&items))
    }

    async fn add_product_to_cart(
        &self,
        cart_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> Result<Cart> {
        self.check_available()?;
        let line_id = self.next_id("item");
        let mut shop = locked(&self.shop);
        let product = shop
            .products
            .iter()
            .find(|product| product.id == product_id)
            .cloned()
            .ok_or_else(|| Self::not_found("product", product_id))?;

        let items = shop.carts.entry(cart_id.to_string()).or_default();
        match items.iter_mut().find(|item| item.product_id == product_id) {
            Some(item) => item.quantity += quantity,
            None => items.push(CartItem {
                id: line_id,
                product_id: product.id.clone(),
                name: product.name.clone(),
                description: product.description.clone(),
                quantity,
                unit_amount: product.unit_amount,
                display_total: String::new(),
            }),
        }
        for item in items.iter_mut() {
            item.display_total = self.display(item.line_amount());
        }

        let items = items.clone();
        drop(shop);
        Ok(self.cart_view(&items))
    }

    async fn remove_cart_item(&self, cart_id: &str, item_id: &str) -> Result<Cart> {
        self.check_available()?;
        let mut shop = locked(&self.shop);
        let items = shop.carts.entry(cart_id.to_string()).or_default();
        items.retain(|item| item.id != item_id);
        let items = items.clone();
        drop(shop);
        Ok(self.cart_view(&items))
    }

    async fn create_customer(&self, name: &str, email: &str) -> Result<Customer> {
        self.check_available()?;
        if !email.contains('@') {
            return Err(BotError::external("commerce", format!("422 invalid email {email}")));
        }
        let customer = Customer {
            id: self.next_id("customer"),
            name: name.to_string(),
            email: email.to_string(),
        };
        locked(&self.shop).customers.push(customer.clone());
        Ok(customer)
    }

    async fn create_entry(&self, collection: &str, fields: Map<String, Value>) -> Result<Entry> {
        self.check_available()?;
        Ok(self.insert_entry(collection, fields))
    }

    async fn get_an_entry(&self, collection: &str, entry_id: &str) -> Result<Entry> {
        self.check_available()?;
        locked(&self.shop)
            .entries
            .get(collection)
            .and_then(|entries| entries.iter().find(|entry| entry.id == entry_id))
            .cloned()
            .ok_or_else(|| Self::not_found(collection, entry_id))
    }

    async fn get_all_entries(&self, collection: &str) -> Result<Vec<Entry>> {
        self.check_available()?;
        Ok(locked(&self.shop)
            .entries
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }
}

/// Address book standing in for a geocoding service.
///
/// An address may resolve to several candidates, returned in insertion order.
#[derive(Default, Clone)]
pub struct InMemoryGeocoder {
    places: Arc<Mutex<HashMap<String, Vec<GeoPoint>>>>,
}

impl InMemoryGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: &CatalogSeed) -> Self {
        let geocoder = Self::new();
        for (address, point) in &seed.addresses {
            geocoder.insert(address, *point);
        }
        geocoder
    }

    /// Adds a candidate for `address` after any already known.
    pub fn insert(&self, address: &str, point: GeoPoint) {
        locked(&self.places)
            .entry(address.trim().to_lowercase())
            .or_default()
            .push(point);
    }
}

#[async_trait]
impl Geocoder for InMemoryGeocoder {
    async fn lookup(&self, query: &str) -> Result<Vec<GeoPoint>> {
        Ok(locked(&self.places)
            .get(&query.trim().to_lowercase())
            .cloned()
            .unwrap_or_default())
    }
}

/// Everything the engine asked the messenger to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Outbound {
    Text {
        chat_id: ChatId,
        message: OutgoingText,
    },
    Photo {
        chat_id: ChatId,
        photo_url: String,
        caption: OutgoingText,
    },
    Invoice {
        chat_id: ChatId,
        invoice: Invoice,
    },
    Location {
        chat_id: ChatId,
        location: GeoPoint,
    },
    CallbackAnswer {
        query_id: String,
        text: Option<String>,
    },
    PreCheckoutAnswer {
        query_id: String,
        ok: bool,
        error_message: Option<String>,
    },
    Deleted {
        chat_id: ChatId,
        message_id: i64,
    },
}

/// Messenger that records outbound actions instead of sending them.
#[derive(Default)]
pub struct RecordingMessenger {
    outbox: Mutex<Vec<Outbound>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outbox(&self) -> Vec<Outbound> {
        locked(&self.outbox).clone()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *locked(&self.outbox))
    }

    /// Texts and photo captions sent to a chat, in order.
    pub fn texts_to(&self, chat: ChatId) -> Vec<String> {
        locked(&self.outbox)
            .iter()
            .filter_map(|outbound| match outbound {
                Outbound::Text { chat_id, message } if *chat_id == chat => {
                    Some(message.text.clone())
                }
                Outbound::Photo {
                    chat_id, caption, ..
                } if *chat_id == chat => Some(caption.text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn invoices_to(&self, chat: ChatId) -> Vec<Invoice> {
        locked(&self.outbox)
            .iter()
            .filter_map(|outbound| match outbound {
                Outbound::Invoice { chat_id, invoice } if *chat_id == chat => Some(invoice.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, outbound: Outbound) -> Result<()> {
        locked(&self.outbox).push(outbound);
        Ok(())
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, chat_id: ChatId, message: OutgoingText) -> Result<()> {
        self.record(Outbound::Text { chat_id, message })
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo_url: &str,
        caption: OutgoingText,
    ) -> Result<()> {
        self.record(Outbound::Photo {
            chat_id,
            photo_url: photo_url.to_string(),
            caption,
        })
    }

    async fn send_invoice(&self, chat_id: ChatId, invoice: &Invoice) -> Result<()> {
        if invoice.prices.is_empty() {
            return Err(BotError::external(
                "messenger",
                "400 Bad Request: prices must be non-empty",
            ));
        }
        self.record(Outbound::Invoice {
            chat_id,
            invoice: invoice.clone(),
        })
    }

    async fn send_location(&self, chat_id: ChatId, location: GeoPoint) -> Result<()> {
        self.record(Outbound::Location { chat_id, location })
    }

    async fn answer_callback(&self, query_id: &str, text: Option<&str>) -> Result<()> {
        self.record(Outbound::CallbackAnswer {
            query_id: query_id.to_string(),
            text: text.map(str::to_string),
        })
    }

    async fn answer_pre_checkout(
        &self,
        query_id: &str,
        verdict: std::result::Result<(), String>,
    ) -> Result<()> {
        self.record(Outbound::PreCheckoutAnswer {
            query_id: query_id.to_string(),
            ok: verdict.is_ok(),
            error_message: verdict.err(),
        })
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: i64) -> Result<()> {
        self.record(Outbound::Deleted { chat_id, message_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::State;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn gateway() -> InMemoryCommerceGateway {
        let gateway = InMemoryCommerceGateway::new();
        gateway
            .seed_product(&ProductSeed {
                id: "42".to_string(),
                name: "Margherita".to_string(),
                description: "Tomato and mozzarella".to_string(),
                price: dec!(450),
                image_url: Some("https://img.example/42.jpg".to_string()),
            })
            .unwrap();
        gateway
    }

    #[tokio::test]
    async fn test_in_memory_session_store() {
        let store = InMemorySessionStore::new();
        let mut session = Session::new(ChatId(1));
        session.state = State::Cart;

        store.store(session.clone()).await.unwrap();
        assert_eq!(store.get(ChatId(1)).await.unwrap(), Some(session));
        assert!(store.get(ChatId(2)).await.unwrap().is_none());
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_adding_same_product_increments_quantity() {
        let gateway = gateway();
        gateway.add_product_to_cart("1", "42", 1).await.unwrap();
        let cart = gateway.add_product_to_cart("1", "42", 1).await.unwrap();

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 2);
        assert_eq!(cart.items[0].display_total, "900.00 RUB");
        assert_eq!(cart.display_total, "900.00 RUB");
    }

    #[tokio::test]
    async fn test_unknown_product_is_an_external_failure() {
        let gateway = gateway();
        let result = gateway.add_product_to_cart("1", "nope", 1).await;
        assert!(matches!(result, Err(BotError::ExternalCall { .. })));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let gateway = gateway();
        let cart = gateway.add_product_to_cart("1", "42", 1).await.unwrap();
        let line = cart.items[0].id.clone();

        assert!(gateway.remove_cart_item("1", &line).await.unwrap().is_empty());
        assert!(gateway.remove_cart_item("1", &line).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_product_image_link() {
        let gateway = gateway();
        let product = gateway.get_product("42").await.unwrap();
        let link = gateway
            .get_image_link(product.main_image_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(link, "https://img.example/42.jpg");
    }

    #[tokio::test]
    async fn test_entries_keep_insertion_order() {
        let gateway = gateway();
        let first = gateway.seed_entry("pizzeria", json!({"alias": "a"}));
        let second = gateway
            .create_entry("pizzeria", json!({"alias": "b"}).as_object().cloned().unwrap())
            .await
            .unwrap();

        let all = gateway.get_all_entries("pizzeria").await.unwrap();
        assert_eq!(all, vec![first, second.clone()]);
        assert_eq!(gateway.get_an_entry("pizzeria", &second.id).await.unwrap(), second);
        assert!(gateway.get_an_entry("pizzeria", "missing").await.is_err());
    }

    #[tokio::test]
    async fn test_create_customer() {
        let gateway = gateway();
        let customer = gateway.create_customer("Ann", "ann@example.com").await.unwrap();
        assert_eq!(customer.email, "ann@example.com");
        assert!(gateway.create_customer("Bob", "not-an-email").await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails_every_call() {
        let gateway = gateway();
        gateway.set_unavailable(true);
        assert!(gateway.get_products().await.is_err());
        gateway.set_unavailable(false);
        assert_eq!(gateway.get_products().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_geocoder_is_case_insensitive() {
        let geocoder = InMemoryGeocoder::new();
        geocoder.insert("Red Square", GeoPoint::new(55.75, 37.62));
        assert_eq!(geocoder.lookup("red square").await.unwrap().len(), 1);
        assert!(geocoder.lookup("Mars").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_geocoder_keeps_candidate_order() {
        let geocoder = InMemoryGeocoder::new();
        geocoder.insert("Lenina 1", GeoPoint::new(55.0, 37.0));
        geocoder.insert("lenina 1 ", GeoPoint::new(59.9, 30.3));

        let candidates = geocoder.lookup("Lenina 1").await.unwrap();
        assert_eq!(
            candidates,
            vec![GeoPoint::new(55.0, 37.0), GeoPoint::new(59.9, 30.3)]
        );
    }
}
