//! Commerce gateway backed by the Moltin (Elastic Path) REST API.
//!
//! Authenticates with client credentials. The access token is cached and
//! refreshed once its `expires` timestamp has passed.

use crate::domain::catalog::{Cart, CartItem, Customer, Entry, Product};
use crate::domain::ports::CommerceGateway;
use crate::error::{BotError, Result};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.moltin.com";

const SERVICE: &str = "commerce";

#[derive(Debug, Clone)]
pub struct MoltinConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
struct AccessToken {
    access_token: String,
    token_type: String,
    /// Unix timestamp after which the token is rejected.
    expires: u64,
}

impl AccessToken {
    fn is_expired(&self, now: u64) -> bool {
        now >= self.expires
    }

    fn header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
    #[serde(default)]
    meta: Option<CollectionMeta>,
}

#[derive(Deserialize)]
struct CollectionMeta {
    #[serde(default)]
    display_price: Option<DisplayPrice>,
}

#[derive(Deserialize)]
struct DisplayPrice {
    with_tax: Money,
}

#[derive(Deserialize)]
struct Money {
    amount: u64,
    #[serde(default)]
    formatted: String,
}

#[derive(Deserialize)]
struct MoltinProduct {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    meta: ProductMeta,
    #[serde(default)]
    relationships: Option<ProductRelationships>,
}

#[derive(Deserialize)]
struct ProductMeta {
    display_price: DisplayPrice,
}

#[derive(Deserialize)]
struct ProductRelationships {
    main_image: Option<Envelope<Reference>>,
}

#[derive(Deserialize)]
struct Reference {
    id: String,
}

#[derive(Deserialize)]
struct MoltinCartItem {
    id: String,
    product_id: String,
    name: String,
    #[serde(default)]
    description: String,
    quantity: u32,
    meta: CartItemMeta,
}

#[derive(Deserialize)]
struct CartItemMeta {
    display_price: CartItemDisplayPrice,
}

#[derive(Deserialize)]
struct CartItemDisplayPrice {
    with_tax: CartItemPrices,
}

#[derive(Deserialize)]
struct CartItemPrices {
    unit: Money,
    value: Money,
}

#[derive(Deserialize)]
struct FileData {
    link: FileLink,
}

#[derive(Deserialize)]
struct FileLink {
    href: String,
}

impl From<MoltinProduct> for Product {
    fn from(product: MoltinProduct) -> Self {
        let price = product.meta.display_price.with_tax;
        Product {
            id: product.id,
            name: product.name,
            description: product.description,
            unit_amount: price.amount,
            display_price: price.formatted,
            main_image_id: product
                .relationships
                .and_then(|relationships| relationships.main_image)
                .map(|image| image.data.id),
        }
    }
}

impl From<MoltinCartItem> for CartItem {
    fn from(item: MoltinCartItem) -> Self {
        let prices = item.meta.display_price.with_tax;
        CartItem {
            id: item.id,
            product_id: item.product_id,
            name: item.name,
            description: item.description,
            quantity: item.quantity,
            unit_amount: prices.unit.amount,
            display_total: prices.value.formatted,
        }
    }
}

fn into_cart(envelope: Envelope<Vec<MoltinCartItem>>) -> Cart {
    Cart {
        items: envelope.data.into_iter().map(CartItem::from).collect(),
        display_total: envelope
            .meta
            .and_then(|meta| meta.display_price)
            .map(|price| price.with_tax.formatted)
            .unwrap_or_default(),
    }
}

fn flow_slug(collection: &str) -> String {
    collection.to_lowercase().replace(' ', "_")
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

pub struct MoltinClient {
    http: Client,
    config: MoltinConfig,
    token: Mutex<Option<AccessToken>>,
}

impl MoltinClient {
    pub fn new(config: MoltinConfig) -> Result<Self> {
        if config.client_id.is_empty() {
            return Err(BotError::Config("commerce client id is empty".to_string()));
        }

        let http = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn authorization(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && !token.is_expired(unix_now())
        {
            return Ok(token.header());
        }

        debug!("requesting a new commerce access token");
        let response = self
            .http
            .post(format!("{}/oauth/access_token", self.config.base_url.trim_end_matches('/')))
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;
        let token: AccessToken = Self::parse(response).await?;
        let header = token.header();
        *cached = Some(token);
        Ok(header)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let authorization = self.authorization().await?;
        let response = request.header(AUTHORIZATION, authorization).send().await?;
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::external(SERVICE, format!("{status}: {body}")));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CommerceGateway for MoltinClient {
    async fn get_products(&self) -> Result<Vec<Product>> {
        let envelope: Envelope<Vec<MoltinProduct>> =
            self.send(self.http.get(self.url("products"))).await?;
        Ok(envelope.data.into_iter().map(Product::from).collect())
    }

    async fn get_product(&self, product_id: &str) -> Result<Product> {
        let envelope: Envelope<MoltinProduct> = self
            .send(self.http.get(self.url(&format!("products/{product_id}"))))
            .await?;
        Ok(envelope.data.into())
    }

    async fn get_image_link(&self, file_id: &str) -> Result<String> {
        let envelope: Envelope<FileData> = self
            .send(self.http.get(self.url(&format!("files/{file_id}"))))
            .await?;
        Ok(envelope.data.link.href)
    }

    async fn get_cart(&self, cart_id: &str) -> Result<Cart> {
        let envelope: Envelope<Value> = self
            .send(self.http.get(self.url(&format!("carts/{cart_id}"))))
            .await?;
        let display_total = envelope
            .data
            .pointer("/meta/display_price/with_tax/formatted")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Cart {
            items: Vec::new(),
            display_total,
        })
    }

    async fn get_cart_items(&self, cart_id: &str) -> Result<Cart> {
        let envelope = self
            .send(self.http.get(self.url(&format!("carts/{cart_id}/items"))))
            .await?;
        Ok(into_cart(envelope))
    }

    async fn add_product_to_cart(
        &self,
        cart_id: &str,
        product_id: &str,
        quantity: u32,
    ) -> Result<Cart> {
        let body = json!({
            "data": {
                "id": product_id,
                "type": "cart_item",
                "quantity": quantity,
            }
        });
        let envelope = self
            .send(self.http.post(self.url(&format!("carts/{cart_id}/items"))).json(&body))
            .await?;
        Ok(into_cart(envelope))
    }

    async fn remove_cart_item(&self, cart_id: &str, item_id: &str) -> Result<Cart> {
        let envelope = self
            .send(
                self.http
                    .delete(self.url(&format!("carts/{cart_id}/items/{item_id}"))),
            )
            .await?;
        Ok(into_cart(envelope))
    }

    async fn create_customer(&self, name: &str, email: &str) -> Result<Customer> {
        let body = json!({
            "data": {
                "type": "customer",
                "name": name,
                "email": email,
            }
        });
        let envelope: Envelope<Customer> = self
            .send(self.http.post(self.url("customers")).json(&body))
            .await?;
        Ok(envelope.data)
    }

    async fn create_entry(&self, collection: &str, fields: Map<String, Value>) -> Result<Entry> {
        let mut data = fields;
        data.insert("type".to_string(), json!("entry"));
        let url = self.url(&format!("flows/{}/entries", flow_slug(collection)));
        let envelope: Envelope<Entry> = self
            .send(self.http.post(url).json(&json!({ "data": data })))
            .await?;
        Ok(envelope.data)
    }

    async fn get_an_entry(&self, collection: &str, entry_id: &str) -> Result<Entry> {
        let url = self.url(&format!("flows/{}/entries/{entry_id}", flow_slug(collection)));
        let envelope: Envelope<Entry> = self.send(self.http.get(url)).await?;
        Ok(envelope.data)
    }

    async fn get_all_entries(&self, collection: &str) -> Result<Vec<Entry>> {
        let url = self.url(&format!("flows/{}/entries", flow_slug(collection)));
        let envelope: Envelope<Vec<Entry>> = self.send(self.http.get(url)).await?;
        Ok(envelope.data)
    }
}
