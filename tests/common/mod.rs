#![allow(dead_code)]

use pizzeria_bot::application::engine::DialogEngine;
use pizzeria_bot::config::{OrderingConfig, SERVICE_POINT_COLLECTION};
use pizzeria_bot::domain::event::{Event, EventPayload};
use pizzeria_bot::domain::geo::GeoPoint;
use pizzeria_bot::domain::message::Keyboard;
use pizzeria_bot::domain::session::{ChatId, Session, State};
use pizzeria_bot::infrastructure::in_memory::{
    InMemoryCommerceGateway, InMemoryGeocoder, InMemorySessionStore, Outbound, ProductSeed,
    RecordingMessenger,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;

pub const CENTER: GeoPoint = GeoPoint {
    lat: 55.7539,
    lon: 37.6208,
};
pub const COURIER: ChatId = ChatId(1001);
pub const BRANCH_ADDRESS: &str = "Red Square 1";

/// Point `km` kilometres north of the branch.
pub fn north_of_center(km: f64) -> GeoPoint {
    GeoPoint::new(CENTER.lat + km / 111.2, CENTER.lon)
}

pub struct Harness {
    pub engine: Arc<DialogEngine>,
    pub commerce: Arc<InMemoryCommerceGateway>,
    pub messenger: Arc<RecordingMessenger>,
    pub geocoder: Arc<InMemoryGeocoder>,
}

pub fn harness() -> Harness {
    harness_with(OrderingConfig::default())
}

/// Nine pizzas (id "41" to "49", only "42" has a photo), one branch at
/// `CENTER` and three known addresses: near, mid and out of range.
pub fn harness_with(config: OrderingConfig) -> Harness {
    let commerce = Arc::new(InMemoryCommerceGateway::new());
    for id in 41..=49 {
        commerce
            .seed_product(&ProductSeed {
                id: id.to_string(),
                name: format!("Pizza {id}"),
                description: "Hot and fresh".to_string(),
                price: Decimal::from(400 + id),
                image_url: (id == 42).then(|| "https://img.example/42.jpg".to_string()),
            })
            .unwrap();
    }
    commerce.seed_entry(
        SERVICE_POINT_COLLECTION,
        json!({
            "alias": "Center",
            "address": BRANCH_ADDRESS,
            "latitude": CENTER.lat,
            "longitude": CENTER.lon,
            "delivery_man": COURIER.0,
        }),
    );

    let geocoder = Arc::new(InMemoryGeocoder::new());
    geocoder.insert("Near Street", north_of_center(0.3));
    geocoder.insert("Mid Street", north_of_center(2.0));
    geocoder.insert("Far Village", north_of_center(30.0));

    let messenger = Arc::new(RecordingMessenger::new());
    let engine = Arc::new(DialogEngine::new(
        Box::new(InMemorySessionStore::new()),
        commerce.clone(),
        messenger.clone(),
        geocoder.clone(),
        config,
    ));

    Harness {
        engine,
        commerce,
        messenger,
        geocoder,
    }
}

impl Harness {
    pub async fn send(&self, event: Event) -> State {
        self.engine.dispatch(event).await.unwrap()
    }

    pub async fn session(&self, chat: i64) -> Session {
        self.engine.session(ChatId(chat)).await.unwrap().unwrap()
    }

    pub fn last_keyboard_to(&self, chat: i64) -> Option<Keyboard> {
        self.messenger
            .outbox()
            .into_iter()
            .rev()
            .find_map(|outbound| match outbound {
                Outbound::Text { chat_id, message } if chat_id == ChatId(chat) => message.keyboard,
                Outbound::Photo {
                    chat_id, caption, ..
                } if chat_id == ChatId(chat) => caption.keyboard,
                _ => None,
            })
    }

    /// Walks a fresh chat to `ChoosingFulfillment` with one pizza in the cart
    /// and the given address typed in.
    pub async fn checkout_to(&self, chat: i64, address: &str) -> State {
        self.send(Event::command(chat, "/start").with_sender("Ann")).await;
        self.send(Event::callback(chat, "ADD_TO_CART|42")).await;
        self.send(Event::callback(chat, "HANDLE_WAITING_PHONE")).await;
        self.send(Event::text(chat, "+7 916 123-45-67")).await;
        self.send(Event::callback(chat, "HANDLE_WAITING_LOCATION")).await;
        self.send(Event::text(chat, address)).await
    }
}

pub fn pre_checkout(chat: i64, query_id: &str, payload: &str) -> Event {
    Event::new(
        ChatId(chat),
        EventPayload::PreCheckout {
            query_id: query_id.to_string(),
            invoice_payload: payload.to_string(),
        },
    )
}

pub fn payment(chat: i64, payload: &str) -> Event {
    Event::new(
        ChatId(chat),
        EventPayload::PaymentConfirmed {
            invoice_payload: payload.to_string(),
        },
    )
}

/// Pre-checkout verdicts in the order they were answered.
pub fn verdicts(messenger: &RecordingMessenger) -> Vec<(String, bool)> {
    messenger
        .outbox()
        .into_iter()
        .filter_map(|outbound| match outbound {
            Outbound::PreCheckoutAnswer { query_id, ok, .. } => Some((query_id, ok)),
            _ => None,
        })
        .collect()
}
