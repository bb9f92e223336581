//! Maps an inbound event onto a symbolic kind.
//!
//! Structured payloads (shared location, pre-checkout, payment) are
//! classified by their variant. String payloads go through [`RULES`] in
//! order and the first match wins. Token rules compare the whole first
//! `|`-separated field, so a token that happens to be a prefix or substring of
//! another (`HANDLE_CART` / `HANDLE_CART_X`) never shadows it.

use crate::domain::event::{Event, EventPayload};
use crate::domain::message::{self, FIELD_SEPARATOR};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Start,
    ShowMenu { page: u32 },
    ViewItem { product_id: String },
    AddToCart { product_id: String },
    ShowCart,
    RemoveItem { item_id: String },
    AskPhone,
    AskLocation,
    SharedLocation,
    Delivery,
    PickUp,
    PreCheckout,
    PaymentConfirmed,
    /// Nothing matched; the persisted session state decides.
    Continue,
}

#[derive(Debug, Clone, Copy)]
pub enum Pattern {
    /// A command, or plain text identical to it.
    Command(&'static str),
    /// A callback whose first field equals the token.
    Token(&'static str),
}

impl Pattern {
    fn fields<'a>(&self, payload: &'a EventPayload) -> Option<Vec<&'a str>> {
        match (self, payload) {
            (Pattern::Command(name), EventPayload::Command { name: raw })
            | (Pattern::Command(name), EventPayload::Text { text: raw }) => {
                let command = raw.split_whitespace().next()?;
                (command == *name).then(Vec::new)
            }
            (Pattern::Token(token), EventPayload::Callback { data, .. }) => {
                let fields: Vec<&str> = data.split(FIELD_SEPARATOR).collect();
                (fields.first() == Some(token)).then(|| fields[1..].to_vec())
            }
            _ => None,
        }
    }
}

pub struct Rule {
    pub pattern: Pattern,
    /// Builds the kind from the fields after the token; `None` rejects a
    /// malformed token and lets later rules try.
    pub build: fn(&[&str]) -> Option<EventKind>,
}

fn start(_: &[&str]) -> Option<EventKind> {
    Some(EventKind::Start)
}

fn show_menu(fields: &[&str]) -> Option<EventKind> {
    let page = match fields {
        [message::PAGE, page] => page.parse().ok()?,
        [] => 1,
        _ => return None,
    };
    Some(EventKind::ShowMenu { page })
}

fn view_item(fields: &[&str]) -> Option<EventKind> {
    match fields {
        [id] if !id.is_empty() => Some(EventKind::ViewItem {
            product_id: id.to_string(),
        }),
        _ => None,
    }
}

fn add_to_cart(fields: &[&str]) -> Option<EventKind> {
    match fields {
        [id] if !id.is_empty() => Some(EventKind::AddToCart {
            product_id: id.to_string(),
        }),
        _ => None,
    }
}

fn show_cart(_: &[&str]) -> Option<EventKind> {
    Some(EventKind::ShowCart)
}

fn remove_item(fields: &[&str]) -> Option<EventKind> {
    match fields {
        [id] if !id.is_empty() => Some(EventKind::RemoveItem {
            item_id: id.to_string(),
        }),
        _ => None,
    }
}

fn ask_phone(_: &[&str]) -> Option<EventKind> {
    Some(EventKind::AskPhone)
}

fn ask_location(_: &[&str]) -> Option<EventKind> {
    Some(EventKind::AskLocation)
}

fn delivery(_: &[&str]) -> Option<EventKind> {
    Some(EventKind::Delivery)
}

fn pick_up(_: &[&str]) -> Option<EventKind> {
    Some(EventKind::PickUp)
}

/// Evaluated top to bottom. `/start` comes first so a restart always wins
/// over state-dependent routing.
pub const RULES: &[Rule] = &[
    Rule {
        pattern: Pattern::Command("/start"),
        build: start,
    },
    Rule {
        pattern: Pattern::Token(message::MENU),
        build: show_menu,
    },
    Rule {
        pattern: Pattern::Token(message::DESCRIPTION),
        build: view_item,
    },
    Rule {
        pattern: Pattern::Token(message::ADD_TO_CART),
        build: add_to_cart,
    },
    Rule {
        pattern: Pattern::Token(message::CART),
        build: show_cart,
    },
    Rule {
        pattern: Pattern::Token(message::REMOVE_ITEM),
        build: remove_item,
    },
    Rule {
        pattern: Pattern::Token(message::WAITING_PHONE),
        build: ask_phone,
    },
    Rule {
        pattern: Pattern::Token(message::WAITING_LOCATION),
        build: ask_location,
    },
    Rule {
        pattern: Pattern::Token(message::DELIVERY),
        build: delivery,
    },
    Rule {
        pattern: Pattern::Token(message::PICK_UP),
        build: pick_up,
    },
];

pub fn classify(event: &Event) -> EventKind {
    match &event.payload {
        EventPayload::Location { .. } => return EventKind::SharedLocation,
        EventPayload::PreCheckout { .. } => return EventKind::PreCheckout,
        EventPayload::PaymentConfirmed { .. } => return EventKind::PaymentConfirmed,
        _ => {}
    }

    RULES
        .iter()
        .find_map(|rule| {
            let fields = rule.pattern.fields(&event.payload)?;
            (rule.build)(&fields)
        })
        .unwrap_or(EventKind::Continue)
}
