use super::geo::GeoPoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Identity of a conversation on the messaging transport.
///
/// The same value keys the session record, the cart on the commerce backend
/// and the chat that receives outbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl ChatId {
    /// Cart identifier on the commerce backend.
    pub fn cart_id(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Position of a user in the ordering dialog.
///
/// `Start` is the only initial state. `Browsing` is where a user rests after
/// an order is paid; there is no terminal state.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    #[default]
    Start,
    Browsing,
    ViewingItem,
    Cart,
    AwaitingPhone,
    AwaitingLocation,
    ChoosingFulfillment,
    AwaitingPayment,
}

/// Scratch data collected while checking out.
///
/// Overwritten field by field as the dialog progresses and never cleared
/// between orders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearest_service_point_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice: Option<InvoiceAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_order: Option<PaidOrder>,
}

/// Correlation state of the invoice currently issued to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceAttempt {
    pub token: String,
    /// Set once pre-checkout has accepted the token.
    #[serde(default)]
    pub validated: bool,
}

impl InvoiceAttempt {
    pub fn issue() -> Self {
        Self {
            token: uuid::Uuid::new_v4().simple().to_string(),
            validated: false,
        }
    }
}

/// An order whose payment went through but which has not been handed over
/// to the courier or the pickup counter yet.
///
/// Kept in the session until the hand-over succeeds, so a collaborator
/// outage at payment time delays the order instead of losing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaidOrder {
    /// Correlation token of the invoice that was paid.
    pub token: String,
    pub delivery: bool,
    #[serde(default)]
    pub courier_notified: bool,
}

/// Persisted per-user record: dialog state plus checkout context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub chat_id: ChatId,
    pub state: State,
    #[serde(default)]
    pub context: SessionContext,
}

impl Session {
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            state: State::Start,
            context: SessionContext::default(),
        }
    }
}
