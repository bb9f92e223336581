use super::geo::GeoPoint;
use super::session::ChatId;
use serde::{Deserialize, Serialize};

/// One inbound update from the messaging transport.
///
/// Exists only for the duration of a single dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub chat_id: ChatId,
    /// Display name of the sender, used for greetings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A slash command such as `/start`.
    Command { name: String },
    /// An inline keyboard button press.
    Callback {
        query_id: String,
        data: String,
        #[serde(default)]
        message_id: Option<i64>,
    },
    Text { text: String },
    Location { location: GeoPoint },
    /// The payment provider asks whether the invoice may be charged.
    PreCheckout {
        query_id: String,
        invoice_payload: String,
    },
    /// The payment provider reports a completed charge.
    PaymentConfirmed { invoice_payload: String },
}

impl Event {
    pub fn new(chat_id: ChatId, payload: EventPayload) -> Self {
        Self {
            chat_id,
            sender_name: None,
            payload,
        }
    }

    pub fn with_sender(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    pub fn command(chat_id: i64, name: impl Into<String>) -> Self {
        Self::new(ChatId(chat_id), EventPayload::Command { name: name.into() })
    }

    pub fn callback(chat_id: i64, data: impl Into<String>) -> Self {
        let chat_id = ChatId(chat_id);
        Self::new(
            chat_id,
            EventPayload::Callback {
                query_id: format!("cb-{}", chat_id),
                data: data.into(),
                message_id: None,
            },
        )
    }

    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self::new(ChatId(chat_id), EventPayload::Text { text: text.into() })
    }

    pub fn location(chat_id: i64, location: GeoPoint) -> Self {
        Self::new(ChatId(chat_id), EventPayload::Location { location })
    }

    /// The raw string the classifier inspects, if the payload has one.
    pub fn raw_text(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Command { name } => Some(name),
            EventPayload::Callback { data, .. } => Some(data),
            EventPayload::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Message the user interacted with, if the transport reported one.
    pub fn source_message_id(&self) -> Option<i64> {
        match &self.payload {
            EventPayload::Callback { message_id, .. } => *message_id,
            _ => None,
        }
    }

    pub fn callback_query_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Callback { query_id, .. } => Some(query_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_deserializes_from_flat_json() {
        let line = r#"{"chat_id": 7, "type": "callback", "query_id": "q1", "data": "ITEM|42"}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        assert_eq!(event.chat_id, ChatId(7));
        assert_eq!(event.raw_text(), Some("ITEM|42"));
        assert_eq!(event.callback_query_id(), Some("q1"));
        assert_eq!(event.source_message_id(), None);
    }

    #[test]
    fn test_location_event_has_no_raw_text() {
        let line =
            r#"{"chat_id": 7, "type": "location", "location": {"lat": 55.75, "lon": 37.61}}"#;
        let event: Event = serde_json::from_str(line).unwrap();
        assert!(event.raw_text().is_none());
        assert!(matches!(event.payload, EventPayload::Location { .. }));
    }
}
