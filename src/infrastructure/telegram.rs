//! Telegram Bot API transport: outbound messages and long-polled updates.

use crate::domain::geo::GeoPoint;
use crate::domain::message::{Keyboard, OutgoingText, TextFormat};
use crate::domain::ports::Messenger;
use crate::domain::pricing::Invoice;
use crate::domain::session::ChatId;
use crate::error::{BotError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, trace};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

const SERVICE: &str = "messenger";

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TgMessage>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
    #[serde(default)]
    pub pre_checkout_query: Option<PreCheckoutQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    pub chat: TgChat,
    #[serde(default)]
    pub from: Option<TgUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub location: Option<TgLocation>,
    #[serde(default)]
    pub successful_payment: Option<SuccessfulPayment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TgLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuccessfulPayment {
    pub invoice_payload: String,
    #[serde(default)]
    pub total_amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TgUser,
    #[serde(default)]
    pub message: Option<TgMessage>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: TgUser,
    pub invoice_payload: String,
    #[serde(default)]
    pub total_amount: u64,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Serialize)]
struct InlineButton<'a> {
    text: &'a str,
    callback_data: &'a str,
}

fn reply_markup(keyboard: &Keyboard) -> Value {
    let rows: Vec<Vec<InlineButton<'_>>> = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|button| InlineButton {
                    text: &button.text,
                    callback_data: &button.callback_data,
                })
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

/// Adds `parse_mode` and `reply_markup` for a formatted text.
fn decorate(mut body: Value, message: &OutgoingText, text_field: &str) -> Value {
    body[text_field] = json!(message.text);
    if message.format == TextFormat::MarkdownV2 {
        body["parse_mode"] = json!("MarkdownV2");
    }
    if let Some(keyboard) = &message.keyboard {
        body["reply_markup"] = reply_markup(keyboard);
    }
    body
}

pub struct TelegramMessenger {
    http: Client,
    endpoint: String,
}

impl TelegramMessenger {
    pub fn new(
        api_url: &str,
        bot_token: &str,
        timeout: Duration,
    ) -> Result<Self> {
        if bot_token.is_empty() {
            return Err(BotError::Config("bot token is empty".to_string()));
        }

        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            endpoint: format!("{}/bot{}", api_url.trim_end_matches('/'), bot_token),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        trace!(method, "bot api call");
        let response = self
            .http
            .post(format!("{}/{method}", self.endpoint))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let parsed: ApiResponse<T> = response.json().await?;
        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(BotError::external(
                SERVICE,
                format!(
                    "{method} {status}: {}",
                    parsed.description.unwrap_or_else(|| "no description".to_string())
                ),
            )),
        }
    }

    /// Long-polls for updates after `offset`, waiting up to `timeout_secs`.
    ///
    /// The HTTP client timeout must exceed the poll timeout.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let updates: Vec<Update> = self
            .call(
                "getUpdates",
                &json!({
                    "offset": offset,
                    "timeout": timeout_secs,
                    "allowed_updates": ["message", "callback_query", "pre_checkout_query"],
                }),
            )
            .await?;
        if !updates.is_empty() {
            debug!(count = updates.len(), offset, "received updates");
        }
        Ok(updates)
    }
}

#[async_trait]
impl Messenger for TelegramMessenger {
    async fn send_text(&self, chat_id: ChatId, message: OutgoingText) -> Result<()> {
        let body = decorate(json!({ "chat_id": chat_id.0 }), &message, "text");
        self.call::<Value>("sendMessage", &body).await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo_url: &str,
        caption: OutgoingText,
    ) -> Result<()> {
        let body = decorate(
            json!({ "chat_id": chat_id.0, "photo": photo_url }),
            &caption,
            "caption",
        );
        self.call::<Value>("sendPhoto", &body).await?;
        Ok(())
    }

    async fn send_invoice(&self, chat_id: ChatId, invoice: &Invoice) -> Result<()> {
        let body = json!({
            "chat_id": chat_id.0,
            "title": invoice.title,
            "description": invoice.description,
            "payload": invoice.payload,
            "provider_token": invoice.provider_token,
            "currency": invoice.currency,
            "prices": invoice.prices,
        });
        self.call::<Value>("sendInvoice", &body).await?;
        Ok(())
    }

    async fn send_location(&self, chat_id: ChatId, location: GeoPoint) -> Result<()> {
        let body = json!({
            "chat_id": chat_id.0,
            "latitude": location.lat,
            "longitude": location.lon,
        });
        self.call::<Value>("sendLocation", &body).await?;
        Ok(())
    }

    async fn answer_callback(&self, query_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({ "callback_query_id": query_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call::<bool>("answerCallbackQuery", &body).await?;
        Ok(())
    }

    async fn answer_pre_checkout(
        &self,
        query_id: &str,
        verdict: std::result::Result<(), String>,
    ) -> Result<()> {
        let body = match verdict {
            Ok(()) => json!({ "pre_checkout_query_id": query_id, "ok": true }),
            Err(reason) => json!({
                "pre_checkout_query_id": query_id,
                "ok": false,
                "error_message": reason,
            }),
        };
        self.call::<bool>("answerPreCheckoutQuery", &body).await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: i64) -> Result<()> {
        let body = json!({ "chat_id": chat_id.0, "message_id": message_id });
        self.call::<bool>("deleteMessage", &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::{Button, CallbackToken};

    #[test]
    fn test_markdown_text_with_keyboard() {
        let message = OutgoingText::markdown("*Hi*")
            .with_keyboard(Keyboard::new().button(Button::new("Cart", CallbackToken::Cart)));
        let body = decorate(json!({ "chat_id": 1 }), &message, "text");

        assert_eq!(body["text"], "*Hi*");
        assert_eq!(body["parse_mode"], "MarkdownV2");
        assert_eq!(body["reply_markup"]["inline_keyboard"][0][0]["callback_data"], "HANDLE_CART");
    }

    #[test]
    fn test_plain_caption_has_no_parse_mode() {
        let body = decorate(json!({ "chat_id": 1 }), &OutgoingText::plain("hello"), "caption");
        assert_eq!(body["caption"], "hello");
        assert!(body.get("parse_mode").is_none());
        assert!(body.get("reply_markup").is_none());
    }

    #[test]
    fn test_update_deserialization() {
        let raw = json!([
            {"update_id": 1, "message": {"message_id": 10, "chat": {"id": 5},
                "from": {"id": 5, "first_name": "Ann"}, "text": "/start"}},
            {"update_id": 2, "callback_query": {"id": "q", "from": {"id": 5, "first_name": "Ann"},
                "data": "HANDLE_MENU", "message": {"message_id": 11, "chat": {"id": 5}}}},
            {"update_id": 3, "pre_checkout_query": {"id": "p", "from": {"id": 5}, "currency": "RUB",
                "total_amount": 100, "invoice_payload": "tok"}}
        ]);
        let updates: Vec<Update> = serde_json::from_value(raw).unwrap();

        assert_eq!(
            updates[0].message.as_ref().unwrap().text.as_deref(),
            Some("/start")
        );
        assert_eq!(
            updates[1].callback_query.as_ref().unwrap().data.as_deref(),
            Some("HANDLE_MENU")
        );
        assert_eq!(
            updates[2].pre_checkout_query.as_ref().unwrap().invoice_payload,
            "tok"
        );
    }

    #[test]
    fn test_error_response_parsing() {
        let raw = json!({
            "ok": false,
            "error_code": 400,
            "description": "Bad Request: chat not found"
        });
        let parsed: ApiResponse<Value> = serde_json::from_value(raw).unwrap();
        assert!(!parsed.ok);
        assert_eq!(parsed.description.as_deref(), Some("Bad Request: chat not found"));
    }
}
