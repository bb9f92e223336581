use crate::application::dispatcher::EventDispatcher;
use crate::domain::event::{Event, EventPayload};
use crate::domain::geo::GeoPoint;
use crate::domain::session::ChatId;
use crate::infrastructure::telegram::{TelegramMessenger, Update};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const RETRY_DELAY: Duration = Duration::from_secs(3);

/// Converts a Bot API update into a dialog event.
///
/// Updates the dialog has no use for (edits, stickers, channel posts) map to `None`.
pub fn update_to_event(update: Update) -> Option<Event> {
    if let Some(query) = update.pre_checkout_query {
        let event = Event::new(
            ChatId(query.from.id),
            EventPayload::PreCheckout {
                query_id: query.id,
                invoice_payload: query.invoice_payload,
            },
        );
        return Some(event.with_sender(query.from.first_name));
    }

    if let Some(query) = update.callback_query {
        let data = query.data?;
        let chat_id = query
            .message
            .as_ref()
            .map(|message| message.chat.id)
            .unwrap_or(query.from.id);
        let event = Event::new(
            ChatId(chat_id),
            EventPayload::Callback {
                query_id: query.id,
                data,
                message_id: query.message.map(|message| message.message_id),
            },
        );
        return Some(event.with_sender(query.from.first_name));
    }

    let message = update.message?;
    let chat_id = ChatId(message.chat.id);
    let payload = if let Some(payment) = message.successful_payment {
        EventPayload::PaymentConfirmed {
            invoice_payload: payment.invoice_payload,
        }
    } else if let Some(location) = message.location {
        EventPayload::Location {
            location: GeoPoint::new(location.latitude, location.longitude),
        }
    } else {
        let text = message.text?;
        if text.starts_with('/') {
            EventPayload::Command { name: text }
        } else {
            EventPayload::Text { text }
        }
    };

    let event = Event::new(chat_id, payload);
    Some(match message.from {
        Some(user) => event.with_sender(user.first_name),
        None => event,
    })
}

/// Long-polls the Bot API and feeds every update into the dispatcher until
/// the task is cancelled.
pub async fn run(
    messenger: Arc<TelegramMessenger>,
    dispatcher: EventDispatcher,
    poll_timeout_secs: u64,
) {
    info!("polling for updates");
    let mut offset = 0;

    loop {
        let updates = match messenger.get_updates(offset, poll_timeout_secs).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "failed to fetch updates, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            if let Some(event) = update_to_event(update) {
                dispatcher.submit(event);
            }
        }
    }
}
