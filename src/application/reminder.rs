use crate::domain::format::format_reminder;
use crate::domain::message::OutgoingText;
use crate::domain::ports::MessengerRef;
use crate::domain::session::ChatId;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// One-shot follow-up message sent some time after an order is paid.
///
/// Reminders live in memory only and are lost on restart. At most one is
/// pending per chat: scheduling again replaces the previous one.
#[derive(Clone)]
pub struct ReminderScheduler {
    messenger: MessengerRef,
    delay: Duration,
    pending: Arc<DashMap<ChatId, (u64, AbortHandle)>>,
    generation: Arc<AtomicU64>,
}

impl ReminderScheduler {
    pub fn new(messenger: MessengerRef, delay: Duration) -> Self {
        Self {
            messenger,
            delay,
            pending: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn schedule(&self, chat_id: ChatId) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let messenger = self.messenger.clone();
        let pending = self.pending.clone();
        let delay = self.delay;
        let (armed_tx, armed_rx) = oneshot::channel::<()>();

        // The task waits until its entry is registered, so its own cleanup
        // can never run before the insert.
        let task = tokio::spawn(async move {
            if armed_rx.await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;
            if let Err(e) = messenger
                .send_text(chat_id, OutgoingText::markdown(format_reminder()))
                .await
            {
                warn!(%chat_id, error = %e, "failed to send order reminder");
            }
            pending.remove_if(&chat_id, |_, (current, _)| *current == generation);
        });

        let entry = (generation, task.abort_handle());
        if let Some((_, previous)) = self.pending.insert(chat_id, entry) {
            previous.abort();
        }
        let _ = armed_tx.send(());
        debug!(%chat_id, delay_secs = delay.as_secs(), "order reminder scheduled");
    }

    /// Drops the pending reminder for a chat, if any.
    pub fn cancel(&self, chat_id: ChatId) -> bool {
        match self.pending.remove(&chat_id) {
            Some((_, (_, task))) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}
