use super::engine::DialogEngine;
use crate::domain::event::Event;
use crate::domain::session::ChatId;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Feeds transport events into the engine.
///
/// Every chat gets a queue drained by a single task while it is non-empty,
/// so events of one chat are handled in arrival order and chats proceed
/// independently. A queue and its task go away as soon as it runs dry.
#[derive(Clone)]
pub struct EventDispatcher {
    engine: Arc<DialogEngine>,
    queues: Arc<DashMap<ChatId, VecDeque<Event>>>,
}

impl EventDispatcher {
    pub fn new(engine: Arc<DialogEngine>) -> Self {
        Self {
            engine,
            queues: Arc::new(DashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<DialogEngine> {
        &self.engine
    }

    pub fn submit(&self, event: Event) {
        let chat_id = event.chat_id;
        let start_worker = match self.queues.entry(chat_id) {
            Entry::Occupied(mut queue) => {
                queue.get_mut().push_back(event);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(VecDeque::from([event]));
                true
            }
        };

        if start_worker {
            tokio::spawn(self.clone().drain(chat_id));
        }
    }

    /// Waits until every queued event has been handled.
    pub async fn wait_idle(&self) {
        while !self.queues.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn drain(self, chat_id: ChatId) {
        loop {
            let next = match self.queues.entry(chat_id) {
                Entry::Occupied(mut queue) => match queue.get_mut().pop_front() {
                    Some(event) => event,
                    None => {
                        queue.remove();
                        return;
                    }
                },
                Entry::Vacant(_) => return,
            };

            // Failures are logged and reported by the engine.
            if let Err(e) = self.engine.dispatch(next).await {
                debug!(%chat_id, error = %e, "event failed");
            }
        }
    }
}
