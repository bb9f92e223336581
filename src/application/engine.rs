use super::classifier::{EventKind, classify};
use super::fulfillment::FulfillmentOrchestrator;
use super::geo::GeoResolver;
use super::handlers::Storefront;
use super::reminder::ReminderScheduler;
use crate::config::OrderingConfig;
use crate::domain::event::Event;
use crate::domain::message::OutgoingText;
use crate::domain::ports::{CommerceGatewayRef, GeocoderRef, MessengerRef, SessionStoreBox};
use crate::domain::session::{ChatId, Session, SessionContext, State};
use crate::error::{BotError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

pub const TRY_AGAIN: &str = "Something went wrong on our side. Please try again.";

/// Handler selected for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Start,
    Menu { page: u32 },
    Describe { product_id: String },
    AddToCart { product_id: String },
    Cart { remove_item: Option<String> },
    AskPhone,
    ConfirmPhone,
    AskLocation,
    ChooseFulfillment,
    Delivery,
    PickUp,
    PreCheckout,
    ConfirmPayment,
    /// Free text in a state that only takes button presses.
    Hint,
}

/// Picks the handler for an event kind; `Continue` defers to the persisted
/// state so typed replies reach the step that asked for them.
pub fn route(kind: EventKind, state: State) -> Route {
    match kind {
        EventKind::Start => Route::Start,
        EventKind::ShowMenu { page } => Route::Menu { page },
        EventKind::ViewItem { product_id } => Route::Describe { product_id },
        EventKind::AddToCart { product_id } => Route::AddToCart { product_id },
        EventKind::ShowCart => Route::Cart { remove_item: None },
        EventKind::RemoveItem { item_id } => Route::Cart {
            remove_item: Some(item_id),
        },
        EventKind::AskPhone => Route::AskPhone,
        EventKind::AskLocation => Route::AskLocation,
        EventKind::SharedLocation => Route::ChooseFulfillment,
        EventKind::Delivery => Route::Delivery,
        EventKind::PickUp => Route::PickUp,
        EventKind::PreCheckout => Route::PreCheckout,
        EventKind::PaymentConfirmed => Route::ConfirmPayment,
        EventKind::Continue => match state {
            State::Start => Route::Start,
            State::AwaitingPhone => Route::ConfirmPhone,
            State::AwaitingLocation | State::ChoosingFulfillment => Route::ChooseFulfillment,
            State::Browsing | State::ViewingItem | State::Cart | State::AwaitingPayment => {
                Route::Hint
            }
        },
    }
}

/// The dialog state machine.
///
/// Each dispatch reads the session, runs one handler and writes the session
/// back. The read-modify-write is serialized per chat; different chats never
/// wait on each other.
pub struct DialogEngine {
    sessions: SessionStoreBox,
    messenger: MessengerRef,
    storefront: Storefront,
    fulfillment: FulfillmentOrchestrator,
    config: Arc<OrderingConfig>,
    locks: DashMap<ChatId, Arc<Mutex<()>>>,
}

impl DialogEngine {
    pub fn new(
        sessions: SessionStoreBox,
        commerce: CommerceGatewayRef,
        messenger: MessengerRef,
        geocoder: GeocoderRef,
        config: OrderingConfig,
    ) -> Self {
        let config = Arc::new(config);
        let geo = GeoResolver::new(geocoder, commerce.clone());
        let reminders = ReminderScheduler::new(messenger.clone(), config.reminder_delay);
        let storefront = Storefront::new(
            commerce.clone(),
            messenger.clone(),
            geo.clone(),
            config.clone(),
        );
        let fulfillment = FulfillmentOrchestrator::new(
            commerce,
            messenger.clone(),
            geo,
            reminders,
            config.clone(),
        );

        Self {
            sessions,
            messenger,
            storefront,
            fulfillment,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn reminders(&self) -> &ReminderScheduler {
        self.fulfillment.reminders()
    }

    pub async fn session(&self, chat_id: ChatId) -> Result<Option<Session>> {
        self.sessions.get(chat_id).await
    }

    pub async fn sessions(&self) -> Result<Vec<Session>> {
        self.sessions.get_all().await
    }

    /// Processes one inbound event and returns the state the session was left in.
    ///
    /// A paid order still waiting for hand-over is retried first. A handler
    /// error leaves the dialog state and context untouched, tells the user to
    /// try again and is reported to the operator chat before being returned.
    pub async fn dispatch(&self, event: Event) -> Result<State> {
        let chat_id = event.chat_id;
        let lock = self.locks.entry(chat_id).or_default().clone();

        let result = {
            let _guard = lock.lock().await;
            self.dispatch_locked(&event).await
        };

        drop(lock);
        self.locks.remove_if(&chat_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn dispatch_locked(&self, event: &Event) -> Result<State> {
        let chat_id = event.chat_id;
        let mut session = self
            .sessions
            .get(chat_id)
            .await?
            .unwrap_or_else(|| Session::new(chat_id));

        let resumed = self
            .fulfillment
            .resume_paid_order(chat_id, &mut session.context)
            .await;

        let kind = classify(event);
        let route = route(kind, session.state);
        debug!(%chat_id, state = %session.state, ?route, "dispatching event");

        let mut context = session.context.clone();
        match self.handle(&route, event, session.state, &mut context).await {
            Ok(next) => {
                debug!(%chat_id, from = %session.state, to = %next, "state transition");
                session.state = next;
                session.context = context;
                self.sessions.store(session).await?;
                Ok(next)
            }
            Err(e) => {
                self.report_failure(event, session.state, &e).await;
                // Hand-over progress made before the handler ran is kept.
                if resumed {
                    self.sessions.store(session).await?;
                }
                Err(e)
            }
        }
    }

    async fn handle(
        &self,
        route: &Route,
        event: &Event,
        state: State,
        context: &mut SessionContext,
    ) -> Result<State> {
        match route {
            Route::Start => self.storefront.start(event).await,
            Route::Menu { page } => self.storefront.show_menu(event, *page).await,
            Route::Describe { product_id } => self.storefront.describe(event, product_id).await,
            Route::AddToCart { product_id } => self.storefront.add_to_cart(event, product_id).await,
            Route::Cart { remove_item } => {
                self.storefront
                    .show_cart(event, remove_item.as_deref())
                    .await
            }
            Route::AskPhone => self.storefront.ask_phone(event).await,
            Route::ConfirmPhone => self.storefront.confirm_phone(event, context).await,
            Route::AskLocation => self.storefront.ask_location(event, context).await,
            Route::ChooseFulfillment => self.storefront.choose_fulfillment(event, context).await,
            Route::Delivery => self.fulfillment.deliver(event, context).await,
            Route::PickUp => self.fulfillment.pick_up(event, context).await,
            Route::PreCheckout => {
                self.fulfillment.pre_checkout(event, context).await?;
                Ok(state)
            }
            Route::ConfirmPayment => self.fulfillment.confirm_payment(event, context, state).await,
            Route::Hint => self.storefront.hint(event, state).await,
        }
    }

    async fn report_failure(&self, event: &Event, state: State, failure: &BotError) {
        let chat_id = event.chat_id;
        error!(%chat_id, %state, error = %failure, "exception while handling an update");

        if let Err(e) = self
            .messenger
            .send_text(chat_id, OutgoingText::plain(TRY_AGAIN))
            .await
        {
            warn!(%chat_id, error = %e, "failed to tell the user to retry");
        }

        if let Some(operator) = self.config.operator_chat {
            let report = format!(
                "Exception while handling an update from {chat_id} in {state}:\n{failure}"
            );
            if let Err(e) = self.messenger.send_text(operator, OutgoingText::plain(report)).await {
                warn!(error = %e, "failed to report to the operator chat");
            }
        }
    }
}
