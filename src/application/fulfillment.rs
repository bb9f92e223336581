//! Checkout tail of the dialog: price assembly, invoice issuance,
//! pre-checkout validation, payment confirmation and the follow-up reminder.

use super::geo::GeoResolver;
use super::handlers::menu_button;
use super::reminder::ReminderScheduler;
use crate::config::{CUSTOMER_ADDRESS_COLLECTION, OrderingConfig};
use crate::domain::catalog::Cart;
use crate::domain::event::{Event, EventPayload};
use crate::domain::format::format_cart;
use crate::domain::message::{Button, CallbackToken, Keyboard, OutgoingText};
use crate::domain::ports::{CommerceGatewayRef, MessengerRef};
use crate::domain::pricing::{Invoice, LabeledPrice, assemble_prices};
use crate::domain::session::{ChatId, InvoiceAttempt, PaidOrder, SessionContext, State};
use crate::error::{BotError, Result};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const PAYMENT_FAILED_REASON: &str =
    "Payment failed. Please request a new invoice and try again.";
pub const PAYMENT_RECEIVED: &str = "We have received your payment. Confirming the order is \
    taking longer than usual, we will get back to you shortly.";

#[derive(Clone)]
pub struct FulfillmentOrchestrator {
    commerce: CommerceGatewayRef,
    messenger: MessengerRef,
    geo: GeoResolver,
    reminders: ReminderScheduler,
    config: Arc<OrderingConfig>,
}

impl FulfillmentOrchestrator {
    pub fn new(
        commerce: CommerceGatewayRef,
        messenger: MessengerRef,
        geo: GeoResolver,
        reminders: ReminderScheduler,
        config: Arc<OrderingConfig>,
    ) -> Self {
        Self {
            commerce,
            messenger,
            geo,
            reminders,
            config,
        }
    }

    pub fn reminders(&self) -> &ReminderScheduler {
        &self.reminders
    }

    pub async fn pick_up(&self, event: &Event, context: &mut SessionContext) -> Result<State> {
        let chat_id = event.chat_id;
        if context.nearest_service_point_id.is_none() {
            return self.ask_location_again(event).await;
        }

        let cart = self.commerce.get_cart_items(&chat_id.cart_id()).await?;
        if cart.is_empty() {
            return self.reject_empty_cart(event).await;
        }

        let prices = assemble_prices(&cart, None)?;
        context.delivery = Some(false);
        self.issue_invoice(event, context, prices).await?;
        Ok(State::AwaitingPayment)
    }

    pub async fn deliver(&self, event: &Event, context: &mut SessionContext) -> Result<State> {
        let chat_id = event.chat_id;
        let (Some(location), Some(point_id)) =
            (context.location, context.nearest_service_point_id.clone())
        else {
            return self.ask_location_again(event).await;
        };
        let Some(phone) = context.phone.clone() else {
            self.messenger
                .send_text(chat_id, OutgoingText::plain("Please type your phone number first."))
                .await?;
            return Ok(State::AwaitingPhone);
        };

        let point = self.geo.service_point(&point_id).await?;
        let distance = location.distance_km(&point.location);
        let tier = self.config.thresholds.classify(distance);
        let Some(fee) = self.config.pricing.fee_for(tier) else {
            self.messenger
                .send_text(
                    chat_id,
                    OutgoingText::plain(
                        "Sorry, we do not deliver to your address. \
                         You can still pick the order up.",
                    )
                    .with_keyboard(
                        Keyboard::new().button(Button::new("Pick up", CallbackToken::PickUp)),
                    ),
                )
                .await?;
            return Ok(State::ChoosingFulfillment);
        };

        let cart = self.commerce.get_cart_items(&chat_id.cart_id()).await?;
        if cart.is_empty() {
            return self.reject_empty_cart(event).await;
        }
        let prices = assemble_prices(&cart, Some(fee))?;

        self.commerce
            .create_entry(
                CUSTOMER_ADDRESS_COLLECTION,
                address_record(event, &phone, location.lat, location.lon),
            )
            .await?;

        context.delivery = Some(true);
        self.issue_invoice(event, context, prices).await?;
        info!(%chat_id, %tier, fee = %fee, "delivery invoice issued");
        Ok(State::AwaitingPayment)
    }

    /// Accepts the exact token issued for the session's current invoice,
    /// once. Anything else is rejected with a reason for the payer.
    pub async fn pre_checkout(&self, event: &Event, context: &mut SessionContext) -> Result<()> {
        let EventPayload::PreCheckout {
            query_id,
            invoice_payload,
        } = &event.payload
        else {
            return Err(BotError::Validation("not a pre-checkout event".to_string()));
        };

        let verdict = match context.invoice.as_mut() {
            Some(attempt) if !attempt.validated && attempt.token == *invoice_payload => {
                attempt.validated = true;
                Ok(())
            }
            _ => {
                warn!(
                    chat_id = %event.chat_id,
                    error = %BotError::PaymentTokenMismatch,
                    "pre-checkout rejected"
                );
                Err(PAYMENT_FAILED_REASON.to_string())
            }
        };

        self.messenger.answer_pre_checkout(query_id, verdict).await
    }

    /// Consumes the validated invoice and hands the order over: staff are
    /// notified (delivery) or the user gets the pickup address, then the
    /// follow-up reminder is scheduled.
    ///
    /// Once the token matches, the payment is recorded as a [`PaidOrder`]
    /// before any collaborator is called. A failed hand-over leaves that
    /// record in the session for [`Self::resume_paid_order`] and does not fail
    /// the dispatch, so the record is persisted.
    pub async fn confirm_payment(
        &self,
        event: &Event,
        context: &mut SessionContext,
        state: State,
    ) -> Result<State> {
        let chat_id = event.chat_id;
        let EventPayload::PaymentConfirmed { invoice_payload } = &event.payload else {
            return Err(BotError::Validation("not a payment event".to_string()));
        };

        let matches = context
            .invoice
            .as_ref()
            .is_some_and(|attempt| attempt.validated && attempt.token == *invoice_payload);
        if !matches {
            warn!(
                %chat_id,
                error = %BotError::PaymentTokenMismatch,
                "payment does not match the issued invoice"
            );
            self.messenger
                .send_text(
                    chat_id,
                    OutgoingText::plain(
                        "We could not match this payment to your order. Please contact us.",
                    ),
                )
                .await?;
            return Ok(state);
        }

        context.invoice = None;
        context.paid_order = Some(PaidOrder {
            token: invoice_payload.clone(),
            delivery: context.delivery == Some(true),
            courier_notified: false,
        });
        info!(%chat_id, "payment accepted");

        if let Err(e) = self.complete_paid_order(chat_id, context).await {
            self.report_stalled_order(chat_id, &e).await;
            if let Err(e) = self
                .messenger
                .send_text(chat_id, OutgoingText::plain(PAYMENT_RECEIVED))
                .await
            {
                warn!(%chat_id, error = %e, "failed to acknowledge the payment");
            }
        }
        Ok(State::Browsing)
    }

    /// Retries the hand-over of a paid order left behind by an earlier
    /// failure. Returns whether the session carried one.
    pub async fn resume_paid_order(&self, chat_id: ChatId, context: &mut SessionContext) -> bool {
        if context.paid_order.is_none() {
            return false;
        }
        if let Err(e) = self.complete_paid_order(chat_id, context).await {
            warn!(%chat_id, error = %e, "paid order still waiting for fulfillment");
        }
        true
    }

    async fn complete_paid_order(
        &self,
        chat_id: ChatId,
        context: &mut SessionContext,
    ) -> Result<()> {
        let Some(order) = context.paid_order.clone() else {
            return Ok(());
        };

        let point_id = context
            .nearest_service_point_id
            .clone()
            .ok_or_else(|| BotError::Validation("paid session has no service point".to_string()))?;
        let point = self.geo.service_point(&point_id).await?;

        let mut reply = String::from("Thank you for choosing us!");
        if order.delivery {
            if !order.courier_notified {
                let cart = self.commerce.get_cart_items(&chat_id.cart_id()).await?;
                self.notify_courier(context, point.staff_contact, &cart).await?;
                if let Some(pending) = context.paid_order.as_mut() {
                    pending.courier_notified = true;
                }
            }
            reply.push_str("\nA courier will bring your order within an hour.");
        } else {
            reply.push_str(&format!(
                "\nYou can pick up your order at the nearest pizzeria:\n{}.",
                point.address
            ));
        }

        self.messenger
            .send_text(
                chat_id,
                OutgoingText::plain(reply).with_keyboard(Keyboard::new().button(menu_button())),
            )
            .await?;

        context.paid_order = None;
        self.reminders.schedule(chat_id);
        info!(%chat_id, delivery = order.delivery, service_point = %point.id, "order handed over");
        Ok(())
    }

    async fn report_stalled_order(&self, chat_id: ChatId, failure: &BotError) {
        error!(%chat_id, error = %failure, "paid order is waiting for fulfillment");

        if let Some(operator) = self.config.operator_chat {
            let report =
                format!("Paid order from {chat_id} is waiting for fulfillment:\n{failure}");
            if let Err(e) = self
                .messenger
                .send_text(operator, OutgoingText::plain(report))
                .await
            {
                warn!(error = %e, "failed to report to the operator chat");
            }
        }
    }

    async fn notify_courier(
        &self,
        context: &SessionContext,
        staff_contact: Option<ChatId>,
        cart: &Cart,
    ) -> Result<()> {
        let Some(staff) = staff_contact else {
            warn!("service point has no staff contact, courier not notified");
            return Ok(());
        };

        self.messenger
            .send_text(staff, OutgoingText::markdown(format_cart(cart)))
            .await?;
        if let Some(location) = context.location {
            self.messenger.send_location(staff, location).await?;
        }
        let phone = context.phone.as_deref().unwrap_or("not provided");
        self.messenger
            .send_text(staff, OutgoingText::plain(format!("Contact phone: {phone}")))
            .await?;
        debug!(%staff, "courier notified");
        Ok(())
    }

    async fn issue_invoice(
        &self,
        event: &Event,
        context: &mut SessionContext,
        prices: Vec<LabeledPrice>,
    ) -> Result<()> {
        let attempt = InvoiceAttempt::issue();
        let invoice = Invoice {
            title: "Order payment".to_string(),
            description: format!("Order at \"{}\"", self.config.shop_name),
            payload: attempt.token.clone(),
            currency: self.config.currency.clone(),
            prices,
            provider_token: self.config.payment_provider_token.clone(),
        };

        self.messenger.send_invoice(event.chat_id, &invoice).await?;
        debug!(chat_id = %event.chat_id, total = invoice.total(), "invoice issued");
        context.invoice = Some(attempt);
        Ok(())
    }

    async fn reject_empty_cart(&self, event: &Event) -> Result<State> {
        self.messenger
            .send_text(
                event.chat_id,
                OutgoingText::plain("Your cart is empty. Add something from the menu first.")
                    .with_keyboard(Keyboard::new().button(menu_button())),
            )
            .await?;
        Ok(State::Browsing)
    }

    async fn ask_location_again(&self, event: &Event) -> Result<State> {
        self.messenger
            .send_text(
                event.chat_id,
                OutgoingText::plain(
                    "Please type your delivery address or share your location again.",
                ),
            )
            .await?;
        Ok(State::AwaitingLocation)
    }
}

fn address_record(event: &Event, phone: &str, lat: f64, lon: f64) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("telegram_id".to_string(), json!(event.chat_id.0));
    fields.insert("phone".to_string(), json!(phone));
    fields.insert("latitude".to_string(), json!(lat));
    fields.insert("longitude".to_string(), json!(lon));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SERVICE_POINT_COLLECTION;
    use crate::domain::geo::GeoPoint;
    use crate::domain::ports::CommerceGateway;
    use crate::domain::pricing::DELIVERY_LABEL;
    use crate::infrastructure::in_memory::{
        InMemoryCommerceGateway, InMemoryGeocoder, ProductSeed, RecordingMessenger,
    };
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const CENTER: GeoPoint = GeoPoint {
        lat: 55.7539,
        lon: 37.6208,
    };
    const COURIER: ChatId = ChatId(1001);

    struct Fixture {
        commerce: Arc<InMemoryCommerceGateway>,
        messenger: Arc<RecordingMessenger>,
        orchestrator: FulfillmentOrchestrator,
        point_id: String,
    }

    fn fixture() -> Fixture {
        let commerce = Arc::new(InMemoryCommerceGateway::new());
        commerce
            .seed_product(&ProductSeed {
                id: "42".to_string(),
                name: "Margherita".to_string(),
                description: "Tomato and mozzarella".to_string(),
                price: dec!(450),
                image_url: None,
            })
            .unwrap();
        let point = commerce.seed_entry(
            SERVICE_POINT_COLLECTION,
            json!({"alias": "Center", "address": "Red Square 1", "latitude": CENTER.lat,
                   "longitude": CENTER.lon, "delivery_man": COURIER.0}),
        );

        let messenger = Arc::new(RecordingMessenger::new());
        let geo = GeoResolver::new(Arc::new(InMemoryGeocoder::new()), commerce.clone());
        let reminders = ReminderScheduler::new(messenger.clone(), Duration::from_secs(3600));
        let orchestrator = FulfillmentOrchestrator::new(
            commerce.clone(),
            messenger.clone(),
            geo,
            reminders,
            Arc::new(OrderingConfig::default()),
        );

        Fixture {
            commerce,
            messenger,
            orchestrator,
            point_id: point.id,
        }
    }

    impl Fixture {
        async fn fill_cart(&self, chat: i64) {
            self.commerce
                .add_product_to_cart(&ChatId(chat).cart_id(), "42", 1)
                .await
                .unwrap();
        }

        /// Context of a user `km_north` kilometres north of the branch.
        fn located(&self, km_north: f64) -> SessionContext {
            SessionContext {
                phone: Some("+79161234567".to_string()),
                location: Some(GeoPoint::new(CENTER.lat + km_north / 111.2, CENTER.lon)),
                nearest_service_point_id: Some(self.point_id.clone()),
                ..SessionContext::default()
            }
        }
    }

    fn pre_checkout(chat: i64, payload: &str) -> Event {
        Event::new(
            ChatId(chat),
            EventPayload::PreCheckout {
                query_id: format!("pc-{payload}"),
                invoice_payload: payload.to_string(),
            },
        )
    }

    fn paid(chat: i64, payload: &str) -> Event {
        Event::new(
            ChatId(chat),
            EventPayload::PaymentConfirmed {
                invoice_payload: payload.to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_pick_up_issues_invoice_without_delivery_line() {
        let fx = fixture();
        fx.fill_cart(1).await;
        let mut context = fx.located(1.0);

        let next = fx
            .orchestrator
            .pick_up(&Event::callback(1, "HANDLE_PICK_UP"), &mut context)
            .await
            .unwrap();

        assert_eq!(next, State::AwaitingPayment);
        assert_eq!(context.delivery, Some(false));
        let invoices = fx.messenger.invoices_to(ChatId(1));
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].total(), 45000);
        assert!(invoices[0].prices.iter().all(|price| price.label != DELIVERY_LABEL));
        assert_eq!(context.invoice.as_ref().unwrap().token, invoices[0].payload);
    }

    #[tokio::test]
    async fn test_pick_up_without_location_asks_again() {
        let fx = fixture();
        fx.fill_cart(1).await;
        let mut context = SessionContext::default();

        let next = fx
            .orchestrator
            .pick_up(&Event::callback(1, "HANDLE_PICK_UP"), &mut context)
            .await
            .unwrap();
        assert_eq!(next, State::AwaitingLocation);
        assert!(fx.messenger.invoices_to(ChatId(1)).is_empty());
    }

    #[tokio::test]
    async fn test_empty_cart_is_not_invoiced() {
        let fx = fixture();
        let mut context = fx.located(1.0);

        let next = fx
            .orchestrator
            .pick_up(&Event::callback(1, "HANDLE_PICK_UP"), &mut context)
            .await
            .unwrap();
        assert_eq!(next, State::Browsing);
        assert!(context.invoice.is_none());
    }

    #[tokio::test]
    async fn test_near_delivery_lists_a_free_delivery_line() {
        let fx = fixture();
        fx.fill_cart(1).await;
        let mut context = fx.located(0.3);

        let next = fx
            .orchestrator
            .deliver(&Event::callback(1, "HANDLE_DELIVERY"), &mut context)
            .await
            .unwrap();

        assert_eq!(next, State::AwaitingPayment);
        let invoice = &fx.messenger.invoices_to(ChatId(1))[0];
        let delivery = invoice
            .prices
            .iter()
            .find(|price| price.label == DELIVERY_LABEL)
            .unwrap();
        assert_eq!(delivery.amount, 0);

        let addresses = fx
            .commerce
            .get_all_entries(CUSTOMER_ADDRESS_COLLECTION)
            .await
            .unwrap();
        assert_eq!(addresses.len(), 1);
        assert_eq!(addresses[0].field_str("phone"), Some("+79161234567"));
    }

    #[tokio::test]
    async fn test_mid_delivery_charges_the_mid_fee() {
        let fx = fixture();
        fx.fill_cart(1).await;
        let mut context = fx.located(2.0);

        fx.orchestrator
            .deliver(&Event::callback(1, "HANDLE_DELIVERY"), &mut context)
            .await
            .unwrap();
        let invoice = &fx.messenger.invoices_to(ChatId(1))[0];
        assert_eq!(invoice.total(), 45000 + 10000);
    }

    #[tokio::test]
    async fn test_out_of_range_delivery_is_refused() {
        let fx = fixture();
        fx.fill_cart(1).await;
        let mut context = fx.located(30.0);

        let next = fx
            .orchestrator
            .deliver(&Event::callback(1, "HANDLE_DELIVERY"), &mut context)
            .await
            .unwrap();

        assert_eq!(next, State::ChoosingFulfillment);
        assert!(fx.messenger.invoices_to(ChatId(1)).is_empty());
        assert!(context.invoice.is_none());
    }

    #[tokio::test]
    async fn test_delivery_without_phone_asks_for_it() {
        let fx = fixture();
        fx.fill_cart(1).await;
        let mut context = fx.located(0.3);
        context.phone = None;

        let next = fx
            .orchestrator
            .deliver(&Event::callback(1, "HANDLE_DELIVERY"), &mut context)
            .await
            .unwrap();
        assert_eq!(next, State::AwaitingPhone);
    }

    #[tokio::test]
    async fn test_pre_checkout_accepts_the_issued_token_once() {
        let fx = fixture();
        fx.fill_cart(1).await;
        let mut context = fx.located(1.0);
        fx.orchestrator
            .pick_up(&Event::callback(1, "HANDLE_PICK_UP"), &mut context)
            .await
            .unwrap();
        let token = context.invoice.as_ref().unwrap().token.clone();

        fx.orchestrator
            .pre_checkout(&pre_checkout(1, "forged"), &mut context)
            .await
            .unwrap();
        fx.orchestrator
            .pre_checkout(&pre_checkout(1, &token), &mut context)
            .await
            .unwrap();
        fx.orchestrator
            .pre_checkout(&pre_checkout(1, &token), &mut context)
            .await
            .unwrap();

        let verdicts: Vec<(bool, Option<String>)> = fx
            .messenger
            .outbox()
            .into_iter()
            .filter_map(|outbound| match outbound {
                crate::infrastructure::in_memory::Outbound::PreCheckoutAnswer {
                    ok, error_message, ..
                } => Some((ok, error_message)),
                _ => None,
            })
            .collect();
        assert_eq!(
            verdicts,
            vec![
                (false, Some(PAYMENT_FAILED_REASON.to_string())),
                (true, None),
                (false, Some(PAYMENT_FAILED_REASON.to_string())),
            ]
        );
        assert!(context.invoice.as_ref().unwrap().validated);
    }

    #[tokio::test]
    async fn test_unmatched_payment_keeps_state() {
        let fx = fixture();
        let mut context = fx.located(1.0);
        context.invoice = Some(InvoiceAttempt::issue());

        let next = fx
            .orchestrator
            .confirm_payment(&paid(1, "other"), &mut context, State::AwaitingPayment)
            .await
            .unwrap();
        assert_eq!(next, State::AwaitingPayment);
        assert!(context.invoice.is_some());
        assert!(!fx.orchestrator.reminders().cancel(ChatId(1)));
    }

    #[tokio::test]
    async fn test_paid_delivery_notifies_courier_and_schedules_reminder() {
        let fx = fixture();
        fx.fill_cart(1).await;
        let mut context = fx.located(0.3);
        fx.orchestrator
            .deliver(&Event::callback(1, "HANDLE_DELIVERY"), &mut context)
            .await
            .unwrap();
        let token = context.invoice.as_ref().unwrap().token.clone();
        fx.orchestrator
            .pre_checkout(&pre_checkout(1, &token), &mut context)
            .await
            .unwrap();

        let next = fx
            .orchestrator
            .confirm_payment(&paid(1, &token), &mut context, State::AwaitingPayment)
            .await
            .unwrap();

        assert_eq!(next, State::Browsing);
        assert!(context.invoice.is_none());
        let courier = fx.messenger.texts_to(COURIER);
        assert_eq!(courier.len(), 2);
        assert!(courier[0].contains("Margherita"));
        assert_eq!(courier[1], "Contact phone: +79161234567");
        assert!(
            fx.messenger
                .texts_to(ChatId(1))
                .iter()
                .any(|text| text.starts_with("Thank you for choosing us!"))
        );
        assert!(fx.orchestrator.reminders().cancel(ChatId(1)));
    }

    #[tokio::test]
    async fn test_paid_pickup_gives_the_address() {
        let fx = fixture();
        fx.fill_cart(1).await;
        let mut context = fx.located(1.0);
        fx.orchestrator
            .pick_up(&Event::callback(1, "HANDLE_PICK_UP"), &mut context)
            .await
            .unwrap();
        let token = context.invoice.as_ref().unwrap().token.clone();
        fx.orchestrator
            .pre_checkout(&pre_checkout(1, &token), &mut context)
            .await
            .unwrap();

        fx.orchestrator
            .confirm_payment(&paid(1, &token), &mut context, State::AwaitingPayment)
            .await
            .unwrap();

        assert!(fx.messenger.texts_to(COURIER).is_empty());
        let replies = fx.messenger.texts_to(ChatId(1));
        assert!(replies.last().unwrap().contains("Red Square 1"));
        fx.orchestrator.reminders().cancel(ChatId(1));
    }

    #[tokio::test]
    async fn test_failed_hand_over_keeps_the_paid_order() {
        let fx = fixture();
        fx.fill_cart(1).await;
        let mut context = fx.located(0.3);
        fx.orchestrator
            .deliver(&Event::callback(1, "HANDLE_DELIVERY"), &mut context)
            .await
            .unwrap();
        let token = context.invoice.as_ref().unwrap().token.clone();
        fx.orchestrator
            .pre_checkout(&pre_checkout(1, &token), &mut context)
            .await
            .unwrap();

        fx.commerce.set_unavailable(true);
        let next = fx
            .orchestrator
            .confirm_payment(&paid(1, &token), &mut context, State::AwaitingPayment)
            .await
            .unwrap();

        assert_eq!(next, State::Browsing);
        assert!(context.invoice.is_none());
        assert_eq!(context.paid_order.as_ref().unwrap().token, token);
        assert!(fx.messenger.texts_to(COURIER).is_empty());
        assert_eq!(
            fx.messenger.texts_to(ChatId(1)).last().unwrap(),
            PAYMENT_RECEIVED
        );

        assert!(fx.orchestrator.resume_paid_order(ChatId(1), &mut context).await);
        assert!(context.paid_order.is_some());

        fx.commerce.set_unavailable(false);
        assert!(fx.orchestrator.resume_paid_order(ChatId(1), &mut context).await);
        assert!(context.paid_order.is_none());
        assert_eq!(fx.messenger.texts_to(COURIER).len(), 2);
        assert!(fx.orchestrator.reminders().cancel(ChatId(1)));
        assert!(!fx.orchestrator.resume_paid_order(ChatId(1), &mut context).await);
    }
}
