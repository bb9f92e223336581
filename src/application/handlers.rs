//! Browsing, cart and checkout-data handlers.
//!
//! Each handler emits one primary message and returns the next state.
//! Problems with user input are answered in place and keep the user where
//! they are; collaborator failures propagate to the engine.

use super::geo::GeoResolver;
use crate::config::OrderingConfig;
use crate::domain::catalog::{Cart, Product};
use crate::domain::event::{Event, EventPayload};
use crate::domain::format::{
    format_cart, format_delivery_offer, format_pickup_offer, format_product,
};
use crate::domain::message::{Button, CallbackToken, Keyboard, OutgoingText};
use crate::domain::phone::normalize_phone;
use crate::domain::ports::{CommerceGatewayRef, MessengerRef};
use crate::domain::session::{SessionContext, State};
use crate::error::{BotError, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) fn menu_button() -> Button {
    Button::new("Go to menu", CallbackToken::Menu { page: None })
}

#[derive(Clone)]
pub struct Storefront {
    commerce: CommerceGatewayRef,
    messenger: MessengerRef,
    geo: GeoResolver,
    config: Arc<OrderingConfig>,
}

impl Storefront {
    pub fn new(
        commerce: CommerceGatewayRef,
        messenger: MessengerRef,
        geo: GeoResolver,
        config: Arc<OrderingConfig>,
    ) -> Self {
        Self {
            commerce,
            messenger,
            geo,
            config,
        }
    }

    pub async fn start(&self, event: &Event) -> Result<State> {
        let chat_id = event.chat_id;
        let name = event.sender_name.as_deref().unwrap_or("there");
        info!(%chat_id, "conversation started");

        let cart = self.commerce.get_cart(&chat_id.cart_id()).await?;
        debug!(%chat_id, items = cart.item_count(), "cart on start");

        let greeting = format!("Hello, {name}.\nGlad to see you in our shop!");
        self.messenger
            .send_text(
                chat_id,
                OutgoingText::plain(greeting).with_keyboard(Keyboard::new().button(menu_button())),
            )
            .await?;

        Ok(State::Browsing)
    }

    pub async fn show_menu(&self, event: &Event, page: u32) -> Result<State> {
        let products = self.commerce.get_products().await?;
        let keyboard = menu_keyboard(&products, page, self.config.menu_page_size);

        self.messenger
            .send_text(event.chat_id, OutgoingText::plain("Our menu:").with_keyboard(keyboard))
            .await?;
        self.delete_source_message(event).await;

        Ok(State::Browsing)
    }

    pub async fn describe(&self, event: &Event, product_id: &str) -> Result<State> {
        let product = self.commerce.get_product(product_id).await?;
        let caption = OutgoingText::markdown(format_product(&product)).with_keyboard(
            Keyboard::new()
                .button(Button::new(
                    "Add to order",
                    CallbackToken::AddToCart {
                        product_id: product.id.clone(),
                    },
                ))
                .button(Button::new("Back to menu", CallbackToken::Menu { page: None })),
        );

        match &product.main_image_id {
            Some(image_id) => {
                let link = self.commerce.get_image_link(image_id).await?;
                self.messenger.send_photo(event.chat_id, &link, caption).await?;
            }
            None => self.messenger.send_text(event.chat_id, caption).await?,
        }
        self.delete_source_message(event).await;

        Ok(State::ViewingItem)
    }

    /// Adding the same product twice yields two increments, never a lost or
    /// corrupted line.
    pub async fn add_to_cart(&self, event: &Event, product_id: &str) -> Result<State> {
        let chat_id = event.chat_id;
        let cart = self
            .commerce
            .add_product_to_cart(&chat_id.cart_id(), product_id, 1)
            .await?;
        debug!(%chat_id, product_id, items = cart.item_count(), "product added to cart");

        self.acknowledge(event, "Added to your cart").await?;
        Ok(State::ViewingItem)
    }

    pub async fn show_cart(&self, event: &Event, remove_item: Option<&str>) -> Result<State> {
        let chat_id = event.chat_id;
        let cart_id = chat_id.cart_id();

        if let Some(item_id) = remove_item {
            self.commerce.remove_cart_item(&cart_id, item_id).await?;
            debug!(%chat_id, item_id, "cart item removed");
            if let Some(query_id) = event.callback_query_id() {
                self.messenger
                    .answer_callback(query_id, Some("Removed from your cart"))
                    .await?;
            }
        }

        let cart = self.commerce.get_cart_items(&cart_id).await?;
        self.messenger
            .send_text(
                chat_id,
                OutgoingText::markdown(format_cart(&cart)).with_keyboard(cart_keyboard(&cart)),
            )
            .await?;
        self.delete_source_message(event).await;

        Ok(State::Cart)
    }

    pub async fn ask_phone(&self, event: &Event) -> Result<State> {
        self.messenger
            .send_text(event.chat_id, OutgoingText::plain("Please type your phone number."))
            .await?;
        Ok(State::AwaitingPhone)
    }

    pub async fn confirm_phone(
        &self,
        event: &Event,
        context: &mut SessionContext,
    ) -> Result<State> {
        let typed = match &event.payload {
            EventPayload::Text { text } => text.as_str(),
            _ => "",
        };

        let Some(phone) = normalize_phone(typed) else {
            debug!(chat_id = %event.chat_id, "rejected phone number");
            self.messenger
                .send_text(
                    event.chat_id,
                    OutgoingText::plain("That number does not look right.\nPlease try again."),
                )
                .await?;
            return Ok(State::AwaitingPhone);
        };

        let keyboard = Keyboard::new()
            .button(Button::new("Yes, call this number", CallbackToken::AskLocation))
            .button(Button::new("Enter again", CallbackToken::AskPhone));
        self.messenger
            .send_text(
                event.chat_id,
                OutgoingText::plain(format!("Your phone number: {phone}")).with_keyboard(keyboard),
            )
            .await?;
        context.phone = Some(phone);

        Ok(State::AwaitingPhone)
    }

    pub async fn ask_location(&self, event: &Event, context: &SessionContext) -> Result<State> {
        if context.phone.is_none() {
            return self.ask_phone(event).await;
        }

        self.messenger
            .send_text(
                event.chat_id,
                OutgoingText::plain("Type your delivery address or share your location."),
            )
            .await?;
        Ok(State::AwaitingLocation)
    }

    /// Resolves the user's location, finds the nearest service point and
    /// offers pickup, plus delivery when the distance tier allows it.
    pub async fn choose_fulfillment(
        &self,
        event: &Event,
        context: &mut SessionContext,
    ) -> Result<State> {
        let chat_id = event.chat_id;

        let Some(location) = self.geo.resolve_location(event).await? else {
            self.messenger
                .send_text(
                    chat_id,
                    OutgoingText::plain("We could not find that address.\nPlease try again."),
                )
                .await?;
            return Ok(State::AwaitingLocation);
        };

        let (point, distance) = match self.geo.nearest(&location).await {
            Ok(found) => found,
            Err(BotError::NoServicePoints) => {
                warn!(%chat_id, "service point directory is empty");
                self.messenger
                    .send_text(
                        chat_id,
                        OutgoingText::plain(
                            "Sorry, none of our pizzerias is accepting orders right now.\n\
                             Please try again later.",
                        ),
                    )
                    .await?;
                return Ok(State::AwaitingLocation);
            }
            Err(e) => return Err(e),
        };

        let tier = self.config.thresholds.classify(distance);
        let fee = self.config.pricing.fee_for(tier);
        info!(
            %chat_id,
            service_point = %point.id,
            distance_km = distance,
            %tier,
            "fulfillment options resolved"
        );

        let mut keyboard = Keyboard::new().button(Button::new("Pick up", CallbackToken::PickUp));
        if fee.is_some() {
            keyboard = keyboard.button(Button::new("Delivery", CallbackToken::Delivery));
        }

        let text = format!(
            "{}\n\n{}",
            format_pickup_offer(&point, distance),
            format_delivery_offer(fee, &self.config.currency)
        );
        self.messenger
            .send_text(chat_id, OutgoingText::plain(text).with_keyboard(keyboard))
            .await?;

        context.location = Some(location);
        context.nearest_service_point_id = Some(point.id);
        Ok(State::ChoosingFulfillment)
    }

    /// Free text where only buttons make sense.
    pub async fn hint(&self, event: &Event, state: State) -> Result<State> {
        self.messenger
            .send_text(
                event.chat_id,
                OutgoingText::plain("Please use the buttons under the messages.")
                    .with_keyboard(Keyboard::new().button(menu_button())),
            )
            .await?;
        Ok(state)
    }

    async fn acknowledge(&self, event: &Event, text: &str) -> Result<()> {
        match event.callback_query_id() {
            Some(query_id) => self.messenger.answer_callback(query_id, Some(text)).await,
            None => {
                self.messenger
                    .send_text(event.chat_id, OutgoingText::plain(text))
                    .await
            }
        }
    }

    /// Removes the message whose button was pressed; the chat stays usable
    /// if the transport refuses.
    async fn delete_source_message(&self, event: &Event) {
        if let Some(message_id) = event.source_message_id()
            && let Err(e) = self.messenger.delete_message(event.chat_id, message_id).await
        {
            warn!(chat_id = %event.chat_id, message_id, error = %e, "failed to delete message");
        }
    }
}

/// Product buttons for one page, page navigation and a cart button.
pub fn menu_keyboard(products: &[Product], page: u32, page_size: usize) -> Keyboard {
    let page_size = page_size.max(1);
    let pages = products.len().div_ceil(page_size).max(1) as u32;
    let page = page.clamp(1, pages);

    let mut keyboard = Keyboard::new();
    for product in products
        .iter()
        .skip((page as usize - 1) * page_size)
        .take(page_size)
    {
        keyboard = keyboard.button(Button::new(
            product.name.clone(),
            CallbackToken::Describe {
                product_id: product.id.clone(),
            },
        ));
    }

    if pages > 1 {
        let mut navigation = Vec::new();
        if page > 1 {
            navigation.push(Button::new("<", CallbackToken::Menu { page: Some(page - 1) }));
        }
        navigation.push(Button::new(
            format!("{page}/{pages}"),
            CallbackToken::Menu { page: Some(page) },
        ));
        if page < pages {
            navigation.push(Button::new(">", CallbackToken::Menu { page: Some(page + 1) }));
        }
        keyboard = keyboard.row(navigation);
    }

    keyboard.button(Button::new("Cart", CallbackToken::Cart))
}

/// One remove button per line, then "continue" and, for a non-empty cart,
/// "checkout".
pub fn cart_keyboard(cart: &Cart) -> Keyboard {
    let mut keyboard = Keyboard::new();
    for item in &cart.items {
        keyboard = keyboard.button(Button::new(
            format!("Remove {}", item.name),
            CallbackToken::RemoveItem {
                item_id: item.id.clone(),
            },
        ));
    }

    let mut footer = vec![Button::new(
        "Continue shopping",
        CallbackToken::Menu { page: None },
    )];
    if !cart.is_empty() {
        footer.push(Button::new("Checkout", CallbackToken::AskPhone));
    }
    keyboard.row(footer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::CartItem;

    fn products(count: usize) -> Vec<Product> {
        (1..=count)
            .map(|i| Product {
                id: i.to_string(),
                name: format!("Pizza {i}"),
                description: String::new(),
                unit_amount: 40_000,
                display_price: "400.00".to_string(),
                main_image_id: None,
            })
            .collect()
    }

    #[test]
    fn test_menu_keyboard_paginates() {
        let products = products(10);

        let first = menu_keyboard(&products, 1, 7);
        assert!(first.contains(&CallbackToken::Describe { product_id: "7".into() }));
        assert!(!first.contains(&CallbackToken::Describe { product_id: "8".into() }));
        assert!(first.contains(&CallbackToken::Menu { page: Some(2) }));
        assert!(first.contains(&CallbackToken::Cart));

        let second = menu_keyboard(&products, 2, 7);
        assert!(second.contains(&CallbackToken::Describe { product_id: "10".into() }));
        assert!(second.contains(&CallbackToken::Menu { page: Some(1) }));
        assert!(!second.contains(&CallbackToken::Menu { page: Some(3) }));
    }

    #[test]
    fn test_menu_keyboard_clamps_page() {
        let products = products(3);
        let keyboard = menu_keyboard(&products, 9, 7);
        assert!(keyboard.contains(&CallbackToken::Describe { product_id: "1".into() }));
        // A single page needs no navigation row.
        assert_eq!(keyboard.rows.len(), 4);

        let empty = menu_keyboard(&[], 0, 7);
        assert_eq!(empty.rows.len(), 1);
    }

    #[test]
    fn test_cart_keyboard_checkout_only_when_filled() {
        assert!(!cart_keyboard(&Cart::default()).contains(&CallbackToken::AskPhone));

        let cart = Cart {
            items: vec![CartItem {
                id: "line".to_string(),
                product_id: "1".to_string(),
                name: "Pizza 1".to_string(),
                description: String::new(),
                quantity: 1,
                unit_amount: 40_000,
                display_total: "400.00".to_string(),
            }],
            display_total: "400.00".to_string(),
        };
        let keyboard = cart_keyboard(&cart);
        assert!(keyboard.contains(&CallbackToken::AskPhone));
        assert!(keyboard.contains(&CallbackToken::RemoveItem { item_id: "line".into() }));
    }
}
