//! Rendering of carts, products and checkout prompts for the messenger.

use super::catalog::{Cart, Product};
use super::geo::ServicePoint;
use rust_decimal::Decimal;

/// Characters the markdown dialect reserves; each must be backslash-escaped
/// to appear literally.
pub const ESCAPED_CHARACTERS: [char; 19] = [
    '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Escapes text for the markdown dialect so that it renders literally.
///
/// Apply to every piece of text before wrapping it in markup.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if ESCAPED_CHARACTERS.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn bold(text: &str) -> String {
    format!("*{}*", escape_markdown(text))
}

fn italic(text: &str) -> String {
    format!("_{}_", escape_markdown(text))
}

pub fn format_product(product: &Product) -> String {
    format!(
        "{}\n{}\n\n{}",
        bold(&product.name),
        escape_markdown(&product.description),
        italic(&format!("Price: {}", product.display_price))
    )
}

pub fn format_cart(cart: &Cart) -> String {
    if cart.is_empty() {
        return escape_markdown("Your cart is empty.");
    }

    let mut text = String::new();
    for item in &cart.items {
        text.push_str(&format!(
            "{}\n{}\n{}\n{}\n\n",
            bold(&item.name),
            escape_markdown(&item.description),
            italic(&format!("in order: {} pcs.", item.quantity)),
            italic(&format!("subtotal: {}", item.display_total))
        ));
    }
    text.push_str(&bold(&format!("Order total: {}", cart.display_total)));
    text
}

pub fn format_pickup_offer(point: &ServicePoint, distance_km: f64) -> String {
    format!(
        "You can pick up your order at the nearest pizzeria:\n{}\n\nIt is {:.2} km away from you.",
        point.address, distance_km
    )
}

pub fn format_delivery_offer(fee: Option<Decimal>, currency: &str) -> String {
    match fee {
        Some(fee) if fee.is_zero() => "We can also deliver it for free.".to_string(),
        Some(fee) => format!("We can also deliver it for {} {}.", fee.normalize(), currency),
        None => "Sorry, your address is outside our delivery zone, \
                 so we cannot bring the order to you."
            .to_string(),
    }
}

pub fn format_reminder() -> String {
    format!(
        "{}\n\n{}",
        bold("Enjoy your meal!"),
        italic(
            "(if your order has not arrived yet, \
             just reply to this message and we will sort it out)"
        )
    )
}
