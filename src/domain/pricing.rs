use super::catalog::Cart;
use super::geo::DeliveryTier;
use crate::error::{BotError, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

pub const DELIVERY_LABEL: &str = "Delivery";

/// Delivery fee per tier, in major currency units.
///
/// `OutOfRange` has no fee because delivery is not offered there at all.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPricing {
    near: Decimal,
    mid: Decimal,
    far: Decimal,
}

impl DeliveryPricing {
    pub fn new(near: Decimal, mid: Decimal, far: Decimal) -> Result<Self> {
        if [near, mid, far].iter().any(|fee| fee.is_sign_negative()) {
            return Err(BotError::Config(
                "delivery fees must not be negative".to_string(),
            ));
        }
        Ok(Self { near, mid, far })
    }

    pub fn fee_for(&self, tier: DeliveryTier) -> Option<Decimal> {
        match tier {
            DeliveryTier::Near => Some(self.near),
            DeliveryTier::Mid => Some(self.mid),
            DeliveryTier::Far => Some(self.far),
            DeliveryTier::OutOfRange => None,
        }
    }
}

impl Default for DeliveryPricing {
    fn default() -> Self {
        Self {
            near: Decimal::ZERO,
            mid: Decimal::new(100, 0),
            far: Decimal::new(300, 0),
        }
    }
}

/// Converts a major-unit amount (e.g. rubles) into minor units (kopecks).
pub fn to_minor_units(amount: Decimal) -> Result<u64> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_u64()
        .ok_or_else(|| BotError::Validation(format!("amount {amount} is not payable")))
}

/// One line of an invoice, amount in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledPrice {
    pub label: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub title: String,
    pub description: String,
    /// Correlation token echoed back by pre-checkout and payment events.
    pub payload: String,
    pub currency: String,
    pub prices: Vec<LabeledPrice>,
    /// Payment provider credential, never written out.
    #[serde(skip)]
    pub provider_token: String,
}

impl Invoice {
    pub fn total(&self) -> u64 {
        self.prices.iter().map(|price| price.amount).sum()
    }
}

/// Builds the invoice lines for a cart, plus a delivery line when a fee is
/// given.
pub fn assemble_prices(cart: &Cart, delivery_fee: Option<Decimal>) -> Result<Vec<LabeledPrice>> {
    let mut prices: Vec<LabeledPrice> = cart
        .items
        .iter()
        .map(|item| LabeledPrice {
            label: if item.quantity > 1 {
                format!("{} x{}", item.name, item.quantity)
            } else {
                item.name.clone()
            },
            amount: item.line_amount(),
        })
        .collect();

    if let Some(fee) = delivery_fee {
        prices.push(LabeledPrice {
            label: DELIVERY_LABEL.to_string(),
            amount: to_minor_units(fee)?,
        });
    }

    Ok(prices)
}
