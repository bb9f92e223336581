use crate::domain::geo::TierThresholds;
use crate::domain::pricing::DeliveryPricing;
use crate::domain::session::ChatId;
use std::time::Duration;

/// Collection holding the service point directory.
pub const SERVICE_POINT_COLLECTION: &str = "pizzeria";
/// Collection receiving one record per delivery address.
pub const CUSTOMER_ADDRESS_COLLECTION: &str = "customer_address";

/// Decision constants and shop details used by the dialog engine.
#[derive(Debug, Clone)]
pub struct OrderingConfig {
    pub shop_name: String,
    pub currency: String,
    /// Token of the payment provider, attached to every issued invoice.
    pub payment_provider_token: String,
    pub thresholds: TierThresholds,
    pub pricing: DeliveryPricing,
    pub menu_page_size: usize,
    pub reminder_delay: Duration,
    /// Chat that receives dispatch failure reports.
    pub operator_chat: Option<ChatId>,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            shop_name: "Pizzeria".to_string(),
            currency: "RUB".to_string(),
            payment_provider_token: String::new(),
            thresholds: TierThresholds::default(),
            pricing: DeliveryPricing::default(),
            menu_page_size: 7,
            reminder_delay: Duration::from_secs(60 * 60),
            operator_chat: None,
        }
    }
}
