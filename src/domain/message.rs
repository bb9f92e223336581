use serde::{Deserialize, Serialize};

pub const MENU: &str = "HANDLE_MENU";
pub const PAGE: &str = "PAGE";
pub const DESCRIPTION: &str = "HANDLE_DESCRIPTION";
pub const ADD_TO_CART: &str = "ADD_TO_CART";
pub const CART: &str = "HANDLE_CART";
pub const REMOVE_ITEM: &str = "HANDLE_REMOVE_ITEM";
pub const WAITING_PHONE: &str = "HANDLE_WAITING_PHONE";
pub const WAITING_LOCATION: &str = "HANDLE_WAITING_LOCATION";
pub const DELIVERY: &str = "HANDLE_DELIVERY";
pub const PICK_UP: &str = "HANDLE_PICK_UP";

pub const FIELD_SEPARATOR: char = '|';

/// Data attached to an inline button and echoed back when it is pressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackToken {
    Menu { page: Option<u32> },
    Describe { product_id: String },
    AddToCart { product_id: String },
    Cart,
    RemoveItem { item_id: String },
    AskPhone,
    AskLocation,
    Delivery,
    PickUp,
}

impl CallbackToken {
    pub fn encode(&self) -> String {
        match self {
            Self::Menu { page: None } => MENU.to_string(),
            Self::Menu { page: Some(page) } => format!("{MENU}|{PAGE}|{page}"),
            Self::Describe { product_id } => format!("{DESCRIPTION}|{product_id}"),
            Self::AddToCart { product_id } => format!("{ADD_TO_CART}|{product_id}"),
            Self::Cart => CART.to_string(),
            Self::RemoveItem { item_id } => format!("{REMOVE_ITEM}|{item_id}"),
            Self::AskPhone => WAITING_PHONE.to_string(),
            Self::AskLocation => WAITING_LOCATION.to_string(),
            Self::Delivery => DELIVERY.to_string(),
            Self::PickUp => PICK_UP.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub callback_data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, token: CallbackToken) -> Self {
        Self {
            text: text.into(),
            callback_data: token.encode(),
        }
    }
}

/// Inline keyboard attached under a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        if !buttons.is_empty() {
            self.rows.push(buttons);
        }
        self
    }

    pub fn button(self, button: Button) -> Self {
        self.row(vec![button])
    }

    pub fn contains(&self, token: &CallbackToken) -> bool {
        let data = token.encode();
        self.rows.iter().flatten().any(|button| button.callback_data == data)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextFormat {
    #[default]
    Plain,
    MarkdownV2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingText {
    pub text: String,
    #[serde(default)]
    pub format: TextFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<Keyboard>,
}

impl OutgoingText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::Plain,
            keyboard: None,
        }
    }

    /// Text already escaped for the markdown dialect.
    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::MarkdownV2,
            keyboard: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_encoding() {
        assert_eq!(CallbackToken::Menu { page: None }.encode(), "HANDLE_MENU");
        assert_eq!(
            CallbackToken::Menu { page: Some(3) }.encode(),
            "HANDLE_MENU|PAGE|3"
        );
        assert_eq!(
            CallbackToken::RemoveItem {
                item_id: "abc".to_string()
            }
            .encode(),
            "HANDLE_REMOVE_ITEM|abc"
        );
    }

    #[test]
    fn test_keyboard_skips_empty_rows() {
        let keyboard = Keyboard::new()
            .row(vec![])
            .button(Button::new("Pick up", CallbackToken::PickUp));
        assert_eq!(keyboard.rows.len(), 1);
        assert!(keyboard.contains(&CallbackToken::PickUp));
        assert!(!keyboard.contains(&CallbackToken::Delivery));
    }
}
