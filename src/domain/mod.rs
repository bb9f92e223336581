//! Domain types and the pure decision logic of the ordering dialog.

pub mod catalog;
pub mod event;
pub mod format;
pub mod geo;
pub mod message;
pub mod phone;
pub mod ports;
pub mod pricing;
pub mod session;
