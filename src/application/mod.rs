//! Application layer orchestrating the ordering dialog.
//!
//! `DialogEngine` is the entry point for inbound events: it classifies each
//! event, picks the state handler and persists the resulting session.
//! `EventDispatcher` sits in front of it and keeps per-chat ordering when
//! events arrive concurrently from the transport.

pub mod classifier;
pub mod dispatcher;
pub mod engine;
pub mod fulfillment;
pub mod geo;
pub mod handlers;
pub mod reminder;
