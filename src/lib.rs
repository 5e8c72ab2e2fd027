//! Realtime client core for the Chautari pickup-sports platform.
//!
//! This library maintains the single persistent WebSocket session to the
//! backend: connect/reconnect lifecycle with exponential backoff, typed
//! event dispatch, an in-memory in-app notification store with unread
//! expiry, ephemeral typing indicators, and an optional push-notification
//! bridge for backgrounded delivery.

pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod notifications;
pub mod protocol;
pub mod push;
pub mod service;
pub mod typing;

// shared library
pub mod common;
