//! Connection management for the real-time channel
//!
//! This module handles:
//! - One live link per manager, superseded on every `connect`
//! - Generation-gated status reporting and inbound dispatch
//! - Ordered status subscriptions
//! - Per-variant inbound event handlers

mod handlers;
mod manager;
mod status;

pub use manager::{ConnectOptions, ConnectionManager, Delivery, ManagerError};
pub use status::{StatusChange, StatusSubscription};
