//! Seller dashboard real-time channel
//!
//! A [`ConnectionManager`] owns at most one authenticated, bidirectional
//! connection at a time, publishes its status, and mediates typed outbound
//! commands and inbound events over a pluggable transport.

pub mod config;
pub mod connection;
pub mod protocol;
pub mod transport;

pub use config::ManagerConfig;
pub use connection::{
    ConnectOptions, ConnectionManager, Delivery, ManagerError, StatusChange, StatusSubscription,
};
pub use protocol::{ConnectionStatus, InboundEvent, OutboundCommand, Role, UserId};
