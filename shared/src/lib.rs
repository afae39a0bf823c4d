//! Seller Socket Shared Protocol Types
//!
//! This crate provides the wire-level types and packet codec for the seller
//! dashboard's real-time channel. Outbound commands and inbound events are
//! closed sets of typed variants; the mapping to and from wire event names
//! happens once, here, at the transport boundary.

pub mod codec;
pub mod state_machine;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Wire event names
pub mod events {
    /// Outbound direct message to a single user
    pub const SEND_MESSAGE: &str = "sendMessage";
    /// Outbound broadcast to every user of a role
    pub const SEND_TO_TYPE: &str = "sendToType";
    /// Inbound direct message
    pub const RECEIVE_MESSAGE: &str = "receiveMessage";
    /// Inbound broadcast addressed to admins
    pub const ADMIN_MESSAGE: &str = "adminMessage";
    /// Inbound broadcast addressed to customers
    pub const CUSTOMER_MESSAGE: &str = "customerMessage";
    /// Inbound broadcast addressed to sellers
    pub const SELLER_MESSAGE: &str = "sellerMessage";
}

/// Errors raised while mapping event frames to typed values
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed payload for event '{event}': {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize event '{event}': {source}")]
    Serialize {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown role: {0}")]
    UnknownRole(String),
}

/// Broadcast audience
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Customer,
    Seller,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Customer, Role::Seller];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Customer => "customer",
            Role::Seller => "seller",
        }
    }

    /// Inbound event name carrying broadcasts for this role
    pub fn broadcast_event(self) -> &'static str {
        match self {
            Role::Admin => events::ADMIN_MESSAGE,
            Role::Customer => events::CUSTOMER_MESSAGE,
            Role::Seller => events::SELLER_MESSAGE,
        }
    }

    /// Reverse of [`Role::broadcast_event`]
    pub fn from_broadcast_event(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|role| role.broadcast_event() == name)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::UnknownRole(s.to_string()))
    }
}

/// User identifier, either a string or a number on the wire.
///
/// Numbers are kept as [`serde_json::Number`] so they re-encode exactly as
/// they arrived.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Number(n) => write!(f, "{}", n),
            UserId::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        UserId::Text(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        UserId::Text(value)
    }
}

impl From<u64> for UserId {
    fn from(value: u64) -> Self {
        UserId::Number(value.into())
    }
}

impl From<i64> for UserId {
    fn from(value: i64) -> Self {
        UserId::Number(value.into())
    }
}

/// A named event with a JSON payload, as carried by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    pub name: String,
    pub payload: Value,
}

impl EventFrame {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Payload of `sendMessage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessageCommand {
    pub to_user_id: UserId,
    pub message: String,
}

/// Payload of `sendToType`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBroadcastCommand {
    #[serde(rename = "userType")]
    pub role: Role,
    pub message: String,
}

/// Commands the client may send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    DirectMessage(DirectMessageCommand),
    BroadcastToRole(RoleBroadcastCommand),
}

impl OutboundCommand {
    /// Create a direct message command
    pub fn direct(to_user_id: impl Into<UserId>, message: impl Into<String>) -> Self {
        OutboundCommand::DirectMessage(DirectMessageCommand {
            to_user_id: to_user_id.into(),
            message: message.into(),
        })
    }

    /// Create a role broadcast command
    pub fn to_role(role: Role, message: impl Into<String>) -> Self {
        OutboundCommand::BroadcastToRole(RoleBroadcastCommand {
            role,
            message: message.into(),
        })
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundCommand::DirectMessage(_) => events::SEND_MESSAGE,
            OutboundCommand::BroadcastToRole(_) => events::SEND_TO_TYPE,
        }
    }

    /// Encode into the frame sent over the transport
    pub fn to_frame(&self) -> Result<EventFrame, ProtocolError> {
        let event = self.event_name();
        let payload = match self {
            OutboundCommand::DirectMessage(cmd) => serde_json::to_value(cmd),
            OutboundCommand::BroadcastToRole(cmd) => serde_json::to_value(cmd),
        }
        .map_err(|source| ProtocolError::Serialize { event, source })?;

        Ok(EventFrame::new(event, payload))
    }

    /// Decode a frame sent by a client. Returns `Ok(None)` for names that are
    /// not outbound commands.
    pub fn decode(frame: &EventFrame) -> Result<Option<Self>, ProtocolError> {
        let command = match frame.name.as_str() {
            events::SEND_MESSAGE => OutboundCommand::DirectMessage(parse_payload(frame)?),
            events::SEND_TO_TYPE => OutboundCommand::BroadcastToRole(parse_payload(frame)?),
            _ => return Ok(None),
        };
        Ok(Some(command))
    }
}

/// Payload of `receiveMessage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    pub from_user_id: UserId,
    #[serde(rename = "fromUserType")]
    pub from_role: Role,
    pub message: String,
    /// ISO-8601, kept exactly as received
    pub timestamp: String,
}

/// Wire payload shared by `adminMessage`, `customerMessage` and `sellerMessage`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BroadcastPayload {
    message: String,
    from: String,
    timestamp: String,
}

/// A broadcast addressed to every user of `role`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBroadcast {
    /// Taken from the event name, not the payload
    pub role: Role,
    pub message: String,
    pub from: String,
    pub timestamp: String,
}

/// Events the server may push
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    DirectMessageReceived(DirectMessage),
    RoleBroadcast(RoleBroadcast),
}

impl InboundEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            InboundEvent::DirectMessageReceived(_) => events::RECEIVE_MESSAGE,
            InboundEvent::RoleBroadcast(b) => b.role.broadcast_event(),
        }
    }

    /// Map a frame to its typed variant.
    ///
    /// Returns `Ok(None)` when the event name is not part of the contract.
    pub fn decode(frame: &EventFrame) -> Result<Option<Self>, ProtocolError> {
        if frame.name == events::RECEIVE_MESSAGE {
            return parse_payload(frame).map(|dm| Some(InboundEvent::DirectMessageReceived(dm)));
        }

        let Some(role) = Role::from_broadcast_event(&frame.name) else {
            return Ok(None);
        };
        let payload: BroadcastPayload = parse_payload(frame)?;
        Ok(Some(InboundEvent::RoleBroadcast(RoleBroadcast {
            role,
            message: payload.message,
            from: payload.from,
            timestamp: payload.timestamp,
        })))
    }

    /// Encode into the frame a server would push
    pub fn to_frame(&self) -> Result<EventFrame, ProtocolError> {
        let event = self.event_name();
        let payload = match self {
            InboundEvent::DirectMessageReceived(dm) => serde_json::to_value(dm),
            InboundEvent::RoleBroadcast(b) => serde_json::to_value(BroadcastPayload {
                message: b.message.clone(),
                from: b.from.clone(),
                timestamp: b.timestamp.clone(),
            }),
        }
        .map_err(|source| ProtocolError::Serialize { event, source })?;

        Ok(EventFrame::new(event, payload))
    }
}

fn parse_payload<T: for<'de> Deserialize<'de>>(frame: &EventFrame) -> Result<T, ProtocolError> {
    T::deserialize(&frame.payload).map_err(|source| ProtocolError::Payload {
        event: frame.name.clone(),
        source,
    })
}
