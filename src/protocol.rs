//! Wire types re-exported from the shared crate

pub use seller_socket_shared::{
    codec, events,
    state_machine::{self, ConnectionStatus},
    DirectMessage, DirectMessageCommand, EventFrame, InboundEvent, OutboundCommand,
    ProtocolError, Role, RoleBroadcast, RoleBroadcastCommand, UserId,
};
