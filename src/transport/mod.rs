pub mod memory;
pub mod traits;
pub mod websocket;

pub use memory::{MemoryConnector, MemoryServer, MemorySession, PendingConnection};
pub use traits::{LinkEvent, TransportConnector, TransportLink};
pub use websocket::{SocketIoConnector, SocketIoLink};
