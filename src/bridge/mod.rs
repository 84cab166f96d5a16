//! Bridge core
//!
//! The persistent channel between the host and the relay: request
//! correlation, connection lifecycle, and fan-out of server-initiated
//! messages to streaming listeners.

pub mod broadcast;
pub mod connection;
pub mod correlation;
pub mod link;
pub mod websocket;

pub use broadcast::{Broadcaster, Subscription};
pub use connection::{ConnectionManager, Connector, ReconnectPolicy};
pub use correlation::CorrelationTable;
pub use link::{ConnectionState, FrameChannel, InboundHandler, Link};
pub use websocket::WsConnector;
