//! Inbound transports
//!
//! Two implementations of the same client-facing contract: the embedded
//! server answers requests with the local router, the relay forwards them
//! over the persistent channel to a connected host.

pub mod embedded;
pub mod http;
pub mod relay;

pub use embedded::EmbeddedServer;
pub use relay::RelayServer;
