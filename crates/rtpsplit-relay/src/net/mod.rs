//! Sockets and the channel abstraction the relay runs on.

pub mod address;
pub mod endpoint;
#[cfg(test)]
pub(crate) mod mock;

pub use address::{AddressSpec, Role, TransportKind, DEFAULT_PORT};
pub use endpoint::{Channel, Endpoint};
