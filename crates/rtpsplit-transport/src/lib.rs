//! # rtpsplit-transport
//!
//! Packet-level building blocks for the rtpsplit relay.
//!
//! ## Crate structure
//!
//! - [`wire`]: RTP header accessors and the retransmission request message
//! - [`clock`]: 27 MHz tick clock shared by every date in the relay
//! - [`pool`]: Fixed-capacity packet blocks and the time-windowed retransmission buffer

pub mod clock;
pub mod pool;
pub mod wire;
