//! # rtpsplit-relay
//!
//! Forwards one RTP contribution feed over several outbound links, sharing
//! the traffic by configured weight, and replays recently sent packets on
//! request.
//!
//! - [`config`]: TOML and command-line configuration, validated into [`config::RelayConfig`]
//! - [`net`]: address descriptors, socket setup and the [`net::Channel`] trait
//! - [`scheduler`]: weighted round robin over the outputs
//! - [`framer`]: RTP header synthesis and rewriting on ingress
//! - [`arq`]: retransmission request parsing and replay
//! - [`runtime`]: the `poll(2)` event loop tying it together

pub mod arq;
pub mod config;
pub mod error;
pub mod framer;
pub mod net;
pub mod runtime;
pub mod scheduler;

pub use config::{RelayConfig, RelayConfigInput};
pub use error::RelayError;
pub use runtime::Relay;
