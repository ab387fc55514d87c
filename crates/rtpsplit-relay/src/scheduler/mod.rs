//! Output selection.
//!
//! Outputs share the ingress byte stream in proportion to their weights
//! through a virtual-time weighted round robin ([`wrr::OutputScheduler`]).

pub mod wrr;

pub use wrr::OutputScheduler;
