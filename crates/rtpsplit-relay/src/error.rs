//! Error taxonomy for the relay.
//!
//! Only conditions that end the process are errors. Transient I/O
//! (would-block, interrupted, connection refused on datagram sockets) is
//! absorbed where it happens, and retransmission lookup misses are warnings.

use std::io;
use thiserror::Error;

/// Invalid startup configuration. No socket has been opened yet.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no input address given")]
    MissingInput,
    #[error("at least one output address is required")]
    NoOutputs,
    #[error("invalid address '{addr}': {reason}")]
    Address { addr: String, reason: String },
    #[error("first output '{addr}' has weight 0, no output would ever be scheduled")]
    FirstOutputInactive { addr: String },
    #[error(
        "output #{index} '{addr}' has a positive weight after a zero-weight output; \
         outputs after the first zero weight are never scheduled"
    )]
    InterleavedZeroWeight { index: usize, addr: String },
    #[error("payload size must be positive")]
    ZeroPayloadSize,
    #[error("RTP header size {size} is smaller than the 12-byte fixed header")]
    HeaderTooSmall { size: usize },
    #[error("retransmission buffer length must be positive")]
    ZeroRetxWindow,
    #[error("unable to read config file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Toml(String),
}

/// A malformed retransmission request. The control channel cannot be trusted
/// after one of these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("short retx datagram ({len} bytes, expected {expected})")]
    ShortDatagram { len: usize, expected: usize },
    #[error("invalid retx packet")]
    InvalidRequest,
}

/// Every fatal condition of the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unable to open {role} socket '{addr}': {source}")]
    Endpoint {
        role: &'static str,
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("unrecoverable read error on {channel}: {source}")]
    Read {
        channel: String,
        #[source]
        source: io::Error,
    },

    #[error("write error on {channel}: {source}")]
    Write {
        channel: String,
        #[source]
        source: io::Error,
    },

    #[error("{channel} closed by peer")]
    Closed { channel: String },

    #[error("poll error on ingress channel")]
    IngressHangup,

    #[error("couldn't poll(): {0}")]
    Poll(#[source] io::Error),

    #[error("protocol violation on {channel}: {source}")]
    Protocol {
        channel: String,
        #[source]
        source: ProtocolError,
    },
}

/// Read errors that resolve themselves on a later readiness event.
pub fn is_transient_read(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::ConnectionRefused
    )
}

/// Write errors after which the channel is dead: bad descriptor, reset, broken pipe.
pub fn is_fatal_write(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EBADF)
        || matches!(
            err.kind(),
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
        )
}
