//! Relay configuration.
//!
//! [`RelayConfigInput`] is the loose form: every field optional, read from a
//! TOML file and overlaid with command-line flags. [`RelayConfigInput::resolve`]
//! applies defaults, parses the address descriptors and validates the result
//! into an immutable [`RelayConfig`].
//!
//! ```toml
//! input = "@239.1.1.1:5000"
//! outputs = ["10.0.0.1:6000,3", "10.0.1.1:6000,1"]
//! wrap = true
//! retx_buffer_ms = 800
//! retx = "@:7000"
//! ```

use std::net::Ipv4Addr;
use std::path::Path;

use rtpsplit_transport::clock::{ticks_from_millis, Tick};
use rtpsplit_transport::wire::RTP_HEADER_SIZE;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::net::{AddressSpec, Role};

pub const DEFAULT_PAYLOAD_SIZE: usize = 1316;
pub const DEFAULT_RETX_BUFFER_MS: u64 = 500;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfigInput {
    pub priority: Option<i32>,
    pub log_tag: Option<String>,
    pub ttl: Option<u32>,
    pub overwrite_timestamps: Option<bool>,
    pub ssrc: Option<Ipv4Addr>,
    pub wrap: Option<bool>,
    pub retx_buffer_ms: Option<u64>,
    pub retx: Option<String>,
    pub payload_size: Option<usize>,
    pub rtp_header_size: Option<usize>,
    pub seqnum: Option<u16>,
    pub input: Option<String>,
    pub outputs: Vec<String>,
}

/// How ingress packets get their RTP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Ingress is bare payload; a 12-byte header is synthesized.
    Wrap { first_seqnum: u16 },
    /// Ingress already carries an RTP header of `header_size` bytes.
    Passthrough { header_size: usize },
}

impl Framing {
    pub fn header_size(&self) -> usize {
        match self {
            Framing::Wrap { .. } => RTP_HEADER_SIZE,
            Framing::Passthrough { header_size } => *header_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub priority: Option<i32>,
    pub log_tag: Option<String>,
    /// Outbound TTL; 0 keeps the system default.
    pub ttl: u32,
    pub framing: Framing,
    pub overwrite_timestamps: bool,
    pub ssrc: Option<[u8; 4]>,
    pub retx_window: Tick,
    pub retx: Option<AddressSpec>,
    pub payload_size: usize,
    pub input: AddressSpec,
    pub outputs: Vec<AddressSpec>,
}

impl RelayConfig {
    /// Bytes one ingress block holds: payload plus header.
    pub fn wanted_size(&self) -> usize {
        self.payload_size + self.framing.header_size()
    }

    pub fn weights(&self) -> Vec<u32> {
        self.outputs.iter().map(|o| o.weight).collect()
    }
}

impl RelayConfigInput {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Toml(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::File {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Layer `over` on top of `self`: every field set in `over` wins. A
    /// non-empty output list replaces the whole list.
    pub fn overlay(self, over: RelayConfigInput) -> Self {
        RelayConfigInput {
            priority: over.priority.or(self.priority),
            log_tag: over.log_tag.or(self.log_tag),
            ttl: over.ttl.or(self.ttl),
            overwrite_timestamps: over.overwrite_timestamps.or(self.overwrite_timestamps),
            ssrc: over.ssrc.or(self.ssrc),
            wrap: over.wrap.or(self.wrap),
            retx_buffer_ms: over.retx_buffer_ms.or(self.retx_buffer_ms),
            retx: over.retx.or(self.retx),
            payload_size: over.payload_size.or(self.payload_size),
            rtp_header_size: over.rtp_header_size.or(self.rtp_header_size),
            seqnum: over.seqnum.or(self.seqnum),
            input: over.input.or(self.input),
            outputs: if over.outputs.is_empty() {
                self.outputs
            } else {
                over.outputs
            },
        }
    }

    pub fn resolve(self) -> Result<RelayConfig, ConfigError> {
        let input = self
            .input
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingInput)?;
        let input = AddressSpec::parse(input, Role::Input)?;

        if self.outputs.is_empty() {
            return Err(ConfigError::NoOutputs);
        }
        let outputs = self
            .outputs
            .iter()
            .map(|o| AddressSpec::parse(o, Role::Output))
            .collect::<Result<Vec<_>, _>>()?;
        validate_weights(&outputs)?;

        let payload_size = self.payload_size.unwrap_or(DEFAULT_PAYLOAD_SIZE);
        if payload_size == 0 {
            return Err(ConfigError::ZeroPayloadSize);
        }

        let framing = if self.wrap.unwrap_or(false) {
            Framing::Wrap {
                first_seqnum: self.seqnum.unwrap_or(0),
            }
        } else {
            let header_size = self.rtp_header_size.unwrap_or(RTP_HEADER_SIZE);
            if header_size < RTP_HEADER_SIZE {
                return Err(ConfigError::HeaderTooSmall { size: header_size });
            }
            Framing::Passthrough { header_size }
        };

        let retx_ms = self.retx_buffer_ms.unwrap_or(DEFAULT_RETX_BUFFER_MS);
        if retx_ms == 0 {
            return Err(ConfigError::ZeroRetxWindow);
        }

        let retx = self
            .retx
            .as_deref()
            .map(|r| AddressSpec::parse(r, Role::Retx))
            .transpose()?;

        Ok(RelayConfig {
            priority: self.priority,
            log_tag: self.log_tag.filter(|t| !t.is_empty()),
            ttl: self.ttl.unwrap_or(0),
            framing,
            overwrite_timestamps: self.overwrite_timestamps.unwrap_or(false),
            ssrc: self.ssrc.map(|ip| ip.octets()),
            retx_window: ticks_from_millis(retx_ms),
            retx,
            payload_size,
            input,
            outputs,
        })
    }
}

/// Outputs are scheduled up to the first zero weight, so only a trailing run
/// of zero weights is meaningful.
fn validate_weights(outputs: &[AddressSpec]) -> Result<(), ConfigError> {
    let Some(first) = outputs.first() else {
        return Err(ConfigError::NoOutputs);
    };
    if first.weight == 0 {
        return Err(ConfigError::FirstOutputInactive {
            addr: first.raw.clone(),
        });
    }
    let mut seen_zero = false;
    for (index, output) in outputs.iter().enumerate() {
        if output.weight == 0 {
            seen_zero = true;
        } else if seen_zero {
            return Err(ConfigError::InterleavedZeroWeight {
                index,
                addr: output.raw.clone(),
            });
        }
    }
    Ok(())
}
