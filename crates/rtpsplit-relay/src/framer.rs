//! # RTP Framing on Ingress
//!
//! In wrap mode the ingress carries bare payload (typically MPEG-TS) and the
//! relay writes a fresh 12-byte header in front of it. In passthrough mode the
//! ingress already carries RTP and only the SSRC and timestamp may be
//! rewritten.

use rtpsplit_transport::clock::{rtp_timestamp, Tick};
use rtpsplit_transport::pool::Block;
use rtpsplit_transport::wire::{RtpHeader, RTP_HEADER_SIZE, RTP_TYPE_TS};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Wrap { next_seqnum: u16 },
    Passthrough { overwrite_timestamps: bool },
}

/// Writes or patches the RTP header of each ingress block.
#[derive(Debug, Clone)]
pub struct RtpFramer {
    mode: Mode,
    ssrc: Option<[u8; 4]>,
}

impl RtpFramer {
    /// Wrap mode: sequence numbers start at `first_seqnum`, SSRC defaults to 0.
    pub fn wrap(first_seqnum: u16, ssrc: Option<[u8; 4]>) -> Self {
        RtpFramer {
            mode: Mode::Wrap {
                next_seqnum: first_seqnum,
            },
            ssrc: Some(ssrc.unwrap_or([0; 4])),
        }
    }

    /// Passthrough mode: SSRC is replaced only when given.
    pub fn passthrough(ssrc: Option<[u8; 4]>, overwrite_timestamps: bool) -> Self {
        RtpFramer {
            mode: Mode::Passthrough {
                overwrite_timestamps,
            },
            ssrc,
        }
    }

    pub fn is_wrap(&self) -> bool {
        matches!(self.mode, Mode::Wrap { .. })
    }

    /// Bytes the ingress must reserve in front of the payload before reading.
    pub fn reserved_header(&self) -> usize {
        if self.is_wrap() {
            RTP_HEADER_SIZE
        } else {
            0
        }
    }

    /// Frame `block` in place. Returns `false` if the block cannot carry an
    /// RTP header and must be dropped.
    pub fn frame(&mut self, block: &mut Block, now: Tick) -> bool {
        let len = block.len();
        let Some(mut hdr) = RtpHeader::new(block.as_mut_slice()) else {
            warn!(len, "ingress packet shorter than an RTP header, dropped");
            return false;
        };
        match &mut self.mode {
            Mode::Wrap { next_seqnum } => {
                hdr.init();
                hdr.set_payload_type(RTP_TYPE_TS);
                hdr.set_seqnum(*next_seqnum);
                hdr.set_timestamp(rtp_timestamp(now));
                *next_seqnum = next_seqnum.wrapping_add(1);
            }
            Mode::Passthrough {
                overwrite_timestamps,
            } => {
                if *overwrite_timestamps {
                    hdr.set_timestamp(rtp_timestamp(now));
                }
            }
        }
        if let Some(ssrc) = self.ssrc {
            hdr.set_ssrc(ssrc);
        }
        true
    }
}
