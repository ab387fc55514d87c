//! # Retransmission Request Handling
//!
//! A requester asks for `count` packets starting at a sequence number with an
//! 8-byte message ([`RetxRequest`]). [`RequestReader`] assembles messages from
//! one channel, [`serve`] replays the matching run of the retransmission
//! buffer through a caller-provided sink.
//!
//! Stream channels may deliver a request over several reads; the reader keeps
//! the partial header between readiness events. A datagram shorter than a
//! request means the peer does not speak this protocol, and is fatal.

use std::net::SocketAddr;

use rtpsplit_transport::pool::{Block, RetxBuffer};
use rtpsplit_transport::wire::{RetxRequest, RETX_HEADER_SIZE};
use tracing::{debug, warn};

use crate::error::{is_transient_read, ProtocolError, RelayError};
use crate::net::{Channel, TransportKind};

// ─── Request assembly ────────────────────────────────────────────────────────

/// Per-channel request assembly state.
#[derive(Debug, Default)]
pub struct RequestReader {
    buf: [u8; RETX_HEADER_SIZE],
    filled: usize,
}

impl RequestReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of a partial request held from earlier reads.
    pub fn pending(&self) -> usize {
        self.filled
    }

    /// Read from `chan` once. Returns a request when one is complete, `None`
    /// when more bytes are needed or the read would block.
    pub fn read_from<C: Channel>(
        &mut self,
        chan: &C,
        name: &str,
    ) -> Result<Option<(RetxRequest, Option<SocketAddr>)>, RelayError> {
        let (n, peer) = match chan.recv_from(&mut self.buf[self.filled..]) {
            Ok(r) => r,
            Err(e) if is_transient_read(&e) => return Ok(None),
            Err(source) => {
                return Err(RelayError::Read {
                    channel: name.to_string(),
                    source,
                })
            }
        };

        match chan.kind() {
            TransportKind::Stream => {
                if n == 0 {
                    return Err(RelayError::Closed {
                        channel: name.to_string(),
                    });
                }
                self.filled += n;
                if self.filled < RETX_HEADER_SIZE {
                    return Ok(None);
                }
            }
            TransportKind::Datagram => {
                if n == 0 {
                    return Ok(None);
                }
                if n < RETX_HEADER_SIZE {
                    self.filled = 0;
                    return Err(RelayError::Protocol {
                        channel: name.to_string(),
                        source: ProtocolError::ShortDatagram {
                            len: n,
                            expected: RETX_HEADER_SIZE,
                        },
                    });
                }
            }
        }

        self.filled = 0;
        let request = RetxRequest::decode(&self.buf).ok_or_else(|| RelayError::Protocol {
            channel: name.to_string(),
            source: ProtocolError::InvalidRequest,
        })?;
        debug!(
            channel = name,
            seqnum = request.seqnum,
            count = request.count,
            "retx request"
        );
        Ok(Some((request, peer)))
    }
}

// ─── Serving ─────────────────────────────────────────────────────────────────

/// What a request produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetxOutcome {
    pub request: RetxRequest,
    /// Whether the first sequence number was still retained.
    pub found: bool,
    /// Blocks handed to the sink.
    pub sent: usize,
}

impl RetxOutcome {
    /// Packets asked for but not available.
    pub fn shortfall(&self) -> usize {
        usize::from(self.request.count).saturating_sub(self.sent)
    }
}

/// Replay up to `request.count` blocks from the retained run starting at
/// `request.seqnum`, oldest first. A miss or a short run is a warning; only
/// the sink can fail.
pub fn serve<F>(
    request: RetxRequest,
    buffer: &RetxBuffer,
    mut sink: F,
) -> Result<RetxOutcome, RelayError>
where
    F: FnMut(&Block) -> Result<(), RelayError>,
{
    let Some(position) = buffer.lookup(request.seqnum) else {
        warn!(
            seqnum = request.seqnum,
            count = request.count,
            "unable to find packet for retx"
        );
        return Ok(RetxOutcome {
            request,
            found: false,
            sent: 0,
        });
    };

    let mut sent = 0;
    for block in buffer.resend_run(position, usize::from(request.count)) {
        sink(block)?;
        sent += 1;
    }

    let outcome = RetxOutcome {
        request,
        found: true,
        sent,
    };
    if outcome.shortfall() > 0 {
        warn!(
            seqnum = request.seqnum,
            missing = outcome.shortfall(),
            "couldn't find all packets for retx"
        );
    }
    Ok(outcome)
}
