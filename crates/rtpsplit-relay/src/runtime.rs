//! # Relay Event Loop
//!
//! One thread, one `poll(2)` set: the ingress channel plus every channel that
//! may carry retransmission requests. Ingress blocks are framed, dispatched
//! to the output picked by the scheduler, then retained for replay. Requests
//! are served from the retained blocks, either through a dedicated reply
//! channel or through the output rotation.
//!
//! [`Relay`] is generic over [`Channel`] so the handlers can be driven with
//! in-memory channels; [`Relay::open`] builds one over real sockets.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::AsRawFd;

use rtpsplit_transport::clock::{Tick, TickClock};
use rtpsplit_transport::pool::{Block, RetxBuffer};
use tracing::{debug, trace, warn};

use crate::arq::{serve, RequestReader, RetxOutcome};
use crate::config::{Framing, RelayConfig};
use crate::error::{is_fatal_write, is_transient_read, RelayError};
use crate::framer::RtpFramer;
use crate::net::{AddressSpec, Channel, Endpoint, Role, TransportKind};
use crate::scheduler::OutputScheduler;

#[cfg(any(target_os = "linux", target_os = "android"))]
const POLLRDHUP: libc::c_short = libc::POLLRDHUP;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const POLLRDHUP: libc::c_short = 0;

const INGRESS_HANGUP: libc::c_short = libc::POLLERR | libc::POLLHUP | POLLRDHUP;

/// Counters kept by the relay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub packets_in: u64,
    pub bytes_in: u64,
    pub runts_dropped: u64,
    pub send_errors: u64,
    pub retx_requests: u64,
    pub retx_misses: u64,
    pub retx_sent: u64,
}

/// Where replayed blocks go.
enum ReplyPath<C> {
    /// A dedicated service channel; datagram replies go back to the requester.
    Dedicated(C),
    /// Through the output scheduler, requests are read from the outputs.
    Rotation,
}

pub struct Relay<C: Channel> {
    ingress: C,
    slot: Block,
    block_size: usize,
    header_reserve: usize,
    outputs: Vec<C>,
    output_names: Vec<String>,
    scheduler: OutputScheduler,
    framer: RtpFramer,
    retx: RetxBuffer,
    reply: ReplyPath<C>,
    readers: Vec<RequestReader>,
    stats: RelayStats,
}

impl Relay<Endpoint> {
    /// Open every socket named by `config`. Stream listeners block here until
    /// their peer connects.
    pub fn open(config: &RelayConfig) -> Result<Self, RelayError> {
        let open = |spec: &AddressSpec, role: Role| {
            Endpoint::open(spec, role, config.ttl).map_err(|source| RelayError::Endpoint {
                role: role.as_str(),
                addr: spec.raw.clone(),
                source,
            })
        };
        let ingress = open(&config.input, Role::Input)?;
        let outputs = config
            .outputs
            .iter()
            .map(|o| open(o, Role::Output))
            .collect::<Result<Vec<_>, _>>()?;
        let reply = config
            .retx
            .as_ref()
            .map(|r| open(r, Role::Retx))
            .transpose()?;
        Ok(Relay::new(config, ingress, outputs, reply))
    }
}

impl<C: Channel> Relay<C> {
    /// `outputs` must be in the order of `config.outputs`. Without `reply`,
    /// requests are read from the outputs themselves.
    pub fn new(config: &RelayConfig, ingress: C, outputs: Vec<C>, reply: Option<C>) -> Self {
        let framer = match config.framing {
            Framing::Wrap { first_seqnum } => RtpFramer::wrap(first_seqnum, config.ssrc),
            Framing::Passthrough { .. } => {
                RtpFramer::passthrough(config.ssrc, config.overwrite_timestamps)
            }
        };
        let header_reserve = framer.reserved_header();
        let block_size = config.wanted_size();

        let (reply, channels) = match reply {
            Some(chan) => (ReplyPath::Dedicated(chan), 1),
            None => (ReplyPath::Rotation, outputs.len()),
        };

        let output_names = (0..outputs.len()).map(|i| format!("output #{i}")).collect();
        let mut relay = Relay {
            ingress,
            slot: Block::with_capacity(0),
            block_size,
            header_reserve,
            outputs,
            output_names,
            scheduler: OutputScheduler::new(&config.weights()),
            framer,
            retx: RetxBuffer::new(config.retx_window),
            reply,
            readers: (0..channels).map(|_| RequestReader::new()).collect(),
            stats: RelayStats::default(),
        };
        relay.slot = relay.fresh_block();
        relay
    }

    fn fresh_block(&self) -> Block {
        let mut block = Block::with_capacity(self.block_size);
        block.reserve_header(self.header_reserve);
        block
    }

    // ─── Ingress ─────────────────────────────────────────────────────────────

    /// Handle ingress readiness. Returns the output a completed block was
    /// sent to, `None` while a block is still being assembled or when the
    /// read had nothing to deliver.
    pub fn on_ingress(&mut self, now: Tick) -> Result<Option<usize>, RelayError> {
        let n = match self.ingress.recv_from(self.slot.spare_mut()) {
            Ok((n, _)) => n,
            Err(e) if is_transient_read(&e) => return Ok(None),
            Err(source) => {
                return Err(RelayError::Read {
                    channel: "input".into(),
                    source,
                })
            }
        };

        match self.ingress.kind() {
            TransportKind::Stream => {
                if n == 0 {
                    return Err(RelayError::Closed {
                        channel: "input".into(),
                    });
                }
                self.slot.advance(n);
                if !self.slot.is_full() {
                    return Ok(None);
                }
            }
            TransportKind::Datagram => {
                if n == 0 {
                    return Ok(None);
                }
                self.slot.advance(n);
            }
        }

        let fresh = self.fresh_block();
        let mut block = std::mem::replace(&mut self.slot, fresh);
        self.stats.packets_in += 1;
        self.stats.bytes_in += block.len() as u64;
        if !self.framer.frame(&mut block, now) {
            self.stats.runts_dropped += 1;
            return Ok(None);
        }

        let index = self.scheduler.select();
        let delivered = transmit(
            &self.outputs[index],
            &self.output_names[index],
            block.as_slice(),
            None,
        )?;
        if !delivered {
            self.stats.send_errors += 1;
        }
        self.scheduler.charge(index, block.len());
        trace!(output = index, len = block.len(), seqnum = ?block.seqnum(), "dispatched");

        self.retx.admit(block, now);
        self.retx.purge(now);
        Ok(Some(index))
    }

    // ─── Retransmission ──────────────────────────────────────────────────────

    /// Handle readiness on request channel `channel`: the dedicated channel
    /// is 0, otherwise channels are the outputs in order.
    pub fn on_retx(&mut self, channel: usize) -> Result<Option<RetxOutcome>, RelayError> {
        let Some(reader) = self.readers.get_mut(channel) else {
            return Ok(None);
        };
        let read = match &self.reply {
            ReplyPath::Dedicated(chan) => reader.read_from(chan, "retx")?,
            ReplyPath::Rotation => {
                reader.read_from(&self.outputs[channel], &self.output_names[channel])?
            }
        };
        let Some((request, peer)) = read else {
            return Ok(None);
        };
        self.stats.retx_requests += 1;

        let reply = &self.reply;
        let outputs = &self.outputs;
        let names = &self.output_names;
        let scheduler = &mut self.scheduler;
        let stats = &mut self.stats;
        let outcome = serve(request, &self.retx, |block| {
            let delivered = match reply {
                ReplyPath::Dedicated(chan) => transmit(chan, "retx", block.as_slice(), peer)?,
                ReplyPath::Rotation => {
                    let index = scheduler.select();
                    let delivered =
                        transmit(&outputs[index], &names[index], block.as_slice(), None)?;
                    scheduler.charge(index, block.len());
                    delivered
                }
            };
            if !delivered {
                stats.send_errors += 1;
            }
            Ok(())
        })?;

        if outcome.found {
            self.stats.retx_sent += outcome.sent as u64;
        } else {
            self.stats.retx_misses += 1;
        }
        debug!(
            seqnum = request.seqnum,
            count = request.count,
            sent = outcome.sent,
            retained = self.retx.len(),
            "retx served"
        );
        Ok(Some(outcome))
    }

    // ─── Event loop ──────────────────────────────────────────────────────────

    /// Run until a fatal condition.
    pub fn run(&mut self, clock: &TickClock) -> Result<Infallible, RelayError> {
        let mut fds = Vec::with_capacity(1 + self.readers.len());
        fds.push(libc::pollfd {
            fd: self.ingress.as_raw_fd(),
            events: libc::POLLIN | INGRESS_HANGUP,
            revents: 0,
        });
        for i in 0..self.readers.len() {
            let fd = match &self.reply {
                ReplyPath::Dedicated(chan) => chan.as_raw_fd(),
                ReplyPath::Rotation => self.outputs[i].as_raw_fd(),
            };
            fds.push(libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            });
        }

        loop {
            for pfd in fds.iter_mut() {
                pfd.revents = 0;
            }
            // SAFETY: `fds` is a live, correctly sized array of pollfd.
            let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(RelayError::Poll(err));
            }

            let now = clock.now();
            let ingress = fds[0].revents;
            if ingress & libc::POLLIN != 0 {
                self.on_ingress(now)?;
            } else if ingress & INGRESS_HANGUP != 0 {
                return Err(RelayError::IngressHangup);
            }

            for (i, pfd) in fds[1..].iter().enumerate() {
                if pfd.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0 {
                    self.on_retx(i)?;
                }
            }
        }
    }

    // ─── Accessors ───────────────────────────────────────────────────────────

    pub fn ingress(&self) -> &C {
        &self.ingress
    }

    pub fn output(&self, index: usize) -> Option<&C> {
        self.outputs.get(index)
    }

    pub fn outputs(&self) -> &[C] {
        &self.outputs
    }

    /// The dedicated retransmission channel, if any.
    pub fn reply_channel(&self) -> Option<&C> {
        match &self.reply {
            ReplyPath::Dedicated(chan) => Some(chan),
            ReplyPath::Rotation => None,
        }
    }

    /// Number of channels read for retransmission requests.
    pub fn request_channels(&self) -> usize {
        self.readers.len()
    }

    pub fn retx_buffer(&self) -> &RetxBuffer {
        &self.retx
    }

    pub fn scheduler(&self) -> &OutputScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }
}

/// Write one block. `Ok(false)` when the write failed but the channel may
/// recover; dead channels are an error.
fn transmit<C: Channel>(
    chan: &C,
    name: &str,
    data: &[u8],
    peer: Option<SocketAddr>,
) -> Result<bool, RelayError> {
    let result = match peer {
        Some(peer) => chan.send_to(data, peer),
        None => chan.send(data),
    };
    match result {
        Ok(n) if n < data.len() => {
            warn!(channel = name, written = n, len = data.len(), "short write");
            Ok(true)
        }
        Ok(_) => Ok(true),
        Err(source) if is_fatal_write(&source) => Err(RelayError::Write {
            channel: name.to_string(),
            source,
        }),
        Err(e) => {
            warn!(channel = name, error = %e, "write error");
            Ok(false)
        }
    }
}

/// Request SCHED_RR at `priority` for the calling thread.
pub fn set_realtime_priority(priority: i32) -> io::Result<()> {
    // SAFETY: sched_param is plain data; zeroed is a valid value on every libc.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = priority;
    // SAFETY: `param` outlives the call and pthread_self is always valid.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}
