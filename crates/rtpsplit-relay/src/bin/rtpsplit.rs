//! rtpsplit: fan one RTP feed out over weighted links, with retransmission.
//!
//! ```text
//! rtpsplit [options] <input> <output>[,weight]...
//! rtpsplit -U -x 800 -X @:7000 @239.1.1.1:5000 10.0.0.1:6000,3 10.0.1.1:6000
//! ```

use std::net::Ipv4Addr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rtpsplit_relay::config::RelayConfigInput;
use rtpsplit_relay::runtime::{set_realtime_priority, Relay};
use rtpsplit_transport::clock::TickClock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Weighted RTP fan-out with a windowed retransmission service.
#[derive(Parser, Debug)]
#[command(name = "rtpsplit", version, about)]
struct Cli {
    /// Real-time (SCHED_RR) priority.
    #[arg(short = 'i', long)]
    priority: Option<i32>,

    /// Tag attached to every log line.
    #[arg(short = 'l', long)]
    log_tag: Option<String>,

    /// Outbound TTL; 0 keeps the system default.
    #[arg(short = 't', long)]
    ttl: Option<u32>,

    /// Rewrite RTP timestamps of passthrough packets.
    #[arg(short = 'w', long)]
    overwrite_timestamps: bool,

    /// Overwrite the SSRC with this address.
    #[arg(short = 'o', long, value_name = "IPV4")]
    ssrc: Option<Ipv4Addr>,

    /// Input is bare payload; prepend an RTP header.
    #[arg(short = 'U', long)]
    wrap: bool,

    /// Retransmission window in milliseconds [default: 500].
    #[arg(short = 'x', long, value_name = "MS")]
    retx_buffer: Option<u64>,

    /// Dedicated retransmission service address.
    #[arg(short = 'X', long, value_name = "ADDR")]
    retx: Option<String>,

    /// Payload bytes per packet [default: 1316].
    #[arg(short = 'm', long)]
    payload_size: Option<usize>,

    /// RTP header size of passthrough input [default: 12].
    #[arg(short = 'R', long, value_name = "SIZE")]
    rtp_header: Option<usize>,

    /// First sequence number in wrap mode [default: 0].
    #[arg(short = 's', long)]
    seqnum: Option<u16>,

    /// TOML config file; flags override its values.
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Ingress address.
    input: Option<String>,

    /// Output addresses, `address[,weight]`.
    #[arg(value_name = "OUTPUT")]
    outputs: Vec<String>,
}

impl Cli {
    fn to_input(&self) -> RelayConfigInput {
        RelayConfigInput {
            priority: self.priority,
            log_tag: self.log_tag.clone(),
            ttl: self.ttl,
            overwrite_timestamps: self.overwrite_timestamps.then_some(true),
            ssrc: self.ssrc,
            wrap: self.wrap.then_some(true),
            retx_buffer_ms: self.retx_buffer,
            retx: self.retx.clone(),
            payload_size: self.payload_size,
            rtp_header_size: self.rtp_header,
            seqnum: self.seqnum,
            input: self.input.clone(),
            outputs: self.outputs.clone(),
        }
    }

    fn config_input(&self) -> anyhow::Result<RelayConfigInput> {
        let file = match &self.config {
            Some(path) => RelayConfigInput::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => RelayConfigInput::default(),
        };
        Ok(file.overlay(self.to_input()))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = cli
        .config_input()?
        .resolve()
        .context("invalid configuration")?;

    let span = tracing::info_span!("rtpsplit", tag = config.log_tag.as_deref());
    let _guard = span.enter();

    if let Some(priority) = config.priority {
        if let Err(e) = set_realtime_priority(priority) {
            warn!(priority, error = %e, "couldn't set real-time priority");
        }
    }

    let mut relay = Relay::open(&config)?;
    info!(
        input = %config.input,
        outputs = config.outputs.len(),
        active = relay.scheduler().active(),
        total_weight = relay.scheduler().total_weight(),
        retx = config.retx.as_ref().map_or("outputs", |r| r.raw.as_str()),
        window_ms = config.retx_window / rtpsplit_transport::clock::TICKS_PER_MS,
        "relay started"
    );

    let clock = TickClock::new();
    match relay.run(&clock) {
        Ok(never) => match never {},
        Err(e) => {
            error!(error = %e, "relay stopped");
            Err(e.into())
        }
    }
}
