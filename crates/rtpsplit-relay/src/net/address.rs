//! Address descriptor parsing.
//!
//! ```text
//! [<connect addr>[:<connect port>]][@[<bind addr>][:<bind port>]][/<option>...][,<weight>]
//! ```
//!
//! Options: `tcp`, `ttl=N`, `tos=N`, `ifindex=N`, `ifaddr=A`. IPv6 literals go
//! in brackets (`[ff02::1]:5000`). A missing port takes the role's default.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use crate::error::ConfigError;

/// Port used when the descriptor leaves the role's main port out.
pub const DEFAULT_PORT: u16 = 1234;

/// Stream (TCP) or datagram (UDP) transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Datagram,
    Stream,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Datagram => "udp",
            TransportKind::Stream => "tcp",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a descriptor is used for; decides which port defaults to
/// [`DEFAULT_PORT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Ingress: bind port defaults to 1234.
    Input,
    /// Outbound link: connect port defaults to 1234.
    Output,
    /// Dedicated retransmission service: no default port.
    Retx,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Input => "input",
            Role::Output => "output",
            Role::Retx => "retx",
        }
    }

    fn default_ports(&self) -> (u16, u16) {
        // (connect, bind)
        match self {
            Role::Input => (0, DEFAULT_PORT),
            Role::Output => (DEFAULT_PORT, 0),
            Role::Retx => (0, 0),
        }
    }
}

/// A parsed address descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpec {
    /// The descriptor as given, for diagnostics.
    pub raw: String,
    /// Peer to connect to. `None` when absent or the unspecified address.
    pub connect: Option<SocketAddr>,
    /// Local address to bind. Always set: unspecified with the default bind
    /// port when the descriptor has no `@` part.
    pub bind: SocketAddr,
    pub kind: TransportKind,
    /// Scheduling weight; 1 when not given.
    pub weight: u32,
    pub ttl: Option<u32>,
    pub tos: Option<u32>,
    pub ifindex: Option<u32>,
    pub ifaddr: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Copy)]
struct HostPart {
    ip: Option<IpAddr>,
    port: u16,
}

impl AddressSpec {
    pub fn parse(raw: &str, role: Role) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::Address {
            addr: raw.to_string(),
            reason,
        };

        let mut rest = raw.trim();
        let mut weight = 1;
        if let Some((head, w)) = rest.rsplit_once(',') {
            weight = w
                .trim()
                .parse()
                .map_err(|_| invalid(format!("invalid weight '{w}'")))?;
            rest = head;
        }

        let mut spec = AddressSpec {
            raw: raw.to_string(),
            connect: None,
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            kind: TransportKind::Datagram,
            weight,
            ttl: None,
            tos: None,
            ifindex: None,
            ifaddr: None,
        };

        if let Some((head, options)) = rest.split_once('/') {
            for option in options.split('/').filter(|o| !o.is_empty()) {
                spec.apply_option(option).map_err(invalid)?;
            }
            rest = head;
        }

        let (default_connect, default_bind) = role.default_ports();
        let (connect_part, bind_part) = match rest.rsplit_once('@') {
            Some((c, b)) => (c, Some(b)),
            None => (rest, None),
        };
        if connect_part.is_empty() && bind_part.is_none() {
            return Err(invalid("no connect or bind address".into()));
        }

        let connect = if connect_part.is_empty() {
            None
        } else {
            Some(parse_host(connect_part, default_connect).map_err(invalid)?)
        };
        let bind = match bind_part {
            Some(b) => parse_host(b, default_bind).map_err(invalid)?,
            None => HostPart {
                ip: None,
                port: default_bind,
            },
        };

        // The unspecified bind address follows the family of the peer.
        let v6 = matches!(connect.and_then(|c| c.ip), Some(IpAddr::V6(_)))
            || matches!(bind.ip, Some(IpAddr::V6(_)));
        let unspecified = if v6 {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };

        spec.bind = SocketAddr::new(bind.ip.unwrap_or(unspecified), bind.port);
        spec.connect = connect.and_then(|c| match c.ip {
            Some(ip) if !ip.is_unspecified() => Some(SocketAddr::new(ip, c.port)),
            _ => None,
        });

        if let Some(connect) = spec.connect {
            if connect.is_ipv6() != spec.bind.is_ipv6() {
                return Err(invalid("connect and bind address families differ".into()));
            }
        }

        Ok(spec)
    }

    fn apply_option(&mut self, option: &str) -> Result<(), String> {
        let (key, value) = match option.split_once('=') {
            Some((k, v)) => (k.to_ascii_lowercase(), Some(v)),
            None => (option.to_ascii_lowercase(), None),
        };
        let number = |v: Option<&str>| -> Result<u32, String> {
            v.and_then(|v| v.parse().ok())
                .ok_or_else(|| format!("option '{option}' needs a numeric value"))
        };
        match key.as_str() {
            "tcp" => self.kind = TransportKind::Stream,
            "udp" => self.kind = TransportKind::Datagram,
            "ttl" => self.ttl = Some(number(value)?),
            "tos" => self.tos = Some(number(value)?),
            "ifindex" => self.ifindex = Some(number(value)?),
            "ifaddr" => {
                self.ifaddr = Some(
                    value
                        .and_then(|v| v.parse().ok())
                        .ok_or_else(|| format!("option '{option}' needs an IPv4 address"))?,
                )
            }
            _ => tracing::warn!(option, "unrecognized option"),
        }
        Ok(())
    }

    /// Whether the bind address is a multicast group to join.
    pub fn is_multicast_listener(&self) -> bool {
        self.bind.ip().is_multicast()
    }
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse `host[:port]`, `[v6][:port]`, bare IPv6, or `:port`. Host names are
/// resolved, keeping the first address.
fn parse_host(s: &str, default_port: u16) -> Result<HostPart, String> {
    let (host, port) = if let Some(inner) = s.strip_prefix('[') {
        let (host, tail) = inner
            .split_once(']')
            .ok_or_else(|| format!("unterminated '[' in '{s}'"))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => Some(p),
            None if tail.is_empty() => None,
            None => return Err(format!("unexpected '{tail}' after ']'")),
        };
        (host, port)
    } else if s.matches(':').count() > 1 {
        (s, None)
    } else {
        match s.split_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (s, None),
        }
    };

    let port = match port {
        Some(p) => p.parse().map_err(|_| format!("invalid port '{p}'"))?,
        None => default_port,
    };

    if host.is_empty() {
        return Ok(HostPart { ip: None, port });
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(HostPart { ip: Some(ip), port });
    }
    let ip = (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("cannot resolve '{host}': {e}"))?
        .next()
        .map(|a| a.ip())
        .ok_or_else(|| format!("'{host}' has no address"))?;
    Ok(HostPart { ip: Some(ip), port })
}
