//! # Transport Endpoints
//!
//! Opens one non-blocking socket per [`AddressSpec`] with `socket2`, then
//! hands it back as a std socket behind the [`Channel`] trait so the relay
//! never touches socket options after startup.

use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info};

use super::address::{AddressSpec, Role, TransportKind};

/// Receive buffer requested on every datagram socket.
pub const RECV_BUFFER_SIZE: usize = 512 * 1024;

/// A byte channel the relay reads from and writes to.
///
/// Implemented by [`Endpoint`] for real sockets; tests substitute in-memory
/// channels.
pub trait Channel: AsRawFd {
    fn kind(&self) -> TransportKind;

    /// Read what is available. The peer address is only known for datagram
    /// channels.
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)>;

    /// Write to the connected peer.
    fn send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Write to `peer`. Stream channels ignore the address.
    fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<usize>;
}

/// An opened socket.
#[derive(Debug)]
pub enum Endpoint {
    Datagram(UdpSocket),
    Stream(TcpStream),
}

impl Endpoint {
    /// Open the socket described by `spec`. `default_ttl` applies when the
    /// descriptor carries no `ttl=` option; 0 keeps the system default.
    pub fn open(spec: &AddressSpec, role: Role, default_ttl: u32) -> io::Result<Self> {
        let endpoint = match spec.kind {
            TransportKind::Datagram => Endpoint::Datagram(open_datagram(spec, default_ttl)?),
            TransportKind::Stream => Endpoint::Stream(open_stream(spec, role)?),
        };
        debug!(
            role = role.as_str(),
            addr = %spec,
            kind = %spec.kind,
            local = ?endpoint.local_addr().ok(),
            "endpoint opened"
        );
        Ok(endpoint)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Endpoint::Datagram(s) => s.local_addr(),
            Endpoint::Stream(s) => s.local_addr(),
        }
    }
}

impl AsRawFd for Endpoint {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Endpoint::Datagram(s) => s.as_raw_fd(),
            Endpoint::Stream(s) => s.as_raw_fd(),
        }
    }
}

impl Channel for Endpoint {
    fn kind(&self) -> TransportKind {
        match self {
            Endpoint::Datagram(_) => TransportKind::Datagram,
            Endpoint::Stream(_) => TransportKind::Stream,
        }
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
        match self {
            Endpoint::Datagram(s) => s.recv_from(buf).map(|(n, peer)| (n, Some(peer))),
            Endpoint::Stream(s) => (&*s).read(buf).map(|n| (n, None)),
        }
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Endpoint::Datagram(s) => s.send(buf),
            Endpoint::Stream(s) => (&*s).write(buf),
        }
    }

    fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<usize> {
        match self {
            Endpoint::Datagram(s) => s.send_to(buf, peer),
            Endpoint::Stream(s) => (&*s).write(buf),
        }
    }
}

fn domain_for(addr: &SocketAddr) -> Domain {
    if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    }
}

fn open_datagram(spec: &AddressSpec, default_ttl: u32) -> io::Result<UdpSocket> {
    let socket = Socket::new(domain_for(&spec.bind), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_recv_buffer_size(RECV_BUFFER_SIZE)?;
    socket.bind(&SockAddr::from(spec.bind))?;

    if spec.is_multicast_listener() {
        join_group(&socket, spec)?;
    } else if let Some(peer) = spec.connect {
        socket.connect(&SockAddr::from(peer))?;
    }

    let ttl = spec.ttl.unwrap_or(default_ttl);
    if let Some(peer) = spec.connect {
        if peer.ip().is_multicast() {
            match peer.ip() {
                IpAddr::V4(_) => {
                    if ttl > 0 {
                        socket.set_multicast_ttl_v4(ttl)?;
                    }
                    if let Some(ifaddr) = spec.ifaddr {
                        socket.set_multicast_if_v4(&ifaddr)?;
                    }
                }
                IpAddr::V6(_) => {
                    if ttl > 0 {
                        socket.set_multicast_hops_v6(ttl)?;
                    }
                    if let Some(ifindex) = spec.ifindex {
                        socket.set_multicast_if_v6(ifindex)?;
                    }
                }
            }
        } else if ttl > 0 {
            if peer.is_ipv4() {
                socket.set_ttl(ttl)?;
            } else {
                socket.set_unicast_hops_v6(ttl)?;
            }
        }
    }

    if let Some(tos) = spec.tos {
        if spec.bind.is_ipv4() {
            socket.set_tos(tos)?;
        } else {
            socket.set_tclass_v6(tos)?;
        }
    }

    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Join the bind group. A connect address on a multicast listener names the
/// source of a source-specific join; the socket stays unconnected so the
/// group traffic is not filtered by peer address.
fn join_group(socket: &Socket, spec: &AddressSpec) -> io::Result<()> {
    match spec.bind.ip() {
        IpAddr::V4(group) => {
            let source = spec.connect.and_then(|c| match c.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            });
            let interface = spec.ifaddr.unwrap_or(std::net::Ipv4Addr::UNSPECIFIED);
            match (source, spec.ifindex) {
                (Some(source), _) => socket.join_ssm_v4(&source, &group, &interface)?,
                (None, Some(index)) if spec.ifaddr.is_none() => socket.join_multicast_v4_n(
                    &group,
                    &socket2::InterfaceIndexOrAddress::Index(index),
                )?,
                (None, _) => socket.join_multicast_v4(&group, &interface)?,
            }
            info!(%group, source = ?source, "joined multicast group");
        }
        IpAddr::V6(group) => {
            socket.join_multicast_v6(&group, spec.ifindex.unwrap_or(0))?;
            info!(%group, "joined multicast group");
        }
    }
    Ok(())
}

fn open_stream(spec: &AddressSpec, role: Role) -> io::Result<TcpStream> {
    let domain = domain_for(&spec.bind);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;

    let stream = match spec.connect {
        Some(peer) => {
            if spec.bind.port() != 0 || !spec.bind.ip().is_unspecified() {
                socket.bind(&SockAddr::from(spec.bind))?;
            }
            socket.connect(&SockAddr::from(peer))?;
            TcpStream::from(socket)
        }
        None => {
            socket.bind(&SockAddr::from(spec.bind))?;
            socket.listen(1)?;
            info!(role = role.as_str(), addr = %spec.bind, "waiting for stream peer");
            let (peer, from) = socket.accept()?;
            info!(
                role = role.as_str(),
                peer = ?from.as_socket(),
                "stream peer connected"
            );
            TcpStream::from(peer)
        }
    };

    if let Some(tos) = spec.tos {
        let sock = socket2::SockRef::from(&stream);
        if spec.bind.is_ipv4() {
            sock.set_tos(tos)?;
        } else {
            sock.set_tclass_v6(tos)?;
        }
    }
    stream.set_nodelay(true)?;
    stream.set_nonblocking(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_loopback_pair() {
        let rx_spec = AddressSpec::parse("@127.0.0.1:0", Role::Input).unwrap();
        let rx = Endpoint::open(&rx_spec, Role::Input, 0).unwrap();
        let port = rx.local_addr().unwrap().port();
        assert_ne!(port, 0);

        let tx_spec = AddressSpec::parse(&format!("127.0.0.1:{port}"), Role::Output).unwrap();
        let tx = Endpoint::open(&tx_spec, Role::Output, 0).unwrap();
        assert_eq!(tx.kind(), TransportKind::Datagram);
        assert_eq!(tx.send(b"hello").unwrap(), 5);

        let mut buf = [0u8; 16];
        let mut got = None;
        for _ in 0..200 {
            match rx.recv_from(&mut buf) {
                Ok((n, peer)) => {
                    got = Some((n, peer));
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(5))
                }
                Err(e) => panic!("recv failed: {e}"),
            }
        }
        let (n, peer) = got.expect("datagram never arrived");
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(
            peer.map(|p| p.port()),
            tx.local_addr().ok().map(|a| a.port())
        );
    }

    #[test]
    fn nonblocking_read_would_block() {
        let spec = AddressSpec::parse("@127.0.0.1:0", Role::Retx).unwrap();
        let ep = Endpoint::open(&spec, Role::Retx, 0).unwrap();
        let err = ep.recv_from(&mut [0u8; 8]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn stream_connect_to_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let spec = AddressSpec::parse(&format!("127.0.0.1:{port}/tcp"), Role::Output).unwrap();
        let ep = Endpoint::open(&spec, Role::Output, 0).unwrap();
        assert_eq!(ep.kind(), TransportKind::Stream);

        let (mut peer, _) = listener.accept().unwrap();
        ep.send(b"abc").unwrap();
        let mut buf = [0u8; 3];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }
}
