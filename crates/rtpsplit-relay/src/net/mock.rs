use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use super::{Channel, TransportKind};

enum Incoming {
    Data(Vec<u8>, Option<SocketAddr>),
    Error(io::ErrorKind),
}

struct Inner {
    kind: TransportKind,
    inbox: Mutex<VecDeque<Incoming>>,
    sent: Mutex<Vec<(Vec<u8>, Option<SocketAddr>)>>,
    send_error: Mutex<Option<i32>>,
}

/// In-memory channel. Clones share state, so a test keeps one handle while
/// the relay owns another.
#[derive(Clone)]
pub(crate) struct MockChannel {
    inner: Arc<Inner>,
}

impl MockChannel {
    pub fn new(kind: TransportKind) -> Self {
        MockChannel {
            inner: Arc::new(Inner {
                kind,
                inbox: Mutex::new(VecDeque::new()),
                sent: Mutex::new(Vec::new()),
                send_error: Mutex::new(None),
            }),
        }
    }

    pub fn datagram() -> Self {
        Self::new(TransportKind::Datagram)
    }

    pub fn stream() -> Self {
        Self::new(TransportKind::Stream)
    }

    /// Queue bytes for the next read.
    pub fn push(&self, data: &[u8]) {
        self.push_from(data, None);
    }

    pub fn push_from(&self, data: &[u8], peer: Option<SocketAddr>) {
        self.inner
            .inbox
            .lock()
            .unwrap()
            .push_back(Incoming::Data(data.to_vec(), peer));
    }

    /// Queue a read error.
    pub fn push_error(&self, kind: io::ErrorKind) {
        self.inner
            .inbox
            .lock()
            .unwrap()
            .push_back(Incoming::Error(kind));
    }

    /// Make every following send fail with `errno`.
    pub fn fail_sends(&self, errno: i32) {
        *self.inner.send_error.lock().unwrap() = Some(errno);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.inner
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(d, _)| d.clone())
            .collect()
    }

    pub fn sent_with_peers(&self) -> Vec<(Vec<u8>, Option<SocketAddr>)> {
        self.inner.sent.lock().unwrap().clone()
    }

    fn record(&self, buf: &[u8], peer: Option<SocketAddr>) -> io::Result<usize> {
        if let Some(errno) = *self.inner.send_error.lock().unwrap() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        self.inner.sent.lock().unwrap().push((buf.to_vec(), peer));
        Ok(buf.len())
    }
}

impl AsRawFd for MockChannel {
    fn as_raw_fd(&self) -> RawFd {
        -1
    }
}

impl Channel for MockChannel {
    fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
        let mut inbox = self.inner.inbox.lock().unwrap();
        match inbox.pop_front() {
            None => Err(io::ErrorKind::WouldBlock.into()),
            Some(Incoming::Error(kind)) => Err(kind.into()),
            Some(Incoming::Data(data, peer)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                // Streams keep the unread tail; datagrams truncate.
                if n < data.len() && self.inner.kind == TransportKind::Stream {
                    inbox.push_front(Incoming::Data(data[n..].to_vec(), peer));
                }
                Ok((n, peer))
            }
        }
    }

    fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.record(buf, None)
    }

    fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<usize> {
        self.record(buf, Some(peer))
    }
}
