//! # rtpsplit Wire Formats
//!
//! Only a subset of the RTP fixed header is ever read or written: version,
//! marker bit, payload type, sequence number, timestamp and SSRC. Everything
//! else in the packet (CSRC list, extensions, payload) is opaque bytes.
//!
//! ## RTP fixed header (RFC 3550 §5.1)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! ## Retransmission request (8 bytes)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|0 0 0 0 0 0|   PT = 0x7E   |     first sequence number     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        packet count           |         reserved (0)          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{Buf, BufMut};
use std::fmt;

// ─── Constants ───────────────────────────────────────────────────────────────

/// RTP protocol version carried in the top two bits of the first byte.
pub const RTP_VERSION: u8 = 2;

/// Size of the RTP fixed header (no CSRC, no extension).
pub const RTP_HEADER_SIZE: usize = 12;

/// Static payload type for MPEG-2 transport stream (RFC 3551).
pub const RTP_TYPE_TS: u8 = 33;

/// Size of a retransmission request message.
pub const RETX_HEADER_SIZE: usize = 8;

/// Payload-type byte identifying a retransmission request.
pub const RETX_TYPE: u8 = 0x7E;

const MARKER_BIT: u8 = 0x80;

// ─── RTP Header ──────────────────────────────────────────────────────────────

/// In-place accessor over the first [`RTP_HEADER_SIZE`] bytes of a packet.
///
/// Construction fails when the buffer is too short to hold the fixed header,
/// so every accessor below is infallible.
pub struct RtpHeader<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> RtpHeader<B> {
    /// Wrap a packet buffer. Returns `None` if it is shorter than 12 bytes.
    pub fn new(buf: B) -> Option<Self> {
        if buf.as_ref().len() < RTP_HEADER_SIZE {
            return None;
        }
        Some(RtpHeader { buf })
    }

    fn bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    pub fn version(&self) -> u8 {
        self.bytes()[0] >> 6
    }

    /// True when the version bits announce RTP version 2.
    pub fn check(&self) -> bool {
        self.version() == RTP_VERSION
    }

    pub fn marker(&self) -> bool {
        self.bytes()[1] & MARKER_BIT != 0
    }

    pub fn payload_type(&self) -> u8 {
        self.bytes()[1] & !MARKER_BIT
    }

    pub fn seqnum(&self) -> u16 {
        (&self.bytes()[2..4]).get_u16()
    }

    pub fn timestamp(&self) -> u32 {
        (&self.bytes()[4..8]).get_u32()
    }

    pub fn ssrc(&self) -> [u8; 4] {
        let b = self.bytes();
        [b[8], b[9], b[10], b[11]]
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> RtpHeader<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut()
    }

    /// Write version 2 with no padding, extension or CSRC, and clear the
    /// marker bit.
    pub fn init(&mut self) {
        let b = self.bytes_mut();
        b[0] = RTP_VERSION << 6;
        b[1] = 0;
    }

    pub fn set_marker(&mut self) {
        self.bytes_mut()[1] |= MARKER_BIT;
    }

    /// Set the payload type, preserving the marker bit.
    pub fn set_payload_type(&mut self, pt: u8) {
        let b = self.bytes_mut();
        b[1] = (b[1] & MARKER_BIT) | (pt & !MARKER_BIT);
    }

    pub fn set_seqnum(&mut self, seqnum: u16) {
        (&mut self.bytes_mut()[2..4]).put_u16(seqnum);
    }

    pub fn set_timestamp(&mut self, timestamp: u32) {
        (&mut self.bytes_mut()[4..8]).put_u32(timestamp);
    }

    pub fn set_ssrc(&mut self, ssrc: [u8; 4]) {
        self.bytes_mut()[8..12].copy_from_slice(&ssrc);
    }
}

impl<B: AsRef<[u8]>> fmt::Debug for RtpHeader<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpHeader")
            .field("version", &self.version())
            .field("marker", &self.marker())
            .field("payload_type", &self.payload_type())
            .field("seqnum", &self.seqnum())
            .field("timestamp", &self.timestamp())
            .field("ssrc", &self.ssrc())
            .finish()
    }
}

/// Read the sequence number of a packet, if it holds a full fixed header.
pub fn rtp_seqnum(packet: &[u8]) -> Option<u16> {
    RtpHeader::new(packet).map(|hdr| hdr.seqnum())
}

// ─── Retransmission Request ──────────────────────────────────────────────────

/// A decoded retransmission request: resend `count` packets starting at
/// sequence number `seqnum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetxRequest {
    pub seqnum: u16,
    pub count: u16,
}

impl RetxRequest {
    pub fn new(seqnum: u16, count: u16) -> Self {
        RetxRequest { seqnum, count }
    }

    /// Encode into a fixed-size message.
    pub fn encode(&self) -> [u8; RETX_HEADER_SIZE] {
        let mut msg = [0u8; RETX_HEADER_SIZE];
        retx_init(&mut msg);
        retx_set_seqnum(&mut msg, self.seqnum);
        retx_set_count(&mut msg, self.count);
        msg
    }

    /// Decode a complete message. Returns `None` if the length is wrong or
    /// the validity check fails.
    pub fn decode(msg: &[u8]) -> Option<Self> {
        if msg.len() != RETX_HEADER_SIZE || !retx_check(msg) {
            return None;
        }
        Some(RetxRequest {
            seqnum: retx_get_seqnum(msg),
            count: retx_get_count(msg),
        })
    }
}

/// Write the marker bytes and zero the rest of the message.
pub fn retx_init(msg: &mut [u8; RETX_HEADER_SIZE]) {
    *msg = [0u8; RETX_HEADER_SIZE];
    msg[0] = RTP_VERSION << 6;
    msg[1] = RETX_TYPE;
}

/// Validity predicate: version 2, no flag bits, retransmission type byte.
pub fn retx_check(msg: &[u8]) -> bool {
    msg.len() >= RETX_HEADER_SIZE && msg[0] == RTP_VERSION << 6 && msg[1] == RETX_TYPE
}

pub fn retx_get_seqnum(msg: &[u8]) -> u16 {
    (&msg[2..4]).get_u16()
}

pub fn retx_set_seqnum(msg: &mut [u8], seqnum: u16) {
    (&mut msg[2..4]).put_u16(seqnum);
}

pub fn retx_get_count(msg: &[u8]) -> u16 {
    (&msg[4..6]).get_u16()
}

pub fn retx_set_count(msg: &mut [u8], count: u16) {
    (&mut msg[4..6]).put_u16(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> [u8; RTP_HEADER_SIZE] {
        [
            0x80, 33, 0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF, 10, 0, 0, 1,
        ]
    }

    #[test]
    fn header_too_short_rejected() {
        assert!(RtpHeader::new(&[0u8; 11][..]).is_none());
        assert!(RtpHeader::new(&[0u8; 12][..]).is_some());
    }

    #[test]
    fn header_field_accessors() {
        let raw = sample_header();
        let hdr = RtpHeader::new(&raw[..]).unwrap();
        assert!(hdr.check());
        assert!(!hdr.marker());
        assert_eq!(hdr.payload_type(), RTP_TYPE_TS);
        assert_eq!(hdr.seqnum(), 0x1234);
        assert_eq!(hdr.timestamp(), 0xDEAD_BEEF);
        assert_eq!(hdr.ssrc(), [10, 0, 0, 1]);
    }

    #[test]
    fn marker_preserves_payload_type() {
        let mut raw = sample_header();
        let mut hdr = RtpHeader::new(&mut raw[..]).unwrap();
        hdr.set_marker();
        assert!(hdr.marker());
        assert_eq!(hdr.payload_type(), RTP_TYPE_TS);

        hdr.set_payload_type(96);
        assert!(hdr.marker(), "set_payload_type must keep the marker bit");
        assert_eq!(hdr.payload_type(), 96);
    }

    #[test]
    fn setters_touch_only_their_field() {
        let mut raw = sample_header();
        {
            let mut hdr = RtpHeader::new(&mut raw[..]).unwrap();
            hdr.set_timestamp(7);
        }
        assert_eq!(&raw[..4], &sample_header()[..4]);
        assert_eq!(&raw[4..8], &[0, 0, 0, 7]);
        assert_eq!(&raw[8..], &sample_header()[8..]);

        let mut hdr = RtpHeader::new(&mut raw[..]).unwrap();
        hdr.set_ssrc([192, 168, 1, 2]);
        hdr.set_seqnum(0xFFFF);
        assert_eq!(hdr.ssrc(), [192, 168, 1, 2]);
        assert_eq!(hdr.seqnum(), 0xFFFF);
        assert_eq!(hdr.timestamp(), 7);
    }

    #[test]
    fn init_clears_marker_and_sets_version() {
        let mut raw = [0xFFu8; RTP_HEADER_SIZE];
        let mut hdr = RtpHeader::new(&mut raw[..]).unwrap();
        hdr.init();
        assert_eq!(hdr.version(), RTP_VERSION);
        assert!(!hdr.marker());
        assert_eq!(hdr.payload_type(), 0);
    }

    #[test]
    fn seqnum_of_runt_packet_is_none() {
        assert_eq!(rtp_seqnum(&[0x80, 33, 0, 1]), None);
        assert_eq!(rtp_seqnum(&sample_header()), Some(0x1234));
    }

    #[test]
    fn retx_request_layout() {
        let msg = RetxRequest::new(0xABCD, 5).encode();
        assert_eq!(msg, [0x80, RETX_TYPE, 0xAB, 0xCD, 0x00, 0x05, 0, 0]);
        assert!(retx_check(&msg));
        assert_eq!(RetxRequest::decode(&msg), Some(RetxRequest::new(0xABCD, 5)));
    }

    #[test]
    fn retx_check_rejects_bad_marker() {
        let mut msg = RetxRequest::new(1, 1).encode();
        msg[1] = RTP_TYPE_TS;
        assert!(!retx_check(&msg));
        assert!(RetxRequest::decode(&msg).is_none());

        let mut msg = RetxRequest::new(1, 1).encode();
        msg[0] = 0x40; // version 1
        assert!(!retx_check(&msg));
    }

    #[test]
    fn retx_decode_rejects_wrong_length() {
        let msg = RetxRequest::new(1, 1).encode();
        assert!(RetxRequest::decode(&msg[..7]).is_none());
        let mut long = msg.to_vec();
        long.push(0);
        assert!(RetxRequest::decode(&long).is_none());
    }

    #[test]
    fn retx_accessors_roundtrip_in_place() {
        let mut msg = [0u8; RETX_HEADER_SIZE];
        retx_init(&mut msg);
        retx_set_seqnum(&mut msg, 65535);
        retx_set_count(&mut msg, 300);
        assert_eq!(retx_get_seqnum(&msg), 65535);
        assert_eq!(retx_get_count(&msg), 300);
    }
}
