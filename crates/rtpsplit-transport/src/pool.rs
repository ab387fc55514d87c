//! # Block Store and Retransmission Buffer
//!
//! A [`Block`] is one network packet in a fixed-capacity buffer. Ingress fills
//! a block in place (possibly over several reads for stream transports), then
//! moves it into the [`RetxBuffer`] once it has been sent.
//!
//! The retransmission buffer is a FIFO ordered by admission time. Memory is
//! bounded by `window × ingress rate`: every admission is followed by a
//! prefix purge of blocks older than the window.

use bytes::BytesMut;
use std::collections::VecDeque;

use crate::clock::Tick;
use crate::wire::{rtp_seqnum, RtpHeader};

// ─── Block ───────────────────────────────────────────────────────────────────

/// One packet: header + payload in an owned buffer of fixed capacity.
pub struct Block {
    data: BytesMut,
    len: usize,
    admitted_at: Tick,
}

impl Block {
    /// Allocate a zeroed block able to hold `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Block {
            data: BytesMut::zeroed(capacity),
            len: 0,
            admitted_at: 0,
        }
    }

    /// Build a block holding exactly `packet`.
    pub fn from_slice(packet: &[u8]) -> Self {
        Block {
            data: BytesMut::from(packet),
            len: packet.len(),
            admitted_at: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Occupied size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remaining room before the block is full.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// The occupied bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// The occupied bytes, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Unfilled tail of the buffer, for reading the next chunk into.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.len..]
    }

    /// Mark `n` more bytes of the spare area as filled.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`remaining`](Self::remaining).
    pub fn advance(&mut self, n: usize) {
        assert!(n <= self.remaining(), "advance past block capacity");
        self.len += n;
    }

    /// Reserve `n` leading bytes (e.g. header room) as occupied.
    pub fn reserve_header(&mut self, n: usize) {
        self.advance(n);
    }

    /// Admission date, meaningful once the block has entered a [`RetxBuffer`].
    pub fn admitted_at(&self) -> Tick {
        self.admitted_at
    }

    /// RTP sequence number, if the block holds a complete fixed header.
    pub fn seqnum(&self) -> Option<u16> {
        rtp_seqnum(self.as_slice())
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .field("seqnum", &self.seqnum())
            .field("admitted_at", &self.admitted_at)
            .finish()
    }
}

// ─── RetxBuffer ──────────────────────────────────────────────────────────────

/// Time-windowed FIFO of already sent blocks.
///
/// The head is always the oldest block. Blocks are dropped exactly once, by
/// [`purge`](Self::purge), when they fall out of the window.
pub struct RetxBuffer {
    queue: VecDeque<Block>,
    window: Tick,
    retained_bytes: usize,
}

impl RetxBuffer {
    /// Create a buffer keeping blocks for `window` ticks.
    pub fn new(window: Tick) -> Self {
        RetxBuffer {
            queue: VecDeque::new(),
            window,
            retained_bytes: 0,
        }
    }

    pub fn window(&self) -> Tick {
        self.window
    }

    /// Stamp `block` with `now`, set the RTP marker bit on the buffered copy
    /// and append it at the tail. Ownership moves into the buffer.
    pub fn admit(&mut self, mut block: Block, now: Tick) {
        block.admitted_at = now;
        if let Some(mut hdr) = RtpHeader::new(block.as_mut_slice()) {
            hdr.set_marker();
        }
        self.retained_bytes += block.len();
        self.queue.push_back(block);
    }

    /// Drop every head block admitted before `now - window`. Returns the
    /// number of blocks evicted.
    pub fn purge(&mut self, now: Tick) -> usize {
        let cutoff = now.saturating_sub(self.window);
        let mut evicted = 0;
        while let Some(head) = self.queue.front() {
            if head.admitted_at >= cutoff {
                break;
            }
            if let Some(block) = self.queue.pop_front() {
                self.retained_bytes -= block.len();
                evicted += 1;
            }
        }
        if evicted > 0 {
            tracing::trace!(evicted, retained = self.queue.len(), "retx buffer purged");
        }
        evicted
    }

    /// Position of the first (oldest) block carrying `seqnum`.
    pub fn lookup(&self, seqnum: u16) -> Option<usize> {
        self.queue.iter().position(|b| b.seqnum() == Some(seqnum))
    }

    /// Up to `count` blocks in queue order starting at `position`.
    ///
    /// Follows retention order, not sequence arithmetic: blocks missing from
    /// the queue are skipped silently.
    pub fn resend_run(&self, position: usize, count: usize) -> impl Iterator<Item = &Block> {
        self.queue.iter().skip(position).take(count)
    }

    pub fn get(&self, position: usize) -> Option<&Block> {
        self.queue.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.queue.iter()
    }

    /// Number of retained blocks.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Total bytes held by retained blocks.
    pub fn retained_bytes(&self) -> usize {
        self.retained_bytes
    }

    /// Admission date of the oldest retained block.
    pub fn oldest(&self) -> Option<Tick> {
        self.queue.front().map(|b| b.admitted_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ticks_from_millis;
    use crate::wire::{RTP_HEADER_SIZE, RTP_TYPE_TS};

    fn packet(seqnum: u16) -> Block {
        let mut raw = vec![0u8; RTP_HEADER_SIZE + 4];
        raw[0] = 0x80;
        raw[1] = RTP_TYPE_TS;
        raw[2..4].copy_from_slice(&seqnum.to_be_bytes());
        Block::from_slice(&raw)
    }

    #[test]
    fn block_fill_in_place() {
        let mut block = Block::with_capacity(16);
        assert!(block.is_empty());
        block.reserve_header(RTP_HEADER_SIZE);
        assert_eq!(block.remaining(), 4);

        block.spare_mut()[..2].copy_from_slice(b"ab");
        block.advance(2);
        assert_eq!(block.len(), 14);
        assert_eq!(&block.as_slice()[12..], b"ab");
        assert!(!block.is_full());

        block.advance(2);
        assert!(block.is_full());
    }

    #[test]
    #[should_panic(expected = "advance past block capacity")]
    fn block_advance_overflow_panics() {
        let mut block = Block::with_capacity(4);
        block.advance(5);
    }

    #[test]
    fn admit_sets_marker_and_date() {
        let mut buf = RetxBuffer::new(ticks_from_millis(500));
        buf.admit(packet(7), 1234);

        let block = buf.get(0).unwrap();
        assert_eq!(block.admitted_at(), 1234);
        let hdr = RtpHeader::new(block.as_slice()).unwrap();
        assert!(hdr.marker());
        assert_eq!(hdr.payload_type(), RTP_TYPE_TS);
        assert_eq!(buf.retained_bytes(), RTP_HEADER_SIZE + 4);
    }

    #[test]
    fn purge_is_a_prefix_scan() {
        let mut buf = RetxBuffer::new(100);
        buf.admit(packet(1), 0);
        buf.admit(packet(2), 50);
        buf.admit(packet(3), 120);

        // cutoff = 60: blocks at 0 and 50 go, 120 stays
        assert_eq!(buf.purge(160), 2);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.oldest(), Some(120));
        assert_eq!(buf.retained_bytes(), RTP_HEADER_SIZE + 4);
    }

    #[test]
    fn purge_keeps_block_exactly_at_cutoff() {
        let mut buf = RetxBuffer::new(100);
        buf.admit(packet(1), 10);
        assert_eq!(buf.purge(110), 0);
        assert_eq!(buf.purge(111), 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn purge_before_window_elapsed_does_not_underflow() {
        let mut buf = RetxBuffer::new(ticks_from_millis(500));
        buf.admit(packet(1), 5);
        assert_eq!(buf.purge(10), 0);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn purge_is_idempotent() {
        let mut buf = RetxBuffer::new(100);
        for (i, t) in [0u64, 30, 60, 90, 120].iter().enumerate() {
            buf.admit(packet(i as u16), *t);
        }
        let first = buf.purge(175);
        let seqs: Vec<_> = buf.iter().map(|b| b.seqnum()).collect();
        assert_eq!(first, 3);
        assert_eq!(buf.purge(175), 0);
        assert_eq!(buf.iter().map(|b| b.seqnum()).collect::<Vec<_>>(), seqs);
    }

    #[test]
    fn lookup_within_and_after_window() {
        let window = ticks_from_millis(500);
        let t = ticks_from_millis(10_000);
        let mut buf = RetxBuffer::new(window);
        buf.admit(packet(42), t);

        buf.purge(t + ticks_from_millis(499));
        assert_eq!(buf.lookup(42), Some(0));

        buf.purge(t + ticks_from_millis(600));
        assert_eq!(buf.lookup(42), None);
    }

    #[test]
    fn lookup_returns_first_match() {
        let mut buf = RetxBuffer::new(1_000);
        buf.admit(packet(5), 0);
        buf.admit(packet(6), 1);
        buf.admit(packet(5), 2); // wrapped sequence space
        assert_eq!(buf.lookup(5), Some(0));
        assert_eq!(buf.lookup(6), Some(1));
        assert_eq!(buf.lookup(9), None);
    }

    #[test]
    fn run_follows_queue_order_across_gaps() {
        let mut buf = RetxBuffer::new(1_000);
        for seq in [10u16, 11, 13, 14] {
            buf.admit(packet(seq), 0);
        }
        let pos = buf.lookup(11).unwrap();
        let seqs: Vec<_> = buf.resend_run(pos, 2).filter_map(Block::seqnum).collect();
        assert_eq!(seqs, vec![11, 13]);

        let all: Vec<_> = buf.resend_run(pos, 10).filter_map(Block::seqnum).collect();
        assert_eq!(all, vec![11, 13, 14]);
    }
}
