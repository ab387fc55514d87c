//! Property-based tests for the retransmission buffer.
//!
//! Packets are admitted at increasing dates; after every admission the buffer
//! is purged, exactly as the relay does on its ingress path.

use proptest::prelude::*;
use rtpsplit_transport::clock::Tick;
use rtpsplit_transport::pool::{Block, RetxBuffer};
use rtpsplit_transport::wire::{RtpHeader, RTP_HEADER_SIZE};

fn packet(seqnum: u16) -> Block {
    let mut raw = [0u8; RTP_HEADER_SIZE];
    let mut hdr = RtpHeader::new(&mut raw[..]).unwrap();
    hdr.init();
    hdr.set_seqnum(seqnum);
    Block::from_slice(&raw)
}

/// Strictly increasing admission dates built from positive gaps.
fn dates() -> impl Strategy<Value = Vec<Tick>> {
    prop::collection::vec(1u64..5_000, 1..200).prop_map(|gaps| {
        gaps.iter()
            .scan(0u64, |t, g| {
                *t += g;
                Some(*t)
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn retained_blocks_are_exactly_the_window(dates in dates(), window in 1u64..50_000) {
        let mut buf = RetxBuffer::new(window);
        for (i, &t) in dates.iter().enumerate() {
            buf.admit(packet(i as u16), t);
            buf.purge(t);
        }

        let now = *dates.last().unwrap();
        let cutoff = now.saturating_sub(window);
        let expected: Vec<u16> = dates
            .iter()
            .enumerate()
            .filter(|&(_, &t)| t >= cutoff)
            .map(|(i, _)| i as u16)
            .collect();
        let retained: Vec<u16> = buf.iter().filter_map(Block::seqnum).collect();
        prop_assert_eq!(retained, expected);
    }

    #[test]
    fn head_is_always_oldest(dates in dates(), window in 1u64..50_000) {
        let mut buf = RetxBuffer::new(window);
        for (i, &t) in dates.iter().enumerate() {
            buf.admit(packet(i as u16), t);
            buf.purge(t);
            let admitted: Vec<Tick> = buf.iter().map(Block::admitted_at).collect();
            prop_assert!(admitted.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(buf.oldest(), admitted.first().copied());
        }
    }

    #[test]
    fn purge_at_same_date_is_idempotent(dates in dates(), window in 1u64..50_000, extra in 0u64..100_000) {
        let mut buf = RetxBuffer::new(window);
        for (i, &t) in dates.iter().enumerate() {
            buf.admit(packet(i as u16), t);
        }
        let now = dates.last().unwrap() + extra;
        buf.purge(now);
        let len = buf.len();
        let bytes = buf.retained_bytes();
        prop_assert_eq!(buf.purge(now), 0);
        prop_assert_eq!(buf.len(), len);
        prop_assert_eq!(buf.retained_bytes(), bytes);
    }

    #[test]
    fn run_never_exceeds_request(count in 0usize..64, n in 1usize..64) {
        let mut buf = RetxBuffer::new(u64::MAX);
        for seq in 0..n {
            buf.admit(packet(seq as u16), seq as u64);
        }
        let start = n / 2;
        let pos = buf.lookup(start as u16).unwrap();
        let sent = buf.resend_run(pos, count).count();
        prop_assert_eq!(sent, count.min(n - start));
    }
}
