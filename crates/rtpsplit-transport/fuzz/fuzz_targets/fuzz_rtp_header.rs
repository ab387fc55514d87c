#![no_main]

use libfuzzer_sys::fuzz_target;
use rtpsplit_transport::pool::{Block, RetxBuffer};

/// Arbitrary ingress datagrams admitted into the retransmission buffer:
/// marker setting and sequence lookup must cope with runts.
fuzz_target!(|data: &[u8]| {
    let mut buf = RetxBuffer::new(1);
    buf.admit(Block::from_slice(data), 0);
    if let Some(seq) = buf.get(0).and_then(Block::seqnum) {
        assert_eq!(buf.lookup(seq), Some(0));
    }
    buf.purge(2);
    assert!(buf.is_empty());
});
