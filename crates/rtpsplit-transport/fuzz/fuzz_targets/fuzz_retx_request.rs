#![no_main]

use libfuzzer_sys::fuzz_target;
use rtpsplit_transport::wire::RetxRequest;

/// Retransmission requests come straight off the network. Decoding must
/// never panic, and anything that decodes must re-encode to the same bytes
/// apart from the reserved field.
fuzz_target!(|data: &[u8]| {
    if let Some(req) = RetxRequest::decode(data) {
        let msg = req.encode();
        assert_eq!(&msg[..6], &data[..6]);
    }
});
