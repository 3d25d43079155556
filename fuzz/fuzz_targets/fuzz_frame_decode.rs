#![no_main]

use chaturbate_chat::codec::{self, Frame};
use chaturbate_chat::dispatch;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    // Decoding and routing must never panic, whatever the server sends.
    if let Ok(Frame::Data(invocations)) = codec::decode(raw) {
        for invocation in &invocations {
            let _ = dispatch::route(invocation);
        }
    }
});
