//! Fuzz target: `SliceAssembly::feed`
//!
//! Splits the input into writes (one length byte, then that many bytes)
//! and feeds them to the reassembler on a characteristic picked by the
//! first byte. The reassembler must never panic, never yield more than
//! `MAX_MESSAGE` bytes, and accept a clean message after any garbage.
//!
//! cargo fuzz run fuzz_deframer

#![no_main]

use libfuzzer_sys::fuzz_target;
use llsync::llsync::msg::CharId;
use llsync::llsync::slice::{MAX_MESSAGE, SliceAssembly};

const CHARS: [CharId; 4] = [CharId::DeviceInfo, CharId::Data, CharId::Ota, CharId::Gateway];

fuzz_target!(|data: &[u8]| {
    let Some((&sel, mut rest)) = data.split_first() else {
        return;
    };
    let char = CHARS[usize::from(sel) % CHARS.len()];
    let mut asm = SliceAssembly::new();

    while let Some((&n, tail)) = rest.split_first() {
        let n = usize::from(n).min(tail.len());
        let (write, next) = tail.split_at(n);
        if let Ok(Some(msg)) = asm.feed(char, write) {
            assert!(msg.payload.len() <= MAX_MESSAGE);
            assert_eq!(msg.char, char);
        }
        assert!(asm.len() <= MAX_MESSAGE);
        rest = next;
    }

    // a complete single-slice message always goes through
    let msg = asm
        .feed(CharId::Ota, &[0x02, 0x00, 0x00])
        .expect("well-formed slice")
        .expect("single slice completes");
    assert!(msg.payload.is_empty());
});
