#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary blobs must fail cleanly, never panic.
    let key = ksef::crypto::BatchKey::from_bytes([0x42; 32]);
    let _ = ksef::crypto::decrypt_payload(&key, data);

    let _ = ksef::ContentDigest::of(data);
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = ksef::ContentDigest::from_hex(s);
    }
});
