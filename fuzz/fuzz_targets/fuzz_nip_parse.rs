#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Must not panic — errors are fine, panics are bugs.
        if let Ok(nip) = ksef::Nip::parse(s) {
            let _ = ksef::nip_checksum_ok(&nip);
            // Canonical form always re-parses.
            assert!(ksef::Nip::parse(nip.as_str()).is_ok());
        }
    }
});
