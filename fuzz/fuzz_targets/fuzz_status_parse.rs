#![no_main]

use libfuzzer_sys::fuzz_target;

use ksef::transport::{AuthenticateResponse, BatchStatusResponse, UpoResponse};

fuzz_target!(|data: &[u8]| {
    // Wire payloads come from the network; deserialization must not
    // panic on any input, including unknown status strings.
    let _ = serde_json::from_slice::<BatchStatusResponse>(data);
    let _ = serde_json::from_slice::<AuthenticateResponse>(data);
    let _ = serde_json::from_slice::<UpoResponse>(data);
});
