#![no_main]

use libfuzzer_sys::fuzz_target;

use tcp_routing_verify::extract_identity;

fuzz_target!(|data: &[u8]| {
    // Arbitrary backend responses must parse or be rejected, never panic.
    if let Ok(identity) = extract_identity(data) {
        assert!(!identity.is_empty());
        assert!(!identity.contains(':'));
    }
});
