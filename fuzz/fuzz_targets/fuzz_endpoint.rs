#![no_main]

use libfuzzer_sys::fuzz_target;

use tcp_routing_verify::Endpoint;

fuzz_target!(|data: &str| {
    if let Ok(endpoint) = data.parse::<Endpoint>() {
        let _ = endpoint.to_string();
    }
});
