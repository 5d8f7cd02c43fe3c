//! Fuzz target for host event and sink line decoding.
//!
//! Arbitrary lines must decode to an event or an error, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use trim_telemetry::host::HostEvent;
use trim_telemetry::sink::parse_line;

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        let _ = HostEvent::decode(line);
        let _ = parse_line(line);
    }
});
