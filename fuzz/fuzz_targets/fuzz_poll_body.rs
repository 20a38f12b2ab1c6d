#![no_main]

use libfuzzer_sys::fuzz_target;
use lobby_swarm::frame::{strip_handshake_frame, ControlFrame, Envelope};
use lobby_swarm::validator::interpret_state_poll;
use lobby_swarm::TransportSession;

fuzz_target!(|data: &[u8]| {
    let Ok(body) = std::str::from_utf8(data) else {
        return;
    };

    // Every remote-controlled body must be classified, never panic.
    let _ = interpret_state_poll(body);
    let _ = TransportSession::from_frame(body);
    let _ = strip_handshake_frame(body);
    let _ = ControlFrame::parse(body);

    if let Ok(envelope) = Envelope::decode(body) {
        let reencoded = envelope.encode();
        assert_eq!(Envelope::decode(&reencoded).ok(), Some(envelope));
    }
});
