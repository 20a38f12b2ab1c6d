//! Engine.IO v3 framing used on the polling and persistent transports.
//!
//! Polling bodies are sequences of `<len>:<packet>` envelopes, where `<len>` is
//! the decimal length of `<packet>` counted in UTF-16 code units (the remote
//! measures JavaScript string length). A packet starts with a one-digit
//! Engine.IO type; application events are Engine.IO messages (`4`) carrying a
//! Socket.IO event (`2`), hence the `42` tag.
//!
//! Two fixed contracts of the remote are encoded here rather than tuned:
//!
//! - the handshake body wraps its JSON object in exactly four leading and four
//!   trailing characters (`96:0{...}2:40`), and
//! - a poll with nothing to report answers with the literal [`NOOP_SENTINEL`].

use crate::error::{Result, SwarmError};

/// Tag of a Socket.IO event carried in an Engine.IO message.
pub const MESSAGE_TAG: &str = "42";

/// Poll body meaning "nothing to report": a noop packet followed by a close.
pub const NOOP_SENTINEL: &str = "1:61:1";

/// Characters framing the handshake JSON on each side.
pub const HANDSHAKE_FRAMING: usize = 4;

// ── Envelope ────────────────────────────────────────────────────────

/// One length-prefixed polling packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    packet: String,
}

impl Envelope {
    /// Wrap a raw packet (type digit included).
    pub fn new(packet: impl Into<String>) -> Self {
        Self {
            packet: packet.into(),
        }
    }

    /// Wrap a JSON payload as a `42` event message.
    ///
    /// ```
    /// use lobby_swarm::frame::Envelope;
    ///
    /// assert_eq!(Envelope::message("[1]").encode(), "5:42[1]");
    /// ```
    pub fn message(json: &str) -> Self {
        Self::new(format!("{MESSAGE_TAG}{json}"))
    }

    /// The packet without its length prefix.
    pub fn packet(&self) -> &str {
        &self.packet
    }

    /// Render as `<len>:<packet>`.
    pub fn encode(&self) -> String {
        format!("{}:{}", js_len(&self.packet), self.packet)
    }

    /// Parse a single `<len>:<packet>` envelope.
    ///
    /// # Errors
    ///
    /// Returns [`SwarmError::Frame`] if the prefix is missing or not a number,
    /// or if the declared length does not match the packet.
    pub fn decode(frame: &str) -> Result<Self> {
        let (len, packet) = frame
            .split_once(':')
            .ok_or_else(|| SwarmError::Frame(format!("missing length prefix in {frame:?}")))?;
        let declared: usize = len
            .parse()
            .map_err(|_| SwarmError::Frame(format!("invalid length prefix {len:?}")))?;
        let actual = js_len(packet);
        if declared != actual {
            return Err(SwarmError::Frame(format!(
                "declared length {declared} but packet has {actual}"
            )));
        }
        Ok(Self::new(packet))
    }
}

/// Length as the remote counts it: UTF-16 code units.
pub fn js_len(text: &str) -> usize {
    text.encode_utf16().count()
}

// ── Handshake ───────────────────────────────────────────────────────

/// Remove the fixed framing around the handshake JSON object.
///
/// # Errors
///
/// Returns [`SwarmError::Handshake`] if the body is too short to hold the
/// framing on both sides.
pub fn strip_handshake_frame(body: &str) -> Result<&str> {
    let chars = body.chars().count();
    if chars < HANDSHAKE_FRAMING * 2 {
        return Err(SwarmError::Handshake(format!(
            "frame of {chars} characters is shorter than its framing"
        )));
    }

    let start = byte_offset(body, HANDSHAKE_FRAMING);
    let end = byte_offset(body, chars - HANDSHAKE_FRAMING);
    body.get(start..end)
        .ok_or_else(|| SwarmError::Handshake("frame does not split on characters".into()))
}

fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map_or(text.len(), |(idx, _)| idx)
}

// ── Persistent connection frames ────────────────────────────────────

/// Frames the client sends on the persistent connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutgoingFrame {
    /// Probe sent right after the connection opens.
    Probe,
    /// Confirms the upgrade once the probe is acknowledged.
    Upgrade,
    /// Periodic keep-alive.
    Heartbeat,
}

impl OutgoingFrame {
    /// Wire text of the frame.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Probe => "2probe",
            Self::Upgrade => "5",
            Self::Heartbeat => "2",
        }
    }
}

/// Classification of a text frame received on the persistent connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame<'a> {
    /// `3probe`: the remote acknowledged our probe.
    ProbeAck,
    /// `2`: the remote pinged us.
    Ping,
    /// `3`: answer to our heartbeat.
    Pong,
    /// `1`: the remote is closing the Engine.IO session.
    Close,
    /// `6`: noop.
    Noop,
    /// `4...`: an application message; holds the text after the type digit.
    Message(&'a str),
    /// Anything else.
    Other(&'a str),
}

impl<'a> ControlFrame<'a> {
    /// Classify a received text frame.
    pub fn parse(text: &'a str) -> Self {
        match text {
            "3probe" => Self::ProbeAck,
            "2" => Self::Ping,
            "3" => Self::Pong,
            "1" => Self::Close,
            "6" => Self::Noop,
            _ => match text.strip_prefix('4') {
                Some(rest) => Self::Message(rest),
                None => Self::Other(text),
            },
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn message_envelope_counts_tag_and_payload() {
        let payload = r#"[1,"id","Bot12",12,"en",false,"abc",null,null]"#;
        let encoded = Envelope::message(payload).encode();
        assert_eq!(
            encoded,
            format!("{}:42{payload}", ("42".to_string() + payload).len())
        );
    }

    #[test]
    fn envelope_length_uses_utf16_units() {
        // 'é' is one UTF-16 unit but two UTF-8 bytes; '🎨' is two units.
        assert_eq!(Envelope::message("\"é\"").encode(), "5:42\"é\"");
        assert_eq!(Envelope::message("\"🎨\"").encode(), "6:42\"🎨\"");
    }

    #[test]
    fn decode_accepts_matching_length() {
        let env = Envelope::decode("5:42[1]").unwrap();
        assert_eq!(env.packet(), "42[1]");
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = Envelope::decode("9:42[1]").unwrap_err();
        assert!(matches!(err, SwarmError::Frame(_)));
    }

    #[test]
    fn decode_rejects_missing_prefix() {
        assert!(matches!(
            Envelope::decode("42[1]").unwrap_err(),
            SwarmError::Frame(_)
        ));
        assert!(matches!(
            Envelope::decode("x:42").unwrap_err(),
            SwarmError::Frame(_)
        ));
    }

    #[test]
    fn strip_handshake_returns_interior() {
        let body = r#"96:0{"sid":"abc","pingInterval":25000}2:40"#;
        assert_eq!(
            strip_handshake_frame(body).unwrap(),
            r#"{"sid":"abc","pingInterval":25000}"#
        );
    }

    #[test]
    fn strip_handshake_handles_multibyte_framing() {
        assert_eq!(strip_handshake_frame("éééé{}éééé").unwrap(), "{}");
    }

    #[test]
    fn strip_handshake_rejects_short_body() {
        let err = strip_handshake_frame("1234567").unwrap_err();
        assert!(matches!(err, SwarmError::Handshake(_)));
        assert_eq!(strip_handshake_frame("12345678").unwrap(), "");
    }

    #[test]
    fn outgoing_frames_match_wire_vocabulary() {
        assert_eq!(OutgoingFrame::Probe.as_str(), "2probe");
        assert_eq!(OutgoingFrame::Upgrade.as_str(), "5");
        assert_eq!(OutgoingFrame::Heartbeat.as_str(), "2");
    }

    #[test]
    fn control_frames_are_classified() {
        assert_eq!(ControlFrame::parse("3probe"), ControlFrame::ProbeAck);
        assert_eq!(ControlFrame::parse("3"), ControlFrame::Pong);
        assert_eq!(ControlFrame::parse("2"), ControlFrame::Ping);
        assert_eq!(ControlFrame::parse("1"), ControlFrame::Close);
        assert_eq!(ControlFrame::parse("6"), ControlFrame::Noop);
        assert_eq!(
            ControlFrame::parse(r#"42[2,{"x":1}]"#),
            ControlFrame::Message(r#"2[2,{"x":1}]"#)
        );
        assert_eq!(ControlFrame::parse("hello"), ControlFrame::Other("hello"));
    }
}
