//! Server-sent event framing and typed event decoding.
//!
//! The framer is a pure line-to-record folder: feed it chunks of bytes in
//! whatever size the socket happens to deliver them, and it emits complete
//! `RawEvent`s as soon as a blank-line terminator is seen. This keeps the
//! listener's shutdown path deterministic — cancelling the underlying read
//! never leaves the folder in a torn state
//! that could emit a half-built event.

use serde::Deserialize;

/// One blank-line-terminated SSE record: an `event:` name and a `data:` body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawEvent {
    pub name: String,
    pub data: String,
}

/// Incrementally folds raw text lines into complete `RawEvent`s.
#[derive(Debug, Default)]
pub struct EventFramer {
    pending: Option<RawEvent>,
    line_buf: String,
}

impl EventFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its trailing newline) into the folder.
    /// Returns `Some(event)` when this line completed a record.
    pub fn push_line(&mut self, line: &str) -> Option<RawEvent> {
        if line.is_empty() {
            return self.pending.take().filter(|e| !e.name.is_empty());
        }
        let event = self.pending.get_or_insert_with(RawEvent::default);
        if let Some(rest) = line.strip_prefix("event:") {
            event.name = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !event.data.is_empty() {
                event.data.push('\n');
            }
            event.data.push_str(rest.trim());
        }
        None
    }

    /// Feed a chunk of bytes that may contain zero, one, or many newlines;
    /// buffers any trailing partial line for the next call.
    pub fn push_chunk(&mut self, chunk: &str) -> Vec<RawEvent> {
        let mut events = Vec::new();
        self.line_buf.push_str(chunk);
        while let Some(idx) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=idx).collect();
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(ev) = self.push_line(line) {
                events.push(ev);
            }
        }
        events
    }
}

/// Typed events the Monitor Manager and Supervisor care about.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Playing(PlayingPayload),
    Activity,
    TranscodeSession(TranscodeSessionPhase),
    Ping,
    Unknown(String),
}

/// Which of `transcodeSession.start|update|end` fired. Carried for
/// completeness of the typed-event surface; neither the Monitor Manager nor
/// the Rewind Monitor currently branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeSessionPhase {
    Start,
    Update,
    End,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlayingPayload {
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    #[serde(rename = "clientIdentifier")]
    pub playback_id: String,
    #[serde(rename = "viewOffset")]
    pub view_offset_ms: i64,
    #[serde(default)]
    pub state: String,
}

#[derive(Deserialize)]
struct PlayingEnvelope {
    #[serde(rename = "PlaySessionStateNotification", alias = "playing")]
    inner: Option<PlayingPayload>,
}

/// Decode a raw record into a typed event. A body that fails to parse as
/// the shape we expect for its event name degrades to `Unknown` rather than
/// erroring the whole listener.
pub fn decode_event(raw: &RawEvent) -> NotificationEvent {
    match raw.name.as_str() {
        "playing" => decode_playing(&raw.data)
            .map(NotificationEvent::Playing)
            .unwrap_or_else(|| NotificationEvent::Unknown(raw.name.clone())),
        "activity" => NotificationEvent::Activity,
        name if name.starts_with("transcodeSession.") => {
            match name.rsplit('.').next() {
                Some("start") => NotificationEvent::TranscodeSession(TranscodeSessionPhase::Start),
                Some("end") => NotificationEvent::TranscodeSession(TranscodeSessionPhase::End),
                _ => NotificationEvent::TranscodeSession(TranscodeSessionPhase::Update),
            }
        }
        "ping" => NotificationEvent::Ping,
        other => NotificationEvent::Unknown(other.to_string()),
    }
}

fn decode_playing(data: &str) -> Option<PlayingPayload> {
    if let Ok(direct) = serde_json::from_str::<PlayingPayload>(data) {
        return Some(direct);
    }
    let envelope: PlayingEnvelope = serde_json::from_str(data).ok()?;
    envelope.inner
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_a_complete_record_fed_in_one_chunk() {
        let mut framer = EventFramer::new();
        let events = framer.push_chunk("event:playing\ndata:{\"sessionKey\":\"1\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "playing");
    }

    #[test]
    fn folds_a_record_split_across_chunks() {
        let mut framer = EventFramer::new();
        assert!(framer.push_chunk("event:ping\n").is_empty());
        assert!(framer.push_chunk("data:{}\n").is_empty());
        let events = framer.push_chunk("\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "ping");
    }

    #[test]
    fn multiple_records_in_one_chunk_are_all_emitted() {
        let mut framer = EventFramer::new();
        let events =
            framer.push_chunk("event:ping\ndata:{}\n\nevent:activity\ndata:{}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].name, "ping");
        assert_eq!(events[1].name, "activity");
    }

    #[test]
    fn decodes_playing_payload() {
        let raw = RawEvent {
            name: "playing".to_string(),
            data: r#"{"sessionKey":"5","clientIdentifier":"pb-9","viewOffset":1000,"state":"playing"}"#
                .to_string(),
        };
        match decode_event(&raw) {
            NotificationEvent::Playing(p) => {
                assert_eq!(p.playback_id, "pb-9");
                assert_eq!(p.view_offset_ms, 1000);
            }
            other => panic!("expected Playing, got {other:?}"),
        }
    }

    #[test]
    fn unparseable_playing_body_degrades_to_unknown() {
        let raw = RawEvent {
            name: "playing".to_string(),
            data: "not json".to_string(),
        };
        assert_eq!(
            decode_event(&raw),
            NotificationEvent::Unknown("playing".to_string())
        );
    }

    #[test]
    fn ping_is_recognized() {
        let raw = RawEvent {
            name: "ping".to_string(),
            data: String::new(),
        };
        assert_eq!(decode_event(&raw), NotificationEvent::Ping);
    }

    #[test]
    fn transcode_session_phases_are_distinguished() {
        for (name, expected) in [
            ("transcodeSession.start", TranscodeSessionPhase::Start),
            ("transcodeSession.update", TranscodeSessionPhase::Update),
            ("transcodeSession.end", TranscodeSessionPhase::End),
        ] {
            let raw = RawEvent {
                name: name.to_string(),
                data: String::new(),
            };
            assert_eq!(decode_event(&raw), NotificationEvent::TranscodeSession(expected));
        }
    }
}
