//! Pure parsing of the upstream server's XML responses.
//!
//! Kept as pure functions — no I/O. Callers own the HTTP call; these
//! functions only ever see response bodies.

use crate::error::AgentError;
use crate::model::{PlayerState, SubtitleStream, TimelineSnapshot};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::BTreeSet;

const SUBTITLE_STREAM_TYPE: &str = "3";

/// One `Video` entry from `GET /status/sessions`, before registry
/// reconciliation turns it into (or merges it into) a `PlaybackSession`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionListing {
    pub playback_id: String,
    pub machine_id: String,
    pub device_name: String,
    pub direct_url: Option<String>,
    pub media_title: String,
    pub view_offset_ms: i64,
    pub available_subtitles: Vec<SubtitleStream>,
    pub active_subtitles: BTreeSet<String>,
}

fn attr_value(e: &quick_xml::events::BytesStart, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == name.as_bytes() {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

/// Parse `MediaContainer > Video[]` from `/status/sessions`.
///
/// A `Video` with no `Player` (and therefore no `playbackId`) cannot be
/// matched to a device and is skipped — the session is simply invisible to
/// this agent until the server attaches player info to it.
pub fn parse_sessions(xml: &str) -> Result<Vec<SessionListing>, AgentError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut sessions = Vec::new();
    let mut buf = Vec::new();

    let mut in_video = false;
    let mut current_title = String::new();
    let mut current_offset = 0i64;
    let mut current_playback_id: Option<String> = None;
    let mut current_machine_id = String::new();
    let mut current_device_name = String::new();
    let mut current_direct_url: Option<String> = None;
    let mut current_subs: Vec<SubtitleStream> = Vec::new();
    let mut current_active: BTreeSet<String> = BTreeSet::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(AgentError::from)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                let name = e.name();
                let local = name.as_ref();
                match local {
                    b"Video" => {
                        in_video = true;
                        current_title = attr_value(&e, "title").unwrap_or_default();
                        current_offset = attr_value(&e, "viewOffset")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0);
                        current_playback_id = None;
                        current_machine_id.clear();
                        current_device_name.clear();
                        current_direct_url = None;
                        current_subs.clear();
                        current_active.clear();
                    }
                    b"Player" if in_video => {
                        current_playback_id = attr_value(&e, "playbackId");
                        current_machine_id = attr_value(&e, "machineIdentifier").unwrap_or_default();
                        current_device_name = attr_value(&e, "title").unwrap_or_default();
                        current_direct_url = attr_value(&e, "address");
                    }
                    b"Stream" if in_video => {
                        if attr_value(&e, "streamType").as_deref() == Some(SUBTITLE_STREAM_TYPE) {
                            let id = attr_value(&e, "id").unwrap_or_default();
                            let selected = attr_value(&e, "selected").as_deref() == Some("1");
                            let stream = SubtitleStream {
                                id: id.clone(),
                                title: attr_value(&e, "title").unwrap_or_default(),
                                language: attr_value(&e, "language").unwrap_or_default(),
                                is_external: attr_value(&e, "key").is_some(),
                                selected,
                            };
                            if selected {
                                current_active.insert(id);
                            }
                            current_subs.push(stream);
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) if e.name().as_ref() == b"Video" => {
                in_video = false;
                if let Some(playback_id) = current_playback_id.take() {
                    sessions.push(SessionListing {
                        playback_id,
                        machine_id: std::mem::take(&mut current_machine_id),
                        device_name: std::mem::take(&mut current_device_name),
                        direct_url: current_direct_url.take(),
                        media_title: std::mem::take(&mut current_title),
                        view_offset_ms: current_offset,
                        available_subtitles: std::mem::take(&mut current_subs),
                        active_subtitles: std::mem::take(&mut current_active),
                    });
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(sessions)
}

/// Parse `MediaContainer > Timeline[]` from a device's timeline poll.
///
/// Among possibly multiple entries (audio/photo/video) select the one with
/// a non-empty `time` field; return `None` if no entry qualifies.
pub fn parse_timeline(xml: &str) -> Result<Option<TimelineSnapshot>, AgentError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(AgentError::from)? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Timeline" => {
                let time = attr_value(&e, "time");
                if let Some(time_ms) = time.as_deref().and_then(|v| v.parse::<i64>().ok()) {
                    let subtitle_stream_id =
                        attr_value(&e, "subtitleStreamID").unwrap_or_default();
                    let state = attr_value(&e, "state")
                        .map(|s| PlayerState::from(s.as_str()))
                        .unwrap_or(PlayerState::Unknown);
                    return Ok(Some(TimelineSnapshot {
                        time_ms,
                        subtitle_stream_id,
                        state,
                    }));
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_video_session_with_subtitles() {
        let xml = r#"<MediaContainer>
          <Video title="Episode 1" viewOffset="120000">
            <Player machineIdentifier="abc" title="Living Room" address="http://10.0.0.5:32500" playbackId="pb-1"/>
            <Media>
              <Part>
                <Stream streamType="2" id="1"/>
                <Stream streamType="3" id="2" title="English" language="eng" selected="1"/>
                <Stream streamType="3" id="3" title="French" language="fre" key="/library/streams/3"/>
              </Part>
            </Media>
          </Video>
        </MediaContainer>"#;

        let sessions = parse_sessions(xml).unwrap();
        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.playback_id, "pb-1");
        assert_eq!(s.device_name, "Living Room");
        assert_eq!(s.view_offset_ms, 120_000);
        assert_eq!(s.available_subtitles.len(), 2);
        assert!(s.active_subtitles.contains("2"));
        assert!(!s.active_subtitles.contains("3"));
        assert!(!s.available_subtitles[1].is_external); // id=2, no `key` attr
        assert!(s.available_subtitles.iter().any(|sub| sub.id == "3" && sub.is_external));
    }

    #[test]
    fn video_without_player_is_skipped() {
        let xml = r#"<MediaContainer><Video title="x" viewOffset="0"></Video></MediaContainer>"#;
        let sessions = parse_sessions(xml).unwrap();
        assert!(sessions.is_empty());
    }

    #[test]
    fn timeline_selects_entry_with_time() {
        let xml = r#"<MediaContainer>
          <Timeline type="photo"/>
          <Timeline type="video" time="45000" subtitleStreamID="2" state="playing"/>
        </MediaContainer>"#;

        let snap = parse_timeline(xml).unwrap().unwrap();
        assert_eq!(snap.time_ms, 45_000);
        assert_eq!(snap.subtitle_stream_id, "2");
        assert_eq!(snap.state, PlayerState::Playing);
        assert!(snap.subs_active());
    }

    #[test]
    fn timeline_with_no_time_field_returns_none() {
        let xml = r#"<MediaContainer><Timeline type="photo"/></MediaContainer>"#;
        assert_eq!(parse_timeline(xml).unwrap(), None);
    }

    #[test]
    fn disabled_subtitle_id_of_zero_is_not_active() {
        let xml = r#"<MediaContainer><Timeline time="1000" subtitleStreamID="0" state="paused"/></MediaContainer>"#;
        let snap = parse_timeline(xml).unwrap().unwrap();
        assert!(!snap.subs_active());
    }
}
