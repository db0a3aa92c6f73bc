//! Domain types shared by the session registry, rewind monitor and dispatcher.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One subtitle track reported by the device for the current media item.
///
/// Immutable within a session's lifetime: the device re-sends the same
/// stream list on every refresh, but we never mutate an entry in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleStream {
    pub id: String,
    pub title: String,
    pub language: String,
    pub is_external: bool,
    pub selected: bool,
}

impl SubtitleStream {
    /// Title used for preference matching: the display title, falling back
    /// to the language tag when the server didn't send one.
    pub fn match_text(&self) -> String {
        if self.title.is_empty() {
            self.language.clone()
        } else {
            format!("{} {}", self.title, self.language)
        }
    }
}

/// Tri-valued knowledge of whether subtitles are currently on for a session.
///
/// `Unknown` holds immediately after we issue a command, until the next
/// successful timeline observation reconciles it (spec invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnownSubsOn {
    Yes,
    No,
    Unknown,
}

/// One active playback on one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSession {
    pub playback_id: String,
    pub device_name: String,
    pub machine_id: String,
    pub media_title: String,
    pub direct_url: Option<String>,
    pub available_subtitles: Vec<SubtitleStream>,
    pub active_subtitles: BTreeSet<String>,
    pub preferred_subtitle: Option<String>,
    pub view_offset_ms: i64,
    pub accurate_time_ms: Option<i64>,
    pub known_subs_on: KnownSubsOn,
    pub last_seen_epoch_ms: Option<i64>,
    pub player_state: PlayerState,
}

impl PlaybackSession {
    /// The best available position signal: the high-resolution timeline
    /// sample if we have one this tick, else the server's coarser offset.
    pub fn best_position_ms(&self) -> i64 {
        self.accurate_time_ms.unwrap_or(self.view_offset_ms)
    }

    pub fn has_active_subtitles(&self) -> bool {
        !self.active_subtitles.is_empty()
    }

    /// Whether the Monitor Manager's cadence rule should treat this session
    /// as "known to be playing" (§4.F.5) rather than paused/stopped/unknown.
    pub fn is_known_playing(&self) -> bool {
        self.player_state == PlayerState::Playing
    }
}

/// Player activity state as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerState {
    Playing,
    Paused,
    Stopped,
    Unknown,
}

impl From<&str> for PlayerState {
    fn from(s: &str) -> Self {
        match s {
            "playing" => PlayerState::Playing,
            "paused" => PlayerState::Paused,
            "stopped" => PlayerState::Stopped,
            _ => PlayerState::Unknown,
        }
    }
}

/// A single timeline sample, as returned by the Timeline Poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineSnapshot {
    pub time_ms: i64,
    pub subtitle_stream_id: String,
    pub state: PlayerState,
}

impl TimelineSnapshot {
    /// `subtitleStreamID` of "" or "0" both mean "no subs selected".
    pub fn subs_active(&self) -> bool {
        !(self.subtitle_stream_id.is_empty() || self.subtitle_stream_id == "0")
    }
}
