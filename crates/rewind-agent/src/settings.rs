//! On-disk settings and credentials file parsing.
//!
//! Both files use the same simple `key=value` line format as the upstream
//! project's settings/credentials files; no INI section
//! nesting is used by either file, so a hand-rolled line parser is used
//! here rather than pulling in a dedicated INI crate for two key/value
//! pairs worth of schema.

use crate::config::{Credentials, RawSettings};
use std::path::Path;

fn parse_kv_lines(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

pub fn parse_credentials(contents: &str) -> Credentials {
    let mut creds = Credentials::default();
    for (key, value) in parse_kv_lines(contents) {
        match key.as_str() {
            "AppToken" => creds.app_token = value,
            "ClientIdentifier" => creds.client_identifier = value,
            _ => {}
        }
    }
    creds
}

pub fn load_credentials(path: &Path) -> anyhow::Result<Credentials> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read credentials file {path:?}: {e}"))?;
    Ok(parse_credentials(&contents))
}

/// Parse the settings file. `-` prefixed subtitle preference patterns are
/// kept verbatim (negation is `common::preferences`'s concern, not this
/// parser's) and may repeat under the same key.
pub fn parse_settings(contents: &str) -> RawSettings {
    let mut raw = RawSettings::default();
    for (key, value) in parse_kv_lines(contents) {
        match key.as_str() {
            "ServerUrl" => raw.server_url = Some(value),
            "ActiveTickSeconds" => raw.active_tick_secs = value.parse().ok(),
            "IdleTickSeconds" => raw.idle_tick_secs = value.parse().ok(),
            "MaxRewindSeconds" => raw.max_rewind_secs = value.parse().ok(),
            "GracePeriodSeconds" => raw.grace_period_secs = value.parse().ok(),
            "SubtitlePreferencePattern" => raw.subtitle_preference_patterns.push(value),
            "PreferExternalSubtitles" => raw.prefer_external_subtitles = value.parse().ok(),
            "SendDirectToDevice" => raw.send_direct_to_device = value.parse().ok(),
            "PollTimeoutMs" => raw.poll_timeout_ms = value.parse().ok(),
            "LogLevel" => raw.log_level = Some(value),
            _ => {}
        }
    }
    raw
}

pub fn load_settings(path: &Path) -> anyhow::Result<RawSettings> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read settings file {path:?}: {e}"))?;
    Ok(parse_settings(&contents))
}

/// Settings-file template written by `-settings-template`.
pub const SETTINGS_TEMPLATE: &str = "\
# Subtitle rewind agent settings
ServerUrl=http://localhost:32400
ActiveTickSeconds=1
IdleTickSeconds=5
MaxRewindSeconds=60
GracePeriodSeconds=30
PreferExternalSubtitles=false
SendDirectToDevice=true
PollTimeoutMs=1000
LogLevel=info
# Repeat for multiple patterns; a leading - marks a negative pattern.
# SubtitlePreferencePattern=english
# SubtitlePreferencePattern=-sdh
";

/// Credentials-file template written by `-token-template`.
pub const TOKEN_TEMPLATE: &str = "\
AppToken=
ClientIdentifier=
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_credentials() {
        let creds = parse_credentials("AppToken=abc123\nClientIdentifier=xyz\n");
        assert_eq!(creds.app_token, "abc123");
        assert_eq!(creds.client_identifier, "xyz");
    }

    #[test]
    fn ignores_blank_lines_and_comments() {
        let creds = parse_credentials("# a comment\n\nAppToken=abc123\n");
        assert_eq!(creds.app_token, "abc123");
    }

    #[test]
    fn parses_settings_with_repeated_preference_patterns() {
        let raw = parse_settings(
            "ServerUrl=http://host:32400\n\
             SubtitlePreferencePattern=english\n\
             SubtitlePreferencePattern=-sdh\n\
             PreferExternalSubtitles=true\n",
        );
        assert_eq!(raw.server_url.as_deref(), Some("http://host:32400"));
        assert_eq!(raw.subtitle_preference_patterns, vec!["english", "-sdh"]);
        assert_eq!(raw.prefer_external_subtitles, Some(true));
    }

    #[test]
    fn round_trips_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.ini");
        std::fs::write(&path, SETTINGS_TEMPLATE).unwrap();
        let raw = load_settings(&path).unwrap();
        assert_eq!(raw.server_url.as_deref(), Some("http://localhost:32400"));
        assert_eq!(raw.active_tick_secs, Some(1));
    }
}
