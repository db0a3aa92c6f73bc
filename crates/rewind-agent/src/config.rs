//! Process-wide configuration: loaded once at startup, read-only afterward.
//!
//! A layered-defaults, fallible-builder shape: settings-file and
//! credentials-file sources are merged in before any default is applied.

use common::preferences::PreferencePatterns;
use std::time::Duration;

/// Process-wide configuration. Threaded through constructors as an
/// `Arc<Configuration>`; never a mutable singleton.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub server_url: String,
    pub auth_token: String,
    pub client_identifier: String,
    pub active_tick: Duration,
    pub idle_tick: Duration,
    pub max_rewind: Duration,
    pub grace_period: Duration,
    pub subtitle_preference_patterns: Vec<String>,
    pub prefer_external_subtitles: bool,
    pub send_direct_to_device: bool,
    pub poll_timeout: Duration,
    pub command_timeout: Duration,
    pub log_level: String,
    pub background_mode: bool,
}

impl Configuration {
    pub fn preference_patterns(&self) -> PreferencePatterns {
        PreferencePatterns::parse(&self.subtitle_preference_patterns)
    }
}

/// Raw, serde-friendly view of the settings file plus any CLI overrides,
/// before defaults are applied and durations are constructed.
#[derive(Debug, Clone, Default)]
pub struct RawSettings {
    pub server_url: Option<String>,
    pub active_tick_secs: Option<u64>,
    pub idle_tick_secs: Option<u64>,
    pub max_rewind_secs: Option<u64>,
    pub grace_period_secs: Option<u64>,
    pub subtitle_preference_patterns: Vec<String>,
    pub prefer_external_subtitles: Option<bool>,
    pub send_direct_to_device: Option<bool>,
    pub poll_timeout_ms: Option<u64>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub app_token: String,
    pub client_identifier: String,
}

/// Build the final `Configuration` from a settings file, a credentials
/// file, and the `-background`/`-debug`/`-verbose` CLI flags.
///
/// Returns an error (caller maps this to a non-zero exit code) when the
/// server URL or the credentials are missing — everything else has a
/// documented default.
pub fn build_configuration(
    raw: RawSettings,
    creds: Credentials,
    background_mode: bool,
    debug: bool,
    verbose: bool,
) -> anyhow::Result<Configuration> {
    let server_url = raw
        .server_url
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow::anyhow!("settings file is missing a server URL"))?;

    if creds.app_token.is_empty() {
        anyhow::bail!("credentials file is missing AppToken");
    }

    let log_level = if debug {
        "debug".to_string()
    } else if verbose {
        "trace".to_string()
    } else {
        raw.log_level.unwrap_or_else(|| "info".to_string())
    };

    Ok(Configuration {
        server_url,
        auth_token: creds.app_token,
        client_identifier: creds.client_identifier,
        active_tick: Duration::from_secs(raw.active_tick_secs.unwrap_or(1)),
        idle_tick: Duration::from_secs(raw.idle_tick_secs.unwrap_or(5)),
        max_rewind: Duration::from_secs(raw.max_rewind_secs.unwrap_or(60)),
        grace_period: Duration::from_secs(raw.grace_period_secs.unwrap_or(30)),
        subtitle_preference_patterns: raw.subtitle_preference_patterns,
        prefer_external_subtitles: raw.prefer_external_subtitles.unwrap_or(false),
        send_direct_to_device: raw.send_direct_to_device.unwrap_or(true),
        poll_timeout: Duration::from_millis(raw.poll_timeout_ms.unwrap_or(1_000)),
        command_timeout: Duration::from_secs(5),
        log_level,
        background_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            app_token: "tok".to_string(),
            client_identifier: "client-1".to_string(),
        }
    }

    #[test]
    fn applies_documented_defaults() {
        let raw = RawSettings {
            server_url: Some("http://localhost:32400".to_string()),
            ..Default::default()
        };
        let config = build_configuration(raw, creds(), false, false, false).unwrap();
        assert_eq!(config.active_tick, Duration::from_secs(1));
        assert_eq!(config.idle_tick, Duration::from_secs(5));
        assert_eq!(config.max_rewind, Duration::from_secs(60));
        assert!(config.send_direct_to_device);
    }

    #[test]
    fn missing_server_url_is_an_error() {
        let raw = RawSettings::default();
        assert!(build_configuration(raw, creds(), false, false, false).is_err());
    }

    #[test]
    fn missing_token_is_an_error() {
        let raw = RawSettings {
            server_url: Some("http://localhost:32400".to_string()),
            ..Default::default()
        };
        let err_creds = Credentials::default();
        assert!(build_configuration(raw, err_creds, false, false, false).is_err());
    }

    #[test]
    fn debug_flag_overrides_configured_log_level() {
        let raw = RawSettings {
            server_url: Some("http://localhost:32400".to_string()),
            log_level: Some("warn".to_string()),
            ..Default::default()
        };
        let config = build_configuration(raw, creds(), false, true, false).unwrap();
        assert_eq!(config.log_level, "debug");
    }
}
