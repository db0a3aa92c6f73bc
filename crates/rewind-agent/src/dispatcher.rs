//! Command Dispatcher: single-flight issuance of subtitle
//! stream changes, with per-device direct-path fallback.

use async_trait::async_trait;
use common::error::AgentError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Where a command should be routed: the server's own `/player/...` path
/// plus, when known, the device's direct callback URL.
#[derive(Debug, Clone)]
pub struct CommandTarget {
    pub machine_id: String,
    pub device_name: String,
    pub direct_url: Option<String>,
}

#[async_trait]
pub trait SubtitleDispatcher: Send + Sync {
    /// `stream_id_or_zero = "0"` disables subtitles.
    async fn set_subtitle_stream(
        &self,
        target: &CommandTarget,
        stream_id_or_zero: &str,
    ) -> Result<(), AgentError>;
}

/// HTTP-backed dispatcher: the one real implementation used in production.
///
/// All outgoing commands share `gate`, a single-permit semaphore, so
/// contradictory or near-simultaneous commands are never in flight
/// together. Poll-class GETs never touch
/// this gate — see `crate::poller`.
pub struct HttpCommandDispatcher {
    client: reqwest::Client,
    gate: Arc<Semaphore>,
    server_url: String,
    auth_token: String,
    client_identifier: String,
    send_direct_to_device: bool,
    command_counter: AtomicU64,
}

impl HttpCommandDispatcher {
    pub fn new(
        server_url: String,
        auth_token: String,
        client_identifier: String,
        send_direct_to_device: bool,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            gate: Arc::new(Semaphore::new(1)),
            server_url,
            auth_token,
            client_identifier,
            send_direct_to_device,
            command_counter: AtomicU64::new(1),
        })
    }

    fn next_command_id(&self) -> u64 {
        self.command_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn build_request(
        &self,
        base_url: &str,
        target: &CommandTarget,
        stream_id_or_zero: &str,
        is_direct: bool,
    ) -> reqwest::RequestBuilder {
        let command_id = self.next_command_id();
        let url = format!(
            "{}/player/playback/setStreams?subtitleStreamID={}&type=video&commandID={}",
            base_url.trim_end_matches('/'),
            stream_id_or_zero,
            command_id
        );
        let mut request = self
            .client
            .get(url)
            .header("X-Plex-Token", &self.auth_token)
            .header("X-Plex-Client-Identifier", &self.client_identifier)
            .header("X-Plex-Target-Client-Identifier", &target.machine_id);

        if is_direct {
            request = request.header("X-Plex-Device-Name", &target.device_name);
        }
        request
    }

    async fn issue(
        &self,
        base_url: &str,
        target: &CommandTarget,
        stream_id_or_zero: &str,
        is_direct: bool,
    ) -> Result<(), AgentError> {
        let response = self
            .build_request(base_url, target, stream_id_or_zero, is_direct)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(AgentError::from_status(status, &body))
    }

    fn routes(&self, target: &CommandTarget) -> Vec<(String, bool)> {
        let server = (self.server_url.clone(), false);
        let direct = target
            .direct_url
            .as_ref()
            .map(|u| (u.clone(), true));

        match (self.send_direct_to_device, direct) {
            (true, Some(direct)) => vec![direct, server],
            (_, Some(direct)) => vec![server, direct],
            (_, None) => vec![server],
        }
    }
}

#[async_trait]
impl SubtitleDispatcher for HttpCommandDispatcher {
    async fn set_subtitle_stream(
        &self,
        target: &CommandTarget,
        stream_id_or_zero: &str,
    ) -> Result<(), AgentError> {
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Err(AgentError::Other("command gate semaphore closed".to_string())),
        };

        let routes = self.routes(target);
        let mut last_err = None;

        for (idx, (base_url, is_direct)) in routes.iter().enumerate() {
            match self
                .issue(base_url, target, stream_id_or_zero, *is_direct)
                .await
            {
                Ok(()) => {
                    debug!(
                        device = %target.device_name,
                        stream = stream_id_or_zero,
                        route = %base_url,
                        "subtitle command acknowledged"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        device = %target.device_name,
                        route = %base_url,
                        attempt = idx,
                        error = %e,
                        "subtitle command failed"
                    );
                    last_err = Some(e);
                }
            }
            // Only the primary route retries on the secondary; there is no
            // secondary after the secondary fails.
            if idx == 1 {
                break;
            }
        }

        Err(last_err.unwrap_or_else(|| AgentError::Other("no route available".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_with_direct() -> CommandTarget {
        CommandTarget {
            machine_id: "machine-1".to_string(),
            device_name: "Living Room".to_string(),
            direct_url: Some("http://10.0.0.5:32500".to_string()),
        }
    }

    #[test]
    fn routes_prefer_direct_when_configured() {
        let d = HttpCommandDispatcher::new(
            "http://server:32400".to_string(),
            "tok".to_string(),
            "client".to_string(),
            true,
            Duration::from_secs(1),
        )
        .unwrap();
        let routes = d.routes(&target_with_direct());
        assert_eq!(routes[0].0, "http://10.0.0.5:32500");
        assert_eq!(routes[1].0, "http://server:32400");
    }

    #[test]
    fn routes_prefer_server_when_not_configured() {
        let d = HttpCommandDispatcher::new(
            "http://server:32400".to_string(),
            "tok".to_string(),
            "client".to_string(),
            false,
            Duration::from_secs(1),
        )
        .unwrap();
        let routes = d.routes(&target_with_direct());
        assert_eq!(routes[0].0, "http://server:32400");
        assert_eq!(routes[1].0, "http://10.0.0.5:32500");
    }

    #[test]
    fn no_direct_url_means_a_single_route() {
        let d = HttpCommandDispatcher::new(
            "http://server:32400".to_string(),
            "tok".to_string(),
            "client".to_string(),
            true,
            Duration::from_secs(1),
        )
        .unwrap();
        let target = CommandTarget {
            machine_id: "m".to_string(),
            device_name: "d".to_string(),
            direct_url: None,
        };
        assert_eq!(d.routes(&target).len(), 1);
    }
}
