//! Timeline Poller: high-resolution position + active
//! subtitle stream id for one device, fetched on demand inside the tick loop.

use async_trait::async_trait;
use common::error::AgentError;
use common::model::TimelineSnapshot;
use common::xml::parse_timeline;
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait TimelinePoller: Send + Sync {
    async fn poll_timeline(
        &self,
        machine_id: &str,
        device_name: &str,
        direct_url: &str,
    ) -> Option<TimelineSnapshot>;
}

/// Uses a **short** timeout because this call runs inside the tick loop
/// a separate `reqwest::Client` from the dispatcher's so
/// poll-class GETs never share, or starve, the command gate.
pub struct HttpTimelinePoller {
    client: reqwest::Client,
}

impl HttpTimelinePoller {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn fetch(&self, direct_url: &str) -> Result<Option<TimelineSnapshot>, AgentError> {
        let url = format!(
            "{}/player/timeline/poll?wait=0",
            direct_url.trim_end_matches('/')
        );
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AgentError::from_status(
                response.status().as_u16(),
                "timeline poll",
            ));
        }
        let body = response.text().await?;
        parse_timeline(&body)
    }
}

#[async_trait]
impl TimelinePoller for HttpTimelinePoller {
    async fn poll_timeline(
        &self,
        machine_id: &str,
        device_name: &str,
        direct_url: &str,
    ) -> Option<TimelineSnapshot> {
        match self.fetch(direct_url).await {
            Ok(snapshot) => snapshot,
            Err(AgentError::Transport(_)) => {
                // A timeout is expected when the device app is closed; this
                // is not an error-level condition.
                debug!(
                    machine_id,
                    device_name, "timeline poll timed out, device likely closed"
                );
                None
            }
            Err(e) => {
                debug!(machine_id, device_name, error = %e, "timeline poll failed");
                None
            }
        }
    }
}
