//! Monitor Manager: owns one `RewindMonitor` per active
//! session and drives the tick loop that ties the registry, the monitors
//! and the dispatcher together.

use crate::dispatcher::{CommandTarget, SubtitleDispatcher};
use crate::registry::SessionRegistry;
use crate::rewind::{compute_eps_ms, ActionOutcome, RewindMonitor, RewindMonitorState, TickConfig, TickInput};
use common::sse::PlayingPayload;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

struct ManagedMonitor {
    monitor: RewindMonitor,
    target: CommandTarget,
    preferred_subtitle: Option<String>,
}

/// Active-tick/idle-tick cadence this manager should be driven at for its
/// *next* sleep, as decided at the end of the tick just run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Active,
    Idle,
}

pub struct MonitorManager {
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<dyn SubtitleDispatcher>,
    monitors: HashMap<String, ManagedMonitor>,
    active_tick_ms: i64,
    max_rewind_ms: i64,
}

impl MonitorManager {
    pub fn new(
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<dyn SubtitleDispatcher>,
        active_tick: Duration,
        max_rewind: Duration,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            monitors: HashMap::new(),
            active_tick_ms: active_tick.as_millis() as i64,
            max_rewind_ms: max_rewind.as_millis() as i64,
        }
    }

    /// A `playing` push event only ever updates an existing session's
    /// position; it never creates a monitor.
    pub async fn on_push_playing(&self, event: &PlayingPayload) {
        self.registry.apply_push_event(event).await;
    }

    /// Refresh the registry, spin up monitors for newly-discovered sessions,
    /// tick every live monitor once, and tear down monitors for retired
    /// sessions. Returns the cadence the caller should sleep at before the
    /// next call.
    pub async fn run_once(&mut self, now_ms: i64) -> anyhow::Result<Cadence> {
        let outcome = self.registry.refresh(now_ms).await?;
        let sessions = self.registry.list().await;
        let by_id: HashMap<&str, &common::model::PlaybackSession> =
            sessions.iter().map(|s| (s.playback_id.as_str(), s)).collect();

        for playback_id in &outcome.created {
            if let Some(session) = by_id.get(playback_id.as_str()) {
                let state = RewindMonitorState::setup(
                    session.best_position_ms(),
                    session.known_subs_on,
                    !session.has_active_subtitles(),
                );
                self.monitors.insert(
                    playback_id.clone(),
                    ManagedMonitor {
                        monitor: RewindMonitor::new(playback_id.clone(), state),
                        target: target_for(session),
                        preferred_subtitle: session.preferred_subtitle.clone(),
                    },
                );
                debug!(playback_id, "monitor created");
            }
        }

        for (playback_id, managed) in self.monitors.iter_mut() {
            let Some(session) = by_id.get(playback_id.as_str()) else {
                continue;
            };
            managed.target = target_for(session);
            managed.preferred_subtitle = session.preferred_subtitle.clone();

            let eps_ms = compute_eps_ms(self.active_tick_ms, session.accurate_time_ms.is_some());
            let input = TickInput {
                position_ms: session.best_position_ms(),
                active_subtitles_empty: !session.has_active_subtitles(),
                known_subs_on: session.known_subs_on,
            };
            let config = TickConfig {
                max_rewind_ms: self.max_rewind_ms,
                eps_ms,
            };

            let outcome = managed
                .monitor
                .tick(
                    input,
                    config,
                    self.dispatcher.as_ref(),
                    &managed.target,
                    managed.preferred_subtitle.as_deref(),
                )
                .await;

            if let Some(action) = outcome {
                if action.succeeded() {
                    self.registry.mark_known_subs_on_unknown(playback_id).await;
                }
                if matches!(action, ActionOutcome::Enabled) {
                    info!(playback_id, "rewind cycle opened");
                }
            }
        }

        for playback_id in &outcome.retired {
            if let Some(mut managed) = self.monitors.remove(playback_id) {
                managed.monitor.teardown(self.dispatcher.as_ref(), &managed.target).await;
                debug!(playback_id, "monitor torn down");
            }
        }

        // §4.F.5: active cadence iff some live (non-IDLE) monitor's session is
        // known to be playing; a monitor only exists once its setup pass has
        // already moved it out of IDLE, so monitor-exists implies non-IDLE.
        let any_playing = self.monitors.keys().any(|id| {
            by_id.get(id.as_str()).map(|s| s.is_known_playing()).unwrap_or(false)
        });
        Ok(if any_playing { Cadence::Active } else { Cadence::Idle })
    }

    /// Best-effort force-off for any monitor still mid-rewind. Called on
    /// shutdown and when the Connection Supervisor tears the manager down
    /// after losing the server.
    pub async fn force_off_all(&mut self) {
        for (playback_id, managed) in self.monitors.iter_mut() {
            if managed.monitor.state.temp_subs_on {
                managed.monitor.teardown(self.dispatcher.as_ref(), &managed.target).await;
                debug!(playback_id, "forced off during shutdown");
            }
        }
    }

    #[cfg(test)]
    fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    #[cfg(test)]
    fn is_temp_on(&self, playback_id: &str) -> bool {
        self.monitors
            .get(playback_id)
            .map(|m| m.monitor.state.temp_subs_on)
            .unwrap_or(false)
    }

    #[cfg(test)]
    fn latest_watched_ms(&self, playback_id: &str) -> Option<i64> {
        self.monitors
            .get(playback_id)
            .map(|m| m.monitor.state.latest_watched_ms)
    }
}

fn target_for(session: &common::model::PlaybackSession) -> CommandTarget {
    CommandTarget {
        machine_id: session.machine_id.clone(),
        device_name: session.device_name.clone(),
        direct_url: session.direct_url.clone(),
    }
}
