//! Connection Supervisor: probes the server, and while it is
//! reachable keeps the Event Listener and Monitor Manager's tick loop both
//! running; on disconnection or maintenance it backs off and retries.

use crate::backoff::Backoff;
use crate::listener::HttpEventListener;
use crate::manager::{Cadence, MonitorManager};
use common::error::AgentError;
use common::sse::NotificationEvent;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Maintenance,
    Unreachable,
    Unauthorized,
    Rejected,
}

/// Why the supervisor's reconnect loop returned control to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// `cancel` fired; shutdown proceeded normally.
    Cancelled,
    /// A 401 was observed, either at the probe or from a call inside a
    /// connected session. In either case, the
    /// supervisor does not keep retrying — it gives up and the caller
    /// surfaces a fatal result upward so the host can re-run the token flow.
    AuthFailed,
}

/// Why a connected session (listener + tick loop running together) ended.
enum ConnectedExit {
    Disconnected,
    AuthFailed,
}

pub struct ConnectionSupervisor {
    client: reqwest::Client,
    server_url: String,
}

impl ConnectionSupervisor {
    pub fn new(server_url: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, server_url })
    }

    pub async fn probe(&self) -> ProbeOutcome {
        match self.client.get(&self.server_url).send().await {
            Ok(response) if response.status().is_success() => ProbeOutcome::Healthy,
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                match AgentError::from_status(status, &body) {
                    AgentError::ServerMaintenance => ProbeOutcome::Maintenance,
                    AgentError::Auth(_) => ProbeOutcome::Unauthorized,
                    _ => ProbeOutcome::Rejected,
                }
            }
            Err(_) => ProbeOutcome::Unreachable,
        }
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Runs until `cancel` fires. Owns the reconnect loop: probe, and while
/// healthy, drive the listener and the manager's tick loop together.
pub async fn run(
    supervisor: ConnectionSupervisor,
    listener: Arc<HttpEventListener>,
    manager: Arc<Mutex<MonitorManager>>,
    active_tick: Duration,
    idle_tick: Duration,
    cancel: CancellationToken,
) -> SupervisorExit {
    let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(30));
    // Maintenance is a recoverable, expected condition (the server told us
    // so), so the supervisor stays optimistic and retries on a shorter curve
    // than an unexplained disconnect or refusal.
    let mut maintenance_backoff = Backoff::new(Duration::from_millis(250), Duration::from_secs(5));

    while !cancel.is_cancelled() {
        match supervisor.probe().await {
            ProbeOutcome::Healthy => {
                backoff.reset();
                maintenance_backoff.reset();
                match run_connected_session(&listener, &manager, active_tick, idle_tick, &cancel).await {
                    ConnectedExit::Disconnected => {}
                    ConnectedExit::AuthFailed => {
                        warn!("authentication failed, giving up reconnect attempts");
                        manager.lock().await.force_off_all().await;
                        return SupervisorExit::AuthFailed;
                    }
                }
            }
            ProbeOutcome::Unauthorized => {
                warn!("authentication failed during probe, giving up reconnect attempts");
                manager.lock().await.force_off_all().await;
                return SupervisorExit::AuthFailed;
            }
            ProbeOutcome::Maintenance => {
                info!("server reports maintenance mode, backing off before retrying");
                wait_or_cancel(maintenance_backoff.next(), &cancel).await;
            }
            ProbeOutcome::Unreachable | ProbeOutcome::Rejected => {
                warn!("server unreachable, backing off before retrying");
                wait_or_cancel(backoff.next(), &cancel).await;
            }
        }
    }

    manager.lock().await.force_off_all().await;
    SupervisorExit::Cancelled
}

async fn wait_or_cancel(delay: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = cancel.cancelled() => {}
    }
}

/// Runs the event listener and the tick loop concurrently for as long as
/// the connection survives, returning control to the reconnect loop the
/// moment either side observes a disconnect (or `cancel` fires).
async fn run_connected_session(
    listener: &Arc<HttpEventListener>,
    manager: &Arc<Mutex<MonitorManager>>,
    active_tick: Duration,
    idle_tick: Duration,
    cancel: &CancellationToken,
) -> ConnectedExit {
    let (tx, mut rx) = mpsc::channel::<NotificationEvent>(64);
    let listener_token = cancel.child_token();

    let listener_clone = listener.clone();
    let listener_token_clone = listener_token.clone();
    let mut listener_handle =
        tokio::spawn(async move { listener_clone.run(tx, listener_token_clone).await });

    let mut sleep = Box::pin(tokio::time::sleep(Duration::from_millis(0)));

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                listener_token.cancel();
                let _ = (&mut listener_handle).await;
                return ConnectedExit::Disconnected;
            }
            result = &mut listener_handle => {
                let auth_failed = match result {
                    Ok(Ok(())) => {
                        info!("event listener stopped cleanly");
                        false
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "event listener disconnected");
                        e.is_fatal_auth()
                    }
                    Err(e) => {
                        warn!(error = %e, "event listener task panicked");
                        false
                    }
                };
                return if auth_failed {
                    ConnectedExit::AuthFailed
                } else {
                    ConnectedExit::Disconnected
                };
            }
            event = rx.recv() => {
                match event {
                    Some(NotificationEvent::Playing(payload)) => {
                        manager.lock().await.on_push_playing(&payload).await;
                    }
                    Some(_) => {}
                    None => {
                        // listener_handle's branch above will resolve next
                        // iteration with the real disconnect reason.
                        continue;
                    }
                }
            }
            _ = &mut sleep => {
                let cadence = manager.lock().await.run_once(now_ms()).await;
                let next = match cadence {
                    Ok(Cadence::Active) => active_tick,
                    Ok(Cadence::Idle) => idle_tick,
                    Err(e) => {
                        let auth_failed = e
                            .downcast_ref::<AgentError>()
                            .map(AgentError::is_fatal_auth)
                            .unwrap_or(false);
                        warn!(error = %e, "tick loop failed to refresh sessions");
                        listener_token.cancel();
                        let _ = (&mut listener_handle).await;
                        return if auth_failed {
                            ConnectedExit::AuthFailed
                        } else {
                            ConnectedExit::Disconnected
                        };
                    }
                };
                sleep.as_mut().reset(tokio::time::Instant::now() + next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maintenance_status_is_classified_distinctly_from_other_rejections() {
        assert_eq!(
            AgentError::from_status(503, "the server is undergoing maintenance"),
            AgentError::ServerMaintenance
        );
        assert!(!matches!(
            AgentError::from_status(401, ""),
            AgentError::ServerMaintenance
        ));
    }

    #[test]
    fn unauthorized_status_is_fatal() {
        assert!(AgentError::from_status(401, "").is_fatal_auth());
        assert!(!AgentError::from_status(404, "").is_fatal_auth());
        assert!(!AgentError::from_status(503, "maintenance").is_fatal_auth());
    }
}
