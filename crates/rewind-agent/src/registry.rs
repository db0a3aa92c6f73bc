//! Session Registry: discovers, deduplicates, refreshes and
//! retires active playback sessions.
//!
//! State lives behind an `Arc<RwLock<...>>`, the same shape as the
//! teacher's `coordinator::cluster::ClusterManager` (a private inner
//! struct behind a lock, public async accessor methods). The tick executor
//! is the sole writer; every other caller reads a cloned snapshot.

use crate::poller::TimelinePoller;
use common::error::AgentError;
use common::model::{KnownSubsOn, PlaybackSession, PlayerState};
use common::preferences::{choose_preferred, PreferencePatterns};
use common::sse::PlayingPayload;
use common::xml::{parse_sessions, SessionListing};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[async_trait::async_trait]
pub trait SessionSource: Send + Sync {
    async fn fetch_sessions(&self) -> Result<Vec<SessionListing>, AgentError>;
}

pub struct HttpSessionSource {
    client: reqwest::Client,
    server_url: String,
    auth_token: String,
    client_identifier: String,
}

impl HttpSessionSource {
    pub fn new(
        server_url: String,
        auth_token: String,
        client_identifier: String,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            server_url,
            auth_token,
            client_identifier,
        })
    }
}

#[async_trait::async_trait]
impl SessionSource for HttpSessionSource {
    async fn fetch_sessions(&self) -> Result<Vec<SessionListing>, AgentError> {
        let url = format!("{}/status/sessions", self.server_url.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .header("X-Plex-Token", &self.auth_token)
            .header("X-Plex-Client-Identifier", &self.client_identifier)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AgentError::from_status(
                response.status().as_u16(),
                "status/sessions",
            ));
        }
        let body = response.text().await?;
        parse_sessions(&body)
    }
}

/// Outcome of one `refresh()` cycle: which sessions the Monitor Manager
/// must spin up or tear down monitors for.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub created: Vec<String>,
    pub retired: Vec<String>,
}

pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, PlaybackSession>>>,
    source: Arc<dyn SessionSource>,
    poller: Arc<dyn TimelinePoller>,
    preference_patterns: PreferencePatterns,
    prefer_external: bool,
    grace_period_ms: i64,
}

impl SessionRegistry {
    pub fn new(
        source: Arc<dyn SessionSource>,
        poller: Arc<dyn TimelinePoller>,
        preference_patterns: PreferencePatterns,
        prefer_external: bool,
        grace_period_ms: i64,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            source,
            poller,
            preference_patterns,
            prefer_external,
            grace_period_ms,
        }
    }

    /// A stable snapshot of every currently-tracked session, for the
    /// Monitor Manager's tick loop to iterate over.
    pub async fn list(&self) -> Vec<PlaybackSession> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn get(&self, playback_id: &str) -> Option<PlaybackSession> {
        self.sessions.read().await.get(playback_id).cloned()
    }

    /// Called by the Monitor Manager after any rewind action succeeds: our
    /// own command invalidates whatever the last timeline poll observed,
    /// until the next successful poll reconciles it.
    pub async fn mark_known_subs_on_unknown(&self, playback_id: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(playback_id) {
            session.known_subs_on = KnownSubsOn::Unknown;
        }
    }

    pub async fn remove(&self, playback_id: &str) -> Option<PlaybackSession> {
        self.sessions.write().await.remove(playback_id)
    }

    /// `Playing` push events update position in place; they never create a
    /// session (creation happens only in `refresh`, where media-item
    /// lookup and preference computation live).
    pub async fn apply_push_event(&self, event: &PlayingPayload) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&event.playback_id) {
            session.view_offset_ms = event.view_offset_ms;
            session.accurate_time_ms = Some(event.view_offset_ms);
            session.player_state = PlayerState::from(event.state.as_str());
        }
    }

    /// Fetch the authoritative session listing and reconcile it against the
    /// registry: update matches, create new entries, mark/retire absent
    /// ones. `now_ms` is threaded in so the grace-period logic is
    /// deterministic and unit-testable.
    pub async fn refresh(&self, now_ms: i64) -> Result<RefreshOutcome, AgentError> {
        let listings = self.source.fetch_sessions().await?;
        let seen: BTreeSet<String> = listings.iter().map(|l| l.playback_id.clone()).collect();

        let mut outcome = RefreshOutcome::default();
        let mut sessions = self.sessions.write().await;

        for listing in listings {
            if let Some(existing) = sessions.get_mut(&listing.playback_id) {
                existing.view_offset_ms = listing.view_offset_ms;
                existing.active_subtitles = listing.active_subtitles.clone();
                existing.available_subtitles = listing.available_subtitles.clone();
                existing.device_name = listing.device_name.clone();
                existing.direct_url = listing.direct_url.clone();
                existing.last_seen_epoch_ms = None;

                self.reconcile_timeline(existing, &listing).await;
            } else {
                let preferred_subtitle = choose_preferred(
                    &listing.available_subtitles,
                    &self.preference_patterns,
                    self.prefer_external,
                );
                let mut session = PlaybackSession {
                    playback_id: listing.playback_id.clone(),
                    device_name: listing.device_name.clone(),
                    machine_id: listing.machine_id.clone(),
                    media_title: listing.media_title.clone(),
                    direct_url: listing.direct_url.clone(),
                    available_subtitles: listing.available_subtitles.clone(),
                    active_subtitles: listing.active_subtitles.clone(),
                    preferred_subtitle,
                    view_offset_ms: listing.view_offset_ms,
                    accurate_time_ms: None,
                    known_subs_on: KnownSubsOn::Unknown,
                    last_seen_epoch_ms: None,
                    player_state: PlayerState::Unknown,
                };
                self.reconcile_timeline(&mut session, &listing).await;

                info!(
                    playback_id = %listing.playback_id,
                    device = %listing.device_name,
                    "new playback session discovered"
                );
                sessions.insert(listing.playback_id.clone(), session);
                outcome.created.push(listing.playback_id);
            }
        }

        let mut to_retire = Vec::new();
        for (playback_id, session) in sessions.iter_mut() {
            if seen.contains(playback_id) {
                continue;
            }
            match session.last_seen_epoch_ms {
                None => {
                    session.last_seen_epoch_ms = Some(now_ms);
                    debug!(playback_id, "session absent from refresh, starting grace period");
                }
                Some(last_seen) if now_ms - last_seen > self.grace_period_ms => {
                    to_retire.push(playback_id.clone());
                }
                Some(_) => {}
            }
        }

        for playback_id in &to_retire {
            sessions.remove(playback_id);
            warn!(playback_id, "session retired after exceeding grace period");
        }
        outcome.retired = to_retire;

        Ok(outcome)
    }

    async fn reconcile_timeline(&self, session: &mut PlaybackSession, listing: &SessionListing) {
        let direct_url = match &listing.direct_url {
            Some(url) => url.clone(),
            None => {
                session.accurate_time_ms = None;
                session.known_subs_on = KnownSubsOn::Unknown;
                return;
            }
        };

        match self
            .poller
            .poll_timeline(&listing.machine_id, &listing.device_name, &direct_url)
            .await
        {
            Some(snapshot) => {
                session.accurate_time_ms = Some(snapshot.time_ms);
                session.known_subs_on = if snapshot.subs_active() {
                    KnownSubsOn::Yes
                } else {
                    KnownSubsOn::No
                };
                session.player_state = snapshot.state;
            }
            None => {
                session.accurate_time_ms = None;
                session.known_subs_on = KnownSubsOn::Unknown;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::model::{PlayerState, TimelineSnapshot};
    use std::sync::Mutex;

    struct FixedSource {
        listings: Mutex<Vec<SessionListing>>,
    }

    #[async_trait::async_trait]
    impl SessionSource for FixedSource {
        async fn fetch_sessions(&self) -> Result<Vec<SessionListing>, AgentError> {
            Ok(self.listings.lock().unwrap().clone())
        }
    }

    struct NoPoller;

    #[async_trait::async_trait]
    impl TimelinePoller for NoPoller {
        async fn poll_timeline(&self, _: &str, _: &str, _: &str) -> Option<TimelineSnapshot> {
            None
        }
    }

    struct FixedPoller(i64);

    #[async_trait::async_trait]
    impl TimelinePoller for FixedPoller {
        async fn poll_timeline(&self, _: &str, _: &str, _: &str) -> Option<TimelineSnapshot> {
            Some(TimelineSnapshot {
                time_ms: self.0,
                subtitle_stream_id: "0".to_string(),
                state: PlayerState::Playing,
            })
        }
    }

    fn listing(playback_id: &str, offset: i64) -> SessionListing {
        SessionListing {
            playback_id: playback_id.to_string(),
            machine_id: "m1".to_string(),
            device_name: "Living Room".to_string(),
            direct_url: Some("http://10.0.0.5:32500".to_string()),
            media_title: "Movie".to_string(),
            view_offset_ms: offset,
            available_subtitles: vec![],
            active_subtitles: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn refresh_creates_new_sessions() {
        let source = Arc::new(FixedSource {
            listings: Mutex::new(vec![listing("pb-1", 1000)]),
        });
        let registry = SessionRegistry::new(
            source,
            Arc::new(NoPoller),
            PreferencePatterns::default(),
            false,
            30_000,
        );
        let outcome = registry.refresh(0).await.unwrap();
        assert_eq!(outcome.created, vec!["pb-1".to_string()]);
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn absent_session_is_retired_only_after_grace_period() {
        let source = Arc::new(FixedSource {
            listings: Mutex::new(vec![listing("pb-1", 1000)]),
        });
        let registry = SessionRegistry::new(
            source.clone(),
            Arc::new(NoPoller),
            PreferencePatterns::default(),
            false,
            30_000,
        );
        registry.refresh(0).await.unwrap();

        source.listings.lock().unwrap().clear();

        let outcome = registry.refresh(5_000).await.unwrap();
        assert!(outcome.retired.is_empty());
        assert_eq!(registry.list().await.len(), 1);

        let outcome = registry.refresh(40_000).await.unwrap();
        assert_eq!(outcome.retired, vec!["pb-1".to_string()]);
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn reappearing_session_keeps_state_within_grace_period() {
        let source = Arc::new(FixedSource {
            listings: Mutex::new(vec![listing("pb-1", 1000)]),
        });
        let registry = SessionRegistry::new(
            source.clone(),
            Arc::new(NoPoller),
            PreferencePatterns::default(),
            false,
            30_000,
        );
        registry.refresh(0).await.unwrap();
        source.listings.lock().unwrap().clear();
        registry.refresh(1_000).await.unwrap();

        source.listings.lock().unwrap().push(listing("pb-1", 2000));
        let outcome = registry.refresh(2_000).await.unwrap();
        assert!(outcome.created.is_empty());
        assert!(outcome.retired.is_empty());
        let session = registry.get("pb-1").await.unwrap();
        assert_eq!(session.last_seen_epoch_ms, None);
    }

    #[tokio::test]
    async fn successful_poll_sets_accurate_time_and_known_subs() {
        let source = Arc::new(FixedSource {
            listings: Mutex::new(vec![listing("pb-1", 1000)]),
        });
        let registry = SessionRegistry::new(
            source,
            Arc::new(FixedPoller(1234)),
            PreferencePatterns::default(),
            false,
            30_000,
        );
        registry.refresh(0).await.unwrap();
        let session = registry.get("pb-1").await.unwrap();
        assert_eq!(session.accurate_time_ms, Some(1234));
        assert_eq!(session.known_subs_on, KnownSubsOn::No);
    }

    #[tokio::test]
    async fn push_event_updates_position_without_creating_a_session() {
        let source = Arc::new(FixedSource {
            listings: Mutex::new(vec![]),
        });
        let registry = SessionRegistry::new(
            source,
            Arc::new(NoPoller),
            PreferencePatterns::default(),
            false,
            30_000,
        );
        registry
            .apply_push_event(&PlayingPayload {
                session_key: "1".to_string(),
                playback_id: "pb-unknown".to_string(),
                view_offset_ms: 5000,
                state: "playing".to_string(),
            })
            .await;
        assert!(registry.get("pb-unknown").await.is_none());
    }
}
