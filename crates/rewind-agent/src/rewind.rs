//! Rewind Monitor: the state machine that decides when to
//! enable, reach-original, or force-off subtitles for one session.
//!
//! The transition function is pure — `(state, tick_input, config) ->
//! (next_state, action)` — so properties §8.1-§8.4 are unit-testable
//! without any network. The impure wrapper
//! around it owns the one side effect: calling the dispatcher, and only
//! commits an action's state change when the dispatcher reports success
//! (a failed enable leaves temp_subs_on = false).

use crate::dispatcher::{CommandTarget, SubtitleDispatcher};
use common::model::KnownSubsOn;
use tracing::{info, warn};

/// Default resolution assumed when no high-resolution timeline sample is
/// available for this session this tick; finer once one is.
const DEFAULT_COARSE_RESOLUTION_MS: i64 = 1_000;
const DEFAULT_ACCURATE_RESOLUTION_MS: i64 = 250;

pub const FF_MARGIN_MS: i64 = 2_000;
pub const REWIND_TRIGGER_MS: i64 = 2_000;

/// `eps = smallest_resolution_ms`, the minimum difference meaningful given
/// available telemetry this tick.
pub fn compute_eps_ms(active_tick_ms: i64, has_accurate_time: bool) -> i64 {
    let resolution = if has_accurate_time {
        DEFAULT_ACCURATE_RESOLUTION_MS
    } else {
        DEFAULT_COARSE_RESOLUTION_MS
    };
    active_tick_ms.max(resolution)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewindMonitorState {
    pub is_monitoring: bool,
    pub user_enabled_subs: bool,
    pub latest_watched_ms: i64,
    pub previous_position_ms: i64,
    pub temp_subs_on: bool,
    pub smallest_resolution_ms: i64,
}

impl RewindMonitorState {
    /// Initial setup pass run once when a session is added to the
    /// registry: snapshot position, latch whether the user already has
    /// subs on independently of us, and start WATCHING.
    pub fn setup(position_ms: i64, known_subs_on: KnownSubsOn, active_subtitles_empty: bool) -> Self {
        Self {
            is_monitoring: true,
            user_enabled_subs: known_subs_on == KnownSubsOn::Yes || !active_subtitles_empty,
            latest_watched_ms: position_ms,
            previous_position_ms: position_ms,
            temp_subs_on: false,
            smallest_resolution_ms: DEFAULT_COARSE_RESOLUTION_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickConfig {
    pub max_rewind_ms: i64,
    pub eps_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInput {
    pub position_ms: i64,
    pub active_subtitles_empty: bool,
    pub known_subs_on: KnownSubsOn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingAction {
    Enable,
    ReachOriginal,
    /// `fast_forward` distinguishes the two force-off paths for logging
    /// only; the wire call is identical.
    ForceOff { fast_forward: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickResult {
    pub next_state: RewindMonitorState,
    pub action: Option<PendingAction>,
}

/// The pure transition function. Positional bookkeeping (`previous_position_ms`,
/// and `latest_watched_ms` where the rule calls for updating it unconditionally)
/// is applied here; fields that depend on a dispatch outcome (`temp_subs_on`,
/// and the post-force-off reset of `latest_watched_ms`) are left to the
/// caller to apply once the action's result is known.
pub fn tick(state: &RewindMonitorState, input: TickInput, config: TickConfig) -> TickResult {
    let mut next = state.clone();
    next.smallest_resolution_ms = config.eps_ms;
    let mut action = None;

    if next.user_enabled_subs {
        next.latest_watched_ms = input.position_ms;
        if input.active_subtitles_empty && input.known_subs_on != KnownSubsOn::Unknown {
            next.user_enabled_subs = false;
        }
    } else if next.temp_subs_on {
        if input.position_ms > next.latest_watched_ms + config.eps_ms + FF_MARGIN_MS {
            action = Some(PendingAction::ForceOff { fast_forward: true });
        } else if input.position_ms < next.latest_watched_ms - config.max_rewind_ms {
            action = Some(PendingAction::ForceOff { fast_forward: false });
        } else if input.position_ms > next.latest_watched_ms + config.eps_ms {
            action = Some(PendingAction::ReachOriginal);
        }
        // else: still inside the rewound region, no action, no update.
    } else {
        let rewound = input.position_ms < next.latest_watched_ms - REWIND_TRIGGER_MS;
        let over_rewound = input.position_ms < next.latest_watched_ms - config.max_rewind_ms;
        if rewound && !over_rewound {
            action = Some(PendingAction::Enable);
        } else {
            next.latest_watched_ms = input.position_ms;
        }
    }

    next.previous_position_ms = input.position_ms;
    TickResult {
        next_state: next,
        action,
    }
}

/// Outcome of one monitor tick, for the Monitor Manager to react to (it
/// owns the registry write that sets `known_subs_on = Unknown` on success,
/// since that field lives on `PlaybackSession`, not `RewindMonitorState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Enabled,
    EnableFailed,
    EnableSkippedNoSubtitles,
    ReachedOriginal,
    ReachOriginalFailed,
    ForcedOff,
    ForceOffFailed,
}

impl ActionOutcome {
    pub fn succeeded(self) -> bool {
        matches!(
            self,
            ActionOutcome::Enabled | ActionOutcome::ReachedOriginal | ActionOutcome::ForcedOff
        )
    }
}

/// The impure wrapper: owns one session's `RewindMonitorState` and drives
/// it forward one tick at a time, calling the dispatcher for any action
/// the pure transition produced.
pub struct RewindMonitor {
    pub playback_id: String,
    pub state: RewindMonitorState,
}

impl RewindMonitor {
    pub fn new(playback_id: String, state: RewindMonitorState) -> Self {
        Self { playback_id, state }
    }

    /// Run one tick. Returns `None` when no action was taken this tick.
    ///
    /// A failed dispatch call is logged and does not advance the state
    /// machine: the positional bookkeeping already applied by
    /// the pure transition stands, but `temp_subs_on` does not flip.
    pub async fn tick(
        &mut self,
        input: TickInput,
        config: TickConfig,
        dispatcher: &dyn SubtitleDispatcher,
        target: &CommandTarget,
        preferred_subtitle: Option<&str>,
    ) -> Option<ActionOutcome> {
        let result = tick(&self.state, input, config);
        self.state = result.next_state;

        match result.action? {
            PendingAction::Enable => Some(self.enable(dispatcher, target, preferred_subtitle).await),
            PendingAction::ReachOriginal => {
                Some(self.reach_original(dispatcher, target, input.position_ms).await)
            }
            PendingAction::ForceOff { fast_forward } => {
                Some(self.force_off(dispatcher, target, input.position_ms, fast_forward).await)
            }
        }
    }

    async fn enable(
        &mut self,
        dispatcher: &dyn SubtitleDispatcher,
        target: &CommandTarget,
        preferred_subtitle: Option<&str>,
    ) -> ActionOutcome {
        let Some(stream_id) = preferred_subtitle else {
            info!(playback_id = %self.playback_id, "rewind detected but no subtitles available, skipping enable");
            return ActionOutcome::EnableSkippedNoSubtitles;
        };

        match dispatcher.set_subtitle_stream(target, stream_id).await {
            Ok(()) => {
                self.state.temp_subs_on = true;
                info!(playback_id = %self.playback_id, stream_id, "enabled subtitles for rewind");
                ActionOutcome::Enabled
            }
            Err(e) => {
                warn!(playback_id = %self.playback_id, error = %e, "failed to enable subtitles");
                ActionOutcome::EnableFailed
            }
        }
    }

    async fn reach_original(
        &mut self,
        dispatcher: &dyn SubtitleDispatcher,
        target: &CommandTarget,
        _position_ms: i64,
    ) -> ActionOutcome {
        match dispatcher.set_subtitle_stream(target, "0").await {
            Ok(()) => {
                self.state.temp_subs_on = false;
                info!(playback_id = %self.playback_id, "caught up with rewind point, disabling subtitles");
                ActionOutcome::ReachedOriginal
            }
            Err(e) => {
                warn!(playback_id = %self.playback_id, error = %e, "failed to disable subtitles after catching up");
                ActionOutcome::ReachOriginalFailed
            }
        }
    }

    async fn force_off(
        &mut self,
        dispatcher: &dyn SubtitleDispatcher,
        target: &CommandTarget,
        position_ms: i64,
        fast_forward: bool,
    ) -> ActionOutcome {
        match dispatcher.set_subtitle_stream(target, "0").await {
            Ok(()) => {
                self.state.temp_subs_on = false;
                self.state.latest_watched_ms = position_ms;
                info!(
                    playback_id = %self.playback_id,
                    fast_forward,
                    "forced subtitles off"
                );
                ActionOutcome::ForcedOff
            }
            Err(e) => {
                warn!(playback_id = %self.playback_id, error = %e, "failed to force subtitles off");
                ActionOutcome::ForceOffFailed
            }
        }
    }

    /// Called when the session retires. If we are mid-rewind, force subtitles
    /// off best-effort before the monitor is dropped.
    pub async fn teardown(&mut self, dispatcher: &dyn SubtitleDispatcher, target: &CommandTarget) {
        if self.state.temp_subs_on {
            let _ = self.force_off(dispatcher, target, self.state.latest_watched_ms, false).await;
        }
    }
}
