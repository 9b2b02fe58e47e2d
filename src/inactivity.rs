//! Inactivity monitor: warning and forced logout after idle periods
//!
//! While armed the monitor owns exactly one pair of scheduled callbacks, a
//! warning timer and a logout timer, sharing one cancellation token. Every
//! re-arm or reset cancels the pair and schedules a fresh one under a new
//! generation number; callbacks from an older generation do nothing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Callback run when the idle period runs out
pub type ExpiryHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    /// No session, no timers
    Disarmed,
    IdleArmed,
    /// Logout is less than the warning time away
    Warning,
    /// Idle period elapsed; the logout callback has been run
    Expired,
}

/// User interactions that count as activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityEvent {
    PointerDown,
    PointerMove,
    KeyPress,
    Scroll,
    TouchStart,
}

impl ActivityEvent {
    pub const ALL: [ActivityEvent; 5] = [
        ActivityEvent::PointerDown,
        ActivityEvent::PointerMove,
        ActivityEvent::KeyPress,
        ActivityEvent::Scroll,
        ActivityEvent::TouchStart,
    ];

    /// Map a DOM event name onto a qualifying activity
    pub fn from_dom_event(name: &str) -> Option<ActivityEvent> {
        match name {
            "mousedown" | "pointerdown" => Some(ActivityEvent::PointerDown),
            "mousemove" | "pointermove" => Some(ActivityEvent::PointerMove),
            "keypress" | "keydown" => Some(ActivityEvent::KeyPress),
            "scroll" | "wheel" => Some(ActivityEvent::Scroll),
            "touchstart" => Some(ActivityEvent::TouchStart),
            _ => None,
        }
    }
}

struct MonitorState {
    phase: MonitorPhase,
    generation: u64,
    /// Cancels the live timer pair
    timers: Option<CancellationToken>,
    armed_at: Option<Instant>,
    on_expired: Option<ExpiryHook>,
    runtime: Option<Handle>,
}

pub struct InactivityMonitor {
    inactivity_time: Duration,
    warning_time: Duration,
    state: Arc<Mutex<MonitorState>>,
}

impl InactivityMonitor {
    pub fn new(inactivity_time: Duration, warning_time: Duration) -> Self {
        Self {
            inactivity_time,
            warning_time,
            state: Arc::new(Mutex::new(MonitorState {
                phase: MonitorPhase::Disarmed,
                generation: 0,
                timers: None,
                armed_at: None,
                on_expired: None,
                runtime: None,
            })),
        }
    }

    /// Start (or restart) the timers. `on_expired` runs once if the full
    /// inactivity time passes without a reset.
    ///
    /// Must be called from within a Tokio runtime; later resets schedule
    /// their timers on that same runtime.
    pub fn arm(&self, on_expired: ExpiryHook) {
        let mut state = lock(&self.state);
        state.on_expired = Some(on_expired);
        state.runtime = Some(Handle::current());
        self.schedule(&mut state);
        debug!(generation = state.generation, "Inactivity monitor armed");
    }

    /// Cancel the timers and forget the expiry callback
    pub fn disarm(&self) {
        let mut state = lock(&self.state);
        if let Some(timers) = state.timers.take() {
            timers.cancel();
        }
        if state.phase != MonitorPhase::Disarmed {
            debug!(generation = state.generation, "Inactivity monitor disarmed");
        }
        state.generation += 1;
        state.phase = MonitorPhase::Disarmed;
        state.armed_at = None;
        state.on_expired = None;
        state.runtime = None;
    }

    /// Restart the idle period from zero. Ignored unless armed.
    ///
    /// Returns whether a reset happened.
    pub fn reset(&self) -> bool {
        let mut state = lock(&self.state);
        match state.phase {
            MonitorPhase::IdleArmed | MonitorPhase::Warning => {
                if state.phase == MonitorPhase::Warning {
                    info!("Activity detected, inactivity warning cleared");
                }
                self.schedule(&mut state);
                true
            }
            MonitorPhase::Disarmed | MonitorPhase::Expired => false,
        }
    }

    /// Record a qualifying user interaction
    pub fn record_activity(&self, event: ActivityEvent) -> bool {
        let reset = self.reset();
        if reset {
            debug!(event = ?event, "Activity recorded");
        }
        reset
    }

    pub fn phase(&self) -> MonitorPhase {
        lock(&self.state).phase
    }

    pub fn is_warning(&self) -> bool {
        self.phase() == MonitorPhase::Warning
    }

    /// Whether a timer pair is live
    pub fn is_armed(&self) -> bool {
        lock(&self.state).timers.is_some()
    }

    /// Time left before the forced logout, for the countdown notice
    pub fn time_until_logout(&self) -> Option<Duration> {
        let state = lock(&self.state);
        state.timers.as_ref()?;
        let armed_at = state.armed_at?;
        Some((armed_at + self.inactivity_time).saturating_duration_since(Instant::now()))
    }

    fn schedule(&self, state: &mut MonitorState) {
        if let Some(timers) = state.timers.take() {
            timers.cancel();
        }
        state.generation += 1;
        state.phase = MonitorPhase::IdleArmed;
        state.armed_at = Some(Instant::now());

        let Some(runtime) = state.runtime.clone() else {
            return;
        };
        let generation = state.generation;
        let cancel = CancellationToken::new();

        let warning_delay = self.inactivity_time.saturating_sub(self.warning_time);
        let shared = Arc::clone(&self.state);
        let token = cancel.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(warning_delay) => enter_warning(&shared, generation),
            }
        });

        let logout_delay = self.inactivity_time;
        let shared = Arc::clone(&self.state);
        let token = cancel.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(logout_delay) => expire(&shared, generation),
            }
        });

        state.timers = Some(cancel);
    }
}

impl Drop for InactivityMonitor {
    fn drop(&mut self) {
        if let Some(timers) = lock(&self.state).timers.take() {
            timers.cancel();
        }
    }
}

fn lock(state: &Mutex<MonitorState>) -> MutexGuard<'_, MonitorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn enter_warning(shared: &Mutex<MonitorState>, generation: u64) {
    let mut state = lock(shared);
    if state.generation != generation || state.phase != MonitorPhase::IdleArmed {
        return;
    }
    state.phase = MonitorPhase::Warning;
    info!("Session will be closed for inactivity in less than the warning time");
}

fn expire(shared: &Mutex<MonitorState>, generation: u64) {
    let hook = {
        let mut state = lock(shared);
        if state.generation != generation
            || !matches!(state.phase, MonitorPhase::IdleArmed | MonitorPhase::Warning)
        {
            return;
        }
        state.phase = MonitorPhase::Expired;
        state.timers = None;
        state.armed_at = None;
        state.on_expired.take()
    };

    info!("Inactivity period elapsed");
    // The hook usually disarms this monitor, so it must run unlocked
    if let Some(hook) = hook {
        hook();
    }
}
