//! Lifecycle state machine (spec.md §4.8).
//!
//! States: `idle → launching → ready → starting → running → pausing →
//! paused → terminating → terminated`, plus an absorbing `errored(cause)`.
//! Transitions are total: a disallowed event is a no-op that logs a
//! warning rather than an error, matching "strict for `start`; lenient for
//! sleep/wake" (spec.md §7 `InvalidStateTransition`) — callers that care
//! whether an event actually moved the state should compare
//! `state()` before and after.

use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Launching,
    Ready,
    Starting,
    Running,
    Pausing,
    Paused,
    Terminating,
    Terminated,
    Errored(String),
}

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Launch,
    BecomeReady,
    Start,
    MarkRunning,
    Sleep,
    MarkPaused,
    Wake,
    Terminate,
    MarkTerminated,
    Fail(String),
}

impl LifecycleEvent {
    fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Launch => "launch",
            LifecycleEvent::BecomeReady => "become_ready",
            LifecycleEvent::Start => "start",
            LifecycleEvent::MarkRunning => "mark_running",
            LifecycleEvent::Sleep => "sleep",
            LifecycleEvent::MarkPaused => "mark_paused",
            LifecycleEvent::Wake => "wake",
            LifecycleEvent::Terminate => "terminate",
            LifecycleEvent::MarkTerminated => "mark_terminated",
            LifecycleEvent::Fail(_) => "fail",
        }
    }
}

/// Guards the current state behind a mutex so lifecycle transitions driven
/// by independent tasks (HTTP handler, OS sleep/wake notification, signal
/// handler) serialize instead of racing.
pub struct Lifecycle {
    state: Mutex<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Idle),
        }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn state(&self) -> LifecycleState {
        self.state.lock().await.clone()
    }

    /// Apply `event`, returning the resulting state. A transition not
    /// defined for the current state is a no-op (state unchanged) except
    /// for `Fail`, which is allowed from any non-terminal state.
    pub async fn apply(&self, event: LifecycleEvent) -> LifecycleState {
        let mut guard = self.state.lock().await;
        let from = guard.clone();

        if let LifecycleEvent::Fail(cause) = &event {
            if !matches!(from, LifecycleState::Terminated) {
                *guard = LifecycleState::Errored(cause.clone());
                return guard.clone();
            }
        }

        let next = match (&from, &event) {
            (LifecycleState::Idle, LifecycleEvent::Launch) => Some(LifecycleState::Launching),
            (LifecycleState::Launching, LifecycleEvent::BecomeReady) => Some(LifecycleState::Ready),
            (LifecycleState::Ready, LifecycleEvent::Start) => Some(LifecycleState::Starting),
            (LifecycleState::Starting, LifecycleEvent::MarkRunning) => Some(LifecycleState::Running),
            (LifecycleState::Running, LifecycleEvent::Sleep) => Some(LifecycleState::Pausing),
            (LifecycleState::Pausing, LifecycleEvent::MarkPaused) => Some(LifecycleState::Paused),
            (LifecycleState::Paused, LifecycleEvent::Wake) => Some(LifecycleState::Starting),
            (
                LifecycleState::Ready | LifecycleState::Starting | LifecycleState::Running | LifecycleState::Paused,
                LifecycleEvent::Terminate,
            ) => Some(LifecycleState::Terminating),
            (LifecycleState::Terminating, LifecycleEvent::MarkTerminated) => Some(LifecycleState::Terminated),
            _ => None,
        };

        match next {
            Some(state) => {
                tracing::info!(from = ?from, event = event.name(), to = ?state, "lifecycle transition");
                *guard = state;
            }
            None => {
                tracing::warn!(from = ?from, event = event.name(), "disallowed lifecycle transition ignored");
            }
        }
        guard.clone()
    }
}
