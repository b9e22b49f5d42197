//! Agent lifecycle driven by backend responses
//!
//! The [`StateMachine`] is the single source of truth for whether the agent
//! should keep talking to the backend. The transport reports every HTTP
//! response to it and consults [`StateMachine::can_send`] before each send.

mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Backoff applied to 429 responses without a retry hint
pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(30);

/// Backoff applied to 402 responses without a retry hint
pub const DEFAULT_QUOTA_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Longest backoff honored from a backend retry hint
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Operational state of the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Starting,
    Running,
    Backoff,
    Stopped,
    Exiting,
}

impl AgentState {
    pub const ALL: [AgentState; 5] = [
        AgentState::Starting,
        AgentState::Running,
        AgentState::Backoff,
        AgentState::Stopped,
        AgentState::Exiting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Starting => "starting",
            AgentState::Running => "running",
            AgentState::Backoff => "backoff",
            AgentState::Stopped => "stopped",
            AgentState::Exiting => "exiting",
        }
    }

    /// States the machine never leaves on its own
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Stopped | AgentState::Exiting)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable view of the lifecycle, for status endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleStatus {
    pub state: AgentState,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub reason: String,
    pub backoff_remaining_secs: u64,
}

#[derive(Debug)]
struct Inner {
    state: AgentState,
    reason: String,
    backoff_until: Option<DateTime<Utc>>,
}

type CancelFn = Arc<dyn Fn() + Send + Sync>;

/// Lifecycle state machine shared by the transport, health checks and the
/// supervising loop
pub struct StateMachine {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
    cancel: Mutex<Option<CancelFn>>,
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("inner", &*self.inner.read())
            .finish_non_exhaustive()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// New machine in `starting`, using the wall clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                state: AgentState::Starting,
                reason: String::new(),
                backoff_until: None,
            }),
            clock,
            cancel: Mutex::new(None),
        }
    }

    /// Register the callback run when the backend deprecates this agent
    pub fn set_cancel_fn<F>(&self, cancel: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.cancel.lock() = Some(Arc::new(cancel));
    }

    pub fn state(&self) -> AgentState {
        self.inner.read().state
    }

    pub fn reason(&self) -> String {
        self.inner.read().reason.clone()
    }

    pub fn status(&self) -> LifecycleStatus {
        let inner = self.inner.read();
        LifecycleStatus {
            state: inner.state,
            reason: inner.reason.clone(),
            backoff_remaining_secs: self.remaining(&inner).as_secs(),
        }
    }

    /// Set the state directly, for states not derived from HTTP codes
    pub fn transition_to(&self, state: AgentState, reason: impl Into<String>) {
        let reason = reason.into();
        let mut inner = self.inner.write();
        let from = inner.state;
        inner.state = state;
        inner.reason = reason;
        if state != AgentState::Backoff {
            inner.backoff_until = None;
        }
        info!(from = %from, to = %state, reason = %inner.reason, "Agent state transition");
    }

    /// Derive the next state from a backend response
    ///
    /// `retry_after_secs` is the backend's retry hint; zero means none.
    /// Callers compare [`StateMachine::state`] before and after to report
    /// the transition.
    pub fn handle_http_status(&self, status: u16, retry_after_secs: u64) {
        let deprecated = {
            let mut inner = self.inner.write();

            match status {
                200 => {
                    inner.state = AgentState::Running;
                    inner.reason.clear();
                    inner.backoff_until = None;
                }
                401 | 403 => {
                    inner.state = AgentState::Stopped;
                    inner.reason = "authentication failed".to_string();
                    inner.backoff_until = None;
                }
                402 => {
                    let window = backoff_window(retry_after_secs, DEFAULT_QUOTA_BACKOFF);
                    self.enter_backoff(&mut inner, "quota exceeded", window);
                }
                410 => {
                    inner.state = AgentState::Exiting;
                    inner.reason = "agent deprecated".to_string();
                    inner.backoff_until = None;
                }
                429 => {
                    let window = backoff_window(retry_after_secs, DEFAULT_RATE_LIMIT_BACKOFF);
                    self.enter_backoff(&mut inner, "rate limited", window);
                }
                500..=u16::MAX => {
                    inner.reason = format!("server error: HTTP {}", status);
                }
                _ => {}
            }

            status == 410
        };

        // Run outside the lock; the callback may read state
        if deprecated {
            let cancel = self.cancel.lock().clone();
            if let Some(cancel) = cancel {
                (*cancel)();
            }
        }
    }

    /// True once the backoff deadline has passed, or when not backing off
    pub fn is_backoff_expired(&self) -> bool {
        let inner = self.inner.read();
        match inner.backoff_until {
            Some(until) => self.clock.now() >= until,
            None => true,
        }
    }

    /// Time left until the backoff deadline, never negative
    pub fn backoff_remaining(&self) -> Duration {
        let inner = self.inner.read();
        self.remaining(&inner)
    }

    /// Whether the transport may attempt a send right now
    pub fn can_send(&self) -> bool {
        match self.state() {
            AgentState::Starting | AgentState::Running => true,
            AgentState::Backoff => self.is_backoff_expired(),
            AgentState::Stopped | AgentState::Exiting => false,
        }
    }

    fn enter_backoff(&self, inner: &mut Inner, reason: &str, window: Duration) {
        let window = window.min(MAX_BACKOFF);
        let now = self.clock.now();
        let until = chrono::Duration::from_std(window)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        inner.state = AgentState::Backoff;
        inner.reason = reason.to_string();
        inner.backoff_until = Some(until);
    }

    fn remaining(&self, inner: &Inner) -> Duration {
        inner
            .backoff_until
            .and_then(|until| (until - self.clock.now()).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

fn backoff_window(retry_after_secs: u64, default: Duration) -> Duration {
    if retry_after_secs > 0 {
        Duration::from_secs(retry_after_secs).min(MAX_BACKOFF)
    } else {
        default
    }
}
