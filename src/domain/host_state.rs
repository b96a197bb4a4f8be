//! [`HostState`]: the lifecycle state machine driving every [`crate::host::Host`].
//!
//! Grounded on the teacher's `domain::agent_lifecycle::AgentLifecycleState`:
//! a closed enum with `can_*`/`is_terminal`/`valid_transitions` helpers
//! instead of scattering transition logic across the host implementation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A host's current position in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum HostState {
    /// Configured but not yet started.
    Created,
    /// Acquiring adapter resources and spawning workers.
    Starting,
    /// Normal operation; workers are pulling from the queue.
    Running,
    /// Temporarily not dequeuing; workers idle, queue still accepts `put`.
    Paused,
    /// Draining in-flight work before stopping.
    Stopping,
    /// Fully stopped; adapter resources released.
    Stopped,
    /// A fault occurred; awaiting restart-policy decision or operator action.
    Error,
}

impl HostState {
    /// True if `start` may be called from this state.
    #[must_use]
    pub fn can_start(self) -> bool {
        matches!(self, Self::Created | Self::Stopped)
    }

    /// True if `pause` may be called from this state.
    #[must_use]
    pub fn can_pause(self) -> bool {
        matches!(self, Self::Running)
    }

    /// True if `resume` may be called from this state.
    #[must_use]
    pub fn can_resume(self) -> bool {
        matches!(self, Self::Paused)
    }

    /// True if `stop` may be called from this state.
    #[must_use]
    pub fn can_stop(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Starting)
    }

    /// True if this state accepts `submit` calls.
    #[must_use]
    pub fn accepts_submit(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Starting)
    }

    /// True if no further automatic transition occurs without intervention.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }

    /// All states reachable directly from this one.
    #[must_use]
    pub fn valid_transitions(self) -> Vec<Self> {
        match self {
            Self::Created => vec![Self::Starting, Self::Error],
            Self::Starting => vec![Self::Running, Self::Error, Self::Stopping],
            Self::Running => vec![Self::Paused, Self::Stopping, Self::Error],
            Self::Paused => vec![Self::Running, Self::Stopping, Self::Error],
            Self::Stopping => vec![Self::Stopped, Self::Error],
            Self::Stopped => vec![Self::Starting],
            Self::Error => vec![Self::Starting, Self::Stopped],
        }
    }

    /// True if `next` is reachable directly from `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        write!(f, "{label}")
    }
}
