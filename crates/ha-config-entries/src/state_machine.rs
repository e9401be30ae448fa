//! Config entry lifecycle transitions
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress (retry)
//!                            ↘ SetupRetry → SetupInProgress (retry)
//!                            ↘ MigrationError (terminal)
//!
//! Loaded/SetupError/SetupRetry → UnloadInProgress → NotLoaded
//!                                                 ↘ FailedUnload (terminal)
//! ```

use crate::entry::ConfigEntryState;
use thiserror::Error;

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    /// States reachable from this one in a single step
    pub fn next_states(self) -> &'static [ConfigEntryState] {
        use ConfigEntryState::*;

        match self {
            NotLoaded => &[SetupInProgress],
            SetupInProgress => &[Loaded, SetupError, SetupRetry, MigrationError],
            SetupError | SetupRetry => &[SetupInProgress, UnloadInProgress],
            Loaded => &[UnloadInProgress],
            UnloadInProgress => &[NotLoaded, FailedUnload],
            MigrationError | FailedUnload => &[],
        }
    }

    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.next_states().contains(&to)
    }

    /// Validate a transition, returning the target state
    pub fn try_transition(self, to: ConfigEntryState) -> Result<ConfigEntryState, InvalidTransition> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                reason: transition_error_reason(self, to),
            })
        }
    }
}

fn transition_error_reason(from: ConfigEntryState, to: ConfigEntryState) -> &'static str {
    use ConfigEntryState::*;

    match (from, to) {
        (MigrationError, _) | (FailedUnload, _) => "terminal state, entry cannot recover",
        (Loaded, SetupInProgress) => "already loaded, unload first",
        (NotLoaded, UnloadInProgress) => "entry is not loaded",
        (SetupInProgress, _) => "setup in progress",
        (UnloadInProgress, _) => "unload in progress",
        (_, Loaded) | (_, SetupError) | (_, SetupRetry) | (_, MigrationError) => {
            "setup results require SetupInProgress"
        }
        _ => "invalid state transition",
    }
}
