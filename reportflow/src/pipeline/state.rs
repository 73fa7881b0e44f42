//! Orchestrator state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// States a run moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// No run in progress.
    #[default]
    Idle,
    /// Redash extraction running.
    Extracting,
    /// Power BI refresh and export running.
    Publishing,
    /// Webhook delivery running.
    Notifying,
    /// All stages ran.
    Completed,
    /// Extraction failed and was mandatory.
    Aborted,
}

impl PipelineState {
    /// Returns true for `Completed` and `Aborted`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Returns true if `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Extracting)
                | (Self::Extracting, Self::Publishing)
                | (Self::Extracting, Self::Aborted)
                | (Self::Publishing, Self::Notifying)
                | (Self::Notifying, Self::Completed)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Extracting => write!(f, "extracting"),
            Self::Publishing => write!(f, "publishing"),
            Self::Notifying => write!(f, "notifying"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// An illegal state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal pipeline transition {from} -> {to}")]
pub struct TransitionError {
    /// Current state.
    pub from: PipelineState,
    /// Requested state.
    pub to: PipelineState,
}

/// Tracks the current state and every state visited during one run.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    current: PipelineState,
    visited: Vec<PipelineState>,
}

impl StateMachine {
    /// Starts in `Idle`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: PipelineState::Idle,
            visited: vec![PipelineState::Idle],
        }
    }

    /// The current state.
    #[must_use]
    pub fn current(&self) -> PipelineState {
        self.current
    }

    /// States visited so far, starting with `Idle`.
    #[must_use]
    pub fn visited(&self) -> &[PipelineState] {
        &self.visited
    }

    /// Moves to `next` if the transition is legal.
    pub fn advance(&mut self, next: PipelineState) -> Result<(), TransitionError> {
        if !self.current.can_transition_to(next) {
            return Err(TransitionError {
                from: self.current,
                to: next,
            });
        }
        tracing::debug!(from = %self.current, to = %next, "Pipeline state changed");
        self.current = next;
        self.visited.push(next);
        Ok(())
    }

    /// Consumes the machine, returning the visited states.
    #[must_use]
    pub fn into_visited(self) -> Vec<PipelineState> {
        self.visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_happy_path() {
        let mut sm = StateMachine::new();
        for next in [
            PipelineState::Extracting,
            PipelineState::Publishing,
            PipelineState::Notifying,
            PipelineState::Completed,
        ] {
            sm.advance(next).unwrap();
        }
        assert!(sm.current().is_terminal());
        assert_eq!(sm.visited().len(), 5);
    }

    #[test]
    fn test_abort_path() {
        let mut sm = StateMachine::new();
        sm.advance(PipelineState::Extracting).unwrap();
        sm.advance(PipelineState::Aborted).unwrap();
        assert_eq!(
            sm.into_visited(),
            vec![PipelineState::Idle, PipelineState::Extracting, PipelineState::Aborted]
        );
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut sm = StateMachine::new();
        let err = sm.advance(PipelineState::Publishing).unwrap_err();
        assert_eq!(err.from, PipelineState::Idle);
        assert_eq!(err.to_string(), "illegal pipeline transition idle -> publishing");

        assert!(!PipelineState::Publishing.can_transition_to(PipelineState::Aborted));
        assert!(!PipelineState::Completed.can_transition_to(PipelineState::Idle));
        assert!(!PipelineState::Aborted.can_transition_to(PipelineState::Extracting));
    }
}
