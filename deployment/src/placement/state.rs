//! Placement state machine — explicit states and legal transition guards.
//!
//! The placement engine calls `advance()` to move between stages. Each call
//! validates that the transition is legal and records it in the transition
//! log, so a failed run's report shows exactly which stage gave up.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The set of placement states.
///
/// Every run starts at `AwaitingArchive` and terminates at either `Done`
/// or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementState {
    /// Checking that the transferred archive exists at the expected path.
    AwaitingArchive,
    /// Decompressing and unpacking the archive into the scratch directory.
    Extracting,
    /// Copying extracted files to their absolute target paths.
    Placing,
    /// Removing the scratch directory and the consumed archive.
    CleaningUp,
    /// All files placed and the archive consumed — terminal state.
    Done,
    /// A stage gave up — terminal state.
    Failed,
}

impl PlacementState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PlacementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingArchive => write!(f, "AwaitingArchive"),
            Self::Extracting => write!(f, "Extracting"),
            Self::Placing => write!(f, "Placing"),
            Self::CleaningUp => write!(f, "CleaningUp"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Legal transitions between placement states.
///
/// ```text
/// AwaitingArchive → Extracting | Failed
/// Extracting → Placing | Failed
/// Placing → CleaningUp | Failed
/// CleaningUp → Done | Failed
/// ```
fn is_legal_transition(from: PlacementState, to: PlacementState) -> bool {
    use PlacementState::*;

    // Any non-terminal state can transition to Failed.
    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (AwaitingArchive, Extracting)
            | (Extracting, Placing)
            | (Placing, CleaningUp)
            | (CleaningUp, Done)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: PlacementState,
    pub to: PlacementState,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    /// Optional context about why this transition happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: PlacementState,
    pub to: PlacementState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal placement transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current placement state, enforces legal transitions, and
/// keeps a complete log of all transitions for the run report.
pub struct StateMachine {
    current: PlacementState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    /// Create a new state machine starting at `AwaitingArchive`.
    pub fn new() -> Self {
        Self {
            current: PlacementState::AwaitingArchive,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> PlacementState {
        self.current
    }

    /// Attempt to advance to the next state.
    pub fn advance(
        &mut self,
        to: PlacementState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(from = %self.current, to = %to, "placement transition");

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed` from any non-terminal state.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(PlacementState::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// One-line summary of the run's state history.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        format!(
            "{} -> {} ({}ms, {} transitions)",
            PlacementState::AwaitingArchive,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        ) + if states.is_empty() {
            String::new()
        } else {
            format!(" [{}]", states.join(" -> "))
        }
        .as_str()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
