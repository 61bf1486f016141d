//! Round State Machine — explicit stages and legal transition guards.
//!
//! Provides a typed stage model for one orchestrator run so that:
//! 1. Every stage transition is auditable and logged.
//! 2. Illegal transitions (skips, backward moves, leaving a terminal stage)
//!    are rejected by `advance()`.
//! 3. A finished run carries the exact sequence of stages it visited.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The set of round stages.
///
/// Every run starts at `Idle` and terminates at either `Done` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStage {
    /// No round started yet.
    Idle,
    /// Entropy committed server-side; round id assigned.
    Collecting,
    /// Local seed submitted with the VDF parameters.
    Beaconed,
    /// Output bit stream derived.
    Finalized,
    /// Unique numbers drawn.
    RangeReady,
    /// Canonical artifact fetched, skipped, or failed.
    OutputReady,
    /// Full analysis attempted.
    Analyzed,
    /// Heavy battery accepted or completed.
    HeavyTested,
    /// A hard-required step failed. Terminal.
    Failed,
    /// Run complete. Terminal.
    Done,
}

impl RoundStage {
    /// Whether this is a terminal stage (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for RoundStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Collecting => write!(f, "Collecting"),
            Self::Beaconed => write!(f, "Beaconed"),
            Self::Finalized => write!(f, "Finalized"),
            Self::RangeReady => write!(f, "RangeReady"),
            Self::OutputReady => write!(f, "OutputReady"),
            Self::Analyzed => write!(f, "Analyzed"),
            Self::HeavyTested => write!(f, "HeavyTested"),
            Self::Failed => write!(f, "Failed"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// Legal transitions between round stages.
///
/// ```text
/// Idle → Collecting | Failed
/// Collecting → Beaconed | Failed
/// Beaconed → Finalized | Failed
/// Finalized → RangeReady | Failed
/// RangeReady → OutputReady | Failed
/// OutputReady → Analyzed | Failed
/// Analyzed → HeavyTested | Done | Failed
/// HeavyTested → Done | Failed
/// ```
fn is_legal_transition(from: RoundStage, to: RoundStage) -> bool {
    use RoundStage::*;

    // Any non-terminal stage can transition to Failed.
    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Idle, Collecting)
            | (Collecting, Beaconed)
            | (Beaconed, Finalized)
            | (Finalized, RangeReady)
            | (RangeReady, OutputReady)
            | (OutputReady, Analyzed)
            // Heavy battery rejected → straight to Done
            | (Analyzed, HeavyTested)
            | (Analyzed, Done)
            | (HeavyTested, Done)
    )
}

/// A single recorded stage transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RoundStage,
    pub to: RoundStage,
    /// Milliseconds since the run started.
    pub elapsed_ms: u64,
    /// Optional context about why this transition happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: RoundStage,
    pub to: RoundStage,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal stage transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Stage tracker for a single run.
///
/// Holds the current stage, enforces legal transitions, and keeps a log
/// of every transition for diagnostics.
#[derive(Debug)]
pub struct StageMachine {
    current: RoundStage,
    /// Last non-`Failed` stage reached.
    last_reached: RoundStage,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StageMachine {
    /// Create a new machine starting at `Idle`.
    pub fn new() -> Self {
        Self {
            current: RoundStage::Idle,
            last_reached: RoundStage::Idle,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> RoundStage {
        self.current
    }

    /// The furthest successful stage, kept for diagnostics after `Failed`.
    pub fn last_reached(&self) -> RoundStage {
        self.last_reached
    }

    /// Attempt to advance to the next stage.
    pub fn advance(
        &mut self,
        to: RoundStage,
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

        tracing::debug!(from = %self.current, to = %to, "Stage transition");

        self.transitions.push(record);
        if to != RoundStage::Failed {
            self.last_reached = to;
        }
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed` from any non-terminal stage.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(RoundStage::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Stages entered, in order (excluding the initial `Idle`).
    pub fn visited(&self) -> Vec<RoundStage> {
        self.transitions.iter().map(|t| t.to).collect()
    }

    /// Get a summary string of the run's stage history.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let head = format!(
            "{} → {} ({}ms, {} transitions)",
            RoundStage::Idle,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if states.is_empty() {
            head
        } else {
            format!("{head} [{}]", states.join(" → "))
        }
    }
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}
