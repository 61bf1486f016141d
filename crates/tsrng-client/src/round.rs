//! Round parameters, the single-use seed, and per-stage round state.

use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;

use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::Value;

use crate::artifact::ArtifactHandle;
use crate::errors::OrchestrationError;
use crate::service::{
    AnalysisSummary, BeaconRequest, CollectRequest, HeavyBattery, HeavyTestReport,
    HeavyTestRequest, RangeRequest, RoundId,
};
use crate::state_machine::{RoundStage, TransitionRecord};

/// Seed length in bytes (64 hex characters on the wire).
pub const SEED_LEN: usize = 32;
/// VDF iteration parameter sent with every beacon.
pub const VDF_DIFFICULTY: u32 = 50;
/// Prime modulus size for the VDF.
pub const MODULUS_BITS: u32 = 512;
/// Length of the canonical downloadable output.
pub const CANONICAL_OUTPUT_BITS: u32 = 1_000_000;

/// Requested output length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLength {
    Bits(NonZeroU32),
    /// The canonical maximum length.
    Canonical,
}

impl OutputLength {
    pub fn bits(self) -> u32 {
        match self {
            Self::Bits(n) => n.get(),
            Self::Canonical => CANONICAL_OUTPUT_BITS,
        }
    }
}

/// Caller-supplied parameters for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundConfig {
    pub round_label: String,
    /// Leaves per entropy source.
    pub source_counts: BTreeMap<String, u32>,
    pub range_start: i64,
    pub range_end: i64,
    /// Unique numbers to draw from `[range_start, range_end]`.
    pub range_count: u32,
    pub range_domain: String,
    pub range_context: Option<String>,
    pub output_length: OutputLength,
    /// Fetch the canonical-length artifact; also forces canonical finalization.
    pub full_artifact: bool,
    pub persist_raw: bool,
    pub heavy_battery: HeavyBattery,
    pub heavy_args: Option<Vec<String>>,
}

impl Default for RoundConfig {
    fn default() -> Self {
        let source_counts = [
            ("beacons", 8),
            ("quotes", 32),
            ("weather", 16),
            ("text", 16),
            ("images", 8),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            round_label: "tsrng-client".into(),
            source_counts,
            range_start: 1,
            range_end: 42,
            range_count: 6,
            range_domain: "default".into(),
            range_context: None,
            output_length: OutputLength::Bits(NonZeroU32::new(4096).unwrap_or(NonZeroU32::MIN)),
            full_artifact: true,
            persist_raw: true,
            heavy_battery: HeavyBattery::default(),
            heavy_args: None,
        }
    }
}

impl RoundConfig {
    /// Whether `range_count` unique numbers fit in `[range_start, range_end]`.
    pub fn can_generate(&self) -> bool {
        self.validate_range().is_ok()
    }

    pub fn validate_range(&self) -> Result<(), OrchestrationError> {
        if self.range_end < self.range_start {
            return Err(OrchestrationError::invalid_range(format!(
                "end {} is below start {}",
                self.range_end, self.range_start
            )));
        }
        if self.range_count == 0 {
            return Err(OrchestrationError::invalid_range("count must be positive"));
        }
        let width = i128::from(self.range_end) - i128::from(self.range_start) + 1;
        if i128::from(self.range_count) > width {
            return Err(OrchestrationError::invalid_range(format!(
                "cannot draw {} unique numbers from a range of {width}",
                self.range_count
            )));
        }
        Ok(())
    }

    /// Bits requested at finalize and analyze.
    pub fn effective_output_bits(&self) -> u32 {
        if self.full_artifact {
            CANONICAL_OUTPUT_BITS
        } else {
            self.output_length.bits()
        }
    }

    pub fn collect_request(&self) -> CollectRequest {
        CollectRequest {
            round_label: self.round_label.clone(),
            counts: self.source_counts.clone(),
            persist_raw: self.persist_raw,
        }
    }

    pub fn range_request(&self) -> RangeRequest {
        RangeRequest {
            start: self.range_start,
            end: self.range_end,
            count: self.range_count,
            domain: self.range_domain.clone(),
            context: self.range_context.clone(),
        }
    }

    pub fn heavy_request(&self) -> HeavyTestRequest {
        HeavyTestRequest {
            test: self.heavy_battery,
            dieharder_args: self.heavy_args.clone(),
        }
    }
}

/// Locally generated beacon seed.
///
/// Not `Clone`: it is consumed by `into_beacon`, the only place it leaves
/// the process.
pub struct Seed([u8; SEED_LEN]);

impl Seed {
    /// Fresh bytes from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SEED_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Short prefix safe for logs.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Consume the seed into the beacon body with the fixed VDF parameters.
    pub fn into_beacon(self) -> BeaconRequest {
        BeaconRequest {
            seed_hex: hex::encode(self.0),
            vdf_difficulty: VDF_DIFFICULTY,
            modulus_bits: MODULUS_BITS,
        }
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed({}…)", self.fingerprint())
    }
}

/// Best-effort steps whose failure is recorded rather than fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BestEffortStep {
    ArtifactFetch,
    Analysis,
    HeavyTest,
}

impl BestEffortStep {
    fn matches(self, err: &OrchestrationError) -> bool {
        matches!(
            (self, err),
            (Self::ArtifactFetch, OrchestrationError::ArtifactFetchFailed(_))
                | (Self::Analysis, OrchestrationError::AnalysisFailed(_))
                | (Self::HeavyTest, OrchestrationError::HeavyTestFailed(_))
        )
    }
}

/// Data accumulated from `RangeReady` onward.
#[derive(Debug, Clone)]
pub struct RoundProgress {
    pub round_id: RoundId,
    pub seed_hex: String,
    pub numbers: Vec<i64>,
    pub range_info: BTreeMap<String, Value>,
    /// Full analysis once available, otherwise the provisional one.
    pub analysis: Option<AnalysisSummary>,
    pub artifact: Option<ArtifactHandle>,
    pub heavy: Option<HeavyTestReport>,
    pub soft_failures: Vec<OrchestrationError>,
}

impl RoundProgress {
    pub(crate) fn finish(self, transitions: Vec<TransitionRecord>) -> RunResult {
        RunResult {
            round_id: self.round_id,
            seed_hex: self.seed_hex,
            numbers: self.numbers,
            range_info: self.range_info,
            analysis: self.analysis,
            artifact: self.artifact,
            heavy: self.heavy,
            soft_failures: self.soft_failures,
            transitions,
        }
    }
}

/// Terminal bundle of a successful run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub round_id: RoundId,
    /// Seed as submitted at the beacon step.
    pub seed_hex: String,
    pub numbers: Vec<i64>,
    pub range_info: BTreeMap<String, Value>,
    pub analysis: Option<AnalysisSummary>,
    /// Revoked when the orchestrator starts another run or is disposed.
    pub artifact: Option<ArtifactHandle>,
    pub heavy: Option<HeavyTestReport>,
    /// Failures of best-effort steps, in the order they happened.
    pub soft_failures: Vec<OrchestrationError>,
    pub transitions: Vec<TransitionRecord>,
}

impl RunResult {
    pub fn step_failed(&self, step: BestEffortStep) -> bool {
        self.soft_failures.iter().any(|e| step.matches(e))
    }

    /// Stages entered, in order.
    pub fn stages(&self) -> Vec<RoundStage> {
        self.transitions.iter().map(|t| t.to).collect()
    }
}

/// Diagnostics kept when a run ends in `Failed`.
#[derive(Debug, Clone)]
pub struct RunFailure {
    /// Furthest stage reached before the failure.
    pub last_stage: RoundStage,
    pub round_id: Option<RoundId>,
    pub error: OrchestrationError,
}

/// Published round state; each variant carries only what is valid at that stage.
#[derive(Debug, Clone, Default)]
pub enum RoundState {
    #[default]
    Idle,
    Collecting {
        round_id: RoundId,
    },
    Beaconed {
        round_id: RoundId,
        seed_hex: String,
    },
    Finalized {
        round_id: RoundId,
        seed_hex: String,
        provisional: Option<AnalysisSummary>,
    },
    RangeReady(RoundProgress),
    OutputReady(RoundProgress),
    Analyzed(RoundProgress),
    HeavyTested(RoundProgress),
    Done(Box<RunResult>),
    Failed(RunFailure),
}

impl RoundState {
    pub fn stage(&self) -> RoundStage {
        match self {
            Self::Idle => RoundStage::Idle,
            Self::Collecting { .. } => RoundStage::Collecting,
            Self::Beaconed { .. } => RoundStage::Beaconed,
            Self::Finalized { .. } => RoundStage::Finalized,
            Self::RangeReady(_) => RoundStage::RangeReady,
            Self::OutputReady(_) => RoundStage::OutputReady,
            Self::Analyzed(_) => RoundStage::Analyzed,
            Self::HeavyTested(_) => RoundStage::HeavyTested,
            Self::Done(_) => RoundStage::Done,
            Self::Failed(_) => RoundStage::Failed,
        }
    }

    pub fn round_id(&self) -> Option<&RoundId> {
        match self {
            Self::Idle => None,
            Self::Collecting { round_id }
            | Self::Beaconed { round_id, .. }
            | Self::Finalized { round_id, .. } => Some(round_id),
            Self::RangeReady(p)
            | Self::OutputReady(p)
            | Self::Analyzed(p)
            | Self::HeavyTested(p) => {
                Some(&p.round_id)
            }
            Self::Done(result) => Some(&result.round_id),
            Self::Failed(failure) => failure.round_id.as_ref(),
        }
    }

    /// Drawn numbers; `None` before `RangeReady` and after a failure.
    pub fn numbers(&self) -> Option<&[i64]> {
        match self {
            Self::RangeReady(p)
            | Self::OutputReady(p)
            | Self::Analyzed(p)
            | Self::HeavyTested(p) => {
                Some(&p.numbers)
            }
            Self::Done(result) => Some(&result.numbers),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&OrchestrationError> {
        match self {
            Self::Failed(failure) => Some(&failure.error),
            _ => None,
        }
    }
}
