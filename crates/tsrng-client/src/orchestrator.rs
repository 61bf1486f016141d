//! Round orchestrator: drives one round through the service, stage by stage.
//!
//! ## Lifecycle
//!
//! ```text
//! RoundOrchestrator::run(config)
//!   → validate range                      (InvalidRangeRequest, previous run kept)
//!   → revoke previous artifact, fresh cancellation token, publish Idle
//!   → collect → beacon → finalize → range  (hard: any failure ends in Failed)
//!   → artifact → analyze → heavy test      (soft: failures recorded, run continues)
//!   → Done
//! ```
//!
//! Stages run strictly in sequence. A second `run` while one is in flight is
//! rejected with `RunInProgress`. `cancel()` only stops the next stage from
//! starting; a request already sent is allowed to finish. A run that fails
//! after the range was validated revokes any artifact it fetched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::artifact::{ArtifactHandle, ArtifactSlot};
use crate::errors::{OrchestrationError, ServiceError};
use crate::round::{RoundConfig, RoundProgress, RoundState, RunFailure, RunResult, Seed};
use crate::service::{HeavyTestStatus, RoundId, RoundServiceClient};
use crate::state_machine::{RoundStage, StageMachine};

/// Per-run bookkeeping; dropped when `run` returns.
struct RunContext {
    machine: StageMachine,
    cancel: CancellationToken,
    round_id: Option<RoundId>,
}

/// Clears the in-flight flag when `run` returns, however it returns.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn mark(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives the round workflow against a `RoundServiceClient`.
///
/// Owns at most one artifact handle, revoked when a new run starts, when
/// `dispose()` is called, or when the orchestrator is dropped.
pub struct RoundOrchestrator {
    client: Arc<dyn RoundServiceClient>,
    artifacts: ArtifactSlot,
    run_lock: tokio::sync::Mutex<()>,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
    state: watch::Sender<RoundState>,
}

impl RoundOrchestrator {
    pub fn new(client: Arc<dyn RoundServiceClient>) -> Self {
        let (state, _) = watch::channel(RoundState::Idle);
        Self {
            client,
            artifacts: ArtifactSlot::new(),
            run_lock: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            state,
        }
    }

    /// Receive every published state change.
    pub fn subscribe(&self) -> watch::Receiver<RoundState> {
        self.state.subscribe()
    }

    /// Snapshot of the latest published state.
    pub fn state(&self) -> RoundState {
        self.state.borrow().clone()
    }

    pub fn stage(&self) -> RoundStage {
        self.state.borrow().stage()
    }

    /// The live artifact handle, if any.
    pub fn artifact(&self) -> Option<ArtifactHandle> {
        self.artifacts.current()
    }

    /// Total artifact handles revoked by this orchestrator.
    pub fn revoked_artifacts(&self) -> usize {
        self.artifacts.revocations()
    }

    /// Whether a round is in flight. Never contends with `run`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the current run before its next stage starts.
    pub fn cancel(&self) {
        let token = self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        info!("Round cancellation requested");
        token.cancel();
    }

    /// Release the held artifact handle. Safe to call repeatedly.
    pub fn dispose(&self) {
        if self.artifacts.clear() {
            info!("Orchestrator disposed; artifact revoked");
        }
    }

    /// Execute one round to completion.
    pub async fn run(&self, config: RoundConfig) -> Result<RunResult, OrchestrationError> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("Rejected run: another round is in flight");
            return Err(OrchestrationError::RunInProgress);
        };
        let _in_flight = InFlight::mark(&self.running);

        let mut ctx = RunContext {
            machine: StageMachine::new(),
            cancel: CancellationToken::new(),
            round_id: None,
        };

        // Rejected before touching the previous run's state.
        if let Err(err) = config.validate_range() {
            return Err(self.record_failure(&mut ctx, err));
        }

        ctx.cancel = self.reset();
        match self.execute(&config, &mut ctx).await {
            Ok(result) => Ok(result),
            Err(err) => {
                if self.artifacts.clear() {
                    info!("Revoked artifact of unfinished round");
                }
                Err(self.record_failure(&mut ctx, err))
            }
        }
    }

    /// Move the machine to `Failed` and publish the failure.
    fn record_failure(
        &self,
        ctx: &mut RunContext,
        err: OrchestrationError,
    ) -> OrchestrationError {
        let last_stage = ctx.machine.last_reached();
        if let Err(illegal) = ctx.machine.fail(&err.to_string()) {
            error!(%illegal, "Could not record run failure");
        }
        error!(
            round_id = ctx.round_id.as_ref().map(RoundId::as_str),
            %last_stage,
            class = %err.failure_class(),
            error = %err,
            "Round failed"
        );
        self.state.send_replace(RoundState::Failed(RunFailure {
            last_stage,
            round_id: ctx.round_id.clone(),
            error: err.clone(),
        }));
        err
    }

    /// Discard the previous run's state and hand out a fresh cancellation token.
    fn reset(&self) -> CancellationToken {
        if self.artifacts.clear() {
            info!("Revoked artifact from previous run");
        }
        let token = CancellationToken::new();
        *self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = token.clone();
        self.state.send_replace(RoundState::Idle);
        token
    }

    async fn execute(
        &self,
        config: &RoundConfig,
        ctx: &mut RunContext,
    ) -> Result<RunResult, OrchestrationError> {
        let bits = config.effective_output_bits();

        // ── Collect ──────────────────────────────────────────────────────
        checkpoint(ctx, RoundStage::Collecting)?;
        info!(
            label = %config.round_label,
            sources = config.source_counts.len(),
            "Collecting entropy"
        );
        let receipt = self
            .client
            .collect_and_commit(&config.collect_request())
            .await
            .map_err(OrchestrationError::CollectionFailed)?;
        let round_id = receipt.round_id;
        ctx.round_id = Some(round_id.clone());
        self.enter(
            ctx,
            RoundState::Collecting {
                round_id: round_id.clone(),
            },
        );

        // ── Beacon ───────────────────────────────────────────────────────
        checkpoint(ctx, RoundStage::Beaconed)?;
        let seed = Seed::generate();
        info!(%round_id, seed = %seed.fingerprint(), "Submitting beacon");
        let beacon = seed.into_beacon();
        self.client
            .submit_beacon(&round_id, &beacon)
            .await
            .map_err(OrchestrationError::BeaconFailed)?;
        let seed_hex = beacon.seed_hex;
        self.enter(
            ctx,
            RoundState::Beaconed {
                round_id: round_id.clone(),
                seed_hex: seed_hex.clone(),
            },
        );

        // ── Finalize ─────────────────────────────────────────────────────
        checkpoint(ctx, RoundStage::Finalized)?;
        info!(%round_id, bits, "Finalizing round");
        let finalized = self
            .client
            .finalize(&round_id, bits)
            .await
            .map_err(OrchestrationError::FinalizationFailed)?;
        self.enter(
            ctx,
            RoundState::Finalized {
                round_id: round_id.clone(),
                seed_hex: seed_hex.clone(),
                provisional: finalized.analysis.clone(),
            },
        );

        // ── Range ────────────────────────────────────────────────────────
        checkpoint(ctx, RoundStage::RangeReady)?;
        info!(
            %round_id,
            start = config.range_start,
            end = config.range_end,
            count = config.range_count,
            "Drawing numbers"
        );
        let range = self
            .client
            .generate_range(&round_id, &config.range_request())
            .await
            .map_err(OrchestrationError::RangeFailed)?;

        let mut progress = RoundProgress {
            round_id: round_id.clone(),
            seed_hex,
            numbers: range.numbers,
            range_info: range.info,
            analysis: finalized.analysis,
            artifact: None,
            heavy: None,
            soft_failures: Vec::new(),
        };
        self.enter(ctx, RoundState::RangeReady(progress.clone()));

        // ── Artifact (best effort) ───────────────────────────────────────
        checkpoint(ctx, RoundStage::OutputReady)?;
        if config.full_artifact {
            match self.client.fetch_canonical_output(&round_id).await {
                Ok(data) => {
                    info!(%round_id, bytes = data.len(), "Artifact fetched");
                    let handle = ArtifactHandle::new(round_id.clone(), data);
                    self.artifacts.replace(handle.clone());
                    progress.artifact = Some(handle);
                }
                Err(e) => record_soft(&mut progress, OrchestrationError::ArtifactFetchFailed(e)),
            }
        }
        self.enter(ctx, RoundState::OutputReady(progress.clone()));

        // ── Analyze (best effort) ────────────────────────────────────────
        checkpoint(ctx, RoundStage::Analyzed)?;
        match self.client.analyze(&round_id, Some(bits)).await {
            Ok(summary) => {
                info!(%round_id, all_passed = summary.all_passed, "Analysis complete");
                progress.analysis = Some(summary);
            }
            Err(e) => record_soft(&mut progress, OrchestrationError::AnalysisFailed(e)),
        }
        self.enter(ctx, RoundState::Analyzed(progress.clone()));

        // ── Heavy test (best effort) ─────────────────────────────────────
        checkpoint(ctx, RoundStage::HeavyTested)?;
        match self
            .client
            .run_heavy_test(&round_id, &config.heavy_request())
            .await
        {
            Ok(report) if report.status == HeavyTestStatus::Failed => {
                let message = report
                    .error
                    .unwrap_or_else(|| "heavy test reported failure".to_string());
                record_soft(
                    &mut progress,
                    OrchestrationError::HeavyTestFailed(ServiceError::new(message)),
                );
            }
            Ok(report) => {
                info!(%round_id, status = ?report.status, "Heavy test accepted");
                progress.heavy = Some(report);
                self.enter(ctx, RoundState::HeavyTested(progress.clone()));
            }
            Err(e) => record_soft(&mut progress, OrchestrationError::HeavyTestFailed(e)),
        }

        // ── Done ─────────────────────────────────────────────────────────
        advance(ctx, RoundStage::Done);
        let result = progress.finish(ctx.machine.transitions().to_vec());
        info!(
            %round_id,
            numbers = result.numbers.len(),
            soft_failures = result.soft_failures.len(),
            path = %ctx.machine.summary(),
            "Round complete"
        );
        self.state
            .send_replace(RoundState::Done(Box::new(result.clone())));
        Ok(result)
    }

    /// Advance the machine to `state`'s stage and publish it.
    fn enter(&self, ctx: &mut RunContext, state: RoundState) {
        advance(ctx, state.stage());
        self.state.send_replace(state);
    }
}

impl Drop for RoundOrchestrator {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Refuse to start `next` once cancellation was requested.
fn checkpoint(ctx: &RunContext, next: RoundStage) -> Result<(), OrchestrationError> {
    if ctx.cancel.is_cancelled() {
        info!(before = %next, "Round cancelled");
        return Err(OrchestrationError::Cancelled { before: next });
    }
    Ok(())
}

fn advance(ctx: &mut RunContext, to: RoundStage) {
    // Stages are entered in a fixed order, so this only trips on a logic error.
    if let Err(illegal) = ctx.machine.advance(to, None) {
        error!(%illegal, "Stage machine rejected transition");
    }
}

fn record_soft(progress: &mut RoundProgress, err: OrchestrationError) {
    warn!(round_id = %progress.round_id, error = %err, "Best-effort step failed; continuing");
    progress.soft_failures.push(err);
}
