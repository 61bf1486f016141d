//! Round service collaborator contract.
//!
//! `RoundServiceClient` is the seam between the orchestrator and the remote
//! randomness service. `HttpRoundService` speaks to a live deployment; tests
//! substitute a recording mock.

pub mod http;
pub mod types;

use async_trait::async_trait;
use bytes::Bytes;

use crate::encoding::EncodingPayload;
use crate::errors::ServiceError;

pub use http::HttpRoundService;
pub use types::{
    AnalysisSummary, BeaconAck, BeaconRequest, CollectRequest, CommitReceipt, FinalizeResponse,
    HeavyBattery, HeavyTestReport, HeavyTestRequest, HeavyTestStatus, RandomnessTest,
    RangeRequest, RangeResponse, RoundId, RoundStatus,
};

/// Operations the orchestrator and the sequence submission path depend on.
///
/// Every call except `collect_and_commit` is keyed by the round id it produced.
#[async_trait]
pub trait RoundServiceClient: Send + Sync {
    /// Gather entropy from the configured sources and commit it; yields the round id.
    async fn collect_and_commit(
        &self,
        request: &CollectRequest,
    ) -> Result<CommitReceipt, ServiceError>;

    async fn submit_beacon(
        &self,
        round_id: &RoundId,
        beacon: &BeaconRequest,
    ) -> Result<BeaconAck, ServiceError>;

    async fn finalize(
        &self,
        round_id: &RoundId,
        output_bits: u32,
    ) -> Result<FinalizeResponse, ServiceError>;

    async fn generate_range(
        &self,
        round_id: &RoundId,
        request: &RangeRequest,
    ) -> Result<RangeResponse, ServiceError>;

    /// Canonical-length output as an opaque blob.
    async fn fetch_canonical_output(&self, round_id: &RoundId) -> Result<Bytes, ServiceError>;

    async fn analyze(
        &self,
        round_id: &RoundId,
        limit_bits: Option<u32>,
    ) -> Result<AnalysisSummary, ServiceError>;

    async fn run_heavy_test(
        &self,
        round_id: &RoundId,
        request: &HeavyTestRequest,
    ) -> Result<HeavyTestReport, ServiceError>;

    /// Analyze a classified free-form sequence.
    async fn analyze_sequence(
        &self,
        payload: &EncodingPayload,
    ) -> Result<AnalysisSummary, ServiceError>;

    /// Analyze raw file contents.
    async fn analyze_upload(
        &self,
        filename: &str,
        data: Bytes,
        limit_bits: Option<u32>,
    ) -> Result<AnalysisSummary, ServiceError>;

    async fn round_status(&self, round_id: &RoundId) -> Result<RoundStatus, ServiceError>;
}
