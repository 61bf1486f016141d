//! Call-count expectations on the round service via `mockall`.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use mockall::mock;
use mockall::predicate::eq;
use serde_json::json;

use tsrng_client::service::{
    AnalysisSummary, BeaconAck, BeaconRequest, CollectRequest, CommitReceipt, FinalizeResponse,
    HeavyTestReport, HeavyTestRequest, RangeRequest, RangeResponse, RoundId, RoundServiceClient,
    RoundStatus,
};
use tsrng_client::{
    classify, EncodingPayload, OrchestrationError, RoundConfig, RoundOrchestrator, RoundStage,
    SequenceData, ServiceError,
};

mock! {
    pub Service {}

    #[async_trait]
    impl RoundServiceClient for Service {
        async fn collect_and_commit(&self, request: &CollectRequest) -> Result<CommitReceipt, ServiceError>;
        async fn submit_beacon(&self, round_id: &RoundId, beacon: &BeaconRequest) -> Result<BeaconAck, ServiceError>;
        async fn finalize(&self, round_id: &RoundId, output_bits: u32) -> Result<FinalizeResponse, ServiceError>;
        async fn generate_range(&self, round_id: &RoundId, request: &RangeRequest) -> Result<RangeResponse, ServiceError>;
        async fn fetch_canonical_output(&self, round_id: &RoundId) -> Result<Bytes, ServiceError>;
        async fn analyze(&self, round_id: &RoundId, limit_bits: Option<u32>) -> Result<AnalysisSummary, ServiceError>;
        async fn run_heavy_test(&self, round_id: &RoundId, request: &HeavyTestRequest) -> Result<HeavyTestReport, ServiceError>;
        async fn analyze_sequence(&self, payload: &EncodingPayload) -> Result<AnalysisSummary, ServiceError>;
        async fn analyze_upload(&self, filename: &str, data: Bytes, limit_bits: Option<u32>) -> Result<AnalysisSummary, ServiceError>;
        async fn round_status(&self, round_id: &RoundId) -> Result<RoundStatus, ServiceError>;
    }
}

fn receipt() -> CommitReceipt {
    serde_json::from_value(json!({"round_id": "r-mock", "manifest": {}})).unwrap()
}

fn summary() -> AnalysisSummary {
    serde_json::from_value(json!({
        "bit_length": 24, "ones": 12, "zeros": 12, "proportion_ones": 0.5,
        "tests": [], "all_passed": true
    }))
    .unwrap()
}

fn expect_no_later_stages(mock: &mut MockService) {
    mock.expect_finalize().never();
    mock.expect_generate_range().never();
    mock.expect_fetch_canonical_output().never();
    mock.expect_analyze().never();
    mock.expect_run_heavy_test().never();
}

#[tokio::test]
async fn beacon_failure_is_not_retried() {
    let mut mock = MockService::new();
    mock.expect_collect_and_commit()
        .times(1)
        .returning(|_| Ok(receipt()));
    mock.expect_submit_beacon()
        .times(1)
        .withf(|round_id, beacon| {
            round_id.as_str() == "r-mock"
                && beacon.seed_hex.len() == 64
                && beacon.vdf_difficulty == 50
                && beacon.modulus_bits == 512
        })
        .returning(|_, _| {
            Err(ServiceError::from_response(
                409,
                r#"{"detail":"beacon already set"}"#,
            ))
        });
    expect_no_later_stages(&mut mock);

    let orch = RoundOrchestrator::new(Arc::new(mock));
    let err = orch.run(RoundConfig::default()).await.unwrap_err();

    match err {
        OrchestrationError::BeaconFailed(e) => {
            assert_eq!(e.message, "beacon already set");
            assert_eq!(e.status, Some(409));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(orch.stage(), RoundStage::Failed);
}

#[tokio::test]
async fn collect_failure_makes_no_further_calls() {
    let mut mock = MockService::new();
    mock.expect_collect_and_commit()
        .times(1)
        .returning(|_| Err(ServiceError::new("No leaves collected; adjust config.")));
    mock.expect_submit_beacon().never();
    expect_no_later_stages(&mut mock);

    let orch = RoundOrchestrator::new(Arc::new(mock));
    let err = orch.run(RoundConfig::default()).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::CollectionFailed(_)));
}

#[tokio::test]
async fn invalid_range_touches_nothing() {
    let mut mock = MockService::new();
    mock.expect_collect_and_commit().never();
    mock.expect_submit_beacon().never();
    expect_no_later_stages(&mut mock);

    let orch = RoundOrchestrator::new(Arc::new(mock));
    let config = RoundConfig {
        range_start: 1,
        range_end: 3,
        range_count: 4,
        ..RoundConfig::default()
    };
    let err = orch.run(config).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidRangeRequest(_)));
}

#[tokio::test]
async fn classified_sequence_is_forwarded_unchanged() {
    let mut mock = MockService::new();
    let expected = EncodingPayload {
        data: SequenceData::Bytes(vec![12, 200, 7]),
        limit_bits: Some(16),
    };
    mock.expect_analyze_sequence()
        .with(eq(expected))
        .times(1)
        .returning(|_| Ok(summary()));

    let payload = classify("12 200 7").unwrap().with_limit_bits(Some(16));
    let result = mock.analyze_sequence(&payload).await.unwrap();
    assert!(result.all_passed);
}
