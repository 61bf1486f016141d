//! Request and response bodies exchanged with the round service.
//!
//! Field names follow the service's JSON exactly; renames cover the few
//! upper-case keys (`S_hex`, `vdf_T`).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque round identifier assigned by the service at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(String);

impl RoundId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Body of `POST /sources/collect-and-commit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectRequest {
    pub round_label: String,
    /// Leaves requested per entropy source (`beacons`, `quotes`, ...).
    pub counts: BTreeMap<String, u32>,
    pub persist_raw: bool,
}

/// Commit receipt: the new round id plus the server's manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitReceipt {
    pub round_id: RoundId,
    #[serde(default)]
    pub merkle_root_hex: Option<String>,
    #[serde(default)]
    pub manifest: Value,
}

/// Body of `POST /rounds/{id}/beacon`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BeaconRequest {
    #[serde(rename = "S_hex")]
    pub seed_hex: String,
    #[serde(rename = "vdf_T")]
    pub vdf_difficulty: u32,
    pub modulus_bits: u32,
}

/// Beacon acknowledgement with the VDF evaluation parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct BeaconAck {
    pub round_id: RoundId,
    #[serde(rename = "vdf_T")]
    pub vdf_difficulty: u32,
    pub modulus_bits: u32,
    #[serde(default)]
    pub p_hex: Option<String>,
    #[serde(default)]
    pub y_hex: Option<String>,
    #[serde(default)]
    pub t1_iso: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct FinalizeRequest {
    pub output_bits: u32,
}

/// Finalization result; `analysis` is the provisional summary when inlined.
#[derive(Debug, Clone, Deserialize)]
pub struct FinalizeResponse {
    pub output_hex: String,
    #[serde(default)]
    pub t2_iso: Option<String>,
    #[serde(default)]
    pub analysis: Option<AnalysisSummary>,
}

/// Body of `POST /rounds/{id}/random-range`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeRequest {
    pub start: i64,
    pub end: i64,
    pub count: u32,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RangeResponse {
    pub numbers: Vec<i64>,
    #[serde(default)]
    pub info: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AnalysisOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_bits: Option<u32>,
}

/// One quick statistical test reported by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomnessTest {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistic: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Structured analysis bundle (bit counts plus the quick test suite).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub bit_length: u64,
    #[serde(default)]
    pub byte_length: u64,
    pub ones: u64,
    pub zeros: u64,
    pub proportion_ones: f64,
    #[serde(default)]
    pub longest_run: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entropy_per_byte: Option<f64>,
    #[serde(default)]
    pub tests: Vec<RandomnessTest>,
    pub all_passed: bool,
    #[serde(default)]
    pub source: Value,
}

impl AnalysisSummary {
    pub fn failed_tests(&self) -> impl Iterator<Item = &RandomnessTest> {
        self.tests.iter().filter(|t| !t.passed)
    }
}

/// External heavy battery selection. Only dieharder is offered server-side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HeavyBattery {
    #[default]
    Dieharder,
}

/// Body of `POST /analysis/round/{id}/heavy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeavyTestRequest {
    pub test: HeavyBattery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dieharder_args: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeavyTestStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HeavyTestReport {
    pub status: HeavyTestStatus,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub result_path: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Server-side stage of a round (`committed`, `beaconed`, `finalized`).
#[derive(Debug, Clone, Deserialize)]
pub struct RoundStatus {
    pub round_id: RoundId,
    pub stage: String,
    #[serde(default)]
    pub info: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beacon_request_uses_service_field_names() {
        let req = BeaconRequest {
            seed_hex: "ab".repeat(32),
            vdf_difficulty: 50,
            modulus_bits: 512,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["vdf_T"], 50);
        assert_eq!(json["modulus_bits"], 512);
        assert_eq!(json["S_hex"].as_str().map(str::len), Some(64));
    }

    #[test]
    fn range_request_omits_missing_context() {
        let req = RangeRequest {
            start: 1,
            end: 42,
            count: 6,
            domain: "default".into(),
            context: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("context"));
    }

    #[test]
    fn finalize_response_without_analysis() {
        let resp: FinalizeResponse = serde_json::from_str(
            r#"{"round_id": "r1", "output_hex": "00ff", "selected_indices": {}, "t2_iso": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(resp.analysis.is_none());
        assert_eq!(resp.output_hex, "00ff");
    }

    #[test]
    fn analysis_summary_parses_service_shape() {
        let summary: AnalysisSummary = serde_json::from_str(
            r#"{
                "bit_length": 4096, "byte_length": 512, "ones": 2050, "zeros": 2046,
                "proportion_ones": 0.5005, "longest_run": 11, "entropy_per_byte": 7.6,
                "tests": [
                    {"name": "monobit", "passed": true, "p_value": 0.95, "details": {}},
                    {"name": "runs", "passed": false, "p_value": 0.001}
                ],
                "all_passed": false,
                "source": {"type": "round_output", "round_id": "r1"}
            }"#,
        )
        .unwrap();
        assert_eq!(summary.bit_length, 4096);
        let failed: Vec<_> = summary.failed_tests().map(|t| t.name.as_str()).collect();
        assert_eq!(failed, vec!["runs"]);
    }

    #[test]
    fn heavy_report_status_is_snake_case() {
        let report: HeavyTestReport = serde_json::from_str(
            r#"{"round_id": "r1", "test": "dieharder", "status": "failed",
                "error": "dieharder not installed"}"#,
        )
        .unwrap();
        assert_eq!(report.status, HeavyTestStatus::Failed);
        assert_eq!(report.error.as_deref(), Some("dieharder not installed"));

        let req = HeavyTestRequest {
            test: HeavyBattery::Dieharder,
            dieharder_args: None,
        };
        assert_eq!(serde_json::to_string(&req).unwrap(), r#"{"test":"dieharder"}"#);
    }
}
