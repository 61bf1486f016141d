//! Round orchestration error taxonomy with failure classification.
//!
//! Every error raised by the orchestrator is represented here. Callers can
//! query `failure_class()` / `is_fatal()` without string matching.
//!
//! ## Failure classes
//!
//! | Class            | Aborts run | Network call made |
//! |------------------|------------|-------------------|
//! | LocalValidation  | yes        | no                |
//! | Hard             | yes        | yes               |
//! | Soft             | no         | yes               |
//! | Control          | yes        | —                 |
//!
//! Nothing is retried at this layer. Recovery is always a fresh `run`.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::state_machine::RoundStage;

/// Fallback text when the service gave us nothing usable.
const GENERIC_SERVICE_MESSAGE: &str = "unknown service error";

/// Classification used by the orchestrator to decide whether a failure ends the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Rejected locally before any request was sent.
    LocalValidation,
    /// Collaborator failure on a hard-required step (collect, beacon, finalize, range).
    Hard,
    /// Collaborator failure on a best-effort step (artifact, analysis, heavy test).
    Soft,
    /// Run-level control outcome: concurrent run rejected or cancelled.
    Control,
}

impl FailureClass {
    pub fn is_fatal(self) -> bool {
        !matches!(self, Self::Soft)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalValidation => write!(f, "local_validation"),
            Self::Hard => write!(f, "hard"),
            Self::Soft => write!(f, "soft"),
            Self::Control => write!(f, "control"),
        }
    }
}

/// Normalized failure reported by the round service or its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceError {
    /// Upstream message verbatim, or a generic fallback.
    pub message: String,
    /// HTTP status, when the service answered at all.
    pub status: Option<u16>,
    /// The transport gave up waiting for a response.
    pub timed_out: bool,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            message: if message.trim().is_empty() {
                GENERIC_SERVICE_MESSAGE.to_string()
            } else {
                message
            },
            status: None,
            timed_out: false,
        }
    }

    /// Build from a non-success HTTP response body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let message = normalize_error_body(body)
            .unwrap_or_else(|| format!("service responded with HTTP {status}"));
        Self {
            message,
            status: Some(status),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            timed_out: true,
            ..Self::new(message)
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {status})", self.message),
            None if self.timed_out => write!(f, "{} (timed out)", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let base = if err.is_timeout() {
            Self::timeout(err.to_string())
        } else {
            Self::new(err.to_string())
        };
        Self { status, ..base }
    }
}

/// Extract the human-readable message from an error body.
///
/// The service answers errors as `{"detail": "..."}`, or for request
/// validation failures `{"detail": [{"msg": "...", ...}, ...]}`. Anything
/// that is not JSON is returned trimmed. `None` means the body was empty.
pub fn normalize_error_body(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return Some(trimmed.to_string());
    };

    match value.get("detail") {
        Some(Value::String(detail)) if !detail.trim().is_empty() => Some(detail.clone()),
        Some(Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if messages.is_empty() {
                Some(trimmed.to_string())
            } else {
                Some(messages.join("; "))
            }
        }
        _ => value
            .get("error")
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| Some(trimmed.to_string())),
    }
}

/// Unified error type for round orchestration.
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    // ── Local validation ─────────────────────────────────────────────────
    /// Range bounds or count cannot produce a unique draw.
    #[error("Invalid range request: {0}")]
    InvalidRangeRequest(String),

    // ── Hard (abort the run) ─────────────────────────────────────────────
    #[error("Collection failed: {0}")]
    CollectionFailed(ServiceError),

    #[error("Beacon submission failed: {0}")]
    BeaconFailed(ServiceError),

    #[error("Finalization failed: {0}")]
    FinalizationFailed(ServiceError),

    #[error("Range generation failed: {0}")]
    RangeFailed(ServiceError),

    // ── Soft (recorded on the result) ────────────────────────────────────
    #[error("Artifact fetch failed: {0}")]
    ArtifactFetchFailed(ServiceError),

    #[error("Analysis failed: {0}")]
    AnalysisFailed(ServiceError),

    #[error("Heavy test failed: {0}")]
    HeavyTestFailed(ServiceError),

    // ── Control ──────────────────────────────────────────────────────────
    /// Another `run` is still in flight on this orchestrator.
    #[error("A round is already running on this orchestrator")]
    RunInProgress,

    /// Cancellation was requested before `before` could start.
    #[error("Cancelled before {before}")]
    Cancelled { before: RoundStage },
}

impl OrchestrationError {
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::InvalidRangeRequest(_) => FailureClass::LocalValidation,
            Self::CollectionFailed(_)
            | Self::BeaconFailed(_)
            | Self::FinalizationFailed(_)
            | Self::RangeFailed(_) => FailureClass::Hard,
            Self::ArtifactFetchFailed(_) | Self::AnalysisFailed(_) | Self::HeavyTestFailed(_) => {
                FailureClass::Soft
            }
            Self::RunInProgress | Self::Cancelled { .. } => FailureClass::Control,
        }
    }

    /// Returns `true` if this error ends the run.
    pub fn is_fatal(&self) -> bool {
        self.failure_class().is_fatal()
    }

    /// The upstream failure, for collaborator errors.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Self::CollectionFailed(e)
            | Self::BeaconFailed(e)
            | Self::FinalizationFailed(e)
            | Self::RangeFailed(e)
            | Self::ArtifactFetchFailed(e)
            | Self::AnalysisFailed(e)
            | Self::HeavyTestFailed(e) => Some(e),
            _ => None,
        }
    }

    /// Build an `InvalidRangeRequest` conveniently.
    pub fn invalid_range(message: impl Into<String>) -> Self {
        Self::InvalidRangeRequest(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_string_is_extracted_verbatim() {
        let body = r#"{"detail": "Round not found"}"#;
        assert_eq!(normalize_error_body(body).as_deref(), Some("Round not found"));
    }

    #[test]
    fn validation_detail_list_is_joined() {
        let body = r#"{"detail": [{"loc": ["body", "count"], "msg": "ensure this value is greater than or equal to 1"}, {"msg": "field required"}]}"#;
        assert_eq!(
            normalize_error_body(body).as_deref(),
            Some("ensure this value is greater than or equal to 1; field required")
        );
    }

    #[test]
    fn plain_text_body_passes_through() {
        assert_eq!(
            normalize_error_body("  Internal Server Error \n").as_deref(),
            Some("Internal Server Error")
        );
    }

    #[test]
    fn empty_body_falls_back_to_status_message() {
        let err = ServiceError::from_response(502, "");
        assert_eq!(err.message, "service responded with HTTP 502");
        assert_eq!(err.status, Some(502));
        assert!(!err.timed_out);
    }

    #[test]
    fn blank_message_gets_generic_fallback() {
        assert_eq!(ServiceError::new("   ").message, GENERIC_SERVICE_MESSAGE);
    }

    #[test]
    fn timeout_is_flagged_and_displayed() {
        let err = ServiceError::timeout("operation timed out");
        assert!(err.timed_out);
        assert_eq!(err.to_string(), "operation timed out (timed out)");
    }

    #[test]
    fn hard_failures_are_fatal() {
        let err = OrchestrationError::BeaconFailed(ServiceError::new("boom"));
        assert_eq!(err.failure_class(), FailureClass::Hard);
        assert!(err.is_fatal());
        assert_eq!(err.service_error().map(|e| e.message.as_str()), Some("boom"));
    }

    #[test]
    fn soft_failures_are_not_fatal() {
        let err = OrchestrationError::HeavyTestFailed(ServiceError::new("dieharder missing"));
        assert_eq!(err.failure_class(), FailureClass::Soft);
        assert!(!err.is_fatal());
    }

    #[test]
    fn range_validation_is_local() {
        let err = OrchestrationError::invalid_range("end < start");
        assert_eq!(err.failure_class(), FailureClass::LocalValidation);
        assert!(err.service_error().is_none());
    }

    #[test]
    fn cancellation_is_control() {
        let err = OrchestrationError::Cancelled {
            before: RoundStage::Finalized,
        };
        assert_eq!(err.failure_class(), FailureClass::Control);
        assert_eq!(err.to_string(), "Cancelled before Finalized");
    }
}
