use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::types::{AnalysisOptions, FinalizeRequest};
use super::{
    AnalysisSummary, BeaconAck, BeaconRequest, CollectRequest, CommitReceipt, FinalizeResponse,
    HeavyTestReport, HeavyTestRequest, RangeRequest, RangeResponse, RoundId, RoundServiceClient,
    RoundStatus,
};
use crate::config::ServiceConfig;
use crate::encoding::EncodingPayload;
use crate::errors::ServiceError;

/// HTTP client for a live round service.
///
/// Timeouts come from `ServiceConfig` and surface as `ServiceError { timed_out: true }`.
#[derive(Debug, Clone)]
pub struct HttpRoundService {
    client: reqwest::Client,
    config: ServiceConfig,
}

impl HttpRoundService {
    pub fn new(config: ServiceConfig) -> Result<Self> {
        let client = config.build_http_client()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn round_url(&self, round_id: &RoundId, suffix: &str) -> String {
        self.config
            .endpoint(&format!("/rounds/{}/{suffix}", round_id.as_str()))
    }

    async fn post_json<B, R>(&self, url: String, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        tracing::debug!(%url, "POST");
        let resp = self.client.post(&url).json(body).send().await?;
        decode(resp).await
    }
}

/// Turn a non-success response into a normalized `ServiceError`.
async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ServiceError::from_response(status.as_u16(), &body))
}

async fn decode<R: DeserializeOwned>(resp: reqwest::Response) -> Result<R, ServiceError> {
    let resp = ensure_success(resp).await?;
    let status = resp.status().as_u16();
    let body = resp.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| ServiceError {
        status: Some(status),
        ..ServiceError::new(format!("malformed response body: {e}"))
    })
}

#[async_trait]
impl RoundServiceClient for HttpRoundService {
    async fn collect_and_commit(
        &self,
        request: &CollectRequest,
    ) -> Result<CommitReceipt, ServiceError> {
        self.post_json(self.config.endpoint("/sources/collect-and-commit"), request)
            .await
    }

    async fn submit_beacon(
        &self,
        round_id: &RoundId,
        beacon: &BeaconRequest,
    ) -> Result<BeaconAck, ServiceError> {
        self.post_json(self.round_url(round_id, "beacon"), beacon)
            .await
    }

    async fn finalize(
        &self,
        round_id: &RoundId,
        output_bits: u32,
    ) -> Result<FinalizeResponse, ServiceError> {
        self.post_json(
            self.round_url(round_id, "finalize"),
            &FinalizeRequest { output_bits },
        )
        .await
    }

    async fn generate_range(
        &self,
        round_id: &RoundId,
        request: &RangeRequest,
    ) -> Result<RangeResponse, ServiceError> {
        self.post_json(self.round_url(round_id, "random-range"), request)
            .await
    }

    async fn fetch_canonical_output(&self, round_id: &RoundId) -> Result<Bytes, ServiceError> {
        let url = self.round_url(round_id, "output.txt");
        tracing::debug!(%url, "GET");
        let resp = ensure_success(self.client.get(&url).send().await?).await?;
        Ok(resp.bytes().await?)
    }

    async fn analyze(
        &self,
        round_id: &RoundId,
        limit_bits: Option<u32>,
    ) -> Result<AnalysisSummary, ServiceError> {
        let url = self
            .config
            .endpoint(&format!("/analysis/round/{}", round_id.as_str()));
        self.post_json(url, &AnalysisOptions { limit_bits }).await
    }

    async fn run_heavy_test(
        &self,
        round_id: &RoundId,
        request: &HeavyTestRequest,
    ) -> Result<HeavyTestReport, ServiceError> {
        let url = self
            .config
            .endpoint(&format!("/analysis/round/{}/heavy", round_id.as_str()));
        self.post_json(url, request).await
    }

    async fn analyze_sequence(
        &self,
        payload: &EncodingPayload,
    ) -> Result<AnalysisSummary, ServiceError> {
        self.post_json(self.config.endpoint("/analysis/sequence"), payload)
            .await
    }

    async fn analyze_upload(
        &self,
        filename: &str,
        data: Bytes,
        limit_bits: Option<u32>,
    ) -> Result<AnalysisSummary, ServiceError> {
        let url = self.config.endpoint("/analysis/upload");
        let part = reqwest::multipart::Part::bytes(data.to_vec()).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut req = self.client.post(&url).multipart(form);
        if let Some(limit) = limit_bits {
            req = req.query(&[("limit_bits", limit)]);
        }
        tracing::debug!(%url, filename, "POST multipart");
        decode(req.send().await?).await
    }

    async fn round_status(&self, round_id: &RoundId) -> Result<RoundStatus, ServiceError> {
        let url = self.round_url(round_id, "status");
        tracing::debug!(%url, "GET");
        decode(self.client.get(&url).send().await?).await
    }
}
