//! Optimizer Gateway: submit/poll access to the external grid and supply
//! optimization services.
//!
//! The gateway is stateless between calls. `submit` performs one POST and
//! hands back a poll handle; `poll` performs one GET against the handle's
//! check endpoint. Transport timeouts on submit are retried a few times with
//! a fixed delay (the request is idempotent at that level); everything else
//! surfaces as a [`GatewayError`] for the caller to handle per-simulation.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::GatewayError;

/// Number of transport-level attempts per submit/poll request
const MAX_REQUEST_ATTEMPTS: u32 = 5;

/// Delay between transport-level retries
const RETRY_DELAY: Duration = Duration::from_millis(1_300);

/// Which of the two external optimizers a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptimizerKind {
    Grid,
    Supply,
}

impl OptimizerKind {
    /// Path segment of the service endpoints
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Grid => "grid",
            OptimizerKind::Supply => "supply",
        }
    }
}

impl std::fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to one accepted optimization request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollHandle {
    pub kind: OptimizerKind,
    pub request_id: String,
}

/// Outcome of polling one in-flight optimization
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The external service has not finished yet
    Pending,
    /// Finished successfully, with the decoded result document
    Done(Value),
    /// The external service reports failure
    Failed,
}

/// Abstraction over the two external optimizer services
#[async_trait]
pub trait Optimizer: Send + Sync {
    /// Submit a payload for optimization, returning a handle to poll
    async fn submit(
        &self,
        kind: OptimizerKind,
        payload: &Value,
    ) -> std::result::Result<PollHandle, GatewayError>;

    /// One poll of an in-flight request
    async fn poll(&self, handle: &PollHandle) -> std::result::Result<PollOutcome, GatewayError>;
}

/// Wire shape of both service endpoints
#[derive(Debug, Deserialize)]
struct ServiceResponse {
    id: String,
    status: String,
    #[serde(default)]
    results: Option<Value>,
}

/// Interpret a check-endpoint body as a poll outcome
fn interpret_poll_body(response: ServiceResponse) -> std::result::Result<PollOutcome, GatewayError> {
    match response.status.as_str() {
        "PENDING" => Ok(PollOutcome::Pending),
        "ERROR" => Ok(PollOutcome::Failed),
        "DONE" => match response.results {
            Some(results) => Ok(PollOutcome::Done(results)),
            None => Err(GatewayError::Decode(
                "DONE response carries no results".to_string(),
            )),
        },
        other => Err(GatewayError::Decode(format!(
            "unknown optimizer request status '{other}'"
        ))),
    }
}

/// HTTP implementation of [`Optimizer`] against the offgrid planner service
pub struct HttpOptimizerGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpOptimizerGateway {
    pub fn new(config: &EngineConfig) -> std::result::Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.optimizer_url.trim_end_matches('/').to_string(),
        })
    }

    /// Execute the request, retrying transport timeouts with a fixed delay
    async fn request_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> std::result::Result<reqwest::Response, GatewayError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match build().send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_timeout() && attempt < MAX_REQUEST_ATTEMPTS => {
                    warn!(attempt, error = %e, "optimizer request timed out, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn decode(
        response: reqwest::Response,
    ) -> std::result::Result<ServiceResponse, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::RequestFailed(status.as_u16()));
        }
        response
            .json::<ServiceResponse>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Optimizer for HttpOptimizerGateway {
    async fn submit(
        &self,
        kind: OptimizerKind,
        payload: &Value,
    ) -> std::result::Result<PollHandle, GatewayError> {
        let url = format!("{}/sendjson/{}", self.base_url, kind.as_str());
        let body = serde_json::to_string(payload)
            .map_err(|e| GatewayError::Decode(format!("unserializable payload: {e}")))?;
        let response = self
            .request_with_retry(|| {
                self.client
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body.clone())
            })
            .await?;
        let decoded = Self::decode(response).await?;
        Ok(PollHandle {
            kind,
            request_id: decoded.id,
        })
    }

    async fn poll(&self, handle: &PollHandle) -> std::result::Result<PollOutcome, GatewayError> {
        let url = format!("{}/check/{}", self.base_url, handle.request_id);
        let response = self.request_with_retry(|| self.client.get(&url)).await?;
        let decoded = Self::decode(response).await?;
        interpret_poll_body(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_path_segments() {
        assert_eq!(OptimizerKind::Grid.as_str(), "grid");
        assert_eq!(OptimizerKind::Supply.as_str(), "supply");
    }

    #[test]
    fn test_poll_body_interpretation() {
        let pending: ServiceResponse =
            serde_json::from_value(json!({"id": "r1", "status": "PENDING"})).unwrap();
        assert_eq!(interpret_poll_body(pending).unwrap(), PollOutcome::Pending);

        let failed: ServiceResponse =
            serde_json::from_value(json!({"id": "r1", "status": "ERROR", "results": null}))
                .unwrap();
        assert_eq!(interpret_poll_body(failed).unwrap(), PollOutcome::Failed);

        let done: ServiceResponse = serde_json::from_value(
            json!({"id": "r1", "status": "DONE", "results": {"cost_grid": 42}}),
        )
        .unwrap();
        match interpret_poll_body(done).unwrap() {
            PollOutcome::Done(results) => assert_eq!(results["cost_grid"], 42),
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn test_done_without_results_is_a_decode_error() {
        let body: ServiceResponse =
            serde_json::from_value(json!({"id": "r1", "status": "DONE"})).unwrap();
        assert!(matches!(
            interpret_poll_body(body),
            Err(GatewayError::Decode(_))
        ));
    }

    #[test]
    fn test_unknown_status_is_a_decode_error() {
        let body: ServiceResponse =
            serde_json::from_value(json!({"id": "r1", "status": "QUEUED"})).unwrap();
        assert!(matches!(
            interpret_poll_body(body),
            Err(GatewayError::Decode(_))
        ));
    }
}
