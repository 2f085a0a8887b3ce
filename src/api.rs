//! REST client for the scan endpoints

use std::future::Future;

use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::{
    config::ApiConfig,
    errors::ScanAlertError,
    models::{ChildId, HistoryPage, LastLocation, ScanRecord, ScanSubmission, SecureId, SubmitAck},
};

/// Destination of scan submissions
pub trait ScanSink: Send + Sync + 'static {
    fn submit_scan(
        &self,
        secure_id: &SecureId,
        submission: &ScanSubmission,
    ) -> impl Future<Output = Result<SubmitAck, ScanAlertError>> + Send;
}

/// Authoritative, server-ordered scan history
pub trait HistorySource: Send + Sync + 'static {
    fn history(
        &self,
        token: &str,
        child_id: &ChildId,
        query: HistoryQuery,
    ) -> impl Future<Output = Result<HistoryPage, ScanAlertError>> + Send;
}

/// Paging parameters of the history endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub skip: Option<u32>,
}

impl HistoryQuery {
    pub fn latest(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            skip: None,
        }
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(skip) = self.skip {
            pairs.push(("skip", skip.to_string()));
        }
        pairs
    }
}

/// Thin client over the child-safety REST API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ScanAlertError> {
        let base_url =
            Url::parse(&config.base_url).map_err(|e| ScanAlertError::ConfigurationError {
                message: format!("Invalid API base URL {}: {}", config.base_url, e),
            })?;
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, base_url })
    }

    /// Submit a scan report; the endpoint is public
    pub async fn submit_scan(
        &self,
        secure_id: &SecureId,
        submission: &ScanSubmission,
    ) -> Result<SubmitAck, ScanAlertError> {
        let url = self.endpoint(&["api", "scan", secure_id.as_str()])?;
        debug!("Submitting scan to {}", url);
        let response = self.http.post(url).json(submission).send().await?;
        read_json(response).await
    }

    /// Fetch one page of a child's history, newest first
    pub async fn history(
        &self,
        token: &str,
        child_id: &ChildId,
        query: HistoryQuery,
    ) -> Result<HistoryPage, ScanAlertError> {
        let url = self.endpoint(&["api", "scan", "child", child_id.as_str(), "history"])?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&query.pairs())
            .send()
            .await?;
        read_json(response).await
    }

    /// Fetch the most recent record of a child, if any
    pub async fn last_location(
        &self,
        token: &str,
        child_id: &ChildId,
    ) -> Result<Option<ScanRecord>, ScanAlertError> {
        let url = self.endpoint(&["api", "scan", "child", child_id.as_str(), "last"])?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let last: LastLocation = read_json(response).await?;
        Ok(last.last_location)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ScanAlertError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ScanAlertError::ConfigurationError {
                message: format!("API base URL cannot be a base: {}", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

impl ScanSink for ApiClient {
    async fn submit_scan(
        &self,
        secure_id: &SecureId,
        submission: &ScanSubmission,
    ) -> Result<SubmitAck, ScanAlertError> {
        ApiClient::submit_scan(self, secure_id, submission).await
    }
}

impl HistorySource for ApiClient {
    async fn history(
        &self,
        token: &str,
        child_id: &ChildId,
        query: HistoryQuery,
    ) -> Result<HistoryPage, ScanAlertError> {
        ApiClient::history(self, token, child_id, query).await
    }
}

/// Decode a successful body or map the failure
///
/// Error bodies carry a `message` field; the status reason is the fallback.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ScanAlertError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let body: serde_json::Value = response.json().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        warn!("Request rejected with {}", status);
        return Err(ScanAlertError::Unauthorized);
    }

    let message = body
        .get("message")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "Request failed".to_string());

    Err(ScanAlertError::Status {
        status: status.as_u16(),
        message,
    })
}
