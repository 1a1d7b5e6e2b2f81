use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tbench_storage::{BeginRun, RunId};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};
use crate::report::MetricsReport;

pub const API_KEY_HEADER: &str = "x-api-key";

/// A field the collector dropped from a report. Every other field was applied.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RejectedField {
    pub field: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct RejectedFields {
    rejected: Vec<RejectedField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Health {
    pub status: String,
    pub active_runs: usize,
    pub version: String,
}

/// Talks to one collector on behalf of a benchmark agent.
#[derive(Debug, Clone)]
pub struct CollectorClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl CollectorClient {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self> {
        Self::with_http_client(Client::new(), base_url, api_key)
    }

    pub fn with_http_client(
        http: Client,
        base_url: &str,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            http,
            base_url: parse_base_url(base_url)?,
            api_key: api_key.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|err| ClientError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                reason: err.to_string(),
            })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(API_KEY_HEADER, &self.api_key)
    }

    /// Registers a new run and returns the id both agents report against.
    pub async fn begin(&self, begin: &BeginRun) -> Result<RunId> {
        let body = json!({
            "protocol": begin.protocol,
            "environment": begin.environment,
            "time_slot": begin.time_slot,
            "client_id": begin.client_id,
            "parallel_clients": begin.parallel_clients,
        });
        let resp = self
            .authorized(self.http.post(self.endpoint("begin")?))
            .json(&body)
            .send()
            .await?;
        let text = expect_success(resp).await?.text().await?;
        let id: RunId = text
            .trim()
            .parse()
            .map_err(|_| ClientError::InvalidRunId(text.trim().to_string()))?;
        debug!("Began run {} ({})", id, begin.protocol);
        Ok(id)
    }

    /// Sends a partial report. Returns the fields the collector refused.
    pub async fn update(&self, id: RunId, report: &MetricsReport) -> Result<Vec<RejectedField>> {
        let url = self.endpoint(&format!("{}/update", id))?;
        let resp = self
            .authorized(self.http.put(url))
            .json(report)
            .send()
            .await?;
        merge_outcome(id, resp).await
    }

    /// Sends the final report. The run is finalized even when fields are refused.
    pub async fn end(&self, id: RunId, report: &MetricsReport) -> Result<Vec<RejectedField>> {
        let url = self.endpoint(&format!("{}/end", id))?;
        let resp = self
            .authorized(self.http.post(url))
            .json(report)
            .send()
            .await?;
        merge_outcome(id, resp).await
    }

    /// Downloads the primary table, or the emergency one.
    pub async fn export(&self, emergency: bool) -> Result<String> {
        let mut request = self.authorized(self.http.get(self.endpoint("csv")?));
        if emergency {
            request = request.query(&[("emergency", "true")]);
        }
        let resp = request.send().await?;
        Ok(expect_success(resp).await?.text().await?)
    }

    pub async fn health(&self) -> Result<Health> {
        let resp = self.http.get(self.endpoint("health")?).send().await?;
        Ok(expect_success(resp).await?.json().await?)
    }
}

// `Url::join` replaces the last segment unless the base ends with a slash.
fn parse_base_url(raw: &str) -> Result<Url> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Url::parse(&normalized).map_err(|err| ClientError::InvalidUrl {
        url: raw.to_string(),
        reason: err.to_string(),
    })
}

async fn expect_success(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status { status, body })
}

async fn merge_outcome(id: RunId, resp: Response) -> Result<Vec<RejectedField>> {
    if resp.status() == StatusCode::UNPROCESSABLE_ENTITY {
        let rejected = resp.json::<RejectedFields>().await?.rejected;
        for field in &rejected {
            warn!("Run {}: field '{}' rejected: {}", id, field.field, field.reason);
        }
        return Ok(rejected);
    }
    expect_success(resp).await?;
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_base_path() {
        let client = CollectorClient::new("http://collector:2500/bench", "key").unwrap();
        assert_eq!(
            client.endpoint("begin").unwrap().as_str(),
            "http://collector:2500/bench/begin"
        );

        let id = RunId::new_random();
        assert_eq!(
            client.endpoint(&format!("{}/end", id)).unwrap().as_str(),
            format!("http://collector:2500/bench/{}/end", id)
        );
    }

    #[test]
    fn trailing_slash_is_optional() {
        let a = CollectorClient::new("http://localhost:2500", "key").unwrap();
        let b = CollectorClient::new("http://localhost:2500/", "key").unwrap();
        assert_eq!(a.base_url(), b.base_url());
        assert_eq!(a.endpoint("csv").unwrap().as_str(), "http://localhost:2500/csv");
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(matches!(
            CollectorClient::new("not a url", "key"),
            Err(ClientError::InvalidUrl { .. })
        ));
    }
}
