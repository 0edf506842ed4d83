use crate::config::OsvConfig;
use crate::model::{BatchQuery, BatchResult};
use crate::traits::{ScanError, VulnerabilityDatabase};
use async_trait::async_trait;
use reqwest::{header, Client};
use tracing::{debug, error, instrument, warn};

const MAX_REDIRECTS: usize = 5;
const ERROR_BODY_LIMIT: usize = 512;

/// Sends batch queries to an OSV-compatible `querybatch` endpoint.
///
/// Holds a single pooled [`Client`]; clone the executor (or share it behind
/// an `Arc`) instead of building new ones per scan.
#[derive(Debug, Clone)]
pub struct OsvBatchExecutor {
    client: Client,
    batch_url: String,
    timeout_secs: u64,
}

impl OsvBatchExecutor {
    pub fn new(config: &OsvConfig) -> Result<Self, ScanError> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| ScanError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, config))
    }

    /// Reuses an existing client. Its own timeout applies; `config.timeout_secs`
    /// is still set per request.
    pub fn with_client(client: Client, config: &OsvConfig) -> Self {
        Self {
            client,
            batch_url: config.batch_url(),
            timeout_secs: config.timeout_secs,
        }
    }

    pub fn batch_url(&self) -> &str {
        &self.batch_url
    }

    fn map_send_error(&self, err: reqwest::Error) -> ScanError {
        if err.is_timeout() {
            ScanError::Timeout {
                seconds: self.timeout_secs,
            }
        } else {
            ScanError::Transport {
                message: err.to_string(),
            }
        }
    }

    #[instrument(skip(self, query), fields(queries = query.len()))]
    pub async fn execute(&self, query: &BatchQuery) -> Result<BatchResult, ScanError> {
        let response = self
            .client
            .post(&self.batch_url)
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(std::time::Duration::from_secs(self.timeout_secs))
            .json(query)
            .send()
            .await
            .map_err(|e| {
                let err = self.map_send_error(e);
                error!(url = %self.batch_url, error = %err, "Batch request failed");
                err
            })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > ERROR_BODY_LIMIT {
                let mut cut = ERROR_BODY_LIMIT;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            error!(status = status.as_u16(), body = %body, "Batch query rejected");
            return Err(ScanError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.map_send_error(e))?;
        let result: BatchResult = serde_json::from_slice(&bytes).map_err(|e| {
            error!(error = %e, "Undecodable batch response");
            ScanError::Decode(e.to_string())
        })?;

        let expected = query.len();
        let actual = result.results.len();
        if actual > expected {
            error!(expected, actual, "Batch response has surplus results");
            return Err(ScanError::ResultCountMismatch { expected, actual });
        }
        if actual < expected {
            warn!(
                expected,
                actual, "Batch response is missing results; gaps are treated as empty"
            );
        }

        debug!(results = actual, "Batch query succeeded");
        Ok(result)
    }
}

#[async_trait]
impl VulnerabilityDatabase for OsvBatchExecutor {
    fn name(&self) -> &str {
        "osv"
    }

    async fn query_batch(&self, query: &BatchQuery) -> Result<BatchResult, ScanError> {
        self.execute(query).await
    }
}
