use crate::collector::batch::LogBatch;
use crate::config::types::SinkConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use thiserror::Error;

pub const BATCH_ID_HEADER: &str = "X-Batch-Id";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sink rejected batch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid sink header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Remote endpoint that accepts batches.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, batch: &LogBatch) -> Result<(), SinkError>;
}

/// Posts each batch's entries as a JSON array.
#[derive(Debug)]
pub struct HttpSink {
    url: String,
    client: reqwest::Client,
}

impl HttpSink {
    pub fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| SinkError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| SinkError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            headers.insert(header_name, header_value);
        }

        if let Some(token) = &config.bearer_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                SinkError::InvalidHeader {
                    name: AUTHORIZATION.to_string(),
                    reason: e.to_string(),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            url: config.url.clone(),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn send(&self, batch: &LogBatch) -> Result<(), SinkError> {
        let body = serde_json::to_vec(&batch.entries)?;

        let response = self
            .client
            .post(&self.url)
            .header(BATCH_ID_HEADER, batch.batch_id.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SinkError::Rejected {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        tracing::debug!(
            batch_id = %batch.batch_id,
            entries = batch.len(),
            "Batch accepted by sink"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn sink_config(headers: HashMap<String, String>) -> SinkConfig {
        SinkConfig {
            url: "http://127.0.0.1:9/ingest".to_string(),
            bearer_token: Some("secret".to_string()),
            headers,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_new_accepts_valid_headers() {
        let mut headers = HashMap::new();
        headers.insert("X-Tenant".to_string(), "plant-7".to_string());
        let sink = HttpSink::new(&sink_config(headers)).unwrap();
        assert_eq!(sink.url(), "http://127.0.0.1:9/ingest");
    }

    #[test]
    fn test_new_rejects_invalid_header_name() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        let err = HttpSink::new(&sink_config(headers)).unwrap_err();
        assert!(matches!(err, SinkError::InvalidHeader { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_sink_is_an_error() {
        let sink = HttpSink::new(&sink_config(HashMap::new())).unwrap();
        let batch = LogBatch::new(Vec::new(), 0);
        assert!(sink.send(&batch).await.is_err());
    }
}
