//! Trait abstraction for HTTP payload submission to enable testing.
//!
//! The production implementation wraps a long-lived `reqwest` client holding
//! the connection pool for the collection endpoint; it lives for the whole
//! service lifetime and is dropped with it on shutdown.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::HttpDestinationConfig;
use crate::error::{Result, TelemetryError};

/// User agent sent with every submission
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// A single submission failure on the HTTP channel
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The request could not be sent or the response could not be read
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("unexpected status: {0}")]
    Status(reqwest::StatusCode),
}

/// Submits one serialized payload to the collection endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetrySubmitter: Send + Sync {
    /// POST the payload once; retries are the caller's concern
    async fn submit(&self, payload: &Value) -> std::result::Result<(), SubmitError>;
}

/// HTTP submitter backed by a shared `reqwest` client
pub struct HttpSubmitter {
    client: reqwest::Client,
    config: HttpDestinationConfig,
}

impl HttpSubmitter {
    /// Build the submitter and its long-lived HTTP client
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be constructed.
    pub fn new(config: HttpDestinationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TelemetryError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl TelemetrySubmitter for HttpSubmitter {
    async fn submit(&self, payload: &Value) -> std::result::Result<(), SubmitError> {
        let response = self
            .client
            .post(&self.config.submission_url)
            .basic_auth(
                &self.config.credentials.username,
                Some(&self.config.credentials.password),
            )
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SubmitError::Status(status));
        }

        debug!("Submitted telemetry to {} ({})", self.config.submission_url, status);
        Ok(())
    }
}
