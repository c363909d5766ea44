//! # Configuration Module
//!
//! Handles loading and validating telemetry configuration from TOML files.
//!
//! Construction either yields a fully validated [`Config`] or fails with a
//! configuration error naming the offending field. Validation happens once, up
//! front: out-of-range retry settings fail here rather than at send time.

pub mod creation;
pub mod destination;

pub use creation::{PowerLevelContent, RoomCreatePreset, RoomCreationArgs, RoomVisibility};
pub use destination::{MatrixDestinationConfig, RoomRef};

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, TelemetryError};
use crate::instance;

/// Validated telemetry configuration
///
/// Owned by the telemetry service for its whole lifetime; immutable after
/// construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Opaque identifier of the reporting process instance
    pub instance_id: String,
    /// Matrix delivery channel settings
    pub matrix: MatrixDestinationConfig,
    /// HTTP delivery channel settings, if the channel is enabled
    pub http: Option<HttpDestinationConfig>,
}

impl Config {
    /// Assemble a configuration from already validated parts
    pub fn new(
        instance_id: impl Into<String>,
        matrix: MatrixDestinationConfig,
        http: Option<HttpDestinationConfig>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            matrix,
            http,
        }
    }

    /// Load and validate configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use matrix_telemetry::config::Config;
    ///
    /// let config = Config::load("config/telemetry.toml")?;
    /// # Ok::<(), matrix_telemetry::error::TelemetryError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let file: TelemetryFileConfig = toml::from_str(&contents)?;
        Self::from_file_config(file)
    }

    /// Validate a deserialized file configuration
    ///
    /// Bootstraps the instance ID from `instance_id_file` when no literal
    /// `instance_id` is given.
    ///
    /// # Errors
    ///
    /// Returns error if telemetry is not enabled, any destination setting is
    /// invalid, or the instance ID cannot be read or persisted.
    pub fn from_file_config(file: TelemetryFileConfig) -> Result<Self> {
        if !file.enabled {
            return Err(TelemetryError::Config(
                "telemetry is not enabled in the configuration".to_string(),
            ));
        }

        let instance_id = match file.instance_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => instance::load_or_generate(Path::new(&file.instance_id_file))?,
        };

        // Creation options only apply when room creation is enabled; an enabled
        // section without options means "create with server defaults"
        let creation_options = if file.matrix_destination.room_creation.enabled {
            let table = file.matrix_destination.room_creation.options.unwrap_or_default();
            Some(creation_options_to_map(table)?)
        } else {
            None
        };

        let matrix = MatrixDestinationConfig::new(
            file.matrix_destination.room_id_or_alias.as_deref(),
            creation_options.as_ref(),
        )?;

        let http = match file.http_destination {
            Some(http) if http.enabled => {
                let submission_url = http.submission_url.ok_or_else(|| {
                    TelemetryError::Config(
                        "\"http_destination.submission_url\" is required when the \
                         HTTP destination is enabled"
                            .to_string(),
                    )
                })?;
                let credentials = http.credentials.ok_or_else(|| {
                    TelemetryError::Config(
                        "\"http_destination.credentials\" is required when the \
                         HTTP destination is enabled"
                            .to_string(),
                    )
                })?;
                Some(HttpDestinationConfig::new(
                    http.num_attempts,
                    http.retry_delay,
                    submission_url,
                    Credentials {
                        username: credentials.username,
                        password: credentials.password,
                    },
                )?)
            }
            _ => None,
        };

        Ok(Self::new(instance_id, matrix, http))
    }
}

/// Validated settings for the HTTP delivery channel
#[derive(Debug, Clone, PartialEq)]
pub struct HttpDestinationConfig {
    /// Total number of submission attempts per report cycle (at least 1)
    pub num_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Collection endpoint the payload is POSTed to
    pub submission_url: String,
    /// Basic authentication credentials for the endpoint
    pub credentials: Credentials,
}

impl HttpDestinationConfig {
    /// Validate the HTTP destination settings
    ///
    /// # Arguments
    ///
    /// * `num_attempts` - Submission attempts per cycle, must be positive
    /// * `retry_delay` - Inter-attempt delay in seconds, must be non-negative
    /// * `submission_url` - Collection endpoint URL
    /// * `credentials` - Basic authentication credentials
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the field and the violated
    /// constraint. Zero `retry_delay` is accepted.
    pub fn new(
        num_attempts: i64,
        retry_delay: f64,
        submission_url: impl Into<String>,
        credentials: Credentials,
    ) -> Result<Self> {
        if num_attempts <= 0 {
            return Err(TelemetryError::Config(
                "\"num_attempts\" must be a positive integer".to_string(),
            ));
        }
        let num_attempts = u32::try_from(num_attempts).map_err(|_| {
            TelemetryError::Config("\"num_attempts\" is out of range".to_string())
        })?;

        if !retry_delay.is_finite() || retry_delay < 0.0 {
            return Err(TelemetryError::Config(
                "\"retry_delay\" must be non-negative".to_string(),
            ));
        }
        let retry_delay = Duration::try_from_secs_f64(retry_delay).map_err(|_| {
            TelemetryError::Config("\"retry_delay\" is out of range".to_string())
        })?;

        Ok(Self {
            num_attempts,
            retry_delay,
            submission_url: submission_url.into(),
            credentials,
        })
    }
}

/// Basic authentication credentials for the HTTP collection endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username sent with each submission
    pub username: String,
    /// Password sent with each submission
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keep the password out of logs
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Top-level telemetry section of the configuration file
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryFileConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub instance_id: Option<String>,

    #[serde(default = "default_instance_id_file")]
    pub instance_id_file: String,

    #[serde(default)]
    pub matrix_destination: MatrixDestinationFileConfig,

    #[serde(default)]
    pub http_destination: Option<HttpDestinationFileConfig>,
}

/// Matrix destination section of the configuration file
#[derive(Debug, Deserialize, Clone, Default)]
pub struct MatrixDestinationFileConfig {
    #[serde(default)]
    pub room_id_or_alias: Option<String>,

    #[serde(default)]
    pub room_creation: RoomCreationFileConfig,
}

/// Room creation section of the configuration file
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RoomCreationFileConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Free-form options forwarded to room creation after normalization
    #[serde(default)]
    pub options: Option<toml::Table>,
}

/// HTTP destination section of the configuration file
#[derive(Debug, Deserialize, Clone)]
pub struct HttpDestinationFileConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_num_attempts")]
    pub num_attempts: i64,

    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,

    #[serde(default)]
    pub submission_url: Option<String>,

    #[serde(default)]
    pub credentials: Option<CredentialsFileConfig>,
}

/// Credentials section of the configuration file
#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsFileConfig {
    pub username: String,
    pub password: String,
}

// Default value functions
fn default_instance_id_file() -> String { "./telemetry_instance_id".to_string() }
fn default_num_attempts() -> i64 { 3 }
fn default_retry_delay() -> f64 { 60.0 }

/// Convert the TOML creation options table into a JSON map for normalization
fn creation_options_to_map(table: toml::Table) -> Result<serde_json::Map<String, serde_json::Value>> {
    match serde_json::to_value(table) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(TelemetryError::Config(
            "\"room_creation.options\" must be a table".to_string(),
        )),
        Err(e) => Err(TelemetryError::Config(format!(
            "\"room_creation.options\" could not be converted: {}",
            e
        ))),
    }
}
