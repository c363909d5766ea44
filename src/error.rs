//! # Error Types
//!
//! Custom error types for matrix-telemetry using `thiserror`.
//!
//! Three kinds of failures exist in this crate: configuration errors (raised at
//! construction, fatal to service startup), a small set of fatal resolution
//! errors (a literal room that does not exist, creation blocked by config, an
//! alias claimed by another user), and delivery errors. Delivery errors never
//! appear here: both channels log and swallow them.

use thiserror::Error;

use crate::directory::DirectoryError;

/// Main error type for matrix-telemetry
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file parse errors
    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    /// The configured literal room ID does not exist on the server
    ///
    /// A missing literal ID cannot be recovered by room creation, so this
    /// aborts resolution for the cycle.
    #[error("Telemetry room {0} does not exist")]
    RoomMissing(String),

    /// No joinable room was found and room creation is not configured
    #[error("Telemetry room creation blocked by config")]
    CreationBlocked,

    /// The desired room alias is exclusively claimed by another user
    #[error(
        "Failed to create telemetry room with alias \"#{alias}:{domain}\". \
         To grant this service permission to use the alias, widen the alias \
         namespace in its registration"
    )]
    AliasUnavailable {
        /// Localpart of the alias that could not be claimed
        alias: String,
        /// Domain the alias would have been created on
        domain: String,
    },

    /// Directory service request errors
    #[error("Directory service error: {0}")]
    Directory(#[from] DirectoryError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for matrix-telemetry
pub type Result<T> = std::result::Result<T, TelemetryError>;
