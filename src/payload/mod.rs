//! # Telemetry Payload Module
//!
//! Typed, versioned telemetry records and their canonical JSON form.
//!
//! A payload is built fresh for every report cycle and discarded after the
//! delivery attempts. The schema is forward-compatible: new metric blocks are
//! added as sibling fields of `rmau`, and consumers ignore fields they do not
//! recognize.

pub mod format;

use serde::{Deserialize, Serialize};

/// Format tag identifying telemetry payloads produced by this crate
pub const PAYLOAD_TYPE: &str = "net.telemetry.report";

/// Version of the payload format
pub const PAYLOAD_VERSION: u32 = 1;

/// Payload properties describing the format of payloads sent by this version
/// of the crate
///
/// Constant: never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryVersion {
    pub version: u32,
    #[serde(rename = "type")]
    pub payload_type: String,
}

impl Default for TelemetryVersion {
    fn default() -> Self {
        Self {
            version: PAYLOAD_VERSION,
            payload_type: PAYLOAD_TYPE.to_string(),
        }
    }
}

/// Payload properties identifying the reporting process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryInstance {
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    pub hostname: String,
}

/// Top-level telemetry payload
///
/// Immutable once built; one instance per report cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    #[serde(flatten)]
    pub version: TelemetryVersion,
    #[serde(flatten)]
    pub instance: TelemetryInstance,
    /// Milliseconds since the epoch at which this payload was generated
    #[serde(rename = "generationTime")]
    pub generation_time: i64,
    pub data: TelemetryData,
}

impl Telemetry {
    /// Build a payload for one report cycle
    ///
    /// # Arguments
    ///
    /// * `instance_id` - Opaque identifier of the reporting process
    /// * `hostname` - Network-facing domain name of the service
    /// * `generation_time` - Milliseconds since the epoch
    /// * `active_users` - Count of active users in the reporting window
    pub fn new(
        instance_id: impl Into<String>,
        hostname: impl Into<String>,
        generation_time: i64,
        active_users: u64,
    ) -> Self {
        Self {
            version: TelemetryVersion::default(),
            instance: TelemetryInstance {
                instance_id: instance_id.into(),
                hostname: hostname.into(),
            },
            generation_time,
            data: TelemetryData {
                rmau: TelemetryDataRmau {
                    all_users: active_users,
                },
            },
        }
    }
}

/// Nested metric blocks of a payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryData {
    pub rmau: TelemetryDataRmau,
}

/// Recent monthly active users metric block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryDataRmau {
    #[serde(rename = "allUsers")]
    pub all_users: u64,
}
