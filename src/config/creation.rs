//! # Room Creation Options
//!
//! Maps the free-form room-creation options map from the configuration file
//! into the typed argument shape the directory service expects.
//!
//! Recognized fields are validated and renamed; everything else passes through
//! untouched. No defaults are injected: a field absent from the input is
//! absent from the output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Result, TelemetryError};

/// Directory visibility of a newly created room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomVisibility {
    /// Listed in the public room directory
    Public,
    /// Hidden from the public room directory
    Private,
}

/// Creation preset applied to a newly created room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomCreatePreset {
    /// Invite-only room
    PrivateChat,
    /// Publicly joinable room
    PublicChat,
    /// Invite-only room where all members share the creator's power level
    TrustedPrivateChat,
}

/// Typed power-level override for a newly created room
///
/// Matches the `m.room.power_levels` event content shape. Absent fields are
/// omitted on serialization so the server applies its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PowerLevelContent {
    /// Power levels of specific users
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub users: BTreeMap<String, i64>,

    /// Power level of users not listed in `users`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users_default: Option<i64>,

    /// Levels required to send specific event types
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub events: BTreeMap<String, i64>,

    /// Level required to send events not listed in `events`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_default: Option<i64>,

    /// Level required to send state events not listed in `events`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_default: Option<i64>,

    /// Level required to ban a user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ban: Option<i64>,

    /// Level required to kick a user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kick: Option<i64>,

    /// Level required to redact events sent by other users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redact: Option<i64>,

    /// Level required to invite a user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite: Option<i64>,

    /// Levels required to trigger specific notification kinds
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub notifications: BTreeMap<String, i64>,
}

/// Normalized room-creation arguments for the directory service
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoomCreationArgs {
    /// Directory visibility, if configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<RoomVisibility>,

    /// Creation preset, if configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<RoomCreatePreset>,

    /// Users invited into the room at creation
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invitees: Vec<String>,

    /// Power-level override applied at creation, if configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_level_override: Option<PowerLevelContent>,

    /// Unrecognized options, passed through to the directory service untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RoomCreationArgs {
    /// Normalize a free-form room-creation options map
    ///
    /// The input map is copied into an owned structure first; the caller's map
    /// is never mutated. An operator-set `room_alias_name` is dropped with a
    /// warning, since the room alias must come from the configured room
    /// reference instead of a second source of truth inside the creation
    /// options.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `visibility` or `preset` name a value
    /// outside the allowed enumerations, `invite` is not a list of user IDs,
    /// or `power_level_content_override` does not match the power-level shape.
    pub fn from_options(options: &Map<String, Value>) -> Result<Self> {
        // Owned working copy; normalization below must not touch the caller's map
        let mut options = options.clone();
        let mut args = RoomCreationArgs::default();

        if let Some(alias_name) = options.remove("room_alias_name") {
            if !alias_name.is_null() {
                warn!(
                    "Ignoring \"room_alias_name\" in the telemetry room creation options. \
                     To specify the alias of the telemetry room to join/create, \
                     set \"matrix_destination.room_id_or_alias\" instead."
                );
            }
        }

        if let Some(visibility) = options.remove("visibility") {
            args.visibility = Some(serde_json::from_value(visibility.clone()).map_err(|_| {
                TelemetryError::Config(format!("{} is not a valid room visibility", visibility))
            })?);
        }

        if let Some(preset) = options.remove("preset") {
            args.preset = Some(serde_json::from_value(preset.clone()).map_err(|_| {
                TelemetryError::Config(format!("{} is not a valid room creation preset", preset))
            })?);
        }

        if let Some(invite) = options.remove("invite") {
            args.invitees = serde_json::from_value(invite).map_err(|e| {
                TelemetryError::Config(format!("\"invite\" must be a list of user IDs: {}", e))
            })?;
        }

        if let Some(power_levels) = options.remove("power_level_content_override") {
            args.power_level_override = Some(serde_json::from_value(power_levels).map_err(|e| {
                TelemetryError::Config(format!(
                    "\"power_level_content_override\" is not a valid power level object: {}",
                    e
                ))
            })?);
        }

        args.extra = options;
        Ok(args)
    }
}
