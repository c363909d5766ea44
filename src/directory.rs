//! Trait abstraction for the room directory service to enable testing.
//!
//! The collaboration transport (joining, creating, and messaging rooms, plus
//! the persisted room pointer) is an external collaborator: the host process
//! implements [`DirectoryService`] on top of its own Matrix client, and the
//! telemetry service consumes only the operations below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::RoomCreationArgs;
use crate::payload;

/// Event type under which the raw payload is embedded in room messages
pub const TELEMETRY_EVENT_TYPE: &str = payload::PAYLOAD_TYPE;

/// Account-data event type of the persisted room pointer
pub const TELEMETRY_POINTER_TYPE: &str = "net.telemetry.report.storage.room";

/// Room type marker attached to rooms created for telemetry
pub const TELEMETRY_ROOM_MARKER: &str = "net.telemetry.report.room";

/// Message type of telemetry room messages
pub const MSGTYPE_TEXT: &str = "m.text";

/// Format tag of the HTML-formatted message body
pub const FORMAT_HTML: &str = "org.matrix.custom.html";

/// Errors returned by the directory service
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The referenced room, alias, or stored entry does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The desired alias is exclusively claimed by another user
    #[error("alias exclusively claimed by another user: {0}")]
    AliasExclusive(String),

    /// Any other request failure
    #[error("request failed: {0}")]
    Request(String),
}

/// Directory service operations consumed by the telemetry service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Join a room by ID or alias, returning the resolved room ID
    ///
    /// Called with zero internal retries per report cycle.
    async fn join_room(&self, room: &str) -> Result<String, DirectoryError>;

    /// Create a room tagged with the given room type marker
    ///
    /// `alias_localpart` requests a public alias on the local server.
    async fn create_room<'a>(
        &self,
        alias_localpart: Option<&'a str>,
        marker: &str,
        args: &RoomCreationArgs,
    ) -> Result<String, DirectoryError>;

    /// Leave a room (best-effort from the caller's point of view)
    async fn leave_room(&self, room_id: &str) -> Result<(), DirectoryError>;

    /// Send a message event into a room
    async fn send_message(&self, room_id: &str, message: &RoomMessage) -> Result<(), DirectoryError>;

    /// Read the persisted room pointer for this service identity
    ///
    /// Returns [`DirectoryError::NotFound`] when no pointer has been stored.
    async fn get_room_pointer(&self) -> Result<Value, DirectoryError>;

    /// Overwrite the persisted room pointer for this service identity
    async fn set_room_pointer(&self, pointer: &Value) -> Result<(), DirectoryError>;
}

/// Wire shape of a telemetry room message
///
/// The plain body carries the Markdown rendering, the formatted body the HTML
/// rendering, and `extra` the raw serialized payload under
/// [`TELEMETRY_EVENT_TYPE`] for machine consumption.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomMessage {
    pub msgtype: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_body: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RoomMessage {
    /// Compose a text message with an HTML-formatted body
    pub fn text_with_html(body: impl Into<String>, formatted_body: impl Into<String>) -> Self {
        Self {
            msgtype: MSGTYPE_TEXT.to_string(),
            body: body.into(),
            format: Some(FORMAT_HTML.to_string()),
            formatted_body: Some(formatted_body.into()),
            extra: Map::new(),
        }
    }
}

/// Persisted record of the room most recently used for telemetry
///
/// Not an authoritative source of truth: the service re-validates it by
/// rejoining on every resolution, and treats malformed content as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRoomPointer {
    pub room_id: String,
}
