//! # Matrix Destination Configuration
//!
//! Validates the operator-supplied Matrix destination: a room reference parsed
//! from a sigil-prefixed string (`!` for a literal room ID, `#` for an alias)
//! and/or a free-form room-creation options map normalized into
//! [`RoomCreationArgs`].

use std::fmt;

use crate::config::creation::RoomCreationArgs;
use crate::error::{Result, TelemetryError};

/// Sigil prefixing a literal room ID
const ROOM_ID_SIGIL: char = '!';

/// Sigil prefixing a room alias
const ROOM_ALIAS_SIGIL: char = '#';

/// A reference to a Matrix room, either by literal ID or by alias
///
/// Parsed from a single string whose leading sigil distinguishes the two
/// kinds. Both carry the localpart and the domain of the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomRef {
    /// A literal room ID (`!localpart:domain`)
    Id {
        /// Opaque localpart of the room ID
        localpart: String,
        /// Domain of the server that issued the ID
        domain: String,
    },
    /// A room alias (`#localpart:domain`)
    Alias {
        /// Human-assigned localpart of the alias
        localpart: String,
        /// Domain the alias is registered on
        domain: String,
    },
}

impl RoomRef {
    /// Parse a room reference from its string form
    ///
    /// # Arguments
    ///
    /// * `s` - Reference string, e.g. `"!abc:example.org"` or `"#telemetry:example.org"`
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the invalid value if the leading
    /// sigil is unrecognized or the `localpart:domain` form is malformed.
    ///
    /// # Examples
    ///
    /// ```
    /// use matrix_telemetry::config::RoomRef;
    ///
    /// let room = RoomRef::parse("#telemetry:example.org")?;
    /// assert!(room.is_alias());
    /// assert_eq!(room.localpart(), "telemetry");
    /// assert_eq!(room.domain(), "example.org");
    /// # Ok::<(), matrix_telemetry::error::TelemetryError>(())
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || TelemetryError::Config(format!("\"{}\" is not a valid room ID or alias", s));

        let mut chars = s.chars();
        let sigil = chars.next().ok_or_else(invalid)?;
        let (localpart, domain) = chars.as_str().split_once(':').ok_or_else(invalid)?;

        if localpart.is_empty() || domain.is_empty() {
            return Err(invalid());
        }

        match sigil {
            ROOM_ID_SIGIL => Ok(RoomRef::Id {
                localpart: localpart.to_string(),
                domain: domain.to_string(),
            }),
            ROOM_ALIAS_SIGIL => Ok(RoomRef::Alias {
                localpart: localpart.to_string(),
                domain: domain.to_string(),
            }),
            _ => Err(invalid()),
        }
    }

    /// Whether this reference is a literal room ID
    pub fn is_id(&self) -> bool {
        matches!(self, RoomRef::Id { .. })
    }

    /// Whether this reference is a room alias
    pub fn is_alias(&self) -> bool {
        matches!(self, RoomRef::Alias { .. })
    }

    /// Localpart of the reference
    pub fn localpart(&self) -> &str {
        match self {
            RoomRef::Id { localpart, .. } | RoomRef::Alias { localpart, .. } => localpart,
        }
    }

    /// Domain of the reference
    pub fn domain(&self) -> &str {
        match self {
            RoomRef::Id { domain, .. } | RoomRef::Alias { domain, .. } => domain,
        }
    }
}

impl fmt::Display for RoomRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomRef::Id { localpart, domain } => {
                write!(f, "{}{}:{}", ROOM_ID_SIGIL, localpart, domain)
            }
            RoomRef::Alias { localpart, domain } => {
                write!(f, "{}{}:{}", ROOM_ALIAS_SIGIL, localpart, domain)
            }
        }
    }
}

/// Validated configuration for the Matrix delivery channel
///
/// At least one of the room reference and the room-creation options must be
/// present; construction fails otherwise. The creation options are deep-copied
/// out of the caller's map and normalized at construction, so later mutation of
/// the caller's configuration tree cannot leak into the service.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixDestinationConfig {
    /// Configured room reference, if any
    pub room_ref: Option<RoomRef>,
    /// Normalized room-creation arguments, if room creation is enabled
    pub creation: Option<RoomCreationArgs>,
}

impl MatrixDestinationConfig {
    /// Validate and normalize the Matrix destination settings
    ///
    /// # Arguments
    ///
    /// * `room_id_or_alias` - Optional sigil-prefixed room reference string;
    ///   an empty string counts as absent
    /// * `creation_options` - Optional free-form room-creation options map
    ///
    /// # Errors
    ///
    /// Returns a configuration error if both inputs are absent, the reference
    /// string does not parse, or the creation options fail normalization.
    /// Performs no I/O.
    pub fn new(
        room_id_or_alias: Option<&str>,
        creation_options: Option<&serde_json::Map<String, serde_json::Value>>,
    ) -> Result<Self> {
        let room_id_or_alias = room_id_or_alias.filter(|s| !s.is_empty());

        if room_id_or_alias.is_none() && creation_options.is_none() {
            return Err(TelemetryError::Config(
                "\"matrix_destination\" must specify at least one of \
                 \"room_id_or_alias\" or \"room_creation\""
                    .to_string(),
            ));
        }

        let room_ref = room_id_or_alias.map(RoomRef::parse).transpose()?;
        let creation = creation_options.map(RoomCreationArgs::from_options).transpose()?;

        Ok(Self { room_ref, creation })
    }
}
