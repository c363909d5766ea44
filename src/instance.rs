//! # Instance ID Bootstrap
//!
//! Reads the persistent identifier of this service instance from disk, or
//! generates and persists a fresh one on first run.
//!
//! The identifier is an opaque random value: it carries no information about
//! the host and only serves to correlate reports from the same installation.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;

/// Load the instance ID from `path`, generating and persisting one if absent
///
/// An existing file wins: its trimmed contents are returned as-is. A missing
/// or empty file causes a fresh UUIDv4 to be generated and written back, so
/// subsequent runs report under the same identity.
///
/// # Errors
///
/// Returns error if the file exists but cannot be read, or if the generated
/// ID cannot be persisted.
pub fn load_or_generate(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let id = contents.trim();
            if !id.is_empty() {
                debug!("Loaded telemetry instance id from {}", path.display());
                return Ok(id.to_string());
            }
            // Empty file: fall through and regenerate
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let id = Uuid::new_v4().to_string();
    fs::write(path, &id)?;
    info!("Generated new telemetry instance id at {}", path.display());
    Ok(id)
}
