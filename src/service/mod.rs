//! # Telemetry Service Module
//!
//! Orchestrates destination resolution, payload building, and delivery to the
//! Matrix and HTTP channels.
//!
//! This module handles:
//! - Resolving the telemetry room through the persisted-pointer fallback chain
//! - Building one payload per report cycle
//! - Sending the payload to both channels with per-channel failure isolation
//! - Bounded, fixed-delay retry on the HTTP channel
//!
//! Report cycles are expected to run sequentially: both channels touch external
//! shared state (the room pointer, the room membership) that is not designed
//! for concurrent resolution.

pub mod http;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, RoomRef};
use crate::directory::{
    DirectoryError, DirectoryService, RoomMessage, StoredRoomPointer, TELEMETRY_EVENT_TYPE,
    TELEMETRY_ROOM_MARKER,
};
use crate::error::{Result, TelemetryError};
use crate::payload::format::{telemetry_to_html, telemetry_to_markdown};
use crate::payload::Telemetry;
use self::http::{HttpSubmitter, TelemetrySubmitter};

/// Telemetry reporting service
///
/// Owns the validated configuration, the directory service handle, and the
/// long-lived HTTP submitter for its entire lifetime. Dropping the service
/// releases the HTTP client and its connection pool.
pub struct TelemetryService {
    config: Config,
    hostname: String,
    directory: Arc<dyn DirectoryService>,
    submitter: Option<Box<dyn TelemetrySubmitter>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for TelemetryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryService")
            .field("config", &self.config)
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

impl TelemetryService {
    /// Create the telemetry service
    ///
    /// # Arguments
    ///
    /// * `config` - Validated telemetry configuration
    /// * `hostname` - Network-facing domain name of the hosting service
    /// * `directory` - Directory service supplied by the host process
    /// * `shutdown` - Token cancelled when the hosting process shuts down;
    ///   observed at the HTTP retry-sleep boundary so an in-flight retry never
    ///   blocks termination
    ///
    /// # Errors
    ///
    /// Returns a configuration error if room creation is enabled but the
    /// configured room reference is not a local room alias (a literal ID, or
    /// an alias on a foreign domain, cannot be claimed at creation), or if the
    /// HTTP client cannot be built.
    pub fn new(
        config: Config,
        hostname: impl Into<String>,
        directory: Arc<dyn DirectoryService>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let hostname = hostname.into();

        if config.matrix.creation.is_some() {
            if let Some(room_ref) = &config.matrix.room_ref {
                if room_ref.is_id() || room_ref.domain() != hostname {
                    return Err(TelemetryError::Config(
                        "\"room_id_or_alias\" must refer to a local room alias when \
                         \"room_creation\" is enabled"
                            .to_string(),
                    ));
                }
            }
        }

        let submitter = match &config.http {
            Some(http_config) => Some(
                Box::new(HttpSubmitter::new(http_config.clone())?) as Box<dyn TelemetrySubmitter>
            ),
            None => None,
        };

        Ok(Self::from_parts(config, hostname, directory, submitter, shutdown))
    }

    fn from_parts(
        config: Config,
        hostname: String,
        directory: Arc<dyn DirectoryService>,
        submitter: Option<Box<dyn TelemetrySubmitter>>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            hostname,
            directory,
            submitter,
            shutdown,
        }
    }

    /// Build and deliver one telemetry report
    ///
    /// # Arguments
    ///
    /// * `active_users` - Count of active users in the reporting window
    /// * `generated_at` - Generation timestamp recorded in the payload
    ///
    /// # Delivery
    ///
    /// The Matrix and HTTP channels are isolated failure domains: each one
    /// logs its own failures, and neither blocks the other. This method never
    /// returns an error; the worst outcome of a cycle is "telemetry not
    /// delivered", visible in the logs.
    pub async fn send_telemetry(&self, active_users: u64, generated_at: DateTime<Utc>) {
        let telemetry = Telemetry::new(
            self.config.instance_id.clone(),
            self.hostname.clone(),
            generated_at.timestamp_millis(),
            active_users,
        );
        let payload = match serde_json::to_value(&telemetry) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize telemetry payload: {}", e);
                return;
            }
        };
        debug!("Sending telemetry: {}", payload);

        self.send_to_room(&telemetry, &payload).await;
        self.send_to_http(&payload).await;
    }

    /// Resolve the telemetry room for this cycle
    ///
    /// The chain is run fresh on every cycle; the only cross-cycle memory is
    /// the persisted room pointer, which is re-validated by rejoining rather
    /// than trusted:
    ///
    /// 1. Read the stored pointer. Missing, malformed, or unreadable pointers
    ///    are treated as absent, never fatal.
    /// 2. If a room reference is configured, join it. A literal room ID that
    ///    does not exist is fatal (creation cannot bring back a specific ID);
    ///    an alias that does not exist falls through to creation.
    /// 3. Otherwise, if a pointer was stored, try joining it; failures fall
    ///    through to creation.
    /// 4. Still unresolved: create the room with the normalized creation
    ///    options, or fail if creation is not configured. An alias already
    ///    claimed by another user is fatal.
    /// 5. If the stored pointer names a different room, leave it (best-effort).
    /// 6. Persist the resolved room as the new pointer (best-effort).
    ///
    /// # Errors
    ///
    /// Returns the fatal cases from steps 2 and 4, plus any directory request
    /// failure from the join/create calls themselves.
    async fn resolve_room(&self) -> Result<String> {
        let remembered = self.read_pointer().await;

        let mut room_id = None;
        if let Some(room_ref) = &self.config.matrix.room_ref {
            match self.directory.join_room(&room_ref.to_string()).await {
                Ok(id) => room_id = Some(id),
                Err(DirectoryError::NotFound(_)) if room_ref.is_alias() => {
                    // The alias may simply not exist yet; fall through to creation
                    debug!("Telemetry room alias {} does not exist yet", room_ref);
                }
                Err(DirectoryError::NotFound(_)) => {
                    return Err(TelemetryError::RoomMissing(room_ref.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        } else if let Some(remembered_id) = &remembered {
            match self.directory.join_room(remembered_id).await {
                Ok(id) => room_id = Some(id),
                Err(e) => {
                    error!(
                        "Could not join previously-used telemetry room {}: {}",
                        remembered_id, e
                    );
                }
            }
        }

        let room_id = match room_id {
            Some(id) => id,
            None => self.create_room().await?,
        };

        if let Some(remembered_id) = &remembered {
            if *remembered_id != room_id {
                // Stale membership is a minor leak, not a correctness issue
                if let Err(e) = self.directory.leave_room(remembered_id).await {
                    warn!(
                        "Failed to leave previously-used telemetry room {}: {}",
                        remembered_id, e
                    );
                }
            }
        }

        match serde_json::to_value(StoredRoomPointer {
            room_id: room_id.clone(),
        }) {
            Ok(pointer) => {
                if let Err(e) = self.directory.set_room_pointer(&pointer).await {
                    // The next cycle simply re-resolves through the fallback chain
                    error!("Failed to store telemetry room pointer: {}", e);
                }
            }
            Err(e) => error!("Failed to serialize telemetry room pointer: {}", e),
        }

        Ok(room_id)
    }

    /// Read the stored room pointer, treating every failure as "no pointer"
    async fn read_pointer(&self) -> Option<String> {
        match self.directory.get_room_pointer().await {
            Ok(value) => match serde_json::from_value::<StoredRoomPointer>(value) {
                Ok(pointer) => Some(pointer.room_id),
                Err(e) => {
                    debug!("Stored telemetry room pointer is malformed: {}", e);
                    None
                }
            },
            Err(DirectoryError::NotFound(_)) => None,
            Err(e) => {
                error!("Failed to retrieve previously-used telemetry room: {}", e);
                None
            }
        }
    }

    /// Create the telemetry room from the configured creation options
    async fn create_room(&self) -> Result<String> {
        let args = match &self.config.matrix.creation {
            Some(args) => args,
            None => return Err(TelemetryError::CreationBlocked),
        };

        // The alias comes from the configured reference, and only an
        // alias-typed reference can supply one
        let alias_localpart = self.config.matrix.room_ref.as_ref().and_then(|r| match r {
            RoomRef::Alias { localpart, .. } => Some(localpart.as_str()),
            RoomRef::Id { .. } => None,
        });

        match self
            .directory
            .create_room(alias_localpart, TELEMETRY_ROOM_MARKER, args)
            .await
        {
            Ok(room_id) => {
                info!("Created telemetry room {}", room_id);
                Ok(room_id)
            }
            Err(DirectoryError::AliasExclusive(_)) => Err(TelemetryError::AliasUnavailable {
                alias: alias_localpart.unwrap_or_default().to_string(),
                domain: self.hostname.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Matrix channel: resolve the room and send the rendered report
    async fn send_to_room(&self, telemetry: &Telemetry, payload: &Value) {
        let result = async {
            let room_id = self.resolve_room().await?;

            let mut message = RoomMessage::text_with_html(
                telemetry_to_markdown(telemetry),
                telemetry_to_html(telemetry),
            );
            // Raw payload rides along for machine consumption
            message
                .extra
                .insert(TELEMETRY_EVENT_TYPE.to_string(), payload.clone());

            self.directory.send_message(&room_id, &message).await?;
            Ok::<(), TelemetryError>(())
        }
        .await;

        if let Err(e) = result {
            error!("Failed to record telemetry in Matrix: {}", e);
        }
    }

    /// HTTP channel: bounded retry with a fixed inter-attempt delay
    ///
    /// The delay is a cooperative sleep raced against the shutdown token, so
    /// an in-flight retry never blocks process termination.
    async fn send_to_http(&self, payload: &Value) {
        let (Some(submitter), Some(http_config)) = (&self.submitter, &self.config.http) else {
            return;
        };

        let mut attempts_left = http_config.num_attempts;
        loop {
            match submitter.submit(payload).await {
                Ok(()) => break,
                Err(e) => {
                    error!("Failed to submit telemetry: {}", e);
                    if attempts_left > 1 {
                        attempts_left -= 1;
                        debug!(
                            "Will retry sending telemetry in {} seconds",
                            http_config.retry_delay.as_secs_f64()
                        );
                        tokio::select! {
                            _ = sleep(http_config.retry_delay) => {}
                            _ = self.shutdown.cancelled() => {
                                info!("Shutdown requested, abandoning telemetry submission");
                                break;
                            }
                        }
                    } else {
                        error!(
                            "Giving up on telemetry submission after {} attempts",
                            http_config.num_attempts
                        );
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Credentials, HttpDestinationConfig, MatrixDestinationConfig, RoomCreationArgs,
    };
    use crate::directory::MockDirectoryService;
    use crate::payload::format::{telemetry_to_html, telemetry_to_markdown};
    use super::http::{MockTelemetrySubmitter, SubmitError};
    use mockall::Sequence;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_test::assert_ok;

    const HOSTNAME: &str = "example.org";

    fn matrix_ref(room_ref: &str) -> MatrixDestinationConfig {
        MatrixDestinationConfig::new(Some(room_ref), None).unwrap()
    }

    fn matrix_ref_with_creation(room_ref: &str) -> MatrixDestinationConfig {
        let options = serde_json::Map::new();
        MatrixDestinationConfig::new(Some(room_ref), Some(&options)).unwrap()
    }

    fn matrix_creation_only() -> MatrixDestinationConfig {
        let options = serde_json::Map::new();
        MatrixDestinationConfig::new(None, Some(&options)).unwrap()
    }

    fn http_config(num_attempts: i64, retry_delay: f64) -> HttpDestinationConfig {
        HttpDestinationConfig::new(
            num_attempts,
            retry_delay,
            "https://collector.example.org/submit",
            Credentials {
                username: "reporter".to_string(),
                password: "hunter2".to_string(),
            },
        )
        .unwrap()
    }

    fn service(matrix: MatrixDestinationConfig, directory: MockDirectoryService) -> TelemetryService {
        TelemetryService::from_parts(
            Config::new("instance-1", matrix, None),
            HOSTNAME.to_string(),
            Arc::new(directory),
            None,
            CancellationToken::new(),
        )
    }

    fn service_with_http(
        matrix: MatrixDestinationConfig,
        directory: MockDirectoryService,
        submitter: MockTelemetrySubmitter,
        http: HttpDestinationConfig,
        shutdown: CancellationToken,
    ) -> TelemetryService {
        TelemetryService::from_parts(
            Config::new("instance-1", matrix, Some(http)),
            HOSTNAME.to_string(),
            Arc::new(directory),
            Some(Box::new(submitter)),
            shutdown,
        )
    }

    fn no_pointer(directory: &mut MockDirectoryService) {
        directory
            .expect_get_room_pointer()
            .returning(|| Err(DirectoryError::NotFound("no pointer stored".to_string())));
    }

    fn stored_pointer(directory: &mut MockDirectoryService, room_id: &str) {
        let room_id = room_id.to_string();
        directory
            .expect_get_room_pointer()
            .returning(move || Ok(json!({"room_id": room_id})));
    }

    // Construction

    #[tokio::test]
    async fn test_new_rejects_room_id_with_creation() {
        let err = TelemetryService::new(
            Config::new("instance-1", matrix_ref_with_creation("!abc:example.org"), None),
            HOSTNAME,
            Arc::new(MockDirectoryService::new()),
            CancellationToken::new(),
        )
        .map(|_| ())
        .unwrap_err();
        assert!(err.to_string().contains("local room alias"));
    }

    #[tokio::test]
    async fn test_new_rejects_foreign_alias_with_creation() {
        let result = TelemetryService::new(
            Config::new("instance-1", matrix_ref_with_creation("#telemetry:other.org"), None),
            HOSTNAME,
            Arc::new(MockDirectoryService::new()),
            CancellationToken::new(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_new_accepts_local_alias_with_creation() {
        let result = TelemetryService::new(
            Config::new("instance-1", matrix_ref_with_creation("#telemetry:example.org"), None),
            HOSTNAME,
            Arc::new(MockDirectoryService::new()),
            CancellationToken::new(),
        );
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_new_accepts_room_id_without_creation() {
        let result = TelemetryService::new(
            Config::new("instance-1", matrix_ref("!abc:example.org"), None),
            HOSTNAME,
            Arc::new(MockDirectoryService::new()),
            CancellationToken::new(),
        );
        assert!(result.is_ok());
    }

    // Resolution

    #[tokio::test]
    async fn test_resolution_joins_configured_reference() {
        let mut directory = MockDirectoryService::new();
        no_pointer(&mut directory);
        directory
            .expect_join_room()
            .withf(|room| room == "#telemetry:example.org")
            .returning(|_| Ok("!resolved:example.org".to_string()));
        directory
            .expect_set_room_pointer()
            .withf(|pointer| pointer == &json!({"room_id": "!resolved:example.org"}))
            .returning(|_| Ok(()));

        let service = service(matrix_ref("#telemetry:example.org"), directory);
        let room_id = assert_ok!(service.resolve_room().await);
        assert_eq!(room_id, "!resolved:example.org");
    }

    #[tokio::test]
    async fn test_resolution_missing_literal_id_is_fatal() {
        let mut directory = MockDirectoryService::new();
        no_pointer(&mut directory);
        directory
            .expect_join_room()
            .returning(|_| Err(DirectoryError::NotFound("no such room".to_string())));
        directory.expect_create_room().never();

        let service = service(matrix_ref_with_creation_id_workaround(), directory);
        let err = service.resolve_room().await.unwrap_err();
        assert!(matches!(err, TelemetryError::RoomMissing(_)));
    }

    /// A literal-ID reference alongside creation options; built from parts
    /// because the service constructor (correctly) refuses the combination.
    fn matrix_ref_with_creation_id_workaround() -> MatrixDestinationConfig {
        MatrixDestinationConfig {
            room_ref: Some(RoomRef::parse("!abc:example.org").unwrap()),
            creation: Some(RoomCreationArgs::default()),
        }
    }

    #[tokio::test]
    async fn test_resolution_missing_alias_without_creation_is_blocked() {
        let mut directory = MockDirectoryService::new();
        no_pointer(&mut directory);
        directory
            .expect_join_room()
            .returning(|_| Err(DirectoryError::NotFound("no such alias".to_string())));
        directory.expect_create_room().never();

        let service = service(matrix_ref("#telemetry:example.org"), directory);
        let err = service.resolve_room().await.unwrap_err();
        assert!(matches!(err, TelemetryError::CreationBlocked));
    }

    #[tokio::test]
    async fn test_resolution_missing_alias_creates_with_alias_localpart() {
        let mut directory = MockDirectoryService::new();
        no_pointer(&mut directory);
        directory
            .expect_join_room()
            .returning(|_| Err(DirectoryError::NotFound("no such alias".to_string())));
        directory
            .expect_create_room()
            .withf(|alias, marker, _args| {
                alias == &Some("telemetry") && marker == TELEMETRY_ROOM_MARKER
            })
            .returning(|_, _, _| Ok("!created:example.org".to_string()));
        directory.expect_set_room_pointer().returning(|_| Ok(()));

        let service = service(matrix_ref_with_creation("#telemetry:example.org"), directory);
        assert_eq!(service.resolve_room().await.unwrap(), "!created:example.org");
    }

    #[tokio::test]
    async fn test_resolution_creation_only_passes_no_alias() {
        let mut directory = MockDirectoryService::new();
        no_pointer(&mut directory);
        directory.expect_join_room().never();
        directory
            .expect_create_room()
            .withf(|alias, _marker, _args| alias.is_none())
            .returning(|_, _, _| Ok("!created:example.org".to_string()));
        directory.expect_set_room_pointer().returning(|_| Ok(()));

        let service = service(matrix_creation_only(), directory);
        assert_eq!(service.resolve_room().await.unwrap(), "!created:example.org");
    }

    #[tokio::test]
    async fn test_resolution_alias_exclusivity_is_fatal() {
        let mut directory = MockDirectoryService::new();
        no_pointer(&mut directory);
        directory
            .expect_join_room()
            .returning(|_| Err(DirectoryError::NotFound("no such alias".to_string())));
        directory
            .expect_create_room()
            .returning(|_, _, _| Err(DirectoryError::AliasExclusive("telemetry".to_string())));

        let service = service(matrix_ref_with_creation("#telemetry:example.org"), directory);
        let err = service.resolve_room().await.unwrap_err();
        match err {
            TelemetryError::AliasUnavailable { alias, domain } => {
                assert_eq!(alias, "telemetry");
                assert_eq!(domain, HOSTNAME);
            }
            other => panic!("expected AliasUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resolution_other_join_error_propagates() {
        let mut directory = MockDirectoryService::new();
        no_pointer(&mut directory);
        directory
            .expect_join_room()
            .returning(|_| Err(DirectoryError::Request("connection reset".to_string())));
        directory.expect_create_room().never();

        let service = service(matrix_ref("#telemetry:example.org"), directory);
        let err = service.resolve_room().await.unwrap_err();
        assert!(matches!(err, TelemetryError::Directory(_)));
    }

    #[tokio::test]
    async fn test_resolution_joins_remembered_pointer_without_reference() {
        let mut directory = MockDirectoryService::new();
        stored_pointer(&mut directory, "!remembered:example.org");
        directory
            .expect_join_room()
            .withf(|room| room == "!remembered:example.org")
            .returning(|_| Ok("!remembered:example.org".to_string()));
        directory.expect_create_room().never();
        directory.expect_leave_room().never();
        directory.expect_set_room_pointer().returning(|_| Ok(()));

        let service = service(matrix_creation_only(), directory);
        assert_eq!(service.resolve_room().await.unwrap(), "!remembered:example.org");
    }

    #[tokio::test]
    async fn test_resolution_pointer_join_failure_falls_back_to_creation() {
        let mut directory = MockDirectoryService::new();
        stored_pointer(&mut directory, "!remembered:example.org");
        directory
            .expect_join_room()
            .returning(|_| Err(DirectoryError::Request("room is gone".to_string())));
        directory
            .expect_create_room()
            .returning(|_, _, _| Ok("!created:example.org".to_string()));
        directory
            .expect_leave_room()
            .withf(|room| room == "!remembered:example.org")
            .returning(|_| Ok(()));
        directory.expect_set_room_pointer().returning(|_| Ok(()));

        let service = service(matrix_creation_only(), directory);
        assert_eq!(service.resolve_room().await.unwrap(), "!created:example.org");
    }

    #[tokio::test]
    async fn test_resolution_migrates_stale_pointer() {
        let mut directory = MockDirectoryService::new();
        stored_pointer(&mut directory, "!old:example.org");
        directory
            .expect_join_room()
            .returning(|_| Ok("!new:example.org".to_string()));
        directory
            .expect_leave_room()
            .withf(|room| room == "!old:example.org")
            .times(1)
            .returning(|_| Ok(()));
        directory
            .expect_set_room_pointer()
            .withf(|pointer| pointer == &json!({"room_id": "!new:example.org"}))
            .returning(|_| Ok(()));

        let service = service(matrix_ref("#telemetry:example.org"), directory);
        assert_eq!(service.resolve_room().await.unwrap(), "!new:example.org");
    }

    #[tokio::test]
    async fn test_resolution_leave_failure_is_not_fatal() {
        let mut directory = MockDirectoryService::new();
        stored_pointer(&mut directory, "!old:example.org");
        directory
            .expect_join_room()
            .returning(|_| Ok("!new:example.org".to_string()));
        directory
            .expect_leave_room()
            .returning(|_| Err(DirectoryError::Request("forbidden".to_string())));
        directory.expect_set_room_pointer().returning(|_| Ok(()));

        let service = service(matrix_ref("#telemetry:example.org"), directory);
        assert_eq!(service.resolve_room().await.unwrap(), "!new:example.org");
    }

    #[tokio::test]
    async fn test_resolution_unchanged_pointer_is_not_left() {
        let mut directory = MockDirectoryService::new();
        stored_pointer(&mut directory, "!same:example.org");
        directory
            .expect_join_room()
            .returning(|_| Ok("!same:example.org".to_string()));
        directory.expect_leave_room().never();
        directory.expect_set_room_pointer().returning(|_| Ok(()));

        let service = service(matrix_ref("#telemetry:example.org"), directory);
        assert_eq!(service.resolve_room().await.unwrap(), "!same:example.org");
    }

    #[tokio::test]
    async fn test_resolution_persist_failure_is_not_fatal() {
        let mut directory = MockDirectoryService::new();
        no_pointer(&mut directory);
        directory
            .expect_join_room()
            .returning(|_| Ok("!resolved:example.org".to_string()));
        directory
            .expect_set_room_pointer()
            .returning(|_| Err(DirectoryError::Request("storage unavailable".to_string())));

        let service = service(matrix_ref("#telemetry:example.org"), directory);
        assert_eq!(service.resolve_room().await.unwrap(), "!resolved:example.org");
    }

    #[tokio::test]
    async fn test_resolution_malformed_pointer_treated_as_absent() {
        let mut directory = MockDirectoryService::new();
        directory
            .expect_get_room_pointer()
            .returning(|| Ok(json!({"bogus": true})));
        // No pointer join attempt: resolution goes straight to creation
        directory.expect_join_room().never();
        directory
            .expect_create_room()
            .returning(|_, _, _| Ok("!created:example.org".to_string()));
        directory.expect_leave_room().never();
        directory.expect_set_room_pointer().returning(|_| Ok(()));

        let service = service(matrix_creation_only(), directory);
        assert_eq!(service.resolve_room().await.unwrap(), "!created:example.org");
    }

    #[tokio::test]
    async fn test_resolution_pointer_read_error_treated_as_absent() {
        let mut directory = MockDirectoryService::new();
        directory
            .expect_get_room_pointer()
            .returning(|| Err(DirectoryError::Request("storage unavailable".to_string())));
        directory
            .expect_join_room()
            .returning(|_| Ok("!resolved:example.org".to_string()));
        directory.expect_set_room_pointer().returning(|_| Ok(()));

        let service = service(matrix_ref("#telemetry:example.org"), directory);
        assert_eq!(service.resolve_room().await.unwrap(), "!resolved:example.org");
    }

    // Delivery

    #[tokio::test]
    async fn test_send_telemetry_message_content() {
        let generated_at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let expected = Telemetry::new("instance-1", HOSTNAME, 1_700_000_000_000, 42);
        let expected_payload = serde_json::to_value(&expected).unwrap();

        let mut directory = MockDirectoryService::new();
        no_pointer(&mut directory);
        directory
            .expect_join_room()
            .returning(|_| Ok("!resolved:example.org".to_string()));
        directory.expect_set_room_pointer().returning(|_| Ok(()));
        directory
            .expect_send_message()
            .withf(move |room_id, message| {
                room_id == "!resolved:example.org"
                    && message.body == telemetry_to_markdown(&expected)
                    && message.formatted_body == Some(telemetry_to_html(&expected))
                    && message.extra.get(TELEMETRY_EVENT_TYPE) == Some(&expected_payload)
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let service = service(matrix_ref("#telemetry:example.org"), directory);
        service.send_telemetry(42, generated_at).await;
    }

    #[tokio::test]
    async fn test_send_telemetry_swallows_send_failure() {
        let mut directory = MockDirectoryService::new();
        no_pointer(&mut directory);
        directory
            .expect_join_room()
            .returning(|_| Ok("!resolved:example.org".to_string()));
        directory.expect_set_room_pointer().returning(|_| Ok(()));
        directory
            .expect_send_message()
            .returning(|_, _| Err(DirectoryError::Request("event rejected".to_string())));

        let service = service(matrix_ref("#telemetry:example.org"), directory);
        // Must not panic or propagate
        service.send_telemetry(42, Utc::now()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_retry_then_success() {
        let mut submitter = MockTelemetrySubmitter::new();
        let mut seq = Sequence::new();
        submitter
            .expect_submit()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(SubmitError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR)));
        submitter
            .expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let service = service_with_http(
            matrix_ref("#telemetry:example.org"),
            MockDirectoryService::new(),
            submitter,
            http_config(3, 5.0),
            CancellationToken::new(),
        );

        let started = Instant::now();
        service.send_to_http(&json!({"version": 1})).await;
        // Exactly two inter-attempt delays
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_all_attempts_fail_without_escalating() {
        let mut submitter = MockTelemetrySubmitter::new();
        submitter
            .expect_submit()
            .times(3)
            .returning(|_| Err(SubmitError::Status(reqwest::StatusCode::BAD_GATEWAY)));

        let service = service_with_http(
            matrix_ref("#telemetry:example.org"),
            MockDirectoryService::new(),
            submitter,
            http_config(3, 5.0),
            CancellationToken::new(),
        );

        let started = Instant::now();
        service.send_to_http(&json!({"version": 1})).await;
        // Two delays, then gives up; the final failure is not followed by a sleep
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_success_on_first_attempt_sends_once() {
        let mut submitter = MockTelemetrySubmitter::new();
        submitter.expect_submit().times(1).returning(|_| Ok(()));

        let service = service_with_http(
            matrix_ref("#telemetry:example.org"),
            MockDirectoryService::new(),
            submitter,
            http_config(3, 5.0),
            CancellationToken::new(),
        );

        let started = Instant::now();
        service.send_to_http(&json!({"version": 1})).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_single_attempt_never_sleeps() {
        let mut submitter = MockTelemetrySubmitter::new();
        submitter
            .expect_submit()
            .times(1)
            .returning(|_| Err(SubmitError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR)));

        let service = service_with_http(
            matrix_ref("#telemetry:example.org"),
            MockDirectoryService::new(),
            submitter,
            http_config(1, 5.0),
            CancellationToken::new(),
        );

        let started = Instant::now();
        service.send_to_http(&json!({"version": 1})).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_retry_wait_is_cancelled_by_shutdown() {
        let mut submitter = MockTelemetrySubmitter::new();
        submitter
            .expect_submit()
            .times(1)
            .returning(|_| Err(SubmitError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR)));

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let service = service_with_http(
            matrix_ref("#telemetry:example.org"),
            MockDirectoryService::new(),
            submitter,
            http_config(3, 3600.0),
            shutdown,
        );

        let started = Instant::now();
        service.send_to_http(&json!({"version": 1})).await;
        // The retry wait is abandoned immediately instead of sleeping an hour
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    // Channel isolation

    #[tokio::test]
    async fn test_chat_failure_does_not_block_http() {
        let mut directory = MockDirectoryService::new();
        no_pointer(&mut directory);
        directory
            .expect_join_room()
            .returning(|_| Err(DirectoryError::NotFound("no such room".to_string())));

        let mut submitter = MockTelemetrySubmitter::new();
        submitter.expect_submit().times(1).returning(|_| Ok(()));

        // Literal room ID that cannot be joined: the chat channel fails fatally,
        // the HTTP channel must still run
        let service = service_with_http(
            matrix_ref("!abc:example.org"),
            directory,
            submitter,
            http_config(1, 0.0),
            CancellationToken::new(),
        );
        service.send_telemetry(42, Utc::now()).await;
    }

    #[tokio::test]
    async fn test_http_failure_does_not_block_chat() {
        let mut directory = MockDirectoryService::new();
        no_pointer(&mut directory);
        directory
            .expect_join_room()
            .returning(|_| Ok("!resolved:example.org".to_string()));
        directory.expect_set_room_pointer().returning(|_| Ok(()));
        directory.expect_send_message().times(1).returning(|_, _| Ok(()));

        let mut submitter = MockTelemetrySubmitter::new();
        submitter
            .expect_submit()
            .times(1)
            .returning(|_| Err(SubmitError::Status(reqwest::StatusCode::INTERNAL_SERVER_ERROR)));

        let service = service_with_http(
            matrix_ref("#telemetry:example.org"),
            directory,
            submitter,
            http_config(1, 0.0),
            CancellationToken::new(),
        );
        service.send_telemetry(42, Utc::now()).await;
    }
}
