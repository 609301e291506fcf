use std::env::{self, VarError};
use std::future::Future;
use std::sync::Arc;

use keystone_config::{
    PasswordPolicy, SessionPolicy, SnapshotReader, StoreLocation, SyncEvent, SyncReceiver,
    SyncService, SyncSink,
};
use keystone_kv::MemoryStore;
use keystone_telemetry::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, Metrics};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};

const ENV_BUCKET: &str = "KEYSTONE_BUCKET";
const ENV_KEY: &str = "KEYSTONE_KEY";
const ENV_LOG_LEVEL: &str = "KEYSTONE_LOG_LEVEL";
const ENV_LOG_FORMAT: &str = "KEYSTONE_LOG_FORMAT";

/// Process configuration read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Bucket and key holding the configuration record.
    pub location: StoreLocation,
    /// Log level or filter directive.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Read the configuration from `KEYSTONE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidConfig`] if a variable is not valid unicode
    /// or names an unusable bucket or key.
    pub fn from_env() -> AppResult<Self> {
        Self::from_values(
            env_value(ENV_BUCKET)?,
            env_value(ENV_KEY)?,
            env_value(ENV_LOG_LEVEL)?,
            env_value(ENV_LOG_FORMAT)?,
        )
    }

    /// Build the configuration from already-read values; `None` selects the
    /// default.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidConfig`] for an empty or malformed bucket or
    /// key name.
    pub fn from_values(
        bucket: Option<String>,
        key: Option<String>,
        log_level: Option<String>,
        log_format: Option<String>,
    ) -> AppResult<Self> {
        let defaults = StoreLocation::default();
        let bucket = validate_name("bucket", bucket.unwrap_or(defaults.bucket))?;
        let key = validate_name("key", key.unwrap_or(defaults.key))?;
        let log_level = log_level
            .map(|level| level.trim().to_string())
            .filter(|level| !level.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let log_format =
            log_format.map_or_else(LogFormat::infer, |name| LogFormat::from_name(&name));
        Ok(Self {
            location: StoreLocation::new(bucket, key),
            log_level,
            log_format,
        })
    }
}

fn env_value(name: &'static str) -> AppResult<Option<String>> {
    match env::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(value)) => Err(AppError::InvalidConfig {
            field: name,
            reason: "not_unicode",
            value: Some(value.to_string_lossy().into_owned()),
        }),
    }
}

fn validate_name(field: &'static str, value: String) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidConfig {
            field,
            reason: "empty",
            value: None,
        });
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(AppError::InvalidConfig {
            field,
            reason: "invalid_characters",
            value: Some(value),
        });
    }
    Ok(trimmed.to_string())
}

/// Entry point for the Keystone boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, telemetry, or the initial load fails,
/// or if the sync session ends with the store unavailable.
pub async fn run_app() -> AppResult<()> {
    let config = AppConfig::from_env()?;
    keystone_telemetry::init_logging(&LoggingConfig {
        level: &config.log_level,
        format: config.log_format,
        build_sha: option_env!("KEYSTONE_BUILD_SHA").unwrap_or("dev"),
    })
    .map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let metrics = Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;

    info!(
        location = %config.location,
        build_sha = keystone_telemetry::build_sha(),
        "Keystone bootstrap starting"
    );

    let store = MemoryStore::new();
    store.ensure_bucket(&config.location.bucket);
    let service = SyncService::new(Arc::new(store), config.location);

    let shutdown = async {
        if let Err(source) = tokio::signal::ctrl_c().await {
            warn!(error = %source, "failed to listen for shutdown signal");
        }
    };
    run_with(service, metrics, shutdown).await
}

/// Load the record, then stream updates until `shutdown` resolves or the
/// store goes away.
pub(crate) async fn run_with<F>(
    service: SyncService,
    metrics: Metrics,
    shutdown: F,
) -> AppResult<()>
where
    F: Future<Output = ()>,
{
    let record = match service.bootstrap().await {
        Ok(record) => record,
        Err(err) => {
            if err.is_store_unavailable() {
                metrics.inc_store_failure();
            }
            return Err(AppError::config("config.bootstrap", err));
        }
    };
    let reader = service.reader();
    metrics.set_revision(reader.revision().unwrap_or_default());
    info!(office = %record.office, "configuration loaded");

    let (sink, receiver) = SyncSink::channel();
    let task = service
        .spawn_sync(sink)
        .await
        .map_err(|err| AppError::config("config.sync", err))?;

    let consumer = consume_updates(receiver, reader, metrics.clone());
    tokio::pin!(consumer);
    tokio::select! {
        () = shutdown => {
            info!("shutdown requested");
            task.abort();
        }
        () = &mut consumer => {}
    }

    let result = task.join().await;
    match metrics.render() {
        Ok(rendered) => debug!(metrics = %rendered, "final metrics"),
        Err(err) => warn!(error = %err, "failed to render metrics"),
    }
    if let Err(err) = result {
        metrics.inc_store_failure();
        return Err(AppError::config("config.sync", err));
    }
    info!("Keystone shutdown complete");
    Ok(())
}

/// Apply every delivery to metrics and log the derived policies.
///
/// Returns once the sync session has stopped and both channels are drained.
async fn consume_updates(mut receiver: SyncReceiver, reader: SnapshotReader, metrics: Metrics) {
    while let Some(event) = receiver.recv().await {
        match event {
            SyncEvent::Updated(record) => {
                metrics.inc_sync_update();
                if let Some(revision) = reader.revision() {
                    metrics.set_revision(revision);
                }
                let session = SessionPolicy::from(&record);
                let password = PasswordPolicy::from(&record);
                info!(
                    revision = reader.revision(),
                    office = %record.office,
                    session_ttl_secs = session.session_ttl().as_secs(),
                    password_strategy = password.strategy().as_u8(),
                    "applied configuration update"
                );
            }
            SyncEvent::Failed(error) => {
                metrics.inc_sync_decode_failure();
                warn!(
                    revision = error.revision,
                    error = %error.source,
                    "ignoring malformed configuration revision"
                );
            }
        }
    }
}
