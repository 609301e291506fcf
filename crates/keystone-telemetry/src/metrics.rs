//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauge relevant to configuration sync.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{IntCounter, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    sync_updates_total: IntCounter,
    sync_decode_failures_total: IntCounter,
    writes_total: IntCounter,
    store_failures_total: IntCounter,
    revision: IntGauge,
}

/// Snapshot of the configuration counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Records delivered by sync sessions.
    pub sync_updates_total: u64,
    /// Stored values that failed to decode during sync.
    pub sync_decode_failures_total: u64,
    /// Successful configuration writes.
    pub writes_total: u64,
    /// Operations that failed because the store was unavailable.
    pub store_failures_total: u64,
    /// Revision of the most recently applied record.
    pub revision: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let sync_updates_total = counter(
            &registry,
            "config_sync_updates_total",
            "Configuration records delivered by sync sessions",
        )?;
        let sync_decode_failures_total = counter(
            &registry,
            "config_sync_decode_failures_total",
            "Stored configuration values that failed to decode during sync",
        )?;
        let writes_total = counter(
            &registry,
            "config_writes_total",
            "Successful configuration writes",
        )?;
        let store_failures_total = counter(
            &registry,
            "config_store_failures_total",
            "Configuration operations failed by an unavailable store",
        )?;
        let revision = IntGauge::with_opts(Opts::new(
            "config_revision",
            "Revision of the most recently applied configuration record",
        ))
        .map_err(|source| TelemetryError::Metric {
            name: "config_revision",
            source,
        })?;
        register(&registry, "config_revision", revision.clone())?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                sync_updates_total,
                sync_decode_failures_total,
                writes_total,
                store_failures_total,
                revision,
            }),
        })
    }

    /// Count a record delivered by a sync session.
    pub fn inc_sync_update(&self) {
        self.inner.sync_updates_total.inc();
    }

    /// Count a stored value that failed to decode during sync.
    pub fn inc_sync_decode_failure(&self) {
        self.inner.sync_decode_failures_total.inc();
    }

    /// Count a successful configuration write.
    pub fn inc_write(&self) {
        self.inner.writes_total.inc();
    }

    /// Count an operation failed by an unavailable store.
    pub fn inc_store_failure(&self) {
        self.inner.store_failures_total.inc();
    }

    /// Record the revision of the applied record, saturating at `i64::MAX`.
    pub fn set_revision(&self, revision: u64) {
        self.inner
            .revision
            .set(i64::try_from(revision).unwrap_or(i64::MAX));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Render`] if the registry cannot be encoded.
    pub fn render(&self) -> Result<String> {
        TextEncoder::new()
            .encode_to_string(&self.inner.registry.gather())
            .map_err(|source| TelemetryError::Render { source })
    }

    /// Take a point-in-time snapshot of the counters and gauge.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sync_updates_total: self.inner.sync_updates_total.get(),
            sync_decode_failures_total: self.inner.sync_decode_failures_total.get(),
            writes_total: self.inner.writes_total.get(),
            store_failures_total: self.inner.store_failures_total.get(),
            revision: self.inner.revision.get(),
        }
    }
}

fn counter(registry: &Registry, name: &'static str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::Metric { name, source })?;
    register(registry, name, counter.clone())?;
    Ok(counter)
}

fn register<C>(registry: &Registry, name: &'static str, collector: C) -> Result<()>
where
    C: Collector + 'static,
{
    registry
        .register(Box::new(collector))
        .map_err(|source| TelemetryError::Metric { name, source })
}
