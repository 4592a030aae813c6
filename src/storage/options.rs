use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{Result, SombraError};

use super::metrics::ScanMetrics;
use super::record::RecordLoad;

/// Entities visited between two cancellation and external-update checks.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;
/// Relationship count at which the builder lays a node out as dense.
pub const DEFAULT_DENSE_NODE_THRESHOLD: usize = 50;
/// Chain length at which a group direction is counted in the degree store.
pub const DEFAULT_EXTERNAL_DEGREES_THRESHOLD: u64 = 10_000;

/// Tunables for store scans, the store builder and group cursors.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreViewOptions {
    /// Entities per scan batch.
    pub batch_size: usize,
    /// Relationship count at which a node is stored as dense.
    pub dense_node_threshold: usize,
    /// Chain length at which the aggregate-degree store takes over counting.
    pub external_degrees_threshold: u64,
    /// Load mode used by group cursors.
    pub record_load: RecordLoad,
    /// Optional metrics sink.
    #[serde(skip)]
    pub metrics: Option<Arc<dyn ScanMetrics>>,
}

impl Default for StoreViewOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            dense_node_threshold: DEFAULT_DENSE_NODE_THRESHOLD,
            external_degrees_threshold: DEFAULT_EXTERNAL_DEGREES_THRESHOLD,
            record_load: RecordLoad::Always,
            metrics: None,
        }
    }
}

impl fmt::Debug for StoreViewOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreViewOptions")
            .field("batch_size", &self.batch_size)
            .field("dense_node_threshold", &self.dense_node_threshold)
            .field("external_degrees_threshold", &self.external_degrees_threshold)
            .field("record_load", &self.record_load)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl StoreViewOptions {
    /// Creates options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the scan batch size.
    pub fn batch_size(mut self, entities: usize) -> Self {
        self.batch_size = entities;
        self
    }

    /// Sets the dense-node threshold used by the builder.
    pub fn dense_node_threshold(mut self, relationships: usize) -> Self {
        self.dense_node_threshold = relationships;
        self
    }

    /// Sets the chain length at which counts move to the degree store.
    pub fn external_degrees_threshold(mut self, relationships: u64) -> Self {
        self.external_degrees_threshold = relationships;
        self
    }

    /// Overrides the load mode of group cursors.
    pub fn record_load(mut self, load: RecordLoad) -> Self {
        self.record_load = load;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn ScanMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Parses options from TOML; missing keys keep their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let options: Self =
            toml::from_str(contents).map_err(|err| SombraError::Config(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Reads and parses a TOML options file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Rejects settings no scan can run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SombraError::Config(
                "batch_size must be greater than zero".into(),
            ));
        }
        if self.dense_node_threshold == 0 {
            return Err(SombraError::Config(
                "dense_node_threshold must be greater than zero".into(),
            ));
        }
        if self.external_degrees_threshold == 0 {
            return Err(SombraError::Config(
                "external_degrees_threshold must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
