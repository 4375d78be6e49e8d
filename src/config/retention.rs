//! Data retention configuration.
//!
//! Declares the retention policies the worker enforces, plus the knobs for
//! the backlog loop, lock namespace and archive chunking.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! enabled = true
//! interval_secs = 3600
//!
//! [retention.archive]
//! chunk_size = 500
//! insert_batch_size = 50
//!
//! [[retention.policies]]
//! table = "audit_logs"
//! column = "created_at"
//! period_secs = 7776000   # 90 days
//! strategy = "archive"
//!
//! [[retention.policies]]
//! table = "sessions"
//! id_column = "session_id"
//! column = "last_seen_at"
//! period_secs = 86400
//! strategy = "delete_all"
//! batch_limit = 5000
//! filter = { type = "eq", column = "revoked", value = true }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::RowFilter;

/// Data retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Whether the background retention worker runs.
    /// Default: false (must be explicitly enabled)
    #[serde(default)]
    pub enabled: bool,

    /// How often the worker starts a backlog chain (in seconds).
    /// Default: 3600 (hourly)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Maximum number of rounds in one backlog chain.
    /// Default: 10
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Namespace mixed into every cleanup lock key. Deployments sharing a
    /// database but managing different tables may use distinct namespaces.
    /// Default: "retention"
    #[serde(default = "default_lock_namespace")]
    pub lock_namespace: String,

    /// If true, the worker only counts expired rows and never removes any.
    /// Default: false
    #[serde(default)]
    pub dry_run: bool,

    /// Chunking for the archive strategy.
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Policies to register at startup, one per table.
    #[serde(default)]
    pub policies: Vec<PolicyEntryConfig>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_interval_secs(),
            max_rounds: default_max_rounds(),
            lock_namespace: default_lock_namespace(),
            dry_run: false,
            archive: ArchiveConfig::default(),
            policies: Vec::new(),
        }
    }
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_max_rounds() -> u32 {
    10
}

fn default_lock_namespace() -> String {
    "retention".to_string()
}

fn default_id_column() -> String {
    "id".to_string()
}

/// Chunk sizes for archive-then-delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Rows moved per transaction.
    /// Default: 500
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Rows per `INSERT ... SELECT` statement within a chunk.
    /// Default: 50
    #[serde(default = "default_insert_batch_size")]
    pub insert_batch_size: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            insert_batch_size: default_insert_batch_size(),
        }
    }
}

fn default_chunk_size() -> u64 {
    500
}

fn default_insert_batch_size() -> usize {
    50
}

/// A policy as declared in the `[[retention.policies]]` array.
///
/// `strategy` and `batch_limit` are kept loosely typed here so that bad values
/// surface as registration errors naming the table, instead of parse errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct PolicyEntryConfig {
    /// Table the policy applies to. Also the entity-type identifier.
    pub table: String,

    /// Primary-key column of the table.
    /// Default: "id"
    #[serde(default = "default_id_column")]
    pub id_column: String,

    /// Timestamp column compared against the retention period.
    pub column: String,

    /// Rows older than this many seconds are expired. Minimum 3600.
    pub period_secs: u64,

    /// One of `destroy`, `delete_all`, `archive`.
    pub strategy: String,

    /// Optional filter AND-ed with the age predicate.
    #[serde(default)]
    pub filter: Option<RowFilter>,

    /// Maximum rows handled per cleanup run.
    /// Default: 10000
    #[serde(default)]
    pub batch_limit: Option<i64>,
}

impl PolicyEntryConfig {
    pub fn policy(&self) -> PolicyConfig {
        PolicyConfig {
            column: self.column.clone(),
            period_secs: self.period_secs,
            strategy: self.strategy.clone(),
            filter: self.filter.clone(),
            batch_limit: self.batch_limit,
        }
    }
}

/// Unvalidated policy settings handed to the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyConfig {
    pub column: String,
    pub period_secs: u64,
    pub strategy: String,
    pub filter: Option<RowFilter>,
    pub batch_limit: Option<i64>,
}

impl PolicyConfig {
    pub fn new(
        column: impl Into<String>,
        period: std::time::Duration,
        strategy: impl std::fmt::Display,
    ) -> Self {
        Self {
            column: column.into(),
            period_secs: period.as_secs(),
            strategy: strategy.to_string(),
            filter: None,
            batch_limit: None,
        }
    }

    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_batch_limit(mut self, batch_limit: i64) -> Self {
        self.batch_limit = Some(batch_limit);
        self
    }
}

impl RetentionConfig {
    /// Get the interval as a Duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    /// Structural checks that don't need a database. Policy contents are
    /// validated by the registry against the live schema.
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_secs == 0 {
            return Err("retention.interval_secs must be greater than 0".to_string());
        }
        if self.max_rounds == 0 {
            return Err("retention.max_rounds must be at least 1".to_string());
        }
        if self.lock_namespace.trim().is_empty() {
            return Err("retention.lock_namespace must not be empty".to_string());
        }
        if self.archive.chunk_size == 0 || self.archive.insert_batch_size == 0 {
            return Err("retention.archive chunk sizes must be greater than 0".to_string());
        }
        let mut seen = HashSet::new();
        for entry in &self.policies {
            if !seen.insert(entry.table.as_str()) {
                return Err(format!(
                    "retention.policies declares table '{}' more than once",
                    entry.table
                ));
            }
        }
        Ok(())
    }
}
