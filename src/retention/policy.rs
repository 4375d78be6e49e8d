//! Retention policies and the registry that validates and stores them.
//!
//! A policy is either absent or fully valid: [`PolicyRegistry::register`]
//! checks identifiers and columns against the live schema, then the strategy,
//! period and batch limit, and stores nothing if any check fails.

use std::{
    collections::{BTreeMap, HashSet},
    str::FromStr,
    sync::Arc,
};

use chrono::Duration;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::error::PolicyError;
use crate::{config::PolicyConfig, db::RetentionStore, models::RowData, models::RowFilter};

/// Shortest accepted retention period.
pub const MIN_PERIOD_SECS: u64 = 3600;

/// Batch limit applied when a policy doesn't set one.
pub const DEFAULT_BATCH_LIMIT: u64 = 10_000;

/// How expired rows are removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Row by row, consulting the entity's removal guard.
    Destroy,
    /// One bulk delete, no guard.
    DeleteAll,
    /// Copy into `<table>_archive`, then delete, chunk by chunk.
    Archive,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Destroy => "destroy",
            Self::DeleteAll => "delete_all",
            Self::Archive => "archive",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "destroy" => Ok(Self::Destroy),
            "delete_all" => Ok(Self::DeleteAll),
            "archive" => Ok(Self::Archive),
            other => Err(PolicyError::UnknownStrategy(other.to_string())),
        }
    }
}

/// A validated retention policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPolicy {
    pub period: Duration,
    pub strategy: Strategy,
    pub column: String,
    pub filter: Option<RowFilter>,
    pub batch_limit: u64,
}

/// Outcome of consulting a [`RemovalGuard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Decline(String),
}

/// Per-row veto consulted by the destroy strategy before each removal.
///
/// Any `Fn(&RowData) -> GuardDecision` closure is a guard.
pub trait RemovalGuard: Send + Sync {
    fn check(&self, row: &RowData) -> GuardDecision;
}

impl<F> RemovalGuard for F
where
    F: Fn(&RowData) -> GuardDecision + Send + Sync,
{
    fn check(&self, row: &RowData) -> GuardDecision {
        self(row)
    }
}

/// What the engine knows about an entity type: its table, its key column and
/// the optional removal guard.
#[derive(Clone)]
pub struct EntityDescriptor {
    pub table: String,
    pub id_column: String,
    guard: Option<Arc<dyn RemovalGuard>>,
}

impl EntityDescriptor {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            id_column: "id".to_string(),
            guard: None,
        }
    }

    pub fn with_id_column(mut self, id_column: impl Into<String>) -> Self {
        self.id_column = id_column.into();
        self
    }

    pub fn with_guard(mut self, guard: impl RemovalGuard + 'static) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn guard(&self) -> Option<&dyn RemovalGuard> {
        self.guard.as_deref()
    }
}

impl std::fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("table", &self.table)
            .field("id_column", &self.id_column)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// An entity descriptor together with its validated policy.
#[derive(Debug, Clone)]
pub struct RegisteredPolicy {
    pub entity: EntityDescriptor,
    pub policy: RetentionPolicy,
}

/// Validates a policy against the store's schema without registering it.
pub async fn validate_policy(
    store: &dyn RetentionStore,
    entity: &EntityDescriptor,
    config: &PolicyConfig,
) -> Result<RetentionPolicy, PolicyError> {
    let filter_columns = config
        .filter
        .as_ref()
        .map(|f| f.columns())
        .unwrap_or_default();

    let referenced: Vec<&str> = [config.column.as_str(), entity.id_column.as_str()]
        .into_iter()
        .chain(filter_columns.iter().copied())
        .collect();

    validate_identifier(&entity.table)?;
    for column in &referenced {
        validate_identifier(column)?;
    }

    let existing: HashSet<String> = store.columns(&entity.table).await?.into_iter().collect();
    if existing.is_empty() {
        return Err(PolicyError::UnknownTable(entity.table.clone()));
    }
    if let Some(missing) = referenced.iter().find(|c| !existing.contains(**c)) {
        return Err(PolicyError::UnknownColumn {
            table: entity.table.clone(),
            column: missing.to_string(),
        });
    }

    let strategy: Strategy = config.strategy.parse()?;

    if config.period_secs < MIN_PERIOD_SECS {
        return Err(PolicyError::PeriodTooShort {
            secs: config.period_secs,
        });
    }
    let period = i64::try_from(config.period_secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or(PolicyError::PeriodOutOfRange {
            secs: config.period_secs,
        })?;

    let batch_limit = match config.batch_limit {
        None => DEFAULT_BATCH_LIMIT,
        Some(limit) if limit > 0 => limit as u64,
        Some(limit) => return Err(PolicyError::InvalidBatchLimit(limit)),
    };

    Ok(RetentionPolicy {
        period,
        strategy,
        column: config.column.clone(),
        filter: config.filter.clone(),
        batch_limit,
    })
}

/// `[A-Za-z_][A-Za-z0-9_]*`
fn validate_identifier(name: &str) -> Result<(), PolicyError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PolicyError::InvalidIdentifier(name.to_string()))
    }
}

/// Policies keyed by entity type (table name).
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    policies: RwLock<BTreeMap<String, Arc<RegisteredPolicy>>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a policy. Re-registering an entity type replaces
    /// its previous policy.
    pub async fn register(
        &self,
        store: &dyn RetentionStore,
        entity: EntityDescriptor,
        config: &PolicyConfig,
    ) -> Result<RetentionPolicy, PolicyError> {
        let policy = validate_policy(store, &entity, config).await?;

        tracing::info!(
            entity = %entity.table,
            strategy = %policy.strategy,
            column = %policy.column,
            period_secs = policy.period.num_seconds(),
            batch_limit = policy.batch_limit,
            filtered = policy.filter.is_some(),
            "Registered retention policy"
        );

        let registered = Arc::new(RegisteredPolicy {
            entity,
            policy: policy.clone(),
        });
        self.policies
            .write()
            .insert(registered.entity.table.clone(), registered);
        Ok(policy)
    }

    pub fn lookup(&self, entity: &str) -> Option<Arc<RegisteredPolicy>> {
        self.policies.read().get(entity).cloned()
    }

    pub fn unregister(&self, entity: &str) -> bool {
        self.policies.write().remove(entity).is_some()
    }

    /// Registered entity types in name order.
    pub fn entity_types(&self) -> Vec<String> {
        self.policies.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.policies.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.read().is_empty()
    }
}
