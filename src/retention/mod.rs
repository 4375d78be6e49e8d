//! Policy-driven row retention.
//!
//! Each entity type (a table) gets at most one [`RetentionPolicy`] saying how
//! old its rows may get and how expired rows are removed:
//!
//! - `destroy`: row by row, consulting the entity's [`RemovalGuard`]
//! - `delete_all`: one bulk delete
//! - `archive`: copy into `<table>_archive`, then delete, chunk by chunk
//!
//! Every cleanup run holds a non-blocking per-entity-type lock and handles at
//! most `batch_limit` rows. The [`BacklogScheduler`] re-runs rounds while any
//! entity type reports remaining work, up to [`MAX_ROUNDS`] rounds per chain.

mod archive;
mod clock;
mod error;
mod executor;
mod lock;
mod policy;
mod predicate;
mod result;
mod scheduler;
mod worker;

pub use archive::{ARCHIVED_AT_COLUMN, archive_table_name};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{PolicyError, RetentionError, RetentionResult};
pub use executor::RetentionEngine;
pub use lock::{
    DEFAULT_LOCK_NAMESPACE, InProcessLocks, LockCoordinator, LockGuard, LockScope, Locked,
    lock_key,
};
pub use policy::{
    DEFAULT_BATCH_LIMIT, EntityDescriptor, GuardDecision, MIN_PERIOD_SECS, PolicyRegistry,
    RegisteredPolicy, RemovalGuard, RetentionPolicy, Strategy, validate_policy,
};
pub use predicate::{ExpiredQuery, SqlFilter, SqlValue, quote_ident};
pub use result::{CleanupResult, SkipReason};
pub use scheduler::{
    BacklogChain, BacklogRound, BacklogScheduler, ChainOutcome, EntityOutcome, MAX_ROUNDS,
    RoundTransition,
};
pub use worker::{DryRunSummary, dry_run_pass, start_retention_worker};
