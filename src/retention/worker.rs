//! Background retention worker.
//!
//! Periodically runs a backlog chain over every registered policy. In dry-run
//! mode it only counts expired rows.

use std::sync::Arc;

use super::{
    executor::RetentionEngine,
    scheduler::{BacklogChain, BacklogScheduler, ChainOutcome},
};
use crate::config::RetentionConfig;

/// Results from one dry-run pass.
#[derive(Debug, Default)]
pub struct DryRunSummary {
    /// Expired rows per entity type.
    pub expired: Vec<(String, u64)>,
    /// Entity types whose count failed or was skipped.
    pub unavailable: Vec<String>,
}

impl DryRunSummary {
    pub fn total(&self) -> u64 {
        self.expired.iter().map(|(_, n)| n).sum()
    }
}

/// Starts the retention worker as a background task.
///
/// The worker runs in a loop at the configured interval until the task is
/// cancelled.
pub async fn start_retention_worker(engine: Arc<RetentionEngine>, config: RetentionConfig) {
    if !config.enabled {
        tracing::info!("Retention worker disabled by configuration");
        return;
    }

    if engine.registry().is_empty() {
        tracing::info!("Retention worker enabled but no retention policies registered");
        return;
    }

    let dry_run_msg = if config.dry_run { " (DRY RUN)" } else { "" };

    tracing::info!(
        interval_secs = config.interval_secs,
        max_rounds = config.max_rounds,
        policies = engine.registry().len(),
        lock_scope = %engine.locks().scope(),
        dry_run = config.dry_run,
        "Starting retention worker{}",
        dry_run_msg
    );

    let scheduler = BacklogScheduler::new(Arc::clone(&engine)).with_max_rounds(config.max_rounds);
    let interval = config.interval();

    loop {
        if config.dry_run {
            let summary = dry_run_pass(&engine).await;
            tracing::info!(
                expired = summary.total(),
                entities = summary.expired.len(),
                unavailable = summary.unavailable.len(),
                "Retention run complete{}",
                dry_run_msg
            );
        } else {
            let chain = scheduler.drain(1).await;
            log_chain(&chain);
        }

        tokio::time::sleep(interval).await;
    }
}

/// Count expired rows for every registered policy without removing any.
pub async fn dry_run_pass(engine: &RetentionEngine) -> DryRunSummary {
    let mut summary = DryRunSummary::default();
    for entity in engine.registry().entity_types() {
        match engine.cleanup(&entity, true).await {
            Ok(Some(result)) if !result.skipped => summary.expired.push((entity, result.count)),
            Ok(Some(_)) => summary.unavailable.push(entity),
            Ok(None) => {}
            Err(e) => {
                tracing::error!(entity = %entity, error = %e, "Error counting expired rows");
                summary.unavailable.push(entity);
            }
        }
    }
    summary
}

fn log_chain(chain: &BacklogChain) {
    let removed = chain.removed();
    let failures = chain.failures();
    match chain.outcome {
        ChainOutcome::Drained if removed == 0 && failures == 0 => {
            tracing::debug!("Retention run complete, no rows to remove");
        }
        _ => {
            tracing::info!(
                rounds = chain.rounds.len(),
                removed,
                failures,
                outcome = chain.outcome.as_str(),
                "Retention run complete"
            );
        }
    }
}
