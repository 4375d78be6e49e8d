//! Backlog draining.
//!
//! A round runs one cleanup for every registered entity type. When any of them
//! reports remaining work, the next round is started, up to [`MAX_ROUNDS`]
//! rounds per chain. A chain ends either drained or capped; the leftover
//! backlog of a capped chain waits for the next external trigger.

use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;

use super::{executor::RetentionEngine, result::CleanupResult};
use crate::observability::metrics;

/// Rounds per backlog chain.
pub const MAX_ROUNDS: u32 = 10;

/// What happened to one entity type in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntityOutcome {
    Completed(CleanupResult),
    Failed { error: String },
}

impl EntityOutcome {
    fn has_remaining(&self) -> bool {
        match self {
            Self::Completed(result) => !result.skipped && result.remaining,
            Self::Failed { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacklogRound {
    pub round: u32,
    pub has_remaining: bool,
    pub results: BTreeMap<String, EntityOutcome>,
}

/// What follows a finished round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTransition {
    Continue { next_round: u32 },
    Drained,
    Capped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainOutcome {
    Drained,
    Capped,
}

impl ChainOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drained => "drained",
            Self::Capped => "capped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BacklogChain {
    pub rounds: Vec<BacklogRound>,
    pub outcome: ChainOutcome,
}

impl BacklogChain {
    /// Rows removed across every round.
    pub fn removed(&self) -> u64 {
        self.rounds
            .iter()
            .flat_map(|r| r.results.values())
            .map(|o| match o {
                EntityOutcome::Completed(r) if !r.dry_run => r.count,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.rounds
            .iter()
            .flat_map(|r| r.results.values())
            .filter(|o| matches!(o, EntityOutcome::Failed { .. }))
            .count()
    }
}

pub struct BacklogScheduler {
    engine: Arc<RetentionEngine>,
    max_rounds: u32,
}

impl BacklogScheduler {
    pub fn new(engine: Arc<RetentionEngine>) -> Self {
        Self {
            engine,
            max_rounds: MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// Clean up every registered entity type once. A failure for one entity
    /// type is recorded and the round moves on.
    pub async fn run_round(&self, round: u32) -> BacklogRound {
        let mut results = BTreeMap::new();

        for entity in self.engine.registry().entity_types() {
            let outcome = match self.engine.cleanup(&entity, false).await {
                Ok(Some(result)) => EntityOutcome::Completed(result),
                // Unregistered since the round started.
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        round,
                        entity = %entity,
                        error = %e,
                        "Entity failed in backlog round, continuing"
                    );
                    EntityOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            results.insert(entity, outcome);
        }

        let has_remaining = results.values().any(EntityOutcome::has_remaining);

        tracing::debug!(
            round,
            entities = results.len(),
            has_remaining,
            "Backlog round finished"
        );

        BacklogRound {
            round,
            has_remaining,
            results,
        }
    }

    pub fn transition(&self, round: &BacklogRound) -> RoundTransition {
        if !round.has_remaining {
            RoundTransition::Drained
        } else if round.round >= self.max_rounds {
            RoundTransition::Capped
        } else {
            RoundTransition::Continue {
                next_round: round.round + 1,
            }
        }
    }

    /// Run rounds from `start` until the backlog drains or the cap is hit.
    pub async fn drain(&self, start: u32) -> BacklogChain {
        let mut rounds = Vec::new();
        let mut round = start.max(1);

        let outcome = loop {
            let finished = self.run_round(round).await;
            let transition = self.transition(&finished);
            rounds.push(finished);

            match transition {
                RoundTransition::Continue { next_round } => {
                    tracing::info!(round, next_round, "Backlog remaining, starting next round");
                    round = next_round;
                }
                RoundTransition::Drained => break ChainOutcome::Drained,
                RoundTransition::Capped => {
                    tracing::warn!(
                        round,
                        max_rounds = self.max_rounds,
                        "Backlog round cap reached, leaving remaining rows for the next run"
                    );
                    break ChainOutcome::Capped;
                }
            }
        };

        metrics::record_backlog_chain(rounds.len() as u64, outcome.as_str());

        BacklogChain { rounds, outcome }
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{
        config::PolicyConfig,
        retention::{
            EntityDescriptor,
            executor::tests::{DAY, count, insert_aged, now, setup},
        },
    };

    fn completed(count: u64, remaining: bool) -> EntityOutcome {
        EntityOutcome::Completed(CleanupResult {
            remaining,
            ..CleanupResult::completed(count, count)
        })
    }

    fn round(n: u32, has_remaining: bool) -> BacklogRound {
        BacklogRound {
            round: n,
            has_remaining,
            results: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_backlog_drains_over_three_rounds() {
        let (pool, engine, _clock) = setup().await;
        engine
            .register(
                EntityDescriptor::new("events"),
                &PolicyConfig::new("created_at", 90 * DAY, "delete_all").with_batch_limit(2),
            )
            .await
            .unwrap();
        insert_aged(&pool, 120, 5).await;

        let scheduler = BacklogScheduler::new(Arc::new(engine));

        let first = scheduler.run_round(1).await;
        assert!(first.has_remaining);
        assert_eq!(
            scheduler.transition(&first),
            RoundTransition::Continue { next_round: 2 }
        );

        let chain = scheduler.drain(2).await;
        assert_eq!(chain.outcome, ChainOutcome::Drained);
        assert_eq!(
            chain.rounds.iter().map(|r| r.round).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert!(!chain.rounds[1].has_remaining);
        assert_eq!(chain.removed(), 3);
        assert_eq!(count(&pool, "events").await, 0);
    }

    #[tokio::test]
    async fn test_round_cap_stops_chain() {
        let (pool, engine, _clock) = setup().await;
        engine
            .register(
                EntityDescriptor::new("events"),
                &PolicyConfig::new("created_at", 90 * DAY, "delete_all").with_batch_limit(1),
            )
            .await
            .unwrap();
        insert_aged(&pool, 120, 15).await;

        let scheduler = BacklogScheduler::new(Arc::new(engine));
        let chain = scheduler.drain(1).await;

        assert_eq!(chain.outcome, ChainOutcome::Capped);
        assert_eq!(chain.rounds.len(), MAX_ROUNDS as usize);
        assert_eq!(chain.rounds.last().unwrap().round, MAX_ROUNDS);
        assert_eq!(count(&pool, "events").await, 5);
    }

    #[tokio::test]
    async fn test_transition_never_exceeds_cap() {
        let (_pool, engine, _clock) = setup().await;
        let engine = Arc::new(engine);
        let scheduler = BacklogScheduler::new(engine.clone());

        assert_eq!(scheduler.transition(&round(MAX_ROUNDS, true)), RoundTransition::Capped);
        assert_eq!(
            scheduler.transition(&round(MAX_ROUNDS + 3, true)),
            RoundTransition::Capped
        );
        assert_eq!(scheduler.transition(&round(MAX_ROUNDS, false)), RoundTransition::Drained);
        assert_eq!(
            scheduler.transition(&round(9, true)),
            RoundTransition::Continue { next_round: 10 }
        );

        let short = BacklogScheduler::new(engine).with_max_rounds(3);
        assert_eq!(short.transition(&round(3, true)), RoundTransition::Capped);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_entity() {
        let (pool, engine, _clock) = setup().await;
        sqlx::query("CREATE TABLE sessions (id INTEGER PRIMARY KEY, seen_at TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        engine
            .register(
                EntityDescriptor::new("events"),
                &PolicyConfig::new("created_at", 90 * DAY, "delete_all").with_batch_limit(2),
            )
            .await
            .unwrap();
        // No sessions_archive table, so every archive run fails.
        engine
            .register(
                EntityDescriptor::new("sessions"),
                &PolicyConfig::new("seen_at", DAY, "archive"),
            )
            .await
            .unwrap();
        insert_aged(&pool, 120, 3).await;
        sqlx::query("INSERT INTO sessions (seen_at) VALUES (?)")
            .bind(now() - Duration::days(30))
            .execute(&pool)
            .await
            .unwrap();

        let scheduler = BacklogScheduler::new(Arc::new(engine));
        let chain = scheduler.drain(1).await;

        assert_eq!(chain.outcome, ChainOutcome::Drained);
        assert_eq!(chain.rounds.len(), 2);
        assert_eq!(chain.removed(), 3);
        assert_eq!(chain.failures(), 2);
        assert!(matches!(
            chain.rounds[0].results.get("sessions"),
            Some(EntityOutcome::Failed { error }) if error.contains("sessions_archive")
        ));
        assert_eq!(count(&pool, "events").await, 0);
        assert_eq!(count(&pool, "sessions").await, 1);
    }

    #[tokio::test]
    async fn test_skipped_results_never_signal_remaining() {
        let (pool, engine, _clock) = setup().await;
        engine
            .register(
                EntityDescriptor::new("events"),
                &PolicyConfig::new("created_at", 90 * DAY, "delete_all").with_batch_limit(1),
            )
            .await
            .unwrap();
        insert_aged(&pool, 120, 3).await;

        let engine = Arc::new(engine);
        let held = engine.locks().try_acquire("events").await.unwrap().unwrap();
        let scheduler = BacklogScheduler::new(engine.clone());

        let chain = scheduler.drain(1).await;
        assert_eq!(chain.outcome, ChainOutcome::Drained);
        assert_eq!(chain.rounds.len(), 1);
        assert!(matches!(
            chain.rounds[0].results.get("events"),
            Some(EntityOutcome::Completed(r)) if r.skipped
        ));
        held.release().await.unwrap();
    }

    #[test]
    fn test_outcome_remaining_signal() {
        assert!(completed(2, true).has_remaining());
        assert!(!completed(2, false).has_remaining());
        assert!(
            !EntityOutcome::Failed {
                error: "boom".to_string()
            }
            .has_remaining()
        );
    }
}
