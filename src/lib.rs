//! Policy-driven row retention for SQL databases.
//!
//! Each table under retention gets a [`RetentionPolicy`](retention::RetentionPolicy):
//! a timestamp column, a period, and a strategy for removing rows whose
//! timestamp is older than `now - period`. The [`RetentionEngine`](retention::RetentionEngine)
//! runs one cleanup per table under an advisory lock, and the
//! [`BacklogScheduler`](retention::BacklogScheduler) repeats rounds until the
//! backlog drains or the round cap is hit.

pub mod config;
pub mod db;
pub mod models;
pub mod observability;
pub mod retention;
