mod common;
mod retention;

pub use retention::SqliteRetentionStore;
