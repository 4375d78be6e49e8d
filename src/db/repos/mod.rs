mod advisory_locks;
mod retention;

pub use advisory_locks::*;
pub use retention::*;
