//! Row identity and row contents as seen by the retention engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row's loaded contents keyed by column name.
pub type RowData = serde_json::Map<String, serde_json::Value>;

/// Primary-key value of a row.
///
/// Ordering follows the database's key order for a single key type, which is
/// what keyset iteration relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowId {
    Integer(i64),
    Uuid(Uuid),
    Text(String),
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(n) => write!(f, "{n}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RowId {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<Uuid> for RowId {
    fn from(u: Uuid) -> Self {
        Self::Uuid(u)
    }
}

impl From<String> for RowId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for RowId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}
