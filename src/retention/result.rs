use serde::{Deserialize, Serialize};

/// Why a cleanup run did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another run holds the entity type's cleanup lock.
    Locked,
}

/// Outcome of one cleanup run for one entity type.
///
/// `remaining` is true when more expired rows existed at the start of the run
/// than were removed, which is the backlog scheduler's re-trigger signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub count: u64,
    /// Rows the removal guard declined. Only reported by the destroy strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    pub remaining: bool,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
}

impl CleanupResult {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            count: 0,
            failed: None,
            remaining: false,
            dry_run: false,
            skipped: true,
            reason: Some(reason),
        }
    }

    /// Dry runs never report a backlog.
    pub fn dry_run(total: u64) -> Self {
        Self {
            count: total,
            failed: None,
            remaining: false,
            dry_run: true,
            skipped: false,
            reason: None,
        }
    }

    pub fn completed(count: u64, total: u64) -> Self {
        Self {
            count,
            failed: None,
            remaining: total > count,
            dry_run: false,
            skipped: false,
            reason: None,
        }
    }

    /// Destroy results. Declined rows stay in the table but are not backlog:
    /// another round would decline them again.
    pub fn destroyed(count: u64, failed: u64, total: u64) -> Self {
        Self {
            failed: Some(failed),
            remaining: total > count + failed,
            ..Self::completed(count, total)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_skipped_serialization() {
        let value = serde_json::to_value(CleanupResult::skipped(SkipReason::Locked)).unwrap();
        assert_eq!(
            value,
            json!({
                "count": 0,
                "remaining": false,
                "dry_run": false,
                "skipped": true,
                "reason": "locked"
            })
        );
    }

    #[test]
    fn test_completed_omits_absent_fields() {
        let value = serde_json::to_value(CleanupResult::completed(10, 25)).unwrap();
        assert_eq!(
            value,
            json!({ "count": 10, "remaining": true, "dry_run": false })
        );

        let value = serde_json::to_value(CleanupResult::destroyed(3, 2, 5)).unwrap();
        assert_eq!(
            value,
            json!({ "count": 3, "failed": 2, "remaining": false, "dry_run": false })
        );
    }

    #[test]
    fn test_destroyed_remaining_excludes_declined_rows() {
        assert!(!CleanupResult::destroyed(1, 1, 2).remaining);
        assert!(CleanupResult::destroyed(1, 1, 3).remaining);
        assert!(CleanupResult::destroyed(0, 0, 1).remaining);
    }

    #[test]
    fn test_dry_run_reports_total() {
        let result = CleanupResult::dry_run(42);
        assert_eq!(result.count, 42);
        assert!(result.dry_run);
        assert!(!result.remaining);
    }

    #[test]
    fn test_deserializes_minimal_shape() {
        let result: CleanupResult =
            serde_json::from_str(r#"{"count": 1, "remaining": false, "dry_run": false}"#).unwrap();
        assert_eq!(result, CleanupResult::completed(1, 1));
    }
}
