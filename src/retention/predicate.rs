//! Expiration predicate: "rows of this entity type older than the policy
//! period, narrowed by the policy filter", rendered as a SQL WHERE fragment.
//!
//! The fragment uses `?` placeholders. SQLite consumes it as-is; the Postgres
//! store renumbers the placeholders to `$n` before executing.

use chrono::{DateTime, Utc};

use super::policy::{EntityDescriptor, RetentionPolicy};
use crate::models::{
    CompoundFilter, FilterValue, InFilter, LogicalOperator, MembershipOperator, NullCheck,
    RowFilter,
};

/// A WHERE clause fragment with its bind values in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    pub where_clause: String,
    pub bindings: Vec<SqlValue>,
}

/// SQL bind value types.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl From<&FilterValue> for SqlValue {
    fn from(value: &FilterValue) -> Self {
        match value {
            FilterValue::Boolean(b) => Self::Bool(*b),
            FilterValue::Integer(n) => Self::Integer(*n),
            FilterValue::Number(n) => Self::Float(*n),
            FilterValue::String(s) => Self::String(s.clone()),
        }
    }
}

/// Quote an identifier for use in SQL. Identifiers are validated at policy
/// registration, so this only has to handle the standard double-quote form.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The set of rows currently eligible for removal under one policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiredQuery {
    pub table: String,
    pub id_column: String,
    pub column: String,
    /// Rows with `column` strictly before this instant are expired.
    pub cutoff: DateTime<Utc>,
    pub filter: Option<RowFilter>,
}

impl ExpiredQuery {
    pub fn new(entity: &EntityDescriptor, policy: &RetentionPolicy, now: DateTime<Utc>) -> Self {
        Self {
            table: entity.table.clone(),
            id_column: entity.id_column.clone(),
            column: policy.column.clone(),
            cutoff: now
                .checked_sub_signed(policy.period)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            filter: policy.filter.clone(),
        }
    }

    /// Render the predicate as a WHERE fragment, comparing the timestamp
    /// column directly against the bound cutoff.
    pub fn to_sql(&self) -> SqlFilter {
        self.to_sql_with(|column, cutoff| {
            (
                format!("{} < ?", quote_ident(column)),
                SqlValue::Timestamp(cutoff),
            )
        })
    }

    /// Render the predicate with a backend-specific age comparison.
    ///
    /// `older_than` receives the unquoted column name and the cutoff, and
    /// returns a fragment containing exactly one `?` together with the value
    /// bound to it.
    pub fn to_sql_with<F>(&self, older_than: F) -> SqlFilter
    where
        F: FnOnce(&str, DateTime<Utc>) -> (String, SqlValue),
    {
        let mut ctx = TranslationContext::new();
        let (age, cutoff) = older_than(&self.column, self.cutoff);
        ctx.bindings.push(cutoff);
        let where_clause = match &self.filter {
            Some(filter) => {
                let filter_sql = ctx.translate(filter);
                format!("({} AND {})", age, filter_sql)
            }
            None => age,
        };
        SqlFilter {
            where_clause,
            bindings: ctx.bindings,
        }
    }
}

struct TranslationContext {
    bindings: Vec<SqlValue>,
}

impl TranslationContext {
    fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    fn add_binding(&mut self, value: SqlValue) -> String {
        self.bindings.push(value);
        "?".to_string()
    }

    fn translate(&mut self, filter: &RowFilter) -> String {
        match filter {
            RowFilter::Comparison(f) => {
                let placeholder = self.add_binding(SqlValue::from(&f.value));
                format!(
                    "{} {} {}",
                    quote_ident(&f.column),
                    f.operator.as_sql(),
                    placeholder
                )
            }
            RowFilter::Null(f) => match f.check {
                NullCheck::IsNull => format!("{} IS NULL", quote_ident(&f.column)),
                NullCheck::IsNotNull => format!("{} IS NOT NULL", quote_ident(&f.column)),
            },
            RowFilter::In(f) => self.translate_in(f),
            RowFilter::Compound(f) => self.translate_compound(f),
        }
    }

    fn translate_in(&mut self, filter: &InFilter) -> String {
        if filter.values.is_empty() {
            return match filter.operator {
                MembershipOperator::In => "1 = 0".to_string(),
                MembershipOperator::Nin => "1 = 1".to_string(),
            };
        }
        let placeholders: Vec<String> = filter
            .values
            .iter()
            .map(|v| self.add_binding(SqlValue::from(v)))
            .collect();
        let keyword = match filter.operator {
            MembershipOperator::In => "IN",
            MembershipOperator::Nin => "NOT IN",
        };
        format!(
            "{} {} ({})",
            quote_ident(&filter.column),
            keyword,
            placeholders.join(", ")
        )
    }

    fn translate_compound(&mut self, filter: &CompoundFilter) -> String {
        if filter.filters.is_empty() {
            return match filter.operator {
                LogicalOperator::And => "1 = 1".to_string(),
                LogicalOperator::Or => "1 = 0".to_string(),
            };
        }
        let joiner = match filter.operator {
            LogicalOperator::And => " AND ",
            LogicalOperator::Or => " OR ",
        };
        let parts: Vec<String> = filter.filters.iter().map(|f| self.translate(f)).collect();
        format!("({})", parts.join(joiner))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::retention::policy::Strategy;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn policy(filter: Option<RowFilter>) -> RetentionPolicy {
        RetentionPolicy {
            period: Duration::days(30),
            strategy: Strategy::DeleteAll,
            column: "created_at".to_string(),
            filter,
            batch_limit: 100,
        }
    }

    #[test]
    fn test_cutoff_is_now_minus_period() {
        let query = ExpiredQuery::new(&EntityDescriptor::new("events"), &policy(None), now());
        assert_eq!(query.cutoff, now() - Duration::days(30));
        assert_eq!(query.table, "events");
        assert_eq!(query.id_column, "id");
    }

    #[test]
    fn test_age_only_predicate() {
        let query = ExpiredQuery::new(&EntityDescriptor::new("events"), &policy(None), now());
        let sql = query.to_sql();
        assert_eq!(sql.where_clause, r#""created_at" < ?"#);
        assert_eq!(
            sql.bindings,
            vec![SqlValue::Timestamp(now() - Duration::days(30))]
        );
    }

    #[test]
    fn test_filter_is_anded_after_age() {
        let filter = RowFilter::and(vec![
            RowFilter::eq("status", "closed"),
            RowFilter::is_null("hold_id"),
            RowFilter::in_list("region", ["eu", "us"]),
        ]);
        let query = ExpiredQuery::new(
            &EntityDescriptor::new("events"),
            &policy(Some(filter)),
            now(),
        );
        let sql = query.to_sql();
        assert_eq!(
            sql.where_clause,
            r#"("created_at" < ? AND ("status" = ? AND "hold_id" IS NULL AND "region" IN (?, ?)))"#
        );
        assert_eq!(sql.bindings.len(), 4);
        assert_eq!(sql.bindings[1], SqlValue::String("closed".to_string()));
        assert_eq!(sql.bindings[3], SqlValue::String("us".to_string()));
    }

    #[test]
    fn test_empty_lists_and_compounds() {
        let query = ExpiredQuery::new(
            &EntityDescriptor::new("events"),
            &policy(Some(RowFilter::or(vec![
                RowFilter::in_list::<i64>("kind", []),
                RowFilter::and(vec![]),
            ]))),
            now(),
        );
        assert_eq!(
            query.to_sql().where_clause,
            r#"("created_at" < ? AND (1 = 0 OR 1 = 1))"#
        );
    }

    #[test]
    fn test_custom_age_comparison_keeps_binding_order() {
        let query = ExpiredQuery::new(
            &EntityDescriptor::new("events"),
            &policy(Some(RowFilter::eq("status", "closed"))),
            now(),
        );
        let sql = query.to_sql_with(|column, cutoff| {
            (
                format!("epoch({}) < ?", quote_ident(column)),
                SqlValue::Integer(cutoff.timestamp()),
            )
        });
        assert_eq!(
            sql.where_clause,
            r#"(epoch("created_at") < ? AND "status" = ?)"#
        );
        assert_eq!(
            sql.bindings,
            vec![
                SqlValue::Integer((now() - Duration::days(30)).timestamp()),
                SqlValue::String("closed".to_string()),
            ]
        );
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("plain"), r#""plain""#);
        assert_eq!(quote_ident(r#"we"ird"#), r#""we""ird""#);
    }
}
