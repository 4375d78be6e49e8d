//! Row filters that narrow a retention policy to a subset of a table.
//!
//! A filter is AND-ed with the age predicate of the policy, so only rows that
//! are both expired and matched by the filter are considered for removal.
//!
//! # Filter Types
//!
//! - [`ComparisonFilter`]: compare a column against a scalar value
//! - [`NullFilter`]: `is_null` / `is_not_null` checks
//! - [`InFilter`]: `in` / `nin` membership against a list of values
//! - [`CompoundFilter`]: combine filters with `and`/`or`
//!
//! # Example
//!
//! ```toml
//! [retention.policies.filter]
//! type = "and"
//! filters = [
//!   { type = "eq", column = "status", value = "closed" },
//!   { type = "is_null", column = "legal_hold_id" },
//! ]
//! ```

use serde::{Deserialize, Serialize};

/// Comparison operators for column filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl ComparisonOperator {
    /// SQL operator token.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

impl std::fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eq => write!(f, "eq"),
            Self::Ne => write!(f, "ne"),
            Self::Gt => write!(f, "gt"),
            Self::Gte => write!(f, "gte"),
            Self::Lt => write!(f, "lt"),
            Self::Lte => write!(f, "lte"),
        }
    }
}

/// A scalar value a column can be compared against.
///
/// Integers are kept apart from floats so they bind as integer parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(untagged)]
pub enum FilterValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for FilterValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Compares a column to a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
pub struct ComparisonFilter {
    #[serde(rename = "type")]
    pub operator: ComparisonOperator,
    pub column: String,
    pub value: FilterValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum NullCheck {
    IsNull,
    IsNotNull,
}

/// Checks a column for (non-)NULL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
pub struct NullFilter {
    #[serde(rename = "type")]
    pub check: NullCheck,
    pub column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum MembershipOperator {
    In,
    Nin,
}

/// Checks a column for membership in a list of values.
///
/// An empty `in` list matches nothing; an empty `nin` list matches everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
pub struct InFilter {
    #[serde(rename = "type")]
    pub operator: MembershipOperator,
    pub column: String,
    pub values: Vec<FilterValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    And,
    Or,
}

impl std::fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "and"),
            Self::Or => write!(f, "or"),
        }
    }
}

/// Combines filters with `and` or `or`.
///
/// An empty `and` matches every row, an empty `or` matches none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
pub struct CompoundFilter {
    #[serde(rename = "type")]
    pub operator: LogicalOperator,
    pub filters: Vec<RowFilter>,
}

/// A row filter.
///
/// The variant is determined by the `type` field:
/// - `eq`, `ne`, `gt`, `gte`, `lt`, `lte` → [`ComparisonFilter`]
/// - `is_null`, `is_not_null` → [`NullFilter`]
/// - `in`, `nin` → [`InFilter`]
/// - `and`, `or` → [`CompoundFilter`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(untagged)]
pub enum RowFilter {
    Comparison(ComparisonFilter),
    Null(NullFilter),
    In(InFilter),
    Compound(CompoundFilter),
}

impl RowFilter {
    fn comparison(
        operator: ComparisonOperator,
        column: impl Into<String>,
        value: impl Into<FilterValue>,
    ) -> Self {
        Self::Comparison(ComparisonFilter {
            operator,
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn eq(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::comparison(ComparisonOperator::Eq, column, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::comparison(ComparisonOperator::Ne, column, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::comparison(ComparisonOperator::Gt, column, value)
    }

    pub fn gte(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::comparison(ComparisonOperator::Gte, column, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::comparison(ComparisonOperator::Lt, column, value)
    }

    pub fn lte(column: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::comparison(ComparisonOperator::Lte, column, value)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::Null(NullFilter {
            check: NullCheck::IsNull,
            column: column.into(),
        })
    }

    pub fn is_not_null(column: impl Into<String>) -> Self {
        Self::Null(NullFilter {
            check: NullCheck::IsNotNull,
            column: column.into(),
        })
    }

    pub fn in_list<V: Into<FilterValue>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In(InFilter {
            operator: MembershipOperator::In,
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn not_in_list<V: Into<FilterValue>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In(InFilter {
            operator: MembershipOperator::Nin,
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn and(filters: Vec<RowFilter>) -> Self {
        Self::Compound(CompoundFilter {
            operator: LogicalOperator::And,
            filters,
        })
    }

    pub fn or(filters: Vec<RowFilter>) -> Self {
        Self::Compound(CompoundFilter {
            operator: LogicalOperator::Or,
            filters,
        })
    }

    /// Every column referenced anywhere in the filter tree, in visit order.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Comparison(f) => out.push(&f.column),
            Self::Null(f) => out.push(&f.column),
            Self::In(f) => out.push(&f.column),
            Self::Compound(f) => {
                for inner in &f.filters {
                    inner.collect_columns(out);
                }
            }
        }
    }
}

impl From<ComparisonFilter> for RowFilter {
    fn from(filter: ComparisonFilter) -> Self {
        Self::Comparison(filter)
    }
}

impl From<CompoundFilter> for RowFilter {
    fn from(filter: CompoundFilter) -> Self {
        Self::Compound(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_comparison() {
        let json = r#"{"type": "eq", "column": "status", "value": "closed"}"#;
        let filter: RowFilter = serde_json::from_str(json).unwrap();
        assert_eq!(filter, RowFilter::eq("status", "closed"));
    }

    #[test]
    fn test_integer_values_stay_integers() {
        let json = r#"{"type": "gte", "column": "attempts", "value": 3}"#;
        let filter: RowFilter = serde_json::from_str(json).unwrap();
        match filter {
            RowFilter::Comparison(f) => assert_eq!(f.value, FilterValue::Integer(3)),
            other => panic!("expected comparison, got {other:?}"),
        }

        let json = r#"{"type": "lt", "column": "score", "value": 0.5}"#;
        let filter: RowFilter = serde_json::from_str(json).unwrap();
        match filter {
            RowFilter::Comparison(f) => assert_eq!(f.value, FilterValue::Number(0.5)),
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_null_and_in() {
        let filter: RowFilter =
            serde_json::from_str(r#"{"type": "is_null", "column": "legal_hold"}"#).unwrap();
        assert_eq!(filter, RowFilter::is_null("legal_hold"));

        let filter: RowFilter = serde_json::from_str(
            r#"{"type": "nin", "column": "kind", "values": ["invoice", "receipt"]}"#,
        )
        .unwrap();
        assert_eq!(
            filter,
            RowFilter::not_in_list("kind", ["invoice", "receipt"])
        );
    }

    #[test]
    fn test_deserialize_nested_compound() {
        let json = r#"{
            "type": "and",
            "filters": [
                {"type": "eq", "column": "status", "value": "closed"},
                {
                    "type": "or",
                    "filters": [
                        {"type": "is_null", "column": "owner_id"},
                        {"type": "eq", "column": "archived", "value": true}
                    ]
                }
            ]
        }"#;
        let filter: RowFilter = serde_json::from_str(json).unwrap();
        assert_eq!(
            filter,
            RowFilter::and(vec![
                RowFilter::eq("status", "closed"),
                RowFilter::or(vec![
                    RowFilter::is_null("owner_id"),
                    RowFilter::eq("archived", true),
                ]),
            ])
        );
    }

    #[test]
    fn test_deserialize_from_toml() {
        let toml = r#"
            type = "and"
            filters = [
              { type = "eq", column = "status", value = "closed" },
              { type = "in", column = "region", values = ["eu", "us"] },
            ]
        "#;
        let filter: RowFilter = toml::from_str(toml).unwrap();
        assert_eq!(filter.columns(), vec!["status", "region"]);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let json = r#"{"type": "like", "column": "name", "value": "a%"}"#;
        assert!(serde_json::from_str::<RowFilter>(json).is_err());
    }

    #[test]
    fn test_columns_walks_tree() {
        let filter = RowFilter::or(vec![
            RowFilter::eq("a", 1),
            RowFilter::and(vec![RowFilter::is_not_null("b"), RowFilter::in_list("c", [1, 2])]),
        ]);
        assert_eq!(filter.columns(), vec!["a", "b", "c"]);
    }
}
