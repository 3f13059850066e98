use serde::{Deserialize, Serialize};

/// A scalar value usable in an equality [`Filter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexValue {
    String(String),
    Bool(bool),
    I64(i64),
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        IndexValue::String(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        IndexValue::String(value)
    }
}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        IndexValue::Bool(value)
    }
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        IndexValue::I64(value)
    }
}

/// Supported comparison operators. Only equality is needed by the
/// orchestrator's query patterns (filter by status, member id, trigger type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    Eq,
}

/// A single field-level filter, matched against a record's
/// `indexed_fields()`-equivalent projection (callers supply the projection
/// via [`crate::Store::list`]'s `index_fn`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    /// Evaluate this filter against a named field projection.
    pub fn matches(&self, fields: &std::collections::HashMap<String, IndexValue>) -> bool {
        match fields.get(&self.field) {
            Some(actual) => match self.op {
                FilterOp::Eq => actual == &self.value,
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn eq_filter_matches_equal_value() {
        let filter = Filter::eq("status", "running");
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String("running".to_string()));
        assert!(filter.matches(&fields));
    }

    #[test]
    fn eq_filter_rejects_different_value() {
        let filter = Filter::eq("status", "running");
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String("failed".to_string()));
        assert!(!filter.matches(&fields));
    }

    #[test]
    fn eq_filter_rejects_missing_field() {
        let filter = Filter::eq("status", "running");
        let fields = HashMap::new();
        assert!(!filter.matches(&fields));
    }
}
