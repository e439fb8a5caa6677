//! Typed query composition.
//!
//! Queries are equality filters plus an optional sort, expressed against
//! document wire fields. The store decides how to execute them; the text
//! rendering is for logs and diagnostics only.

use std::cmp::Ordering;

use serde_json::Value;

/// Equality predicate on one document field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

/// Sort order on one document field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// Query definition passed to the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySpec {
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    /// Items per page requested from the store
    pub page_size: Option<usize>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality filter.
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn order_by_asc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending: false,
        });
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Check whether an equality filter on `field` is already present.
    pub fn has_filter(&self, field: &str) -> bool {
        self.filters.iter().any(|f| f.field == field)
    }

    /// Parameterised text form, e.g.
    /// `SELECT * FROM c WHERE c.discriminator = @p0 ORDER BY c._ts DESC`
    pub fn to_query_text(&self) -> String {
        let mut text = String::from("SELECT * FROM c");

        if !self.filters.is_empty() {
            let predicates: Vec<String> = self
                .filters
                .iter()
                .enumerate()
                .map(|(i, f)| format!("c.{} = @p{}", f.field, i))
                .collect();
            text.push_str(" WHERE ");
            text.push_str(&predicates.join(" AND "));
        }

        if let Some(order) = &self.order_by {
            let direction = if order.descending { "DESC" } else { "ASC" };
            text.push_str(&format!(" ORDER BY c.{} {}", order.field, direction));
        }

        text
    }

    /// Parameter bindings matching `to_query_text`
    pub fn parameters(&self) -> Vec<(String, Value)> {
        self.filters
            .iter()
            .enumerate()
            .map(|(i, f)| (format!("@p{}", i), f.value.clone()))
            .collect()
    }

    /// Evaluate the filters against a document.
    pub fn matches(&self, doc: &Value) -> bool {
        self.filters
            .iter()
            .all(|f| doc.get(&f.field) == Some(&f.value))
    }

    /// Compare two documents by the sort field, if any.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        let Some(order) = &self.order_by else {
            return Ordering::Equal;
        };

        let ordering = compare_values(a.get(&order.field), b.get(&order.field));
        if order.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_text() {
        let spec = QuerySpec::new()
            .where_eq("discriminator", "note")
            .where_eq("parentId", "n1")
            .order_by_desc("_ts");

        assert_eq!(
            spec.to_query_text(),
            "SELECT * FROM c WHERE c.discriminator = @p0 AND c.parentId = @p1 ORDER BY c._ts DESC"
        );
        assert_eq!(spec.parameters()[1], ("@p1".to_string(), json!("n1")));
    }

    #[test]
    fn test_unfiltered_query_text() {
        assert_eq!(QuerySpec::new().to_query_text(), "SELECT * FROM c");
    }

    #[test]
    fn test_matches() {
        let spec = QuerySpec::new().where_eq("discriminator", "note");

        assert!(spec.matches(&json!({"id": "a", "discriminator": "note"})));
        assert!(!spec.matches(&json!({"id": "a", "discriminator": "comment"})));
        assert!(!spec.matches(&json!({"id": "a"})));
    }

    #[test]
    fn test_descending_compare() {
        let spec = QuerySpec::new().order_by_desc("_ts");
        let older = json!({"_ts": 1});
        let newer = json!({"_ts": 2});

        assert_eq!(spec.compare(&newer, &older), Ordering::Less);
        assert_eq!(spec.compare(&older, &newer), Ordering::Greater);
    }

    #[test]
    fn test_ascending_order() {
        let spec = QuerySpec::new().order_by_asc("id");

        assert!(spec.to_query_text().ends_with("ORDER BY c.id ASC"));
        assert_eq!(spec.compare(&json!({"id": "a"}), &json!({"id": "b"})), Ordering::Less);
    }
}
