//! Mongo-style filters over indexed columns.
//!
//! `{"element_type": {"$in": ["text", "table"]}}` keeps documents whose
//! `element_type` column is one of the listed values. Supported operators are
//! `$eq`, `$ne`, `$in`, `$nin`, `$gt`, `$gte`, `$lt`, `$lte`; a bare value is
//! shorthand for `$eq`, and `$and` / `$or` combine sub-filters.

use crate::error::SearchError;
use crate::models::{ElementType, ELEMENT_TYPE_TAG};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Field {
        column: String,
        conditions: Vec<Condition>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
}

impl Filter {
    pub fn field(column: impl Into<String>, condition: Condition) -> Self {
        Filter::Field {
            column: column.into(),
            conditions: vec![condition],
        }
    }

    /// `element_type ∈ types`
    pub fn element_types(types: &[ElementType]) -> Self {
        Filter::field(
            ELEMENT_TYPE_TAG,
            Condition::In(
                types
                    .iter()
                    .map(|kind| Value::String(kind.as_str().to_string()))
                    .collect(),
            ),
        )
    }

    pub fn parse(value: &Value) -> Result<Self, SearchError> {
        let object = value
            .as_object()
            .ok_or_else(|| SearchError::InvalidFilter(format!("expected an object, got {value}")))?;

        let mut parts = Vec::with_capacity(object.len());
        for (key, inner) in object {
            match key.as_str() {
                "$and" => parts.push(Filter::And(parse_list(key, inner)?)),
                "$or" => parts.push(Filter::Or(parse_list(key, inner)?)),
                operator if operator.starts_with('$') => {
                    return Err(SearchError::InvalidFilter(format!(
                        "operator {operator} is not allowed at the top level"
                    )))
                }
                column => parts.push(Filter::Field {
                    column: column.to_string(),
                    conditions: parse_conditions(column, inner)?,
                }),
            }
        }

        match parts.len() {
            1 => Ok(parts.remove(0)),
            _ => Ok(Filter::And(parts)),
        }
    }

    /// Column names referenced anywhere in the filter.
    pub fn columns(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_columns(&mut names);
        names.sort_unstable();
        names.dedup();
        names
    }

    fn collect_columns<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Filter::And(parts) | Filter::Or(parts) => {
                for part in parts {
                    part.collect_columns(names);
                }
            }
            Filter::Field { column, .. } => names.push(column.as_str()),
        }
    }

    pub fn matches(&self, columns: &Map<String, Value>) -> bool {
        match self {
            Filter::And(parts) => parts.iter().all(|part| part.matches(columns)),
            Filter::Or(parts) => parts.iter().any(|part| part.matches(columns)),
            Filter::Field { column, conditions } => {
                let value = columns.get(column).filter(|value| !value.is_null());
                conditions.iter().all(|condition| condition.holds(value))
            }
        }
    }

    /// Qdrant `filter` object for the same predicate.
    pub fn to_qdrant(&self) -> Value {
        match self {
            Filter::And(parts) => json!({
                "must": parts.iter().map(Filter::to_qdrant).collect::<Vec<_>>()
            }),
            Filter::Or(parts) => json!({
                "should": parts.iter().map(Filter::to_qdrant).collect::<Vec<_>>()
            }),
            Filter::Field { column, conditions } => {
                let mut must = Vec::new();
                let mut must_not = Vec::new();
                for condition in conditions {
                    match condition {
                        Condition::Eq(value) => {
                            must.push(json!({"key": column, "match": {"value": value}}))
                        }
                        Condition::Ne(value) => {
                            must_not.push(json!({"key": column, "match": {"value": value}}))
                        }
                        Condition::In(values) => {
                            must.push(json!({"key": column, "match": {"any": values}}))
                        }
                        Condition::Nin(values) => {
                            must.push(json!({"key": column, "match": {"except": values}}))
                        }
                        Condition::Gt(value) => {
                            must.push(json!({"key": column, "range": {"gt": value}}))
                        }
                        Condition::Gte(value) => {
                            must.push(json!({"key": column, "range": {"gte": value}}))
                        }
                        Condition::Lt(value) => {
                            must.push(json!({"key": column, "range": {"lt": value}}))
                        }
                        Condition::Lte(value) => {
                            must.push(json!({"key": column, "range": {"lte": value}}))
                        }
                    }
                }

                let mut object = Map::new();
                if !must.is_empty() {
                    object.insert("must".to_string(), Value::Array(must));
                }
                if !must_not.is_empty() {
                    object.insert("must_not".to_string(), Value::Array(must_not));
                }
                Value::Object(object)
            }
        }
    }
}

impl Condition {
    fn holds(&self, value: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => value.is_some_and(|value| loosely_equal(value, expected)),
            Condition::Ne(expected) => !value.is_some_and(|value| loosely_equal(value, expected)),
            Condition::In(options) => value.is_some_and(|value| {
                options.iter().any(|option| loosely_equal(value, option))
            }),
            Condition::Nin(options) => !value.is_some_and(|value| {
                options.iter().any(|option| loosely_equal(value, option))
            }),
            Condition::Gt(bound) => compare(value, bound) == Some(Ordering::Greater),
            Condition::Gte(bound) => matches!(
                compare(value, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Condition::Lt(bound) => compare(value, bound) == Some(Ordering::Less),
            Condition::Lte(bound) => {
                matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal))
            }
        }
    }

    fn operator(&self) -> &'static str {
        match self {
            Condition::Eq(_) => "$eq",
            Condition::Ne(_) => "$ne",
            Condition::In(_) => "$in",
            Condition::Nin(_) => "$nin",
            Condition::Gt(_) => "$gt",
            Condition::Gte(_) => "$gte",
            Condition::Lt(_) => "$lt",
            Condition::Lte(_) => "$lte",
        }
    }

    fn operand(&self) -> Value {
        match self {
            Condition::In(values) | Condition::Nin(values) => Value::Array(values.clone()),
            Condition::Eq(value)
            | Condition::Ne(value)
            | Condition::Gt(value)
            | Condition::Gte(value)
            | Condition::Lt(value)
            | Condition::Lte(value) => value.clone(),
        }
    }
}

fn parse_list(operator: &str, value: &Value) -> Result<Vec<Filter>, SearchError> {
    let items = value.as_array().ok_or_else(|| {
        SearchError::InvalidFilter(format!("{operator} expects an array of filters"))
    })?;
    items.iter().map(Filter::parse).collect()
}

fn parse_conditions(column: &str, value: &Value) -> Result<Vec<Condition>, SearchError> {
    let operators = match value.as_object() {
        Some(object) if !object.is_empty() && object.keys().all(|key| key.starts_with('$')) => {
            object
        }
        _ => return Ok(vec![Condition::Eq(value.clone())]),
    };

    operators
        .iter()
        .map(|(operator, operand)| {
            let condition = match operator.as_str() {
                "$eq" => Condition::Eq(operand.clone()),
                "$ne" => Condition::Ne(operand.clone()),
                "$in" => Condition::In(operand_list(column, operator, operand)?),
                "$nin" => Condition::Nin(operand_list(column, operator, operand)?),
                "$gt" => Condition::Gt(operand.clone()),
                "$gte" => Condition::Gte(operand.clone()),
                "$lt" => Condition::Lt(operand.clone()),
                "$lte" => Condition::Lte(operand.clone()),
                other => {
                    return Err(SearchError::InvalidFilter(format!(
                        "unsupported operator {other} on column {column}"
                    )))
                }
            };
            Ok(condition)
        })
        .collect()
}

fn operand_list(column: &str, operator: &str, operand: &Value) -> Result<Vec<Value>, SearchError> {
    operand.as_array().cloned().ok_or_else(|| {
        SearchError::InvalidFilter(format!("{operator} on column {column} expects an array"))
    })
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(left), Some(right)) => left == right,
        _ => left == right,
    }
}

fn compare(value: Option<&Value>, bound: &Value) -> Option<Ordering> {
    let value = value?;
    match (value, bound) {
        (Value::Number(_), Value::Number(_)) => value.as_f64()?.partial_cmp(&bound.as_f64()?),
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

impl TryFrom<Value> for Filter {
    type Error = SearchError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Filter::parse(&value)
    }
}

impl From<Filter> for Value {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::And(parts) => json!({ "$and": parts.into_iter().map(Value::from).collect::<Vec<_>>() }),
            Filter::Or(parts) => json!({ "$or": parts.into_iter().map(Value::from).collect::<Vec<_>>() }),
            Filter::Field { column, conditions } => {
                let operators = conditions
                    .iter()
                    .map(|condition| (condition.operator().to_string(), condition.operand()))
                    .collect::<Map<_, _>>();
                json!({ column: operators })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(element_type: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(ELEMENT_TYPE_TAG.to_string(), json!(element_type));
        map
    }

    #[test]
    fn in_filter_keeps_listed_types() {
        let filter = Filter::parse(&json!({"element_type": {"$in": ["text", "table"]}}))
            .expect("filter should parse");

        assert!(filter.matches(&columns("text")));
        assert!(filter.matches(&columns("table")));
        assert!(!filter.matches(&columns("image")));
        assert!(!filter.matches(&Map::new()));
    }

    #[test]
    fn bare_value_is_equality() {
        let filter = Filter::parse(&json!({"element_type": "image"})).expect("filter should parse");
        assert_eq!(filter, Filter::field("element_type", Condition::Eq(json!("image"))));
        assert!(filter.matches(&columns("image")));
    }

    #[test]
    fn or_and_ranges_combine() {
        let filter = Filter::parse(&json!({
            "$or": [
                {"element_type": "image"},
                {"page": {"$gte": 2, "$lt": 4}}
            ]
        }))
        .expect("filter should parse");

        let mut page_three = columns("text");
        page_three.insert("page".to_string(), json!(3));
        let mut page_five = columns("text");
        page_five.insert("page".to_string(), json!(5));

        assert!(filter.matches(&columns("image")));
        assert!(filter.matches(&page_three));
        assert!(!filter.matches(&page_five));
        assert_eq!(filter.columns(), vec!["element_type", "page"]);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let error = Filter::parse(&json!({"element_type": {"$regex": "te.*"}}));
        assert!(matches!(error, Err(SearchError::InvalidFilter(_))));
    }

    #[test]
    fn filter_deserializes_from_request_json() {
        let parsed: Filter =
            serde_json::from_value(json!({"element_type": {"$in": ["text"]}})).expect("deserialize");
        let back = serde_json::to_value(&parsed).expect("serialize");
        assert_eq!(back, json!({"element_type": {"$in": ["text"]}}));
    }

    #[test]
    fn qdrant_translation_uses_match_any() {
        let filter = Filter::element_types(&[ElementType::Text, ElementType::Image]);
        assert_eq!(
            filter.to_qdrant(),
            json!({"must": [{"key": "element_type", "match": {"any": ["text", "image"]}}]})
        );
    }
}
