//! Metadata filters over food items.
//!
//! A [`FilterCriteria`] is an AND of [`Predicate`]s. Criteria are plain data so
//! they can be validated before a query runs, pushed into a vector store that
//! evaluates them natively, or applied client-side after retrieval.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::catalog::{FieldKind, FoodItem, Metadata};
use crate::error::{RagError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Field equals value. Text compares ASCII case-insensitively.
    Equals { field: String, value: Value },
    /// Inclusive numeric range; a missing bound is open.
    Range {
        field: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// Field equals any of the values.
    OneOf { field: String, values: Vec<Value> },
}

impl Predicate {
    pub fn field(&self) -> &str {
        match self {
            Predicate::Equals { field, .. }
            | Predicate::Range { field, .. }
            | Predicate::OneOf { field, .. } => field,
        }
    }

    fn matches(&self, metadata: &Metadata) -> bool {
        let Some(actual) = metadata.get(self.field()) else {
            return false;
        };
        match self {
            Predicate::Equals { value, .. } => values_equal(actual, value),
            Predicate::Range { min, max, .. } => match actual.as_f64() {
                Some(n) => min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m),
                None => false,
            },
            Predicate::OneOf { values, .. } => values.iter().any(|v| values_equal(actual, v)),
        }
    }

    fn validate(&self) -> Result<()> {
        let field = self.field();
        let kind = FoodItem::field_kind(field).ok_or_else(|| {
            RagError::InvalidFilter(format!("unknown metadata field '{}'", field))
        })?;

        match self {
            Predicate::Range { min, max, .. } => {
                if kind != FieldKind::Number {
                    return Err(RagError::InvalidFilter(format!(
                        "range filter on non-numeric field '{}'",
                        field
                    )));
                }
                if min.is_none() && max.is_none() {
                    return Err(RagError::InvalidFilter(format!(
                        "range filter on '{}' has no bounds",
                        field
                    )));
                }
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        return Err(RagError::InvalidFilter(format!(
                            "range filter on '{}' has min {} above max {}",
                            field, lo, hi
                        )));
                    }
                }
            }
            Predicate::Equals { value, .. } => check_value_kind(field, kind, value)?,
            Predicate::OneOf { values, .. } => {
                if values.is_empty() {
                    return Err(RagError::InvalidFilter(format!(
                        "one_of filter on '{}' has no values",
                        field
                    )));
                }
                for value in values {
                    check_value_kind(field, kind, value)?;
                }
            }
        }
        Ok(())
    }

    /// Exact-match predicates on text fields narrow the candidate set sharply.
    fn is_selective(&self) -> bool {
        matches!(self, Predicate::Equals { .. } | Predicate::OneOf { .. })
            && FoodItem::field_kind(self.field()) == Some(FieldKind::Text)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Equals { field, value } => write!(f, "{} = {}", field, display_value(value)),
            Predicate::Range { field, min, max } => match (min, max) {
                (Some(lo), Some(hi)) => write!(f, "{} <= {} <= {}", lo, field, hi),
                (Some(lo), None) => write!(f, "{} >= {}", field, lo),
                (None, Some(hi)) => write!(f, "{} <= {}", field, hi),
                (None, None) => write!(f, "{} (any)", field),
            },
            Predicate::OneOf { field, values } => {
                let list: Vec<String> = values.iter().map(display_value).collect();
                write!(f, "{} in [{}]", field, list.join(", "))
            }
        }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn check_value_kind(field: &str, kind: FieldKind, value: &Value) -> Result<()> {
    let ok = match kind {
        FieldKind::Text => value.is_string(),
        FieldKind::Number => value.is_number(),
    };
    if ok {
        Ok(())
    } else {
        Err(RagError::InvalidFilter(format!(
            "value {} does not match the type of field '{}'",
            value, field
        )))
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
            _ => false,
        },
        (a, b) => a == b,
    }
}

/// Conjunction of predicates. Empty criteria match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterCriteria {
    predicates: Vec<Predicate>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cuisine(cuisine: impl Into<String>) -> Self {
        Self::new().with(Predicate::Equals {
            field: FoodItem::FIELD_CUISINE.to_string(),
            value: Value::from(cuisine.into()),
        })
    }

    pub fn max_calories(max: f64) -> Self {
        Self::calorie_range(None, Some(max))
    }

    pub fn calorie_range(min: Option<f64>, max: Option<f64>) -> Self {
        Self::new().with(Predicate::Range {
            field: FoodItem::FIELD_CALORIES.to_string(),
            min,
            max,
        })
    }

    pub fn one_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new().with(Predicate::OneOf {
            field: field.into(),
            values,
        })
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Combines two criteria with logical AND.
    pub fn and(mut self, other: FilterCriteria) -> Self {
        self.predicates.extend(other.predicates);
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        self.predicates.iter().try_for_each(Predicate::validate)
    }

    pub fn is_selective(&self) -> bool {
        self.predicates.iter().any(Predicate::is_selective)
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.predicates.iter().all(|p| p.matches(metadata))
    }

    pub fn matches_item(&self, item: &FoodItem) -> bool {
        self.is_empty() || self.matches(&item.metadata())
    }
}

impl fmt::Display for FilterCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.predicates.is_empty() {
            return f.write_str("no filters");
        }
        let parts: Vec<String> = self.predicates.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(" AND "))
    }
}
