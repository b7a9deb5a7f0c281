//! Food catalog domain types and dataset loading.

pub mod data_loader;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

pub use data_loader::{load_food_data, load_food_data_csv, load_food_data_json};

/// Structured metadata stored next to an item's embedding.
pub type Metadata = BTreeMap<String, Value>;

/// Stable identifier of a food item.
///
/// Ordering is "natural": two ids that both parse as unsigned integers compare
/// numerically (so `"2" < "10"`), anything else compares as plain strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FoodId(String);

impl FoodId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FoodId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FoodId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for FoodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for FoodId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<u64>(), other.0.parse::<u64>()) {
            // "01" and "1" are numerically equal; fall back to the raw text so Ord agrees with Eq.
            (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for FoodId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A single dish in the catalog. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodItem {
    pub id: FoodId,
    pub name: String,
    pub cuisine: String,
    /// Calories per serving.
    pub calories: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default)]
    pub cooking_method: String,
    #[serde(default)]
    pub health_benefits: String,
    #[serde(default)]
    pub taste_profile: String,
    #[serde(default)]
    pub nutrition: BTreeMap<String, String>,
}

/// Kind of value a metadata field holds, used to validate filters up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
}

impl FoodItem {
    pub const FIELD_NAME: &'static str = "name";
    pub const FIELD_CUISINE: &'static str = "cuisine";
    pub const FIELD_CALORIES: &'static str = "calories";
    pub const FIELD_INGREDIENTS: &'static str = "ingredients";
    pub const FIELD_COOKING_METHOD: &'static str = "cooking_method";
    pub const FIELD_HEALTH_BENEFITS: &'static str = "health_benefits";
    pub const FIELD_TASTE_PROFILE: &'static str = "taste_profile";

    pub const FILTERABLE_FIELDS: &'static [(&'static str, FieldKind)] = &[
        (Self::FIELD_NAME, FieldKind::Text),
        (Self::FIELD_CUISINE, FieldKind::Text),
        (Self::FIELD_CALORIES, FieldKind::Number),
        (Self::FIELD_INGREDIENTS, FieldKind::Text),
        (Self::FIELD_COOKING_METHOD, FieldKind::Text),
        (Self::FIELD_HEALTH_BENEFITS, FieldKind::Text),
        (Self::FIELD_TASTE_PROFILE, FieldKind::Text),
    ];

    pub fn field_kind(field: &str) -> Option<FieldKind> {
        Self::FILTERABLE_FIELDS
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, kind)| *kind)
    }

    /// Metadata attached to the item's vector. Numeric fields stay numeric.
    pub fn metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert(Self::FIELD_NAME.into(), Value::from(self.name.clone()));
        meta.insert(Self::FIELD_CUISINE.into(), Value::from(self.cuisine.clone()));
        meta.insert(Self::FIELD_CALORIES.into(), Value::from(self.calories));
        meta.insert(
            Self::FIELD_INGREDIENTS.into(),
            Value::from(self.ingredients.join(", ")),
        );
        meta.insert(
            Self::FIELD_COOKING_METHOD.into(),
            Value::from(self.cooking_method.clone()),
        );
        meta.insert(
            Self::FIELD_HEALTH_BENEFITS.into(),
            Value::from(self.health_benefits.clone()),
        );
        meta.insert(
            Self::FIELD_TASTE_PROFILE.into(),
            Value::from(self.taste_profile.clone()),
        );
        meta
    }
}

/// Distinct cuisines in the catalog, sorted alphabetically.
pub fn available_cuisines<'a>(items: impl IntoIterator<Item = &'a FoodItem>) -> Vec<String> {
    let mut cuisines: Vec<String> = items.into_iter().map(|item| item.cuisine.clone()).collect();
    cuisines.sort();
    cuisines.dedup();
    cuisines
}

#[cfg(test)]
pub(crate) fn test_item(id: &str, name: &str, cuisine: &str, calories: f64, description: &str) -> FoodItem {
    FoodItem {
        id: FoodId::from(id),
        name: name.to_string(),
        cuisine: cuisine.to_string(),
        calories,
        description: description.to_string(),
        ingredients: Vec::new(),
        cooking_method: String::new(),
        health_benefits: String::new(),
        taste_profile: String::new(),
        nutrition: BTreeMap::new(),
    }
}
