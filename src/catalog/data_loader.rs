use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

use super::{FoodId, FoodItem};

const DEFAULT_CUISINE: &str = "Unknown";

// CSV column headers, named after the JSON dataset keys.
const ID_COL: &str = "food_id";
const NAME_COL: &str = "food_name";
const CUISINE_COL: &str = "cuisine_type";
const CALORIES_COL: &str = "food_calories_per_serving";
const DESCRIPTION_COL: &str = "food_description";
const INGREDIENTS_COL: &str = "food_ingredients";
const COOKING_METHOD_COL: &str = "cooking_method";
const HEALTH_BENEFITS_COL: &str = "food_health_benefits";

/// A dataset record as it appears on disk. Every field but the name is optional.
#[derive(Debug, Deserialize)]
struct RawFoodRecord {
    #[serde(default)]
    food_id: Option<Value>,
    food_name: String,
    #[serde(default)]
    food_description: Option<String>,
    #[serde(default)]
    food_ingredients: Option<Vec<String>>,
    #[serde(default)]
    cuisine_type: Option<String>,
    #[serde(default)]
    food_calories_per_serving: Option<f64>,
    #[serde(default)]
    cooking_method: Option<String>,
    #[serde(default)]
    food_health_benefits: Option<String>,
    #[serde(default)]
    food_features: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    food_nutritional_factors: Option<BTreeMap<String, Value>>,
}

/// Loads the catalog, picking the format from the file extension (`.csv` or JSON otherwise).
pub fn load_food_data(path: &Path) -> Result<Vec<FoodItem>> {
    if !path.exists() {
        return Err(anyhow::anyhow!("Food dataset not found at: {:?}", path));
    }
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    let items = if is_csv {
        load_food_data_csv(path)?
    } else {
        load_food_data_json(path)?
    };
    info!(count = items.len(), path = %path.display(), "food catalog loaded");
    Ok(items)
}

pub fn load_food_data_json(path: &Path) -> Result<Vec<FoodItem>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read food dataset at {:?}", path))?;
    let records: Vec<RawFoodRecord> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse food dataset JSON at {:?}", path))?;
    Ok(normalize_records(records))
}

pub fn load_food_data_csv(path: &Path) -> Result<Vec<FoodItem>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open food dataset CSV at {:?}", path))?;
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(file);

    let headers = rdr.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let name_idx = column(NAME_COL).ok_or_else(|| anyhow::anyhow!("Column '{}' not found", NAME_COL))?;
    let id_idx = column(ID_COL);
    let cuisine_idx = column(CUISINE_COL);
    let calories_idx = column(CALORIES_COL);
    let description_idx = column(DESCRIPTION_COL);
    let ingredients_idx = column(INGREDIENTS_COL);
    let cooking_idx = column(COOKING_METHOD_COL);
    let health_idx = column(HEALTH_BENEFITS_COL);

    let mut records = Vec::new();
    for (row_index, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read record at row index {}", row_index))?;
        let field = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };

        let Some(food_name) = field(Some(name_idx)) else {
            debug!(row = row_index + 1, "skipping CSV row with empty name");
            continue;
        };

        let calories = field(calories_idx).and_then(|s| s.parse::<f64>().ok());
        records.push(RawFoodRecord {
            food_id: field(id_idx).map(Value::from),
            food_name,
            food_description: field(description_idx),
            food_ingredients: field(ingredients_idx).map(|s| {
                s.split(';')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(String::from)
                    .collect()
            }),
            cuisine_type: field(cuisine_idx),
            food_calories_per_serving: calories,
            cooking_method: field(cooking_idx),
            food_health_benefits: field(health_idx),
            food_features: None,
            food_nutritional_factors: None,
        });
    }

    Ok(normalize_records(records))
}

/// Fills defaults, stringifies ids and makes them unique by suffixing `_1`, `_2`, ...
fn normalize_records(records: Vec<RawFoodRecord>) -> Vec<FoodItem> {
    let mut used_ids: HashSet<String> = HashSet::with_capacity(records.len());
    let mut items = Vec::with_capacity(records.len());

    for (i, raw) in records.into_iter().enumerate() {
        let base_id = match raw.food_id {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => (i + 1).to_string(),
        };
        let mut unique_id = base_id.clone();
        let mut counter = 1;
        while used_ids.contains(&unique_id) {
            unique_id = format!("{}_{}", base_id, counter);
            counter += 1;
        }
        if unique_id != base_id {
            warn!(original = %base_id, assigned = %unique_id, "duplicate food id renamed");
        }
        used_ids.insert(unique_id.clone());

        let taste_profile = raw
            .food_features
            .map(|features| {
                features
                    .values()
                    .filter_map(value_to_text)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        let nutrition = raw
            .food_nutritional_factors
            .map(|factors| {
                factors
                    .into_iter()
                    .filter_map(|(k, v)| nutrition_text(&v).map(|text| (k, text)))
                    .collect()
            })
            .unwrap_or_default();

        items.push(FoodItem {
            id: FoodId::from(unique_id),
            name: raw.food_name.trim().to_string(),
            cuisine: raw
                .cuisine_type
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CUISINE.to_string()),
            calories: raw.food_calories_per_serving.unwrap_or(0.0),
            description: raw.food_description.unwrap_or_default(),
            ingredients: raw.food_ingredients.unwrap_or_default(),
            cooking_method: raw.cooking_method.unwrap_or_default(),
            health_benefits: raw.food_health_benefits.unwrap_or_default(),
            taste_profile,
            nutrition,
        });
    }

    items
}

/// Text form of a feature value; empty and falsy values are dropped.
fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(a) if a.is_empty() => None,
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        other => Some(other.to_string()),
    }
}

/// Nutrition values keep zeros and empty strings; only nulls are skipped.
fn nutrition_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{Builder, NamedTempFile};

    fn write_json(contents: &str) -> Result<NamedTempFile> {
        let mut file = Builder::new().suffix(".json").tempfile()?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn test_load_json_fills_defaults_and_derives_taste() -> Result<()> {
        let file = write_json(
            r#"[
                {"food_id": 1, "food_name": "Greek Salad", "cuisine_type": "Greek",
                 "food_calories_per_serving": 180, "food_ingredients": ["tomato", "feta"],
                 "food_features": {"taste": "fresh", "texture": "crunchy", "spice": ""},
                 "food_nutritional_factors": {"protein": "6g", "fiber": "3g"}},
                {"food_name": "Mystery Stew"}
            ]"#,
        )?;
        let items = load_food_data(file.path())?;
        assert_eq!(items.len(), 2);

        let salad = &items[0];
        assert_eq!(salad.id.as_str(), "1");
        assert_eq!(salad.calories, 180.0);
        assert_eq!(salad.taste_profile, "fresh, crunchy");
        assert_eq!(salad.nutrition.get("protein").map(String::as_str), Some("6g"));

        let stew = &items[1];
        assert_eq!(stew.id.as_str(), "2");
        assert_eq!(stew.cuisine, DEFAULT_CUISINE);
        assert_eq!(stew.calories, 0.0);
        assert!(stew.ingredients.is_empty());
        Ok(())
    }

    #[test]
    fn test_zero_nutrition_values_are_kept() -> Result<()> {
        let file = write_json(
            r#"[{"food_id": 7, "food_name": "Green Tea",
                 "food_features": {"sweet": 0, "taste": "grassy"},
                 "food_nutritional_factors": {"fat": 0, "sugar": "0g", "caffeine": null}}]"#,
        )?;
        let items = load_food_data(file.path())?;
        let tea = &items[0];
        assert_eq!(tea.nutrition.get("fat").map(String::as_str), Some("0"));
        assert_eq!(tea.nutrition.get("sugar").map(String::as_str), Some("0g"));
        assert!(!tea.nutrition.contains_key("caffeine"));
        assert_eq!(tea.taste_profile, "grassy");
        Ok(())
    }

    #[test]
    fn test_duplicate_ids_get_suffixes() -> Result<()> {
        let file = write_json(
            r#"[
                {"food_id": "7", "food_name": "A"},
                {"food_id": "7", "food_name": "B"},
                {"food_id": 7, "food_name": "C"}
            ]"#,
        )?;
        let items = load_food_data(file.path())?;
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["7", "7_1", "7_2"]);
        Ok(())
    }

    #[test]
    fn test_load_csv() -> Result<()> {
        let mut file = Builder::new().suffix(".csv").tempfile()?;
        writeln!(file, "{},{},{},{},{}", ID_COL, NAME_COL, CUISINE_COL, CALORIES_COL, INGREDIENTS_COL)?;
        writeln!(file, "1,Pad Thai,Thai,550,rice noodles; peanuts; egg")?;
        writeln!(file, "2,,Thai,100,")?; // Empty name
        writeln!(file, "3,Tiramisu,,not-a-number,")?;
        file.flush()?;

        let items = load_food_data(file.path())?;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].ingredients, vec!["rice noodles", "peanuts", "egg"]);
        assert_eq!(items[1].cuisine, DEFAULT_CUISINE);
        assert_eq!(items[1].calories, 0.0);
        Ok(())
    }

    #[test]
    fn test_csv_missing_name_column() -> Result<()> {
        let mut file = Builder::new().suffix(".csv").tempfile()?;
        writeln!(file, "{},{}", ID_COL, CUISINE_COL)?;
        writeln!(file, "1,Thai")?;
        file.flush()?;

        let result = load_food_data(file.path());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains(&format!("Column '{}' not found", NAME_COL)));
        Ok(())
    }

    #[test]
    fn test_file_not_found() {
        let path = Path::new("this_dataset_does_not_exist.json");
        let result = load_food_data(path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Food dataset not found"));
    }
}
