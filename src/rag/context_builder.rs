//! Turns ranked search results into a bounded text block for a generation prompt.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::catalog::FoodId;
use crate::error::{RagError, Result};
use crate::search::catalog_index::SearchResult;

/// Rendered in place of entries when retrieval found nothing.
pub const NO_GROUNDING_MARKER: &str = "No relevant food items found in the database.";

const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum rendered length, in characters.
    pub budget_chars: usize,
    pub max_items: usize,
    pub max_description_chars: usize,
    pub max_ingredients: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_chars: 1500,
            max_items: 3,
            max_description_chars: 160,
            max_ingredients: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Grounding {
    Grounded,
    /// Nothing was retrieved; the context carries only [`NO_GROUNDING_MARKER`].
    NoGrounding,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    pub rank: usize,
    pub id: FoodId,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagContext {
    pub query: String,
    pub entries: Vec<ContextEntry>,
    /// Ids backing each entry, in entry order.
    pub provenance: Vec<FoodId>,
    pub grounding: Grounding,
    /// Some content was cut or dropped to respect the budget.
    pub truncated: bool,
    pub budget: usize,
}

impl RagContext {
    pub fn is_grounded(&self) -> bool {
        self.grounding == Grounding::Grounded
    }

    pub fn render(&self) -> String {
        match self.grounding {
            Grounding::NoGrounding => truncate_chars(NO_GROUNDING_MARKER, self.budget),
            Grounding::Grounded => self
                .entries
                .iter()
                .map(|entry| entry.summary.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl fmt::Display for RagContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Assembles with the configured `budget_chars`.
    pub fn assemble_default(&self, query: &str, results: &[SearchResult]) -> Result<RagContext> {
        self.assemble(query, results, self.config.budget_chars)
    }

    /// One summary line per result, in rank order, until the budget or
    /// `max_items` runs out. The first line is always kept, cut to fit if needed.
    pub fn assemble(&self, query: &str, results: &[SearchResult], budget: usize) -> Result<RagContext> {
        if budget == 0 {
            return Err(RagError::InvalidQuery("context budget must be greater than zero".to_string()));
        }

        if results.is_empty() {
            return Ok(RagContext {
                query: query.to_string(),
                entries: Vec::new(),
                provenance: Vec::new(),
                grounding: Grounding::NoGrounding,
                truncated: NO_GROUNDING_MARKER.chars().count() > budget,
                budget,
            });
        }

        let mut entries: Vec<ContextEntry> = Vec::new();
        let mut used = 0;
        let mut truncated = false;

        for result in results.iter().take(self.config.max_items.max(1)) {
            let summary = self.summarize(result);
            let separator = usize::from(!entries.is_empty());
            let len = summary.chars().count();

            if used + separator + len <= budget {
                used += separator + len;
                entries.push(ContextEntry {
                    rank: result.rank,
                    id: result.item.id.clone(),
                    summary,
                });
                continue;
            }

            truncated = true;
            if entries.is_empty() {
                entries.push(ContextEntry {
                    rank: result.rank,
                    id: result.item.id.clone(),
                    summary: truncate_chars(&summary, budget),
                });
            }
            break;
        }

        debug!(
            query,
            entries = entries.len(),
            results = results.len(),
            budget,
            truncated,
            "assembled context"
        );

        Ok(RagContext {
            query: query.to_string(),
            provenance: entries.iter().map(|e| e.id.clone()).collect(),
            entries,
            grounding: Grounding::Grounded,
            truncated,
            budget,
        })
    }

    /// `"{rank}. {name} | {cuisine} | {calories} kcal | match {score}% | {description} | ingredients: ..."`
    pub fn summarize(&self, result: &SearchResult) -> String {
        let item = &result.item;
        let mut line = format!(
            "{}. {} | {} | {} kcal | match {:.1}% | {}",
            result.rank,
            item.name,
            item.cuisine,
            item.calories,
            result.score * 100.0,
            truncate_chars(&item.description, self.config.max_description_chars),
        );
        if !item.ingredients.is_empty() && self.config.max_ingredients > 0 {
            let ingredients: Vec<&str> = item
                .ingredients
                .iter()
                .take(self.config.max_ingredients)
                .map(String::as_str)
                .collect();
            line.push_str(" | ingredients: ");
            line.push_str(&ingredients.join(", "));
        }
        line
    }
}

/// Cuts `text` to at most `max` chars, marking the cut with `...` when it fits.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    if max <= ELLIPSIS.len() {
        return text.chars().take(max).collect();
    }
    let mut cut: String = text.chars().take(max - ELLIPSIS.len()).collect();
    cut.push_str(ELLIPSIS);
    cut
}
