use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::catalog::FoodItem;
use crate::error::{RagError, Result};
use crate::search::catalog_index::{renumber, CatalogIndex, SearchResult};
use crate::search::filter::FilterCriteria;

/// How `search_filtered` reconciles ranking with metadata constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Pre-filter selective criteria natively, over-fetch the rest.
    #[default]
    Auto,
    /// Always push the filter into the store (falls back to over-fetch if unsupported).
    PreFilter,
    /// Always filter client-side after an over-fetch.
    OverFetch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    pub over_fetch_factor: usize,
    pub min_fetch: usize,
    /// Extra over-fetch passes allowed when the first one comes up short.
    pub max_retries: usize,
    pub filter_policy: FilterPolicy,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            over_fetch_factor: 3,
            min_fetch: 10,
            max_retries: 1,
            filter_policy: FilterPolicy::Auto,
        }
    }
}

/// Which path a filtered search took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterStrategy {
    Unfiltered,
    PreFilter,
    OverFetch,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub strategy: FilterStrategy,
    /// Candidates pulled from the index across all passes' final fetch.
    pub candidates_examined: usize,
    pub passes: usize,
    /// Fewer than `top_k` items satisfied the filter.
    pub exhausted: bool,
}

/// Query front door over a built [`CatalogIndex`]. Never mutates the index.
pub struct QueryEngine<'a> {
    index: &'a CatalogIndex,
    config: QueryConfig,
}

impl<'a> QueryEngine<'a> {
    pub fn new(index: &'a CatalogIndex, config: QueryConfig) -> Self {
        Self { index, config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn index(&self) -> &'a CatalogIndex {
        self.index
    }

    /// Pure semantic search.
    pub fn search(&self, query_text: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        self.index.query(query_text, top_k, None)
    }

    /// Semantic search restricted to items satisfying `criteria`.
    ///
    /// Never pads: if fewer than `top_k` items qualify, the short list comes
    /// back with `exhausted` set.
    pub fn search_filtered(&self, query_text: &str, top_k: usize, criteria: &FilterCriteria) -> Result<SearchResponse> {
        if top_k == 0 {
            return Err(RagError::InvalidQuery("top_k must be greater than zero".to_string()));
        }
        criteria.validate()?;

        if criteria.is_empty() {
            let results = self.search(query_text, top_k)?;
            return Ok(SearchResponse {
                candidates_examined: results.len(),
                exhausted: results.len() < top_k,
                results,
                strategy: FilterStrategy::Unfiltered,
                passes: 1,
            });
        }

        let response = match self.choose_strategy(criteria) {
            FilterStrategy::PreFilter => self.pre_filter(query_text, top_k, criteria)?,
            _ => self.over_fetch(query_text, top_k, criteria)?,
        };
        info!(
            query = query_text,
            filter = %criteria,
            strategy = ?response.strategy,
            returned = response.results.len(),
            passes = response.passes,
            exhausted = response.exhausted,
            "filtered search"
        );
        Ok(response)
    }

    fn choose_strategy(&self, criteria: &FilterCriteria) -> FilterStrategy {
        if !self.index.supports_native_filter() {
            return FilterStrategy::OverFetch;
        }
        match self.config.filter_policy {
            FilterPolicy::PreFilter => FilterStrategy::PreFilter,
            FilterPolicy::OverFetch => FilterStrategy::OverFetch,
            FilterPolicy::Auto if criteria.is_selective() => FilterStrategy::PreFilter,
            FilterPolicy::Auto => FilterStrategy::OverFetch,
        }
    }

    fn pre_filter(&self, query_text: &str, top_k: usize, criteria: &FilterCriteria) -> Result<SearchResponse> {
        let mut results = self.index.query(query_text, top_k, Some(criteria))?;
        let examined = results.len();
        // The store evaluated the filter; re-check so a misbehaving store cannot leak items.
        results.retain(|r| criteria.matches_item(&r.item));
        renumber(&mut results);
        Ok(SearchResponse {
            exhausted: results.len() < top_k,
            candidates_examined: examined,
            results,
            strategy: FilterStrategy::PreFilter,
            passes: 1,
        })
    }

    fn over_fetch(&self, query_text: &str, top_k: usize, criteria: &FilterCriteria) -> Result<SearchResponse> {
        let catalog_size = self.index.len();
        let factor = self.config.over_fetch_factor.max(1);
        let mut fetch = top_k.saturating_mul(factor).max(self.config.min_fetch).max(top_k);
        let mut passes = 0;

        loop {
            passes += 1;
            let candidates = self.index.query(query_text, fetch, None)?;
            let examined = candidates.len();
            let mut results: Vec<SearchResult> = candidates
                .into_iter()
                .filter(|r| criteria.matches_item(&r.item))
                .take(top_k)
                .collect();
            renumber(&mut results);

            let covered_catalog = fetch >= catalog_size;
            let retries_left = passes <= self.config.max_retries;
            if results.len() >= top_k || covered_catalog || !retries_left || factor == 1 {
                return Ok(SearchResponse {
                    exhausted: results.len() < top_k,
                    candidates_examined: examined,
                    results,
                    strategy: FilterStrategy::OverFetch,
                    passes,
                });
            }

            debug!(
                survivors = results.len(),
                top_k,
                fetched = fetch,
                "over-fetch came up short, widening"
            );
            fetch = fetch.saturating_mul(factor);
        }
    }

    /// Items matching `criteria` without any semantic ranking, in id order.
    pub fn search_by_metadata(&self, criteria: &FilterCriteria, limit: usize) -> Result<Vec<FoodItem>> {
        if !self.index.is_built() {
            return Err(RagError::IndexNotBuilt);
        }
        if limit == 0 {
            return Err(RagError::InvalidQuery("limit must be greater than zero".to_string()));
        }
        criteria.validate()?;

        Ok(self
            .index
            .items()
            .filter(|item| criteria.matches_item(item))
            .take(limit)
            .cloned()
            .collect())
    }
}
