use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::catalog::{FoodId, FoodItem};
use crate::error::{BuildFailure, RagError, Result};
use crate::search::embedding_engine::Embedder;
use crate::search::filter::FilterCriteria;
use crate::search::vector_store::{StoredVector, VectorStore};

const EMBED_BATCH_SIZE: usize = 32;

/// A catalog item paired with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub item: FoodItem,
    /// Cosine similarity in [-1, 1]; higher is more similar.
    pub score: f32,
    /// 1-based position in the result list.
    pub rank: usize,
}

/// Sorts by descending score, then ascending id, and numbers the ranks.
pub fn rank_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.item.id.cmp(&b.item.id)));
    renumber(results);
}

/// Reassigns contiguous ranks without touching the order.
pub fn renumber(results: &mut [SearchResult]) {
    for (i, result) in results.iter_mut().enumerate() {
        result.rank = i + 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub indexed: usize,
    pub inserted: usize,
    pub updated: usize,
    /// Ids from a previous build that are gone from the catalog.
    pub removed: usize,
    pub elapsed: Duration,
}

/// The text embedded for an item. Purely numeric fields such as calories stay
/// out of it; they are filterable metadata instead.
pub fn embed_text(item: &FoodItem) -> String {
    let mut text = format!("Name: {}. ", item.name);
    text += &format!("Description: {}. ", item.description);
    text += &format!("Ingredients: {}. ", item.ingredients.join(", "));
    text += &format!("Cuisine: {}. ", item.cuisine);
    text += &format!("Cooking method: {}. ", item.cooking_method);

    if !item.taste_profile.is_empty() {
        text += &format!("Taste and features: {}. ", item.taste_profile);
    }
    if !item.health_benefits.is_empty() {
        text += &format!("Health benefits: {}. ", item.health_benefits);
    }
    if !item.nutrition.is_empty() {
        let nutrition: Vec<String> = item.nutrition.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        text += &format!("Nutrition: {}.", nutrition.join(", "));
    }
    text
}

/// Semantic index over the food catalog.
///
/// Owns the id → item mapping and decides what gets embedded and how queries
/// are issued; storage and nearest-neighbour search are delegated to a
/// [`VectorStore`]. `build` needs `&mut self`, so callers cannot race two
/// builds on one index; a built index is read-only and can be shared freely.
pub struct CatalogIndex {
    embedder: Box<dyn Embedder>,
    store: Box<dyn VectorStore>,
    items: BTreeMap<FoodId, FoodItem>,
    built: bool,
    build_parallelism: usize,
}

impl CatalogIndex {
    pub fn new(embedder: Box<dyn Embedder>, store: Box<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            items: BTreeMap::new(),
            built: false,
            build_parallelism: 0,
        }
    }

    /// Caps the number of threads used to embed during `build`. 0 means rayon's default.
    pub fn with_build_parallelism(mut self, threads: usize) -> Self {
        self.build_parallelism = threads;
        self
    }

    pub fn build(&mut self, items: Vec<FoodItem>) -> Result<BuildReport> {
        let started = Instant::now();
        info!(items = items.len(), "building catalog index");

        let mut failures = Vec::new();
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(&item.id) {
                failures.push(BuildFailure {
                    id: item.id.clone(),
                    reason: "duplicate identifier".to_string(),
                });
            }
            if item.name.trim().is_empty() {
                failures.push(BuildFailure {
                    id: item.id.clone(),
                    reason: "empty name".to_string(),
                });
            }
        }

        let embedded = self.embed_items(&items)?;
        let dimension = self.store.dimension();
        let mut records = Vec::with_capacity(items.len());
        for (item, embedding) in items.iter().zip(embedded) {
            match embedding.and_then(|v| validate_embedding(v, dimension)) {
                Ok(vector) => records.push(StoredVector {
                    id: item.id.clone(),
                    vector,
                    metadata: item.metadata(),
                }),
                Err(reason) => failures.push(BuildFailure {
                    id: item.id.clone(),
                    reason,
                }),
            }
        }

        if !failures.is_empty() {
            warn!(failed = failures.len(), "catalog index build rejected");
            return Err(RagError::IndexBuild { failures });
        }

        // Snapshot so a store failure part-way through can be undone.
        let previous = self.store.fetch(&self.store.ids());

        let outcome = self
            .store
            .upsert(records)
            .map_err(|e| store_failure(&items, "store rejected upsert", &e))?;

        let removed = match self.sync_store(&seen) {
            Ok(removed) => removed,
            Err(e) => {
                self.restore_store(previous);
                return Err(store_failure(&items, "store failed to commit build", &e));
            }
        };

        self.items = items.into_iter().map(|item| (item.id.clone(), item)).collect();
        self.built = true;

        let report = BuildReport {
            indexed: self.items.len(),
            inserted: outcome.inserted,
            updated: outcome.updated,
            removed,
            elapsed: started.elapsed(),
        };
        info!(
            indexed = report.indexed,
            inserted = report.inserted,
            updated = report.updated,
            removed = report.removed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "catalog index built"
        );
        Ok(report)
    }

    /// Deletes ids that left the catalog, then persists the store.
    fn sync_store(&mut self, catalog: &HashSet<&FoodId>) -> anyhow::Result<usize> {
        let stale: Vec<FoodId> = self
            .store
            .ids()
            .into_iter()
            .filter(|id| !catalog.contains(id))
            .collect();
        let removed = if stale.is_empty() {
            0
        } else {
            debug!(count = stale.len(), "removing ids no longer in the catalog");
            self.store.delete(&stale)?
        };
        self.store.flush()?;
        Ok(removed)
    }

    /// Puts the store back to `previous` after a failed build. Best effort:
    /// the persisted copy, if any, was never overwritten.
    fn restore_store(&mut self, previous: Vec<StoredVector>) {
        let current = self.store.ids();
        let restored = self
            .store
            .delete(&current)
            .and_then(|_| self.store.upsert(previous));
        if let Err(e) = restored {
            warn!(error = %e, "could not restore vector store after failed build");
        }
    }

    /// Embeds every item in batches on a bounded rayon pool. The outer error
    /// is only for failing to start the pool; per-item failures are returned inline.
    fn embed_items(&self, items: &[FoodItem]) -> Result<Vec<std::result::Result<Vec<f32>, String>>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.build_parallelism)
            .build()
            .map_err(|e| RagError::upstream("embed", "starting embedding thread pool", e.into()))?;

        let texts: Vec<String> = items.iter().map(embed_text).collect();
        let embedder = self.embedder.as_ref();
        let batches: Vec<Vec<std::result::Result<Vec<f32>, String>>> = pool.install(|| {
            texts
                .par_chunks(EMBED_BATCH_SIZE)
                .map(|batch| match embedder.embed(batch) {
                    Ok(vectors) if vectors.len() == batch.len() => vectors.into_iter().map(Ok).collect(),
                    Ok(vectors) => {
                        let reason = format!("embedder returned {} vectors for {} texts", vectors.len(), batch.len());
                        vec![Err(reason); batch.len()]
                    }
                    // Retry one by one so a single bad text does not fail its neighbours.
                    Err(e) => {
                        debug!(error = %e, batch = batch.len(), "batch embedding failed, isolating items");
                        batch
                            .iter()
                            .map(|text| embedder.embed_one(text).map_err(|e| format!("embedding failed: {}", e)))
                            .collect()
                    }
                })
                .collect()
        });
        Ok(batches.into_iter().flatten().collect())
    }

    pub fn query(&self, query_text: &str, top_k: usize, filter: Option<&FilterCriteria>) -> Result<Vec<SearchResult>> {
        if !self.built {
            return Err(RagError::IndexNotBuilt);
        }
        if top_k == 0 {
            return Err(RagError::InvalidQuery("top_k must be greater than zero".to_string()));
        }
        if query_text.trim().is_empty() {
            return Err(RagError::InvalidQuery("query text is empty".to_string()));
        }
        let filter = filter.filter(|f| !f.is_empty());
        if let Some(criteria) = filter {
            criteria.validate()?;
            if !self.store.supports_native_filter() {
                return Err(RagError::InvalidFilter(
                    "vector store does not support native metadata filtering".to_string(),
                ));
            }
        }
        if self.items.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed_one(query_text)
            .map_err(|e| RagError::upstream("embed", format!("query '{}'", query_text), e))?;

        let neighbors = self
            .store
            .query_nearest(&query_vector, top_k, filter)
            .map_err(|e| RagError::upstream("vector_store", format!("nearest neighbours for '{}'", query_text), e))?;

        let mut results: Vec<SearchResult> = neighbors
            .into_iter()
            .filter_map(|hit| match self.items.get(&hit.id) {
                Some(item) => Some(SearchResult {
                    item: item.clone(),
                    score: hit.score,
                    rank: 0,
                }),
                None => {
                    warn!(id = %hit.id, "vector store returned an id outside the catalog");
                    None
                }
            })
            .collect();
        rank_results(&mut results);
        results.truncate(top_k);
        debug!(query = query_text, top_k, returned = results.len(), filtered = filter.is_some(), "index query");
        Ok(results)
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &FoodId) -> Option<&FoodItem> {
        self.items.get(id)
    }

    /// Catalog items in ascending id order.
    pub fn items(&self) -> impl Iterator<Item = &FoodItem> {
        self.items.values()
    }

    pub fn supports_native_filter(&self) -> bool {
        self.store.supports_native_filter()
    }
}

fn store_failure(items: &[FoodItem], stage: &str, error: &anyhow::Error) -> RagError {
    RagError::IndexBuild {
        failures: items
            .iter()
            .map(|item| BuildFailure {
                id: item.id.clone(),
                reason: format!("{}: {}", stage, error),
            })
            .collect(),
    }
}

fn validate_embedding(vector: Vec<f32>, dimension: usize) -> std::result::Result<Vec<f32>, String> {
    if vector.len() != dimension {
        return Err(format!(
            "embedding has dimension {}, store expects {}",
            vector.len(),
            dimension
        ));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err("embedding contains NaN or infinity".to_string());
    }
    if vector.iter().all(|&v| v == 0.0) {
        return Err("embedding is all zeros (no embeddable text)".to_string());
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_item;
    use crate::search::embedding_engine::HashingEmbedder;
    use crate::search::nano_vector_db::NanoVectorDB;
    use crate::search::vector_store::{Neighbor, UpsertOutcome};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn index() -> CatalogIndex {
        let embedder = HashingEmbedder::default();
        let store = NanoVectorDB::in_memory(embedder.dimension());
        CatalogIndex::new(Box::new(embedder), Box::new(store)).with_build_parallelism(2)
    }

    /// Fails on any text mentioning "poison".
    struct PickyEmbedder(HashingEmbedder);

    impl Embedder for PickyEmbedder {
        fn dimension(&self) -> usize {
            self.0.dimension()
        }

        fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            if texts.iter().any(|t| t.contains("poison")) {
                anyhow::bail!("model refused input");
            }
            self.0.embed(texts)
        }
    }

    /// Nano store whose upsert or flush can be switched to fail.
    struct FlakyStore {
        inner: NanoVectorDB,
        fail_upsert: Arc<AtomicBool>,
        fail_flush: Arc<AtomicBool>,
    }

    impl VectorStore for FlakyStore {
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
        fn upsert(&mut self, records: Vec<StoredVector>) -> anyhow::Result<UpsertOutcome> {
            if self.fail_upsert.load(Ordering::SeqCst) {
                anyhow::bail!("disk full");
            }
            self.inner.upsert(records)
        }
        fn query_nearest(&self, vector: &[f32], k: usize, filter: Option<&FilterCriteria>) -> anyhow::Result<Vec<Neighbor>> {
            self.inner.query_nearest(vector, k, filter)
        }
        fn delete(&mut self, ids: &[FoodId]) -> anyhow::Result<usize> {
            self.inner.delete(ids)
        }
        fn fetch(&self, ids: &[FoodId]) -> Vec<StoredVector> {
            self.inner.fetch(ids)
        }
        fn ids(&self) -> Vec<FoodId> {
            self.inner.ids()
        }
        fn len(&self) -> usize {
            self.inner.len()
        }
        fn supports_native_filter(&self) -> bool {
            true
        }
        fn flush(&self) -> anyhow::Result<()> {
            if self.fail_flush.load(Ordering::SeqCst) {
                anyhow::bail!("No such file or directory");
            }
            Ok(())
        }
    }

    fn flaky_index() -> (CatalogIndex, Arc<AtomicBool>, Arc<AtomicBool>) {
        let embedder = HashingEmbedder::default();
        let fail_upsert = Arc::new(AtomicBool::new(false));
        let fail_flush = Arc::new(AtomicBool::new(false));
        let store = FlakyStore {
            inner: NanoVectorDB::in_memory(embedder.dimension()),
            fail_upsert: fail_upsert.clone(),
            fail_flush: fail_flush.clone(),
        };
        (CatalogIndex::new(Box::new(embedder), Box::new(store)), fail_upsert, fail_flush)
    }

    #[test]
    fn rejected_upsert_lists_every_item() {
        let (mut index, fail_upsert, _) = flaky_index();
        fail_upsert.store(true, Ordering::SeqCst);

        let err = index
            .build(vec![
                test_item("1", "Soup", "French", 100.0, "onion soup"),
                test_item("2", "Tea", "British", 5.0, "black tea"),
            ])
            .unwrap_err();
        let RagError::IndexBuild { failures } = err else {
            panic!("expected IndexBuild error");
        };
        let failed: Vec<&str> = failures.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(failed, vec!["1", "2"]);
        assert!(failures.iter().all(|f| f.reason.contains("disk full")));
        assert!(!index.is_built());
    }

    #[test]
    fn failed_flush_rolls_the_store_back() -> Result<()> {
        let (mut index, _, fail_flush) = flaky_index();
        index.build(vec![test_item("1", "Onion Soup", "French", 300.0, "onion soup")])?;

        fail_flush.store(true, Ordering::SeqCst);
        let err = index
            .build(vec![
                test_item("1", "Onion Soup", "French", 300.0, "onion soup"),
                test_item("2", "Miso Soup", "Japanese", 80.0, "miso soup"),
            ])
            .unwrap_err();
        assert!(!err.is_retryable());
        let RagError::IndexBuild { failures } = err else {
            panic!("expected IndexBuild error");
        };
        assert_eq!(failures.len(), 2);
        assert!(failures[0].reason.contains("No such file or directory"));

        assert_eq!(index.len(), 1);
        assert_eq!(index.store.len(), 1);
        let results = index.query("soup", 10, None)?;
        let ids: Vec<&str> = results.iter().map(|r| r.item.id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);

        // Once the store recovers the same catalog builds cleanly.
        fail_flush.store(false, Ordering::SeqCst);
        let report = index.build(vec![
            test_item("1", "Onion Soup", "French", 300.0, "onion soup"),
            test_item("2", "Miso Soup", "Japanese", 80.0, "miso soup"),
        ])?;
        assert_eq!(report.inserted, 1);
        assert_eq!(index.query("soup", 10, None)?.len(), 2);
        Ok(())
    }

    #[test]
    fn embedder_failure_at_query_time_is_retryable_upstream_error() -> Result<()> {
        let embedder = PickyEmbedder(HashingEmbedder::default());
        let store = NanoVectorDB::in_memory(embedder.dimension());
        let mut index = CatalogIndex::new(Box::new(embedder), Box::new(store));
        index.build(vec![test_item("1", "Soup", "French", 100.0, "onion soup")])?;

        let err = index.query("poison soup", 3, None).unwrap_err();
        assert!(err.is_retryable());
        let RagError::UpstreamUnavailable { call, context, .. } = err else {
            panic!("expected UpstreamUnavailable error");
        };
        assert_eq!(call, "embed");
        assert!(context.contains("poison soup"));
        Ok(())
    }

    #[test]
    fn embed_text_leaves_out_calories() {
        let mut item = test_item("1", "Greek Salad", "Greek", 180.0, "Fresh and light");
        item.ingredients = vec!["tomato".into(), "feta".into()];
        item.health_benefits = "Rich in fiber".into();
        let text = embed_text(&item);
        assert!(text.starts_with("Name: Greek Salad. Description: Fresh and light. Ingredients: tomato, feta. Cuisine: Greek."));
        assert!(text.contains("Health benefits: Rich in fiber."));
        assert!(!text.contains("180"));
        assert!(!text.contains("Taste and features"));
    }

    #[test]
    fn query_before_build_is_an_error() {
        let index = index();
        assert!(matches!(index.query("soup", 3, None), Err(RagError::IndexNotBuilt)));
    }

    #[test]
    fn zero_top_k_and_blank_text_are_invalid() -> Result<()> {
        let mut index = index();
        index.build(vec![test_item("1", "Soup", "French", 100.0, "onion soup")])?;
        assert!(matches!(index.query("soup", 0, None), Err(RagError::InvalidQuery(_))));
        assert!(matches!(index.query("   ", 1, None), Err(RagError::InvalidQuery(_))));
        Ok(())
    }

    #[test]
    fn build_reports_every_failing_item_and_keeps_previous_state() -> Result<()> {
        let embedder = PickyEmbedder(HashingEmbedder::default());
        let store = NanoVectorDB::in_memory(embedder.dimension());
        let mut index = CatalogIndex::new(Box::new(embedder), Box::new(store));

        index.build(vec![test_item("1", "Soup", "French", 100.0, "onion soup")])?;

        let err = index
            .build(vec![
                test_item("1", "Soup", "French", 100.0, "onion soup"),
                test_item("2", "Tea", "British", 5.0, "poison tea"),
                test_item("2", "Tea again", "British", 5.0, "black tea"),
                test_item("3", " ", "British", 5.0, "nameless"),
            ])
            .unwrap_err();

        let RagError::IndexBuild { failures } = err else {
            panic!("expected IndexBuild error");
        };
        let failed: HashSet<&str> = failures.iter().map(|f| f.id.as_str()).collect();
        assert!(failed.contains("2"));
        assert!(failed.contains("3"));
        assert!(!failed.contains("1"), "healthy items in a failing batch are not blamed");
        assert!(failures.iter().any(|f| f.reason.contains("model refused input")));
        assert!(failures.iter().any(|f| f.reason == "duplicate identifier"));

        // The earlier build is still what gets queried.
        assert_eq!(index.len(), 1);
        let results = index.query("onion soup", 5, None)?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.id.as_str(), "1");
        Ok(())
    }

    #[test]
    fn rebuild_removes_items_missing_from_new_catalog() -> Result<()> {
        let mut index = index();
        index.build(vec![
            test_item("1", "Onion Soup", "French", 300.0, "soup"),
            test_item("2", "Miso Soup", "Japanese", 80.0, "soup"),
        ])?;
        let report = index.build(vec![test_item("2", "Miso Soup", "Japanese", 80.0, "soup")])?;
        assert_eq!(report.removed, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 0);

        let results = index.query("soup", 10, None)?;
        let ids: Vec<&str> = results.iter().map(|r| r.item.id.as_str()).collect();
        assert_eq!(ids, vec!["2"]);
        Ok(())
    }

    #[test]
    fn native_filter_is_pushed_down() -> Result<()> {
        let mut index = index();
        index.build(vec![
            test_item("1", "Penne Arrabbiata", "Italian", 500.0, "spicy pasta"),
            test_item("2", "Pasta Salad", "American", 350.0, "cold pasta salad"),
        ])?;
        let criteria = FilterCriteria::cuisine("Italian");
        let results = index.query("pasta", 5, Some(&criteria))?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.cuisine, "Italian");
        assert_eq!(results[0].rank, 1);
        Ok(())
    }

    #[test]
    fn rank_results_breaks_ties_by_id() {
        let mut results = vec![
            SearchResult { item: test_item("10", "a", "x", 1.0, ""), score: 0.5, rank: 0 },
            SearchResult { item: test_item("9", "b", "x", 1.0, ""), score: 0.5, rank: 0 },
            SearchResult { item: test_item("11", "c", "x", 1.0, ""), score: 0.9, rank: 0 },
        ];
        rank_results(&mut results);
        let order: Vec<(&str, usize)> = results.iter().map(|r| (r.item.id.as_str(), r.rank)).collect();
        assert_eq!(order, vec![("11", 1), ("9", 2), ("10", 3)]);
    }
}
