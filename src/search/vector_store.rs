//! The narrow vector-store contract the catalog index is written against.

use anyhow::Result;

use crate::catalog::{FoodId, Metadata};
use crate::search::filter::FilterCriteria;

/// One vector to store, with the metadata filters are evaluated against.
#[derive(Debug, Clone)]
pub struct StoredVector {
    pub id: FoodId,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
}

/// A nearest-neighbour hit. `score` is cosine similarity, higher is better.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub id: FoodId,
    pub score: f32,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
}

pub trait VectorStore: Send + Sync {
    fn dimension(&self) -> usize;

    /// Inserts new ids and overwrites existing ones. Either every record is
    /// stored or none is.
    fn upsert(&mut self, records: Vec<StoredVector>) -> Result<UpsertOutcome>;

    /// Up to `k` hits ordered by descending score, ties by ascending id.
    /// `filter` is only passed when [`VectorStore::supports_native_filter`] is true.
    fn query_nearest(&self, vector: &[f32], k: usize, filter: Option<&FilterCriteria>) -> Result<Vec<Neighbor>>;

    fn delete(&mut self, ids: &[FoodId]) -> Result<usize>;

    /// The stored records for `ids`; unknown ids are skipped.
    fn fetch(&self, ids: &[FoodId]) -> Vec<StoredVector>;

    fn ids(&self) -> Vec<FoodId>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn supports_native_filter(&self) -> bool;

    /// Persists pending changes, if the store has a backing file.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
