//! A lightweight in-process vector database with cosine similarity and
//! optional JSON persistence.
#![forbid(unsafe_code)]

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::catalog::{FoodId, Metadata};
use crate::search::filter::FilterCriteria;
use crate::search::vector_store::{Neighbor, StoredVector, UpsertOutcome, VectorStore};

type Float = f32;

/// A stored entry. The normalised vector lives in the shared matrix, not here.
#[derive(Debug, Serialize, Deserialize, Clone)]
struct Entry {
    #[serde(rename = "__id__")]
    id: FoodId,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    fields: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
struct DataBase {
    embedding_dim: usize,
    data: Vec<Entry>,
    #[serde(with = "base64_bytes")]
    matrix: Vec<Float>,
}

mod base64_bytes {
    use super::*;
    use bytemuck::cast_slice;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(vec: &[Float], serializer: S) -> Result<S::Ok, S::Error> {
        let bytes = cast_slice(vec);
        let b64 = general_purpose::STANDARD.encode(bytes);
        serializer.serialize_str(&b64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Float>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)?;
        if bytes.len() % 4 != 0 {
            return Err(serde::de::Error::custom(format!(
                "matrix byte length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|chunk| Float::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

#[derive(Debug)]
pub struct NanoVectorDB {
    embedding_dim: usize,
    storage_file: Option<PathBuf>,
    storage: DataBase,
    positions: HashMap<FoodId, usize>,
}

/// Heap entry. Ordering makes the *worst* hit the maximum, so a max-heap
/// capped at `k` pops the worst candidate and keeps the best `k`.
#[derive(Debug)]
struct ScoredIndex<'a> {
    score: Float,
    id: &'a FoodId,
    index: usize,
}

impl PartialEq for ScoredIndex<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredIndex<'_> {}

impl PartialOrd for ScoredIndex<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredIndex<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lower score is worse; on equal scores the larger id is worse.
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.id.cmp(other.id))
    }
}

impl NanoVectorDB {
    /// A store that lives only in memory.
    pub fn in_memory(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            storage_file: None,
            storage: DataBase {
                embedding_dim,
                data: Vec::new(),
                matrix: Vec::new(),
            },
            positions: HashMap::new(),
        }
    }

    /// Opens (or starts) a store backed by a JSON file.
    pub fn open(embedding_dim: usize, storage_file: impl AsRef<Path>) -> Result<Self> {
        let storage_file = storage_file.as_ref().to_path_buf();
        let storage = if storage_file.exists() && storage_file.metadata()?.len() > 0 {
            let contents = fs::read_to_string(&storage_file)?;
            let db: DataBase = serde_json::from_str(&contents)?;

            if db.embedding_dim != embedding_dim {
                anyhow::bail!(
                    "Embedding dimension mismatch: DB has {}, expected {}",
                    db.embedding_dim,
                    embedding_dim
                );
            }

            let expected_len = db.data.len() * db.embedding_dim;
            if db.matrix.len() != expected_len {
                anyhow::bail!(
                    "Matrix size mismatch: expected {}, got {}",
                    expected_len,
                    db.matrix.len()
                );
            }
            debug!(entries = db.data.len(), path = %storage_file.display(), "loaded vector store");
            db
        } else {
            DataBase {
                embedding_dim,
                data: Vec::new(),
                matrix: Vec::new(),
            }
        };

        let positions = storage
            .data
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();

        Ok(Self {
            embedding_dim,
            storage_file: Some(storage_file),
            storage,
            positions,
        })
    }

    fn row(&self, index: usize) -> &[Float] {
        let start = index * self.embedding_dim;
        &self.storage.matrix[start..start + self.embedding_dim]
    }

    /// Writes the store to its backing file. No-op for in-memory stores.
    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.storage_file {
            let serialized = serde_json::to_string(&self.storage)?;
            fs::write(path, serialized)?;
            debug!(entries = self.storage.data.len(), path = %path.display(), "saved vector store");
        }
        Ok(())
    }

    pub fn metadata(&self, id: &FoodId) -> Option<&Metadata> {
        self.positions.get(id).map(|&i| &self.storage.data[i].fields)
    }

    /// Total bytes held by the vector matrix.
    pub fn vector_bytes_len(&self) -> usize {
        self.storage.matrix.len() * std::mem::size_of::<Float>()
    }
}

impl VectorStore for NanoVectorDB {
    fn dimension(&self) -> usize {
        self.embedding_dim
    }

    fn upsert(&mut self, records: Vec<StoredVector>) -> Result<UpsertOutcome> {
        // Validate the whole batch first so a bad record leaves the store untouched.
        for record in &records {
            if record.vector.len() != self.embedding_dim {
                anyhow::bail!(
                    "Embedding dimension mismatch for item '{}'. Expected {}, got {}.",
                    record.id,
                    self.embedding_dim,
                    record.vector.len()
                );
            }
        }

        let mut outcome = UpsertOutcome::default();
        for record in records {
            let norm_vec = normalize(&record.vector);
            if let Some(&pos) = self.positions.get(&record.id) {
                let start = pos * self.embedding_dim;
                self.storage.matrix[start..start + self.embedding_dim].copy_from_slice(&norm_vec);
                self.storage.data[pos].fields = record.metadata;
                outcome.updated += 1;
            } else {
                self.storage.matrix.extend_from_slice(&norm_vec);
                self.positions.insert(record.id.clone(), self.storage.data.len());
                self.storage.data.push(Entry {
                    id: record.id,
                    fields: record.metadata,
                });
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    fn query_nearest(&self, query: &[Float], top_k: usize, filter: Option<&FilterCriteria>) -> Result<Vec<Neighbor>> {
        if query.len() != self.embedding_dim {
            anyhow::bail!(
                "Search query embedding dimension mismatch. Expected {}, got {}.",
                self.embedding_dim,
                query.len()
            );
        }
        if self.storage.data.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_norm = normalize(query);

        let mut heap = BinaryHeap::with_capacity(top_k + 1);
        for (idx, entry) in self.storage.data.iter().enumerate() {
            if !filter.map_or(true, |f| f.matches(&entry.fields)) {
                continue;
            }
            let score = dot_product(self.row(idx), &query_norm);
            if score.is_nan() {
                warn!(id = %entry.id, "skipping entry with NaN similarity");
                continue;
            }
            heap.push(ScoredIndex {
                score,
                id: &entry.id,
                index: idx,
            });
            if heap.len() > top_k {
                heap.pop();
            }
        }

        // Ascending under our Ord means best first.
        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|si| {
                let entry = &self.storage.data[si.index];
                Neighbor {
                    id: entry.id.clone(),
                    score: si.score,
                    metadata: entry.fields.clone(),
                }
            })
            .collect())
    }

    fn delete(&mut self, ids_to_delete: &[FoodId]) -> Result<usize> {
        let id_set: HashSet<&FoodId> = ids_to_delete.iter().collect();
        let original_len = self.storage.data.len();
        let mut new_data = Vec::with_capacity(original_len);
        let mut new_matrix = Vec::with_capacity(self.storage.matrix.len());

        for (idx, entry) in self.storage.data.iter().enumerate() {
            if !id_set.contains(&entry.id) {
                new_data.push(entry.clone());
                new_matrix.extend_from_slice(self.row(idx));
            }
        }

        let deleted_count = original_len - new_data.len();
        self.storage.data = new_data;
        self.storage.matrix = new_matrix;
        self.positions = self
            .storage
            .data
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.clone(), i))
            .collect();
        Ok(deleted_count)
    }

    fn fetch(&self, ids: &[FoodId]) -> Vec<StoredVector> {
        ids.iter()
            .filter_map(|id| self.positions.get(id).map(|&pos| (id, pos)))
            .map(|(id, pos)| StoredVector {
                id: id.clone(),
                vector: self.row(pos).to_vec(),
                metadata: self.storage.data[pos].fields.clone(),
            })
            .collect()
    }

    fn ids(&self) -> Vec<FoodId> {
        self.storage.data.iter().map(|d| d.id.clone()).collect()
    }

    fn len(&self) -> usize {
        self.storage.data.len()
    }

    fn supports_native_filter(&self) -> bool {
        true
    }

    fn flush(&self) -> Result<()> {
        self.save()
    }
}

#[inline]
fn dot_product(vec1: &[Float], vec2: &[Float]) -> Float {
    vec1.iter().zip(vec2.iter()).map(|(a, b)| a * b).sum()
}

/// Normalize a vector to unit length. A zero vector stays zero.
pub fn normalize(vector: &[Float]) -> Vec<Float> {
    let norm_sq: Float = vector.iter().map(|&x| x * x).sum();
    if norm_sq == 0.0 {
        return vec![0.0; vector.len()];
    }
    let inv_norm = 1.0 / norm_sq.sqrt();
    vector.iter().map(|&x| x * inv_norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn record(id: &str, vector: Vec<f32>, cuisine: &str) -> StoredVector {
        let mut metadata = Metadata::new();
        metadata.insert("cuisine".into(), json!(cuisine));
        StoredVector {
            id: FoodId::from(id),
            vector,
            metadata,
        }
    }

    #[test]
    fn test_base64_deserialization_edge_cases() {
        let valid_db = DataBase {
            embedding_dim: 2,
            data: vec![Entry {
                id: FoodId::from("test"),
                fields: Metadata::new(),
            }],
            matrix: vec![1.0, 2.0],
        };
        let serialized = serde_json::to_string(&valid_db).unwrap();
        let deserialized: DataBase = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.matrix, vec![1.0, 2.0]);

        let invalid_json = r#"{
            "embedding_dim": 2,
            "data": [{"__id__": "test"}],
            "matrix": "INVALID_BASE64!!"
        }"#;
        let result: Result<DataBase, _> = serde_json::from_str(invalid_json);
        assert!(result.is_err());
    }

    #[test]
    fn test_matrix_size_validation_on_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let corrupt = DataBase {
            embedding_dim: 2,
            data: vec![Entry {
                id: FoodId::from("entry1"),
                fields: Metadata::new(),
            }],
            matrix: vec![1.0],
        };
        fs::write(temp_file.path(), serde_json::to_string(&corrupt).unwrap()).unwrap();

        let err_msg = NanoVectorDB::open(2, temp_file.path()).unwrap_err().to_string();
        assert!(err_msg.contains("Matrix size mismatch"), "{}", err_msg);
        assert!(err_msg.contains("expected 2"), "{}", err_msg);
        assert!(err_msg.contains("got 1"), "{}", err_msg);
    }

    #[test]
    fn test_embedding_dim_validation_on_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let stored_2d = DataBase {
            embedding_dim: 2,
            data: vec![Entry {
                id: FoodId::from("entry1"),
                fields: Metadata::new(),
            }],
            matrix: vec![0.0, 0.0],
        };
        fs::write(temp_file.path(), serde_json::to_string(&stored_2d).unwrap()).unwrap();

        let err_msg = NanoVectorDB::open(3, temp_file.path()).unwrap_err().to_string();
        assert!(err_msg.contains("Embedding dimension mismatch"), "{}", err_msg);
        assert!(err_msg.contains("DB has 2"), "{}", err_msg);
        assert!(err_msg.contains("expected 3"), "{}", err_msg);
    }

    #[test]
    fn test_scored_index_heap_keeps_best_k_with_id_tiebreak() {
        let ids: Vec<FoodId> = ["1", "2", "3", "10"].into_iter().map(FoodId::from).collect();
        let mut heap = BinaryHeap::new();
        heap.push(ScoredIndex { score: 0.8, id: &ids[0], index: 0 });
        heap.push(ScoredIndex { score: 0.9, id: &ids[1], index: 1 });
        heap.push(ScoredIndex { score: 0.7, id: &ids[2], index: 2 });
        heap.push(ScoredIndex { score: 0.9, id: &ids[3], index: 3 });
        while heap.len() > 2 {
            heap.pop();
        }
        let best: Vec<&str> = heap.into_sorted_vec().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(best, vec!["2", "10"]);
    }

    #[test]
    fn test_upsert_and_query() -> Result<()> {
        let mut db = NanoVectorDB::in_memory(3);
        let outcome = db.upsert(vec![
            record("vec1", vec![1.0, 2.0, 3.0], "red"),
            record("vec2", vec![-4.0, 5.0, 6.0], "blue"),
        ])?;
        assert_eq!(outcome, UpsertOutcome { inserted: 2, updated: 0 });

        let outcome = db.upsert(vec![
            record("vec1", vec![1.1, 2.1, 3.1], "dark red"),
            record("vec3", vec![7.0, 8.0, -9.0], "green"),
        ])?;
        assert_eq!(outcome, UpsertOutcome { inserted: 1, updated: 1 });
        assert_eq!(db.len(), 3);

        let results = db.query_nearest(&[1.0, 2.0, 3.0], 1, None)?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id.as_str(), "vec1");
        assert_eq!(results[0].metadata["cuisine"], "dark red");
        assert!(results[0].score > 0.95);
        Ok(())
    }

    #[test]
    fn test_upsert_rejects_whole_batch_on_bad_dimension() {
        let mut db = NanoVectorDB::in_memory(3);
        let result = db.upsert(vec![
            record("ok", vec![1.0, 0.0, 0.0], "a"),
            record("bad", vec![1.0, 0.0], "a"),
        ]);
        assert!(result.is_err());
        assert_eq!(db.len(), 0);
    }

    #[test]
    fn test_native_filter_and_tie_break() -> Result<()> {
        let mut db = NanoVectorDB::in_memory(2);
        db.upsert(vec![
            record("10", vec![1.0, 0.0], "Italian"),
            record("2", vec![1.0, 0.0], "Italian"),
            record("3", vec![1.0, 0.0], "Greek"),
            record("4", vec![0.0, 1.0], "Italian"),
        ])?;

        let filter = FilterCriteria::cuisine("Italian");
        let hits = db.query_nearest(&[1.0, 0.0], 10, Some(&filter))?;
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "10", "4"]);
        Ok(())
    }

    #[test]
    fn test_query_top_k_larger_than_store() -> Result<()> {
        let mut rng = rand::thread_rng();
        let mut db = NanoVectorDB::in_memory(8);
        let records = (0..5)
            .map(|i| record(&i.to_string(), (0..8).map(|_| rng.gen::<f32>()).collect(), "x"))
            .collect();
        db.upsert(records)?;

        let hits = db.query_nearest(&[0.5; 8], 50, None)?;
        assert_eq!(hits.len(), 5);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        Ok(())
    }

    #[test]
    fn test_delete_keeps_matrix_consistent() -> Result<()> {
        let mut db = NanoVectorDB::in_memory(3);
        db.upsert(vec![
            record("v1", vec![1., 0., 0.], "a"),
            record("v2", vec![0., 1., 0.], "a"),
            record("v3", vec![0., 0., 1.], "a"),
        ])?;
        assert_eq!(db.delete(&[FoodId::from("v2")])?, 1);
        assert_eq!(db.len(), 2);
        assert_eq!(db.vector_bytes_len(), 2 * 3 * 4);

        let hits = db.query_nearest(&[0., 0., 1.], 1, None)?;
        assert_eq!(hits[0].id.as_str(), "v3");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_fetch_returns_stored_records() -> Result<()> {
        let mut db = NanoVectorDB::in_memory(2);
        db.upsert(vec![record("a", vec![3.0, 4.0], "Thai"), record("b", vec![0.0, 1.0], "Greek")])?;
        let fetched = db.fetch(&[FoodId::from("a"), FoodId::from("missing")]);
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].id.as_str(), "a");
        assert!((fetched[0].vector[0] - 0.6).abs() < 1e-6);
        assert_eq!(fetched[0].metadata["cuisine"], "Thai");
        Ok(())
    }

    #[test]
    fn test_persistence_round_trip() -> Result<()> {
        let temp_file = NamedTempFile::new()?;
        {
            let mut db = NanoVectorDB::open(3, temp_file.path())?;
            db.upsert(vec![
                record("5", vec![0.0, 1.0, 0.0], "Thai"),
                record("6", vec![1.0, 0.0, 0.0], "Thai"),
            ])?;
            db.flush()?;
        }
        let reopened = NanoVectorDB::open(3, temp_file.path())?;
        assert_eq!(reopened.len(), 2);
        let hits = reopened.query_nearest(&[0.0, 1.0, 0.0], 1, None)?;
        assert_eq!(hits[0].id.as_str(), "5");
        assert_eq!(reopened.metadata(&FoodId::from("6")).map(|m| m["cuisine"].clone()), Some(json!("Thai")));
        Ok(())
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
        let normalized = normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
    }
}
