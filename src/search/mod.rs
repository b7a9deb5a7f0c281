pub mod catalog_index;
pub mod embedding_engine;
pub mod filter;
pub mod nano_vector_db;
pub mod query_engine;
pub mod vector_store;

pub use catalog_index::{BuildReport, CatalogIndex, SearchResult};
pub use embedding_engine::{Embedder, EmbeddingEngine, HashingEmbedder, EMBEDDING_DIMENSION};
pub use filter::{FilterCriteria, Predicate};
pub use nano_vector_db::NanoVectorDB;
pub use query_engine::{FilterPolicy, FilterStrategy, QueryConfig, QueryEngine, SearchResponse};
pub use vector_store::VectorStore;
