use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::api_connection::{Provider, ProviderKind};
use crate::rag::ContextConfig;
use crate::search::embedding_engine::{
    Embedder, EmbeddingEngine, HashingEmbedder, EMBEDDING_DIMENSION, EMBEDDING_MODEL_ID, HASHING_DIMENSION,
};
use crate::search::nano_vector_db::NanoVectorDB;
use crate::search::query_engine::QueryConfig;
use crate::search::vector_store::VectorStore;

pub const DATASET_ENV_VAR: &str = "FOOD_RAG_DATASET";
pub const EMBEDDER_ENV_VAR: &str = "FOOD_RAG_EMBEDDER";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub dataset: DatasetConfig,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub query: QueryConfig,
    pub context: ContextConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatasetConfig {
    pub path: PathBuf,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("FoodDataSet.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderBackend {
    #[default]
    Model2Vec,
    Hashing,
}

impl FromStr for EmbedderBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "model2vec" => Ok(EmbedderBackend::Model2Vec),
            "hashing" => Ok(EmbedderBackend::Hashing),
            other => Err(ConfigError::InvalidEmbedder(other.to_string())),
        }
    }
}

impl fmt::Display for EmbedderBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbedderBackend::Model2Vec => f.write_str("model2vec"),
            EmbedderBackend::Hashing => f.write_str("hashing"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbedderBackend,
    pub model_id: String,
    /// Output size of the model2vec model. The hashing backend always uses its own.
    pub dimension: usize,
    /// Threads used while building the index; 0 lets rayon decide.
    pub build_parallelism: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbedderBackend::default(),
            model_id: EMBEDDING_MODEL_ID.to_string(),
            dimension: EMBEDDING_DIMENSION,
            build_parallelism: 0,
        }
    }
}

impl EmbeddingConfig {
    pub fn build_embedder(&self) -> Result<Box<dyn Embedder>> {
        match self.backend {
            EmbedderBackend::Model2Vec => {
                info!(model = %self.model_id, "loading embedding model");
                let engine = EmbeddingEngine::from_pretrained(&self.model_id, self.dimension)
                    .with_context(|| format!("Failed to load embedding model '{}'", self.model_id))?;
                Ok(Box::new(engine))
            }
            EmbedderBackend::Hashing => Ok(Box::new(HashingEmbedder::new(HASHING_DIMENSION))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Persist the vector store to this JSON file; in memory only when unset.
    pub persist_path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn open_store(&self, dimension: usize) -> Result<Box<dyn VectorStore>> {
        match &self.persist_path {
            Some(path) => {
                debug!(path = %path.display(), "opening persisted vector store");
                let db = NanoVectorDB::open(dimension, path)
                    .with_context(|| format!("Failed to open vector store at {}", path.display()))?;
                Ok(Box::new(db))
            }
            None => Ok(Box::new(NanoVectorDB::in_memory(dimension))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub provider: ProviderKind,
    /// Defaults to the provider's own default model.
    pub model: Option<String>,
    /// Name of the environment variable holding the key, not the key itself.
    pub api_key_env_var: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub top_k: usize,
    pub fallback_on_error: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            model: None,
            api_key_env_var: None,
            base_url: None,
            timeout_secs: 30,
            max_retries: 2,
            top_k: 3,
            fallback_on_error: true,
        }
    }
}

impl GenerationConfig {
    pub fn api_key_env_var(&self) -> &str {
        self.api_key_env_var
            .as_deref()
            .unwrap_or_else(|| self.provider.default_api_key_env_var())
    }

    pub fn build_provider(&self) -> Provider {
        let mut provider = Provider::new(self.provider, self.api_key_env_var())
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_max_retries(self.max_retries);
        if let Some(model) = &self.model {
            provider = provider.with_model(model.clone());
        }
        if let Some(base_url) = &self.base_url {
            provider = provider.with_base_url(base_url.clone());
        }
        provider
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid embedder backend: {0} (must be 'model2vec' or 'hashing')")]
    InvalidEmbedder(String),
    #[error("Invalid embedding dimension: {0} (must be between 1 and 4096)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid model id: cannot be empty")]
    InvalidModelId,
    #[error("Invalid over-fetch factor: {0} (must be at least 1)")]
    InvalidOverFetchFactor(usize),
    #[error("Invalid max retries: {0} (must be at most 10)")]
    InvalidMaxRetries(usize),
    #[error("Invalid context budget: {0} (must be at least 1)")]
    InvalidContextBudget(usize),
    #[error("Invalid context item limit: {0} (must be at least 1)")]
    InvalidMaxItems(usize),
    #[error("Invalid generation timeout: {0}s (must be between 1 and 300 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid generation max retries: {0} (must be at most 10)")]
    InvalidGenerationRetries(u32),
    #[error("Invalid generation top_k: {0} (must be at least 1)")]
    InvalidTopK(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl AppConfig {
    /// Reads `path` when given and present, otherwise starts from defaults,
    /// then applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                debug!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate().context("Configuration validation failed")?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env_overrides(&mut self) -> std::result::Result<(), ConfigError> {
        if let Ok(dataset) = env::var(DATASET_ENV_VAR) {
            if !dataset.trim().is_empty() {
                self.dataset.path = PathBuf::from(dataset);
            }
        }
        if let Ok(backend) = env::var(EMBEDDER_ENV_VAR) {
            if !backend.trim().is_empty() {
                self.embedding.backend = backend.parse()?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let dimension = self.embedding.dimension;
        if !(1..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        if self.embedding.backend == EmbedderBackend::Model2Vec && self.embedding.model_id.trim().is_empty() {
            return Err(ConfigError::InvalidModelId);
        }
        if self.query.over_fetch_factor < 1 {
            return Err(ConfigError::InvalidOverFetchFactor(self.query.over_fetch_factor));
        }
        if self.query.max_retries > 10 {
            return Err(ConfigError::InvalidMaxRetries(self.query.max_retries));
        }
        if self.context.budget_chars < 1 {
            return Err(ConfigError::InvalidContextBudget(self.context.budget_chars));
        }
        if self.context.max_items < 1 {
            return Err(ConfigError::InvalidMaxItems(self.context.max_items));
        }
        if !(1..=300).contains(&self.generation.timeout_secs) {
            return Err(ConfigError::InvalidTimeout(self.generation.timeout_secs));
        }
        if self.generation.max_retries > 10 {
            return Err(ConfigError::InvalidGenerationRetries(self.generation.max_retries));
        }
        if self.generation.top_k < 1 {
            return Err(ConfigError::InvalidTopK(self.generation.top_k));
        }
        Ok(())
    }
}
