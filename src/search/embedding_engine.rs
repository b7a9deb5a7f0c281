use anyhow::Result;
use model2vec_rs::model::StaticModel;
use std::hash::Hasher;
use twox_hash::XxHash64;

pub const EMBEDDING_MODEL_ID: &str = "minishlab/potion-base-32M";

pub const EMBEDDING_DIMENSION: usize = 512;

pub const HASHING_DIMENSION: usize = 384;

/// Turns text into fixed-length vectors. Implementations must be deterministic
/// for a fixed model and safe to call from several threads at once.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Failed to generate embedding for single text: {}", text))
    }
}

/// model2vec static embedding model, downloaded from the Hugging Face hub on first use.
pub struct EmbeddingEngine {
    model: StaticModel,
    dimension: usize,
}

impl EmbeddingEngine {
    pub fn new() -> Result<Self> {
        Self::from_pretrained(EMBEDDING_MODEL_ID, EMBEDDING_DIMENSION)
    }

    pub fn from_pretrained(model_id: &str, dimension: usize) -> Result<Self> {
        let model = StaticModel::from_pretrained(model_id, None, None, None)?;
        Ok(Self { model, dimension })
    }
}

impl Embedder for EmbeddingEngine {
    fn dimension(&self) -> usize {
        // model2vec_rs does not expose the output size, so it comes from config.
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(self.model.encode(texts))
    }
}

/// Offline bag-of-words embedder using the hashing trick.
///
/// Each lowercase alphanumeric token (and a crude singular form of it) is
/// hashed into one of `dimension` buckets. Works without a model download, so
/// the test-suite and `--embedder hashing` use it. Text without any token
/// yields an all-zero vector, which the index rejects.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    seed: u64,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, seed: 0 }
    }

    fn bucket(&self, token: &str) -> usize {
        let mut hasher = XxHash64::with_seed(self.seed);
        hasher.write(token.as_bytes());
        (hasher.finish() % self.dimension as u64) as usize
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in tokenize(text) {
            vector[self.bucket(&token)] += 1.0;
            if let Some(stem) = singular(&token) {
                vector[self.bucket(stem)] += 0.5;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(HASHING_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.dimension == 0 {
            anyhow::bail!("HashingEmbedder dimension must be non-zero");
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "the", "of", "with", "for", "in", "on", "to", "is", "it", "or", "name",
    "description", "ingredients", "cuisine", "cooking", "method",
];

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
}

fn singular(token: &str) -> Option<&str> {
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        Some(&token[..token.len() - 1])
    } else {
        None
    }
}
