pub mod context_builder;
pub mod prompt;
pub mod recommender;

pub use context_builder::{ContextBuilder, ContextConfig, ContextEntry, Grounding, RagContext, NO_GROUNDING_MARKER};
pub use recommender::{Answer, AnswerSource, ComparisonAnswer, Recommender};
