use serde::Serialize;
use tracing::{info, warn};

use crate::api_connection::GenerationService;
use crate::error::{RagError, Result};
use crate::rag::context_builder::{ContextBuilder, RagContext};
use crate::rag::prompt::{
    comparison_prompt, fallback_response, recommendation_prompt, simple_comparison, MIN_RESPONSE_CHARS,
};
use crate::search::catalog_index::SearchResult;
use crate::search::filter::FilterCriteria;
use crate::search::query_engine::QueryEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Generated,
    /// Template text built from the results, used when generation failed,
    /// answered too briefly, or there was nothing to ground on.
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub source: AnswerSource,
    pub context: RagContext,
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonAnswer {
    pub text: String,
    pub source: AnswerSource,
    pub first: Vec<SearchResult>,
    pub second: Vec<SearchResult>,
}

/// Retrieval-augmented answers: search, assemble context, prompt the generator.
pub struct Recommender<'a> {
    engine: &'a QueryEngine<'a>,
    builder: &'a ContextBuilder,
    generator: &'a dyn GenerationService,
    top_k: usize,
    fallback_on_error: bool,
}

impl<'a> Recommender<'a> {
    pub fn new(engine: &'a QueryEngine<'a>, builder: &'a ContextBuilder, generator: &'a dyn GenerationService) -> Self {
        Self {
            engine,
            builder,
            generator,
            top_k: 3,
            fallback_on_error: true,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// When false, generation failures surface as `UpstreamUnavailable` instead of fallback text.
    pub fn with_fallback_on_error(mut self, enabled: bool) -> Self {
        self.fallback_on_error = enabled;
        self
    }

    pub async fn ask(&self, query: &str, criteria: &FilterCriteria) -> Result<Answer> {
        let response = self.engine.search_filtered(query, self.top_k, criteria)?;
        let results = response.results;
        let context = self.builder.assemble_default(query, &results)?;

        if results.is_empty() {
            info!(query, "no grounding for question, skipping generation");
            return Ok(Answer {
                text: fallback_response(query, &results),
                source: AnswerSource::Fallback,
                context,
                results,
            });
        }

        let prompt = recommendation_prompt(&context);
        let (text, source) = match self.generator.complete(&prompt).await {
            Ok(text) if text.chars().count() >= MIN_RESPONSE_CHARS => (text, AnswerSource::Generated),
            Ok(text) => {
                warn!(query, chars = text.chars().count(), "generated answer too short, using fallback");
                (fallback_response(query, &results), AnswerSource::Fallback)
            }
            Err(e) if self.fallback_on_error => {
                warn!(query, error = %e, "generation failed, using fallback");
                (fallback_response(query, &results), AnswerSource::Fallback)
            }
            Err(e) => return Err(RagError::upstream("generate", format!("answer for '{}'", query), e.into())),
        };

        Ok(Answer {
            text,
            source,
            context,
            results,
        })
    }

    pub async fn compare(&self, first_query: &str, second_query: &str) -> Result<ComparisonAnswer> {
        let first = self.engine.search(first_query, self.top_k)?;
        let second = self.engine.search(second_query, self.top_k)?;
        let first_context = self.builder.assemble_default(first_query, &first)?;
        let second_context = self.builder.assemble_default(second_query, &second)?;

        let prompt = comparison_prompt(&first_context, &second_context);
        let (text, source) = match self.generator.complete(&prompt).await {
            Ok(text) => (text, AnswerSource::Generated),
            Err(e) if self.fallback_on_error => {
                warn!(first_query, second_query, error = %e, "comparison generation failed, using fallback");
                (
                    simple_comparison(first_query, second_query, &first, &second),
                    AnswerSource::Fallback,
                )
            }
            Err(e) => {
                return Err(RagError::upstream(
                    "generate",
                    format!("comparison of '{}' and '{}'", first_query, second_query),
                    e.into(),
                ))
            }
        };

        Ok(ComparisonAnswer {
            text,
            source,
            first,
            second,
        })
    }
}
