//! Runs one query through several search configurations side by side.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::info;

use crate::catalog::FoodId;
use crate::error::Result;
use crate::rag::context_builder::{ContextBuilder, ContextConfig, RagContext};
use crate::search::catalog_index::{CatalogIndex, SearchResult};
use crate::search::filter::FilterCriteria;
use crate::search::query_engine::{FilterStrategy, QueryConfig, QueryEngine};

/// One configuration to benchmark. Each profile names the index it runs
/// against, so independently built indexes can be compared.
pub struct SystemProfile<'a> {
    pub name: String,
    pub index: &'a CatalogIndex,
    pub top_k: usize,
    pub criteria: FilterCriteria,
    pub query: QueryConfig,
    /// Also assemble a RAG context from the results.
    pub context: Option<ContextConfig>,
}

impl<'a> SystemProfile<'a> {
    pub fn new(name: impl Into<String>, index: &'a CatalogIndex) -> Self {
        Self {
            name: name.into(),
            index,
            top_k: 3,
            criteria: FilterCriteria::new(),
            query: QueryConfig::default(),
            context: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_criteria(mut self, criteria: FilterCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_query_config(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    pub fn with_context(mut self, context: ContextConfig) -> Self {
        self.context = Some(context);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileRun {
    pub name: String,
    pub results: Vec<SearchResult>,
    pub strategy: FilterStrategy,
    pub exhausted: bool,
    pub context: Option<RagContext>,
    pub latency: Duration,
}

impl ProfileRun {
    pub fn ids(&self) -> Vec<FoodId> {
        self.results.iter().map(|r| r.item.id.clone()).collect()
    }
}

/// How a profile's results differ from the first (baseline) profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileDiff {
    pub profile: String,
    pub overlap: usize,
    pub only_in_baseline: Vec<FoodId>,
    pub only_in_profile: Vec<FoodId>,
    pub same_top: bool,
    pub latency_delta_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub query: String,
    pub runs: Vec<ProfileRun>,
    pub differences: Vec<ProfileDiff>,
}

impl ComparisonReport {
    pub fn fastest(&self) -> Option<&ProfileRun> {
        self.runs.iter().min_by_key(|run| run.latency)
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Query: '{}'", self.query)?;
        for (i, run) in self.runs.iter().enumerate() {
            writeln!(
                f,
                "\n{}. {} ({:?}, {:.3}s{})",
                i + 1,
                run.name,
                run.strategy,
                run.latency.as_secs_f64(),
                if run.exhausted { ", exhausted" } else { "" }
            )?;
            if run.results.is_empty() {
                writeln!(f, "   no matching results")?;
            }
            for result in &run.results {
                writeln!(
                    f,
                    "   {}. {} - {} ({} cal, {:.1}% match)",
                    result.rank,
                    result.item.name,
                    result.item.cuisine,
                    result.item.calories,
                    result.score * 100.0
                )?;
            }
            if let Some(context) = &run.context {
                writeln!(f, "   context: {} entries, {} chars", context.entries.len(), context.render().chars().count())?;
            }
        }
        if !self.differences.is_empty() {
            writeln!(f, "\nDifferences vs '{}':", self.runs.first().map_or("", |r| r.name.as_str()))?;
            for diff in &self.differences {
                writeln!(
                    f,
                    "   {}: overlap {}, +{} / -{}, same top: {}, latency {:+.3}ms",
                    diff.profile,
                    diff.overlap,
                    diff.only_in_profile.len(),
                    diff.only_in_baseline.len(),
                    diff.same_top,
                    diff.latency_delta_ms
                )?;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ComparisonHarness<'a> {
    profiles: Vec<SystemProfile<'a>>,
}

impl<'a> ComparisonHarness<'a> {
    pub fn new() -> Self {
        Self { profiles: Vec::new() }
    }

    /// Basic, cuisine-filtered and RAG profiles over a single index.
    pub fn standard(index: &'a CatalogIndex, cuisine: &str, context: ContextConfig) -> Self {
        Self::new()
            .with_profile(SystemProfile::new("basic", index).with_top_k(3))
            .with_profile(
                SystemProfile::new(format!("filtered ({})", cuisine), index)
                    .with_top_k(2)
                    .with_criteria(FilterCriteria::cuisine(cuisine)),
            )
            .with_profile(SystemProfile::new("rag", index).with_top_k(3).with_context(context))
    }

    pub fn with_profile(mut self, profile: SystemProfile<'a>) -> Self {
        self.profiles.push(profile);
        self
    }

    pub fn profiles(&self) -> &[SystemProfile<'a>] {
        &self.profiles
    }

    pub fn run(&self, query: &str) -> Result<ComparisonReport> {
        let mut runs = Vec::with_capacity(self.profiles.len());
        for profile in &self.profiles {
            let started = Instant::now();
            let engine = QueryEngine::new(profile.index, profile.query.clone());
            let response = engine.search_filtered(query, profile.top_k, &profile.criteria)?;
            let context = match &profile.context {
                Some(config) => Some(ContextBuilder::new(config.clone()).assemble_default(query, &response.results)?),
                None => None,
            };
            let latency = started.elapsed();
            info!(
                profile = %profile.name,
                results = response.results.len(),
                latency_ms = latency.as_secs_f64() * 1000.0,
                "comparison profile finished"
            );
            runs.push(ProfileRun {
                name: profile.name.clone(),
                results: response.results,
                strategy: response.strategy,
                exhausted: response.exhausted,
                context,
                latency,
            });
        }

        let differences = match runs.split_first() {
            Some((baseline, rest)) => rest.iter().map(|run| diff(baseline, run)).collect(),
            None => Vec::new(),
        };

        Ok(ComparisonReport {
            query: query.to_string(),
            runs,
            differences,
        })
    }
}

fn diff(baseline: &ProfileRun, run: &ProfileRun) -> ProfileDiff {
    let base_ids: BTreeSet<FoodId> = baseline.ids().into_iter().collect();
    let run_ids: BTreeSet<FoodId> = run.ids().into_iter().collect();
    ProfileDiff {
        profile: run.name.clone(),
        overlap: base_ids.intersection(&run_ids).count(),
        only_in_baseline: base_ids.difference(&run_ids).cloned().collect(),
        only_in_profile: run_ids.difference(&base_ids).cloned().collect(),
        same_top: baseline.results.first().map(|r| &r.item.id) == run.results.first().map(|r| &r.item.id),
        latency_delta_ms: (run.latency.as_secs_f64() - baseline.latency.as_secs_f64()) * 1000.0,
    }
}
