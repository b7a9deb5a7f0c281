use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::EmbedderBackend;
use crate::search::filter::FilterCriteria;

#[derive(Parser, Debug)]
#[command(name = "food-rag", author, version, about = "Semantic food search and retrieval-augmented recommendations", long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true, default_value = "food_rag.toml")]
    pub config: PathBuf,

    /// Food dataset (JSON or CSV); overrides the configuration
    #[arg(short, long, global = true)]
    pub dataset: Option<PathBuf>,

    /// Embedding backend: model2vec or hashing
    #[arg(short, long, global = true)]
    pub embedder: Option<EmbedderBackend>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct FilterArgs {
    /// Only keep items of this cuisine (case-insensitive)
    #[arg(long)]
    pub cuisine: Option<String>,

    /// Upper calorie bound per serving, inclusive
    #[arg(long)]
    pub max_calories: Option<f64>,

    /// Lower calorie bound per serving, inclusive
    #[arg(long)]
    pub min_calories: Option<f64>,
}

impl FilterArgs {
    pub fn to_criteria(&self) -> FilterCriteria {
        let mut criteria = FilterCriteria::new();
        if let Some(cuisine) = &self.cuisine {
            criteria = criteria.and(FilterCriteria::cuisine(cuisine.clone()));
        }
        if self.min_calories.is_some() || self.max_calories.is_some() {
            criteria = criteria.and(FilterCriteria::calorie_range(self.min_calories, self.max_calories));
        }
        criteria
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Semantic search, optionally filtered by cuisine and calories
    Search {
        query: String,
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// List items matching the filters, without ranking
    List {
        #[command(flatten)]
        filters: FilterArgs,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Ask for a recommendation grounded in the catalog
    Ask {
        query: String,
        #[command(flatten)]
        filters: FilterArgs,
        /// Print the assembled context before the answer
        #[arg(long)]
        show_context: bool,
    },
    /// Compare recommendations for two queries
    Compare { first: String, second: String },
    /// Run one query through the basic, filtered and RAG profiles
    Benchmark {
        query: String,
        /// Cuisine used by the filtered profile
        #[arg(long, default_value = "Indian")]
        cuisine: String,
    },
    /// Interactive recommendation chat
    Chat,
    /// List the cuisines present in the dataset
    Cuisines,
}

impl Command {
    /// Commands that call the generation provider and so need an API key.
    pub fn needs_generation(&self) -> bool {
        matches!(self, Command::Ask { .. } | Command::Compare { .. } | Command::Chat)
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}
