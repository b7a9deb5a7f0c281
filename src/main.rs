use anyhow::{bail, Context, Result};
use food_rag::api_connection::{GenerationService, Provider};
use food_rag::catalog::{available_cuisines, load_food_data, FoodItem};
use food_rag::cli::{parse_args, Cli, Command};
use food_rag::comparison::ComparisonHarness;
use food_rag::config::AppConfig;
use food_rag::rag::prompt::suggest_related_searches;
use food_rag::rag::{ContextBuilder, Recommender};
use food_rag::search::{CatalogIndex, FilterCriteria, QueryEngine, SearchResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("food_rag=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load(Some(&cli.config))?;
    if let Some(dataset) = &cli.dataset {
        config.dataset.path = dataset.clone();
    }
    if let Some(backend) = cli.embedder {
        config.embedding.backend = backend;
    }
    Ok(config)
}

fn load_catalog(config: &AppConfig) -> Result<Vec<FoodItem>> {
    let items = load_food_data(&config.dataset.path)
        .with_context(|| format!("Failed to load food data from '{}'", config.dataset.path.display()))?;
    if items.is_empty() {
        bail!("Food dataset '{}' contains no items", config.dataset.path.display());
    }
    Ok(items)
}

fn build_index(config: &AppConfig, items: Vec<FoodItem>) -> Result<CatalogIndex> {
    let embedder = config.embedding.build_embedder()?;
    let store = config.store.open_store(embedder.dimension())?;
    let mut index = CatalogIndex::new(embedder, store).with_build_parallelism(config.embedding.build_parallelism);
    index.build(items).context("Failed to build the catalog index")?;
    Ok(index)
}

/// Generation commands need credentials up front.
fn build_provider(config: &AppConfig) -> Result<Provider> {
    let provider = config.generation.build_provider();
    provider
        .api_key()
        .with_context(|| format!("Set {} to use generation commands", provider.api_key_env_var()))?;
    Ok(provider)
}

fn require_provider(provider: &Option<Provider>) -> Result<&Provider> {
    provider.as_ref().context("generation provider was not configured")
}

fn print_results(results: &[SearchResult]) {
    println!("Found {} recommendation(s):", results.len());
    println!("{}", "=".repeat(60));
    for result in results {
        println!("\n{}. {}", result.rank, result.item.name);
        println!("    Match Score: {:.1}%", result.score * 100.0);
        println!("    Cuisine: {}", result.item.cuisine);
        println!("    Calories: {} per serving", result.item.calories);
        println!("    Description: {}", result.item.description);
    }
    println!("{}", "=".repeat(60));
}

fn print_no_matches(criteria: &FilterCriteria) {
    println!("No matching foods found ({}).", criteria);
    println!("Try different keywords, e.g. a cuisine ('Italian'), an ingredient ('chocolate') or a descriptor ('baked').");
}

async fn ask(
    engine: &QueryEngine<'_>,
    builder: &ContextBuilder,
    generator: &dyn GenerationService,
    config: &AppConfig,
    query: &str,
    criteria: &FilterCriteria,
    show_context: bool,
) -> Result<()> {
    let recommender = Recommender::new(engine, builder, generator)
        .with_top_k(config.generation.top_k)
        .with_fallback_on_error(config.generation.fallback_on_error);
    let answer = recommender.ask(query, criteria).await?;

    if show_context {
        println!("--- context ({} chars) ---\n{}\n---", answer.context.render().chars().count(), answer.context);
    }
    println!("\nBot: {}", answer.text);
    if !answer.results.is_empty() {
        println!("\nSearch Results Details:");
        for result in &answer.results {
            println!(
                "{}. {} | {} | {} cal | {:.1}% match",
                result.rank,
                result.item.name,
                result.item.cuisine,
                result.item.calories,
                result.score * 100.0
            );
        }
    }
    Ok(())
}

async fn compare(
    engine: &QueryEngine<'_>,
    builder: &ContextBuilder,
    generator: &dyn GenerationService,
    config: &AppConfig,
    first: &str,
    second: &str,
) -> Result<()> {
    let recommender = Recommender::new(engine, builder, generator)
        .with_top_k(config.generation.top_k)
        .with_fallback_on_error(config.generation.fallback_on_error);
    let answer = recommender.compare(first, second).await?;

    println!("\nAI Analysis: {}", answer.text);
    println!("\n{:<30} | {}", format!("Query 1: {}", first), format!("Query 2: {}", second));
    println!("{}", "-".repeat(60));
    for i in 0..answer.first.len().max(answer.second.len()) {
        let cell = |results: &[SearchResult]| {
            results
                .get(i)
                .map(|r| format!("{} ({:.0}%)", r.item.name, r.score * 100.0))
                .unwrap_or_else(|| "---".to_string())
        };
        println!("{:<30} | {}", cell(&answer.first), cell(&answer.second));
    }
    Ok(())
}

async fn chat(
    engine: &QueryEngine<'_>,
    builder: &ContextBuilder,
    generator: &dyn GenerationService,
    config: &AppConfig,
) -> Result<()> {
    println!("Ask me about food recommendations using natural language!");
    println!("Commands: 'compare' to compare two queries, 'quit' to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"\nYou: ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input.to_lowercase().as_str() {
            "" => println!("Bot: Please tell me what kind of food you're looking for!"),
            "quit" | "exit" | "q" => {
                println!("Bot: Thank you for using the food recommendation chat!");
                break;
            }
            "compare" => {
                stdout.write_all(b"First query: ").await?;
                stdout.flush().await?;
                let first = lines.next_line().await?.unwrap_or_default();
                stdout.write_all(b"Second query: ").await?;
                stdout.flush().await?;
                let second = lines.next_line().await?.unwrap_or_default();
                if first.trim().is_empty() || second.trim().is_empty() {
                    println!("Please enter both queries for comparison");
                    continue;
                }
                if let Err(e) = compare(engine, builder, generator, config, first.trim(), second.trim()).await {
                    println!("Bot: Sorry, I encountered an error: {:#}", e);
                }
            }
            _ => {
                if let Err(e) = ask(engine, builder, generator, config, input, &FilterCriteria::new(), false).await {
                    println!("Bot: Sorry, I encountered an error: {:#}", e);
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_logging();

    let cli = parse_args();
    let config = load_config(&cli)?;
    // Credentials are checked before the catalog is loaded or embedded.
    let provider = if cli.command.needs_generation() {
        Some(build_provider(&config)?)
    } else {
        None
    };
    let items = load_catalog(&config)?;

    if let Command::Cuisines = cli.command {
        println!("Available cuisines:");
        for (i, cuisine) in available_cuisines(&items).iter().enumerate() {
            println!("  {}. {}", i + 1, cuisine);
        }
        return Ok(());
    }

    let index = build_index(&config, items)?;
    let engine = QueryEngine::new(&index, config.query.clone());
    let builder = ContextBuilder::new(config.context.clone());

    match &cli.command {
        Command::Search { query, top_k, filters } => {
            let criteria = filters.to_criteria();
            let response = engine.search_filtered(query, *top_k, &criteria)?;
            if response.results.is_empty() {
                print_no_matches(&criteria);
                return Ok(());
            }
            print_results(&response.results);
            if response.exhausted && !criteria.is_empty() {
                println!("Only {} item(s) satisfy {}.", response.results.len(), criteria);
            }
            let suggestions = suggest_related_searches(&response.results);
            if !suggestions.is_empty() {
                println!("\nRelated searches you might like:");
                for suggestion in suggestions {
                    println!("    - {}", suggestion);
                }
            }
        }
        Command::List { filters, limit } => {
            let criteria = filters.to_criteria();
            let items = engine.search_by_metadata(&criteria, *limit)?;
            if items.is_empty() {
                print_no_matches(&criteria);
                return Ok(());
            }
            for item in items {
                println!("{:>5}  {} | {} | {} cal", item.id.as_str(), item.name, item.cuisine, item.calories);
            }
        }
        Command::Ask {
            query,
            filters,
            show_context,
        } => {
            let provider = require_provider(&provider)?;
            ask(&engine, &builder, provider, &config, query, &filters.to_criteria(), *show_context).await?;
        }
        Command::Compare { first, second } => {
            let provider = require_provider(&provider)?;
            compare(&engine, &builder, provider, &config, first, second).await?;
        }
        Command::Benchmark { query, cuisine } => {
            let report = ComparisonHarness::standard(&index, cuisine, config.context.clone()).run(query)?;
            println!("{}", report);
        }
        Command::Chat => {
            let provider = require_provider(&provider)?;
            chat(&engine, &builder, provider, &config).await?;
        }
        Command::Cuisines => {}
    }

    Ok(())
}
