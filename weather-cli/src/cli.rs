use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use inquire::{Confirm, InquireError, Password, PasswordDisplayMode, Text};
use weather_core::{
    AnswerFormatter, Config, HeuristicResolver, LlmAnswerFormatter, LlmClient, LlmLocationResolver,
    LocationResolver, Pipeline, PipelineOutcome, ProviderId, SqliteStore, TemplateFormatter,
    TieredCache, WeatherFetcher, provider::default_provider_from_config,
};

use crate::server;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Ask about the weather in plain language")]
pub struct Cli {
    /// Use the built-in location parser and answer template even if an LLM is configured.
    #[arg(long, global = true)]
    pub no_llm: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "weatherapi".
        provider: String,
    },

    /// Answer a single weather question.
    Ask {
        /// The question, e.g. "what's the weather in Paris tomorrow?"
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Also print the resolved location, cache status and visited stages.
        #[arg(long, short)]
        verbose: bool,
    },

    /// Interactive session; type `quit` or `exit` to leave.
    Chat,

    /// Serve `POST /weather` over HTTP.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: SocketAddr,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { provider } => configure(&provider),
            Command::Ask { query, verbose } => {
                let pipeline = build_pipeline(self.no_llm)?;
                let query = query.join(" ");
                match pipeline.answer(&query).await {
                    Ok(outcome) => print_outcome(&outcome, verbose),
                    Err(err) => anyhow::bail!("{err}"),
                }
                Ok(())
            }
            Command::Chat => {
                let pipeline = build_pipeline(self.no_llm)?;
                chat(&pipeline).await
            }
            Command::Serve { addr } => {
                let pipeline = build_pipeline(self.no_llm)?;
                server::serve(Arc::new(pipeline), addr).await
            }
        }
    }
}

fn configure(provider: &str) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut cfg = Config::load()?;

    let api_key = Password::new(&format!("API key for {id}:"))
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;
    let api_key = api_key.trim().to_string();
    if api_key.is_empty() {
        anyhow::bail!("API key must not be empty");
    }

    cfg.upsert_provider_api_key(id, api_key);

    let is_default = cfg.default_provider_id().ok() == Some(id);
    if !is_default {
        let make_default = Confirm::new(&format!("Use {id} as the default provider?"))
            .with_default(false)
            .prompt()
            .context("Failed to read answer")?;
        if make_default {
            cfg.set_default_provider(id);
        }
    }

    cfg.save()?;
    println!("Saved {id} credentials to {}", Config::config_file_path()?.display());
    Ok(())
}

/// Wire the pipeline from the on-disk config plus environment overrides.
fn build_pipeline(no_llm: bool) -> anyhow::Result<Pipeline> {
    let mut cfg = Config::load()?;
    cfg.apply_env();

    let fetcher: Arc<dyn WeatherFetcher> = Arc::from(default_provider_from_config(&cfg)?);

    let db_path = cfg.cache_database_path()?;
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open cache database: {}", db_path.display()))?;
    let cache = Arc::new(TieredCache::new(Box::new(store)));

    let (resolver, formatter): (Arc<dyn LocationResolver>, Arc<dyn AnswerFormatter>) =
        match cfg.llm.as_ref().filter(|_| !no_llm) {
            Some(llm) => {
                tracing::debug!(model = %llm.model, "Using LLM resolver and formatter");
                let client = LlmClient::from_config(llm);
                (
                    Arc::new(LlmLocationResolver::new(client.clone()).with_fallback(HeuristicResolver::new())),
                    Arc::new(LlmAnswerFormatter::new(client)),
                )
            }
            None => (Arc::new(HeuristicResolver::new()), Arc::new(TemplateFormatter::new())),
        };

    Ok(Pipeline::new(resolver, fetcher, formatter, cache).with_max_age(cfg.cache_max_age()?))
}

fn print_outcome(outcome: &PipelineOutcome, verbose: bool) {
    println!("{}", outcome.answer);

    if verbose {
        let stages: Vec<_> = outcome.stages.iter().map(|s| s.as_str()).collect();
        println!();
        println!("location: {}", outcome.location_key.as_deref().unwrap_or("-"));
        println!("source:   {}", if outcome.from_cache { "cache" } else { "provider" });
        println!("stages:   {}", stages.join(" -> "));
        if let Some(err) = &outcome.error {
            println!("error:    {err}");
        }
    }
}

async fn chat(pipeline: &Pipeline) -> anyhow::Result<()> {
    println!("Ask about the weather anywhere. Type 'quit' or 'exit' to leave.");

    loop {
        let line = match Text::new("You:").prompt() {
            Ok(line) => line,
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => break,
            Err(err) => return Err(err).context("Failed to read input"),
        };

        let line = line.trim();
        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }

        match pipeline.answer(line).await {
            Ok(outcome) => println!("Bot: {}\n", outcome.answer),
            Err(_) => println!("Bot: Please enter a query.\n"),
        }
    }

    println!("Goodbye!");
    Ok(())
}
