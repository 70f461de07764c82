//! Core library for the weather bot.
//!
//! This crate defines:
//! - The query pipeline (location → cache → provider → answer)
//! - The two-tier weather cache (in-memory + SQLite)
//! - Collaborator traits and their implementations: location resolvers,
//!   weather providers, answer formatters
//! - Configuration & credentials handling
//!
//! It is used by `weather-cli`, but can also be reused by other binaries or services.

pub mod cache;
pub mod config;
pub mod error;
pub mod formatter;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod resolver;

pub use cache::{PersistentStore, SqliteStore, TieredCache};
pub use config::{CacheConfig, Config, LlmConfig, ProviderConfig};
pub use error::{EmptyQuery, ErrorInfo, ErrorKind, FetchError, FormatError, Unresolved};
pub use formatter::{AnswerFormatter, LlmAnswerFormatter, TemplateFormatter};
pub use llm::LlmClient;
pub use model::{CacheEntry, ForecastDay, Observation, WeatherSnapshot};
pub use pipeline::{Pipeline, PipelineOutcome, PipelineRequest, PipelineState, Stage};
pub use provider::{ProviderId, WeatherFetcher};
pub use resolver::{HeuristicResolver, LlmLocationResolver, LocationResolver};
