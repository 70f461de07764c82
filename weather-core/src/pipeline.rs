//! The query pipeline: a four-stage state machine run once per query.
//!
//! ```text
//! ExtractLocation ──error──────────────────────────┐
//!        │                                         ▼
//!        └──► CheckCache ──► FetchFromApi ──► FormatAnswer (terminal)
//! ```
//!
//! Every stage takes the [`PipelineState`] by value and returns the next one.
//! Failures are recorded on the state as [`ErrorInfo`] values and become the
//! answer text; a run always ends with exactly one answer string.

use std::{fmt, sync::Arc};

use crate::{
    cache::{TieredCache, default_max_age},
    error::{EmptyQuery, ErrorInfo, ErrorKind},
    formatter::AnswerFormatter,
    model::WeatherSnapshot,
    provider::WeatherFetcher,
    resolver::LocationResolver,
};

pub const NO_WEATHER_DATA: &str = "No weather data available.";
pub const FORMAT_FALLBACK: &str = "I couldn't generate a response.";

/// A validated, non-blank user query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    user_query: String,
}

impl PipelineRequest {
    pub fn new(user_query: impl Into<String>) -> Result<Self, EmptyQuery> {
        let user_query = user_query.into();
        if user_query.trim().is_empty() {
            return Err(EmptyQuery);
        }
        Ok(Self { user_query })
    }

    pub fn user_query(&self) -> &str {
        &self.user_query
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ExtractLocation,
    CheckCache,
    FetchFromApi,
    FormatAnswer,
}

impl Stage {
    pub const INITIAL: Stage = Stage::ExtractLocation;

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ExtractLocation => "extract_location",
            Stage::CheckCache => "check_cache",
            Stage::FetchFromApi => "fetch_from_api",
            Stage::FormatAnswer => "format_answer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition table. The only branch: a failed location extraction skips
/// straight to formatting.
pub fn next_stage(stage: Stage, state: &PipelineState) -> Option<Stage> {
    match stage {
        Stage::ExtractLocation if state.error.is_some() => Some(Stage::FormatAnswer),
        Stage::ExtractLocation => Some(Stage::CheckCache),
        Stage::CheckCache => Some(Stage::FetchFromApi),
        Stage::FetchFromApi => Some(Stage::FormatAnswer),
        Stage::FormatAnswer => None,
    }
}

/// Record threaded through one pipeline run.
///
/// At completion exactly one of `final_answer` and `error` is set; when it is
/// `error`, its message is the answer shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    pub user_query: String,
    pub location_key: Option<String>,
    pub weather_snapshot: Option<WeatherSnapshot>,
    pub from_cache: bool,
    pub final_answer: Option<String>,
    pub error: Option<ErrorInfo>,
}

impl PipelineState {
    pub fn new(request: &PipelineRequest) -> Self {
        Self {
            user_query: request.user_query().to_string(),
            location_key: None,
            weather_snapshot: None,
            from_cache: false,
            final_answer: None,
            error: None,
        }
    }

    /// The user-visible answer, once the run has reached `FormatAnswer`.
    pub fn answer(&self) -> Option<&str> {
        self.final_answer.as_deref().or_else(|| self.error.as_ref().map(|e| e.message.as_str()))
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub answer: String,
    pub from_cache: bool,
    pub location_key: Option<String>,
    pub error: Option<ErrorInfo>,
    /// Stages in the order they ran.
    pub stages: Vec<Stage>,
}

impl PipelineOutcome {
    fn from_state(state: PipelineState, stages: Vec<Stage>) -> Self {
        let answer = state.answer().unwrap_or(NO_WEATHER_DATA).to_string();
        Self {
            answer,
            from_cache: state.from_cache,
            location_key: state.location_key,
            error: state.error,
            stages,
        }
    }
}

/// Runs queries against the injected collaborators and the shared cache.
///
/// Cheap to share behind an `Arc`; concurrent runs only meet in the cache.
#[derive(Debug, Clone)]
pub struct Pipeline {
    resolver: Arc<dyn LocationResolver>,
    fetcher: Arc<dyn WeatherFetcher>,
    formatter: Arc<dyn AnswerFormatter>,
    cache: Arc<TieredCache>,
    max_age: chrono::Duration,
}

impl Pipeline {
    pub fn new(
        resolver: Arc<dyn LocationResolver>,
        fetcher: Arc<dyn WeatherFetcher>,
        formatter: Arc<dyn AnswerFormatter>,
        cache: Arc<TieredCache>,
    ) -> Self {
        Self { resolver, fetcher, formatter, cache, max_age: default_max_age() }
    }

    pub fn with_max_age(mut self, max_age: chrono::Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Validate `query` and run it. Blank queries are rejected before any stage runs.
    pub async fn answer(&self, query: &str) -> Result<PipelineOutcome, EmptyQuery> {
        Ok(self.run(PipelineRequest::new(query)?).await)
    }

    #[tracing::instrument(name = "pipeline", skip_all, fields(query = %request.user_query()))]
    pub async fn run(&self, request: PipelineRequest) -> PipelineOutcome {
        let mut state = PipelineState::new(&request);
        let mut stages = Vec::with_capacity(4);
        let mut next = Some(Stage::INITIAL);

        while let Some(stage) = next {
            tracing::debug!(%stage, "Entering stage");
            stages.push(stage);
            state = self.step(stage, state).await;
            next = next_stage(stage, &state);
        }

        PipelineOutcome::from_state(state, stages)
    }

    async fn step(&self, stage: Stage, state: PipelineState) -> PipelineState {
        match stage {
            Stage::ExtractLocation => self.extract_location(state).await,
            Stage::CheckCache => self.check_cache(state).await,
            Stage::FetchFromApi => self.fetch_from_api(state).await,
            Stage::FormatAnswer => self.format_answer(state).await,
        }
    }

    pub async fn extract_location(&self, state: PipelineState) -> PipelineState {
        match self.resolver.resolve(&state.user_query).await {
            Ok(key) if !key.trim().is_empty() => PipelineState { location_key: Some(key), ..state },
            _ => {
                tracing::warn!("Could not detect a location");
                PipelineState { error: Some(ErrorInfo::location_unresolved()), ..state }
            }
        }
    }

    /// Cache I/O runs on the blocking pool; a failed lookup task counts as a miss.
    pub async fn check_cache(&self, state: PipelineState) -> PipelineState {
        let Some(key) = state.location_key.clone() else {
            return state;
        };

        let cache = Arc::clone(&self.cache);
        let max_age = self.max_age;
        let hit = match tokio::task::spawn_blocking(move || cache.lookup(&key, max_age)).await {
            Ok(hit) => hit,
            Err(err) => {
                tracing::warn!(error = %err, "Cache lookup task failed");
                None
            }
        };

        match hit {
            Some(entry) => {
                PipelineState { weather_snapshot: Some(entry.snapshot), from_cache: true, ..state }
            }
            None => PipelineState { weather_snapshot: None, from_cache: false, ..state },
        }
    }

    pub async fn fetch_from_api(&self, state: PipelineState) -> PipelineState {
        if state.weather_snapshot.is_some() {
            return state;
        }
        let Some(key) = state.location_key.clone() else {
            return state;
        };

        tracing::info!(location = %key, "Fetching weather from API");
        match self.fetcher.fetch(&key).await {
            Ok(snapshot) => {
                self.store_in_cache(key, snapshot.clone()).await;
                PipelineState { weather_snapshot: Some(snapshot), ..state }
            }
            Err(err) => {
                tracing::warn!(location = %key, error = %err, "Weather fetch failed");
                PipelineState { error: Some(ErrorInfo::fetch_failed(&err)), ..state }
            }
        }
    }

    async fn store_in_cache(&self, key: String, snapshot: WeatherSnapshot) {
        let cache = Arc::clone(&self.cache);
        let task = tokio::task::spawn_blocking(move || cache.store(&key, snapshot));
        if let Err(err) = task.await {
            tracing::warn!(error = %err, "Cache store task failed");
        }
    }

    pub async fn format_answer(&self, state: PipelineState) -> PipelineState {
        if let Some(err) = &state.error {
            tracing::warn!(kind = %err.kind, "Answering with error message");
            return PipelineState { final_answer: None, ..state };
        }

        let Some(snapshot) = &state.weather_snapshot else {
            return PipelineState { final_answer: Some(NO_WEATHER_DATA.to_string()), ..state };
        };

        let answer = match self.formatter.format(&state.user_query, snapshot).await {
            Ok(answer) if !answer.trim().is_empty() => answer,
            Ok(_) => {
                tracing::warn!(kind = %ErrorKind::FormatFailed, "Formatter returned an empty answer");
                FORMAT_FALLBACK.to_string()
            }
            Err(err) => {
                let info = ErrorInfo::format_failed(&err);
                tracing::warn!(kind = %info.kind, error = %info.message, "Formatter failed");
                FORMAT_FALLBACK.to_string()
            }
        };

        PipelineState { final_answer: Some(answer), ..state }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{FetchError, FormatError, Unresolved},
        model::fixtures::snapshot,
    };
    use async_trait::async_trait;

    #[derive(Debug)]
    struct FixedResolver(Option<&'static str>);

    #[async_trait]
    impl LocationResolver for FixedResolver {
        async fn resolve(&self, _query: &str) -> Result<String, Unresolved> {
            self.0.map(str::to_string).ok_or(Unresolved)
        }
    }

    #[derive(Debug)]
    struct FixedFetcher(Result<WeatherSnapshot, FetchError>);

    #[async_trait]
    impl WeatherFetcher for FixedFetcher {
        async fn fetch(&self, _key: &str) -> Result<WeatherSnapshot, FetchError> {
            self.0.clone()
        }
    }

    #[derive(Debug)]
    struct FixedFormatter(Result<String, FormatError>);

    #[async_trait]
    impl AnswerFormatter for FixedFormatter {
        async fn format(&self, _q: &str, _s: &WeatherSnapshot) -> Result<String, FormatError> {
            self.0.clone()
        }
    }

    fn pipeline(
        resolver: Option<&'static str>,
        fetched: Result<WeatherSnapshot, FetchError>,
        formatted: Result<String, FormatError>,
    ) -> Pipeline {
        Pipeline::new(
            Arc::new(FixedResolver(resolver)),
            Arc::new(FixedFetcher(fetched)),
            Arc::new(FixedFormatter(formatted)),
            Arc::new(TieredCache::in_memory().unwrap()),
        )
    }

    fn state(query: &str) -> PipelineState {
        PipelineState::new(&PipelineRequest::new(query).unwrap())
    }

    #[test]
    fn blank_queries_are_rejected() {
        assert_eq!(PipelineRequest::new("   \n"), Err(EmptyQuery));
        assert_eq!(PipelineRequest::new(" hi ").unwrap().user_query(), " hi ");
    }

    #[test]
    fn transition_table() {
        let ok = state("q");
        let failed = PipelineState { error: Some(ErrorInfo::location_unresolved()), ..state("q") };

        assert_eq!(next_stage(Stage::ExtractLocation, &ok), Some(Stage::CheckCache));
        assert_eq!(next_stage(Stage::ExtractLocation, &failed), Some(Stage::FormatAnswer));
        assert_eq!(next_stage(Stage::CheckCache, &ok), Some(Stage::FetchFromApi));
        assert_eq!(next_stage(Stage::FetchFromApi, &failed), Some(Stage::FormatAnswer));
        assert_eq!(next_stage(Stage::FormatAnswer, &ok), None);
    }

    #[tokio::test]
    async fn empty_resolver_key_counts_as_unresolved() {
        let p = pipeline(Some("  "), Ok(snapshot("X", 1.0)), Ok("unused".into()));
        let next = p.extract_location(state("weather")).await;

        assert_eq!(next.location_key, None);
        assert_eq!(next.error.unwrap().kind, ErrorKind::LocationUnresolved);
    }

    #[tokio::test]
    async fn fetch_stage_is_a_pass_through_on_cache_hit() {
        let p = pipeline(Some("k"), Err(FetchError::other("must not be called")), Ok("x".into()));
        let cached = PipelineState {
            location_key: Some("k".into()),
            weather_snapshot: Some(snapshot("K", 9.0)),
            from_cache: true,
            ..state("q")
        };

        assert_eq!(p.fetch_from_api(cached.clone()).await, cached);
    }

    #[tokio::test]
    async fn format_without_snapshot_reports_no_data() {
        let p = pipeline(Some("k"), Ok(snapshot("K", 1.0)), Ok("x".into()));
        let done = p.format_answer(state("q")).await;
        assert_eq!(done.answer(), Some(NO_WEATHER_DATA));
    }

    #[tokio::test]
    async fn error_and_answer_are_mutually_exclusive() {
        let p = pipeline(None, Ok(snapshot("K", 1.0)), Ok("x".into()));
        let out = p.answer("weather in nowhere").await.unwrap();

        assert_eq!(out.answer, "Could not detect a location.");
        assert_eq!(out.stages, vec![Stage::ExtractLocation, Stage::FormatAnswer]);

        let p = pipeline(Some("k"), Ok(snapshot("K", 1.0)), Ok("fine".into()));
        let out = p.answer("weather in k").await.unwrap();
        assert_eq!(out.error, None);
        assert_eq!(out.answer, "fine");
        assert_eq!(
            out.stages,
            vec![Stage::ExtractLocation, Stage::CheckCache, Stage::FetchFromApi, Stage::FormatAnswer]
        );
    }

    #[tokio::test]
    async fn whitespace_answer_uses_fallback() {
        let p = pipeline(Some("k"), Ok(snapshot("K", 1.0)), Ok("  \n".into()));
        assert_eq!(p.answer("q").await.unwrap().answer, FORMAT_FALLBACK);
    }
}
