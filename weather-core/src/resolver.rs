//! Location resolution: free-text query to canonical location key.

use std::{fmt::Debug, sync::LazyLock};

use async_trait::async_trait;
use regex::Regex;

use crate::{error::Unresolved, llm::LlmClient};

#[async_trait]
pub trait LocationResolver: Send + Sync + Debug {
    /// Returns the canonical location key for `query`.
    ///
    /// Never returns an empty key; "nothing found" is [`Unresolved`].
    async fn resolve(&self, query: &str) -> Result<String, Unresolved>;
}

static COORDINATES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([-+]?\d{1,3}(?:\.\d+)?)\s*,\s*([-+]?\d{1,3}(?:\.\d+)?)").expect("valid regex")
});

static POSTAL_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)\b(
            \d{5}(?:-\d{4})?              # US ZIP, ZIP+4
          | \d{6}                         # IN PIN
          | [A-Z]{1,2}\d[A-Z\d]?\s*\d[A-Z]{2}  # UK
          | [A-Z]\d[A-Z]\s?\d[A-Z]\d      # CA
        )\b",
    )
    .expect("valid regex")
});

static PLACE_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:in|for|at|near|of|around)\s+([\p{L}][\p{L}\s,'-]*)").expect("valid regex")
});

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "any", "around", "at", "be", "cold", "currently", "day", "days", "evening",
    "for", "forecast", "give", "going", "hot", "how", "humid", "humidity", "in", "is", "it",
    "like", "me", "morning", "near", "next", "now", "of", "outside", "please", "rain", "raining",
    "right", "show", "snow", "sunny", "tell", "temp", "temperature", "the", "there", "this",
    "today", "tomorrow", "tonight", "afternoon", "week", "weekend", "what", "what's", "whats",
    "weather", "will", "wind", "windy", "to",
];

fn is_stopword(word: &str) -> bool {
    let word = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'');
    STOPWORDS.iter().any(|s| s.eq_ignore_ascii_case(word))
}

/// Parses a `lat,lon` pair anywhere in `text`, rejecting out-of-range values.
pub fn parse_coordinates(text: &str) -> Option<(f64, f64)> {
    let caps = COORDINATES.captures(text)?;
    let lat: f64 = caps[1].parse().ok()?;
    let lon: f64 = caps[2].parse().ok()?;

    ((-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)).then_some((lat, lon))
}

/// Canonical cache key for a raw location string.
///
/// Coordinates become `lat,lon`; anything else is lowercased with collapsed
/// whitespace and stray punctuation removed. Empty input and the literal
/// `UNKNOWN` yield `None`.
pub fn normalize_location_key(raw: &str) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.' | '?' | '!' | ','))
        .trim();

    if let Some((lat, lon)) = parse_coordinates(trimmed) {
        if COORDINATES.find(trimmed).is_some_and(|m| m.as_str().len() == trimmed.len()) {
            return Some(format!("{lat},{lon}"));
        }
    }

    let key = trimmed
        .replace('?', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    if key.is_empty() || key == "unknown" { None } else { Some(key) }
}

/// Pattern-based resolver used when no language model is configured.
///
/// Recognises coordinate pairs, postal codes and "in/for/at <place>" phrases.
#[derive(Debug, Clone, Default)]
pub struct HeuristicResolver;

impl HeuristicResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, query: &str) -> Option<String> {
        if let Some((lat, lon)) = parse_coordinates(query) {
            return Some(format!("{lat},{lon}"));
        }

        if let Some(m) = POSTAL_CODE.find(query) {
            return normalize_location_key(m.as_str());
        }

        for caps in PLACE_PHRASE.captures_iter(query) {
            let place: Vec<&str> =
                caps[1].split_whitespace().take_while(|w| !is_stopword(w)).collect();
            if let Some(key) = normalize_location_key(&place.join(" ")) {
                return Some(key);
            }
        }

        // Bare place names: "Tokyo", "weather Tokyo", "New York forecast".
        let words: Vec<&str> = query.split_whitespace().filter(|w| !is_stopword(w)).collect();
        let capitalised = words.iter().all(|w| w.chars().next().is_some_and(char::is_uppercase));
        if (1..=3).contains(&words.len()) && capitalised {
            return normalize_location_key(&words.join(" "));
        }

        None
    }
}

#[async_trait]
impl LocationResolver for HeuristicResolver {
    async fn resolve(&self, query: &str) -> Result<String, Unresolved> {
        match self.extract(query) {
            Some(key) => {
                tracing::info!(location = %key, "Extracted location heuristically");
                Ok(key)
            }
            None => {
                tracing::warn!("Could not detect location");
                Err(Unresolved)
            }
        }
    }
}

const EXTRACTION_PROMPT: &str = r#"You are a location extraction assistant for a weather application.

Analyze the following user query and extract the location in a format suitable for weather lookup:
"{query}"

Rules:
- Coordinates (decimal or DMS, possibly negative): return them as "lat,long" in decimal degrees.
- Postal codes (ZIP, PIN, alphanumeric international codes): return only the code.
- City or region names: return only the clean name, without words such as "city of", "near" or "in".
- Landmarks: return the city or region where the landmark is located.
- Country names: return them only when no more specific location is present.
- Several locations: return the most relevant one for a weather lookup.
- Ignore references to time, weather conditions and unrelated entities.
- Do not add explanations, punctuation or extra words.
- If no location can be identified, or the locations are ambiguous or conflicting, return "UNKNOWN".

Your response must be only the extracted location or "UNKNOWN"."#;

/// Resolver that asks a language model to extract the location.
///
/// Transport failures fall back to the heuristic resolver when one is set;
/// an explicit `UNKNOWN` reply never does.
#[derive(Debug, Clone)]
pub struct LlmLocationResolver {
    client: LlmClient,
    fallback: Option<HeuristicResolver>,
}

impl LlmLocationResolver {
    pub fn new(client: LlmClient) -> Self {
        Self { client, fallback: None }
    }

    pub fn with_fallback(mut self, fallback: HeuristicResolver) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

#[async_trait]
impl LocationResolver for LlmLocationResolver {
    async fn resolve(&self, query: &str) -> Result<String, Unresolved> {
        let prompt = EXTRACTION_PROMPT.replace("{query}", query);

        let reply = match self.client.complete(&prompt).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "Location resolver failed");
                return match &self.fallback {
                    Some(heuristic) => heuristic.resolve(query).await,
                    None => Err(Unresolved),
                };
            }
        };

        let first_line = reply.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
        match normalize_location_key(first_line) {
            Some(key) => {
                tracing::info!(location = %key, "Extracted location via LLM");
                Ok(key)
            }
            None => {
                tracing::warn!("Could not detect location");
                Err(Unresolved)
            }
        }
    }
}
