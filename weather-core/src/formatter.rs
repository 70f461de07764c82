//! Turning a weather snapshot into the answer shown to the user.

use std::fmt::Debug;

use async_trait::async_trait;

use crate::{error::FormatError, llm::LlmClient, model::WeatherSnapshot};

#[async_trait]
pub trait AnswerFormatter: Send + Sync + Debug {
    async fn format(&self, query: &str, snapshot: &WeatherSnapshot) -> Result<String, FormatError>;
}

/// Deterministic, offline formatter.
#[derive(Debug, Clone, Default)]
pub struct TemplateFormatter;

impl TemplateFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, snapshot: &WeatherSnapshot) -> String {
        let now = &snapshot.current;
        let mut out = format!(
            "Weather in {}: {}, {:.1}°C (feels like {:.1}°C), humidity {}%, wind {:.1} m/s.",
            snapshot.location_name,
            now.condition,
            now.temperature_c,
            now.feels_like_c,
            now.humidity_pct,
            now.wind_speed_mps,
        );

        if !snapshot.forecast.is_empty() {
            out.push_str("\nForecast:");
            for day in &snapshot.forecast {
                out.push_str(&format!(
                    "\n- {}: {}, {:.0}°C to {:.0}°C",
                    day.date.format("%a %b %-d"),
                    day.condition,
                    day.min_temp_c,
                    day.max_temp_c,
                ));
                if let Some(chance) = day.precipitation_chance_pct {
                    out.push_str(&format!(", {chance}% chance of rain"));
                }
            }
        }

        out
    }
}

#[async_trait]
impl AnswerFormatter for TemplateFormatter {
    async fn format(&self, _query: &str, snapshot: &WeatherSnapshot) -> Result<String, FormatError> {
        Ok(self.render(snapshot))
    }
}

const ANSWER_PROMPT: &str = r#"You are a helpful weather assistant. Write a clear, conversational weather report for the user.

Instructions:
1. Start with a friendly greeting.
2. Summarize the user's query: "{query}".
3. Give the current weather: temperature, condition, humidity and wind speed when available.
4. Present the forecast: for each day list the high and low temperature, the condition and any notable events (rain, storms).
5. Use bullet points or short paragraphs, and keep the language simple.
6. End with a helpful tip based on the forecast (for example "Don't forget your umbrella!").

Weather data (JSON):
{data}"#;

/// Formatter that asks a language model to write the answer.
#[derive(Debug, Clone)]
pub struct LlmAnswerFormatter {
    client: LlmClient,
}

impl LlmAnswerFormatter {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnswerFormatter for LlmAnswerFormatter {
    async fn format(&self, query: &str, snapshot: &WeatherSnapshot) -> Result<String, FormatError> {
        let data = serde_json::to_string_pretty(snapshot).map_err(|e| FormatError::Failed(e.to_string()))?;
        let prompt = ANSWER_PROMPT.replace("{query}", query).replace("{data}", &data);

        let answer = self.client.complete(&prompt).await.map_err(|e| FormatError::Failed(e.to_string()))?;
        let answer = answer.trim();
        if answer.is_empty() {
            return Err(FormatError::Empty);
        }

        tracing::debug!(chars = answer.len(), "LLM answer generated");
        Ok(answer.to_string())
    }
}
