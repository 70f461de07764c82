use crate::{
    Config, WeatherSnapshot,
    error::{FetchError, truncate_body},
    provider::{openweather::OpenWeatherProvider, weatherapi::WeatherApiProvider},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::{convert::TryFrom, fmt::Debug};

pub mod openweather;
pub mod weatherapi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherApi]
    }

    /// Environment variable that may carry this provider's API key.
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "OPENWEATHER_API_KEY",
            ProviderId::WeatherApi => "WEATHERAPI_API_KEY",
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi."
            )),
        }
    }
}

/// Fetches weather for a canonical location key.
///
/// Implementations must not touch the cache; storing results is the
/// pipeline's job.
#[async_trait]
pub trait WeatherFetcher: Send + Sync + Debug {
    async fn fetch(&self, location_key: &str) -> Result<WeatherSnapshot, FetchError>;
}

/// Construct a fetcher from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Box<dyn WeatherFetcher>> {
    let api_key = config.provider_api_key(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: run `weather configure {id}` and enter your API key."
        )
    })?;

    let boxed: Box<dyn WeatherFetcher> = match id {
        ProviderId::OpenWeather => Box::new(OpenWeatherProvider::new(api_key.to_owned())),
        ProviderId::WeatherApi => Box::new(WeatherApiProvider::new(api_key.to_owned())),
    };

    Ok(boxed)
}

/// Construct the default fetcher from config, using `default_provider` field.
pub fn default_provider_from_config(config: &Config) -> anyhow::Result<Box<dyn WeatherFetcher>> {
    let id = config.default_provider_id()?;
    provider_from_config(id, config)
}

/// GET `url` and return the status with the raw body.
async fn get_text(
    http: &Client,
    provider: &'static str,
    url: &str,
    query: &[(&str, &str)],
) -> Result<(StatusCode, String), FetchError> {
    let res = http
        .get(url)
        .query(query)
        .send()
        .await
        .map_err(|e| FetchError::Transport { provider, message: e.to_string() })?;

    let status = res.status();
    let body = res
        .text()
        .await
        .map_err(|e| FetchError::Transport { provider, message: e.to_string() })?;

    Ok((status, body))
}

/// GET `url` and decode a successful JSON body; any other status is an error.
async fn get_json<T: DeserializeOwned>(
    http: &Client,
    provider: &'static str,
    url: &str,
    query: &[(&str, &str)],
) -> Result<T, FetchError> {
    let (status, body) = get_text(http, provider, url, query).await?;
    if !status.is_success() {
        return Err(FetchError::Status { provider, status: status.as_u16(), body: truncate_body(&body) });
    }
    decode(provider, &body)
}

fn decode<T: DeserializeOwned>(provider: &'static str, body: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Decode { provider, message: e.to_string() })
}

fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}
