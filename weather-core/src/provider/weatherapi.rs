use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::{FetchError, truncate_body},
    model::{ForecastDay, Observation, WeatherSnapshot},
};

use super::{WeatherFetcher, decode, get_text, unix_to_utc};

const PROVIDER: &str = "weatherapi";
const DEFAULT_BASE_URL: &str = "https://api.weatherapi.com";
const FORECAST_DAYS: &str = "5";
/// WeatherAPI.com error code for "No matching location found."
const NO_MATCHING_LOCATION: u32 = 1006;

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherApiProvider {
    pub fn new(api_key: String) -> Self {
        Self { api_key, base_url: DEFAULT_BASE_URL.to_string(), http: Client::new() }
    }

    /// Point the client at another host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: String,
    country: String,
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
    feelslike_c: f64,
    humidity: u8,
    wind_kph: f64,
    condition: WaCondition,
    last_updated_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WaDay {
    maxtemp_c: f64,
    mintemp_c: f64,
    condition: WaCondition,
    #[serde(default)]
    daily_chance_of_rain: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: NaiveDate,
    day: WaDay,
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaForecastResponse {
    location: WaLocation,
    current: WaCurrent,
    forecast: WaForecast,
}

#[derive(Debug, Deserialize)]
struct WaErrorBody {
    error: WaErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WaErrorDetail {
    code: u32,
}

#[async_trait]
impl WeatherFetcher for WeatherApiProvider {
    async fn fetch(&self, location_key: &str) -> Result<WeatherSnapshot, FetchError> {
        let url = format!("{}/v1/forecast.json", self.base_url);

        let (status, body) = get_text(
            &self.http,
            PROVIDER,
            &url,
            &[("key", self.api_key.as_str()), ("q", location_key), ("days", FORECAST_DAYS)],
        )
        .await?;

        if !status.is_success() {
            let not_found = serde_json::from_str::<WaErrorBody>(&body)
                .is_ok_and(|b| b.error.code == NO_MATCHING_LOCATION);
            if not_found {
                return Err(FetchError::LocationNotFound(location_key.to_string()));
            }
            return Err(FetchError::Status { provider: PROVIDER, status: status.as_u16(), body: truncate_body(&body) });
        }

        let parsed: WaForecastResponse = decode(PROVIDER, &body)?;

        let observation_time =
            parsed.current.last_updated_epoch.and_then(unix_to_utc).unwrap_or_else(Utc::now);

        let current = Observation {
            temperature_c: parsed.current.temp_c,
            feels_like_c: parsed.current.feelslike_c,
            condition: parsed.current.condition.text,
            humidity_pct: parsed.current.humidity,
            wind_speed_mps: parsed.current.wind_kph / 3.6,
            observation_time,
        };

        let forecast = parsed
            .forecast
            .forecastday
            .into_iter()
            .map(|fd| ForecastDay {
                date: fd.date,
                min_temp_c: fd.day.mintemp_c,
                max_temp_c: fd.day.maxtemp_c,
                condition: fd.day.condition.text,
                precipitation_chance_pct: fd.day.daily_chance_of_rain.map(|c| c.clamp(0.0, 100.0).round() as u8),
            })
            .collect();

        Ok(WeatherSnapshot {
            provider: PROVIDER.to_string(),
            location_name: format!("{}, {}", parsed.location.name, parsed.location.country),
            current,
            forecast,
        })
    }
}
