use async_trait::async_trait;
use chrono::{NaiveDate, Timelike, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::FetchError,
    model::{ForecastDay, Observation, WeatherSnapshot},
    resolver::parse_coordinates,
};

use super::{WeatherFetcher, decode, get_json, get_text, unix_to_utc};

const PROVIDER: &str = "openweather";
const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";
const FORECAST_DAYS: usize = 5;

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

/// Coordinates a location key resolved to, plus a display name when known.
#[derive(Debug, Clone, PartialEq)]
struct Place {
    lat: f64,
    lon: f64,
    name: Option<String>,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String) -> Self {
        Self { api_key, base_url: DEFAULT_BASE_URL.to_string(), http: Client::new() }
    }

    /// Point the client at another host (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Direct geocoding first, then postal-code geocoding, then a literal
    /// `lat,lon` key.
    async fn locate(&self, location_key: &str) -> Result<Place, FetchError> {
        let url = format!("{}/geo/1.0/direct", self.base_url);
        let hits: Vec<OwGeo> = get_json(
            &self.http,
            PROVIDER,
            &url,
            &[("q", location_key), ("limit", "1"), ("appid", self.api_key.as_str())],
        )
        .await?;
        if let Some(hit) = hits.into_iter().next() {
            tracing::debug!(location = location_key, lat = hit.lat, lon = hit.lon, "Geocoded by name");
            return Ok(hit.into_place());
        }

        let url = format!("{}/geo/1.0/zip", self.base_url);
        let (status, body) =
            get_text(&self.http, PROVIDER, &url, &[("zip", location_key), ("appid", self.api_key.as_str())])
                .await?;
        if status.is_success() {
            let hit: OwGeo = decode(PROVIDER, &body)?;
            tracing::debug!(location = location_key, lat = hit.lat, lon = hit.lon, "Geocoded by postal code");
            return Ok(hit.into_place());
        }

        if let Some((lat, lon)) = parse_coordinates(location_key) {
            return Ok(Place { lat, lon, name: None });
        }

        Err(FetchError::LocationNotFound(location_key.to_string()))
    }

    async fn fetch_current(&self, place: &Place) -> Result<(Observation, String), FetchError> {
        let url = format!("{}/data/2.5/weather", self.base_url);
        let (lat, lon) = (place.lat.to_string(), place.lon.to_string());

        let parsed: OwCurrentResponse = get_json(
            &self.http,
            PROVIDER,
            &url,
            &[("lat", lat.as_str()), ("lon", lon.as_str()), ("appid", self.api_key.as_str()), ("units", "metric")],
        )
        .await?;

        let observation_time = unix_to_utc(parsed.dt).unwrap_or_else(Utc::now);

        let condition = parsed
            .weather
            .first()
            .map(|w| w.description.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        let observation = Observation {
            temperature_c: parsed.main.temp,
            feels_like_c: parsed.main.feels_like,
            condition,
            humidity_pct: parsed.main.humidity,
            wind_speed_mps: parsed.wind.speed,
            observation_time,
        };

        let name = match parsed.sys.and_then(|s| s.country) {
            Some(country) if !parsed.name.is_empty() => format!("{}, {}", parsed.name, country),
            _ => parsed.name,
        };

        Ok((observation, name))
    }

    async fn fetch_forecast(&self, place: &Place) -> Result<Vec<ForecastDay>, FetchError> {
        let url = format!("{}/data/2.5/forecast", self.base_url);
        let (lat, lon) = (place.lat.to_string(), place.lon.to_string());

        let parsed: OwForecastResponse = get_json(
            &self.http,
            PROVIDER,
            &url,
            &[("lat", lat.as_str()), ("lon", lon.as_str()), ("appid", self.api_key.as_str()), ("units", "metric")],
        )
        .await?;

        let offset = parsed.city.and_then(|c| c.timezone).unwrap_or(0);
        Ok(daily_summaries(&parsed.list, offset))
    }
}

#[derive(Debug, Deserialize)]
struct OwGeo {
    name: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    country: Option<String>,
}

impl OwGeo {
    fn into_place(self) -> Place {
        let name = match self.country {
            Some(country) => format!("{}, {}", self.name, country),
            None => self.name,
        };
        Place { lat: self.lat, lon: self.lon, name: Some(name) }
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    humidity: u8,
    #[serde(default)]
    temp_min: Option<f64>,
    #[serde(default)]
    temp_max: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct OwSys {
    #[serde(default)]
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: String,
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
    #[serde(default)]
    sys: Option<OwSys>,
}

#[derive(Debug, Deserialize)]
struct OwCity {
    #[serde(default)]
    timezone: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    /// Probability of precipitation, 0.0..=1.0.
    #[serde(default)]
    pop: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    #[serde(default)]
    city: Option<OwCity>,
    list: Vec<OwForecastEntry>,
}

/// Folds 3-hourly forecast entries into per-day summaries in the location's
/// local time. The day's condition is taken from the entry closest to noon.
fn daily_summaries(entries: &[OwForecastEntry], utc_offset_secs: i64) -> Vec<ForecastDay> {
    let mut grouped: Vec<(NaiveDate, Vec<(&OwForecastEntry, i64)>)> = Vec::new();

    for entry in entries {
        let Some(local) = unix_to_utc(entry.dt + utc_offset_secs) else {
            continue;
        };
        let date = local.date_naive();
        let secs_from_noon = (i64::from(local.num_seconds_from_midnight()) - 12 * 3600).abs();

        match grouped.last_mut() {
            Some((day, items)) if *day == date => items.push((entry, secs_from_noon)),
            _ => grouped.push((date, vec![(entry, secs_from_noon)])),
        }
    }

    grouped
        .into_iter()
        .take(FORECAST_DAYS)
        .map(|(date, items)| {
            let min_temp_c = items
                .iter()
                .map(|(e, _)| e.main.temp_min.unwrap_or(e.main.temp))
                .fold(f64::INFINITY, f64::min);
            let max_temp_c = items
                .iter()
                .map(|(e, _)| e.main.temp_max.unwrap_or(e.main.temp))
                .fold(f64::NEG_INFINITY, f64::max);
            let condition = items
                .iter()
                .min_by_key(|(_, from_noon)| *from_noon)
                .and_then(|(e, _)| e.weather.first())
                .map(|w| w.description.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            let precipitation_chance_pct = items
                .iter()
                .filter_map(|(e, _)| e.pop)
                .reduce(f64::max)
                .map(|p| (p.clamp(0.0, 1.0) * 100.0).round() as u8);

            ForecastDay { date, min_temp_c, max_temp_c, condition, precipitation_chance_pct }
        })
        .collect()
}

#[async_trait]
impl WeatherFetcher for OpenWeatherProvider {
    async fn fetch(&self, location_key: &str) -> Result<WeatherSnapshot, FetchError> {
        let place = self.locate(location_key).await?;
        let (current, reported_name) = self.fetch_current(&place).await?;
        let forecast = self.fetch_forecast(&place).await?;

        let location_name = place
            .name
            .filter(|n| !n.is_empty())
            .or_else(|| (!reported_name.is_empty()).then_some(reported_name))
            .unwrap_or_else(|| location_key.to_string());

        Ok(WeatherSnapshot { provider: PROVIDER.to_string(), location_name, current, forecast })
    }
}
