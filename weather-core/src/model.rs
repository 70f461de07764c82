use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Conditions observed at a single point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub temperature_c: f64,
    pub feels_like_c: f64,
    pub condition: String,
    pub humidity_pct: u8,
    pub wind_speed_mps: f64,
    pub observation_time: DateTime<Utc>,
}

/// Daily forecast summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub min_temp_c: f64,
    pub max_temp_c: f64,
    pub condition: String,
    /// Chance of precipitation, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precipitation_chance_pct: Option<u8>,
}

/// Everything a provider returned for one location key.
///
/// Treated as an immutable value once fetched. The cache stores it as JSON, so
/// it must survive a serde round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub provider: String,
    pub location_name: String,
    pub current: Observation,
    #[serde(default)]
    pub forecast: Vec<ForecastDay>,
}

impl WeatherSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }
}

/// A snapshot as held by one cache tier.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub location_key: String,
    pub snapshot: WeatherSnapshot,
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(location_key: impl Into<String>, snapshot: WeatherSnapshot) -> Self {
        Self { location_key: location_key.into(), snapshot, stored_at: Utc::now() }
    }

    /// Strict freshness check: an entry exactly `max_age` old is already stale.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.stored_at < max_age
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_survives_json() {
        let snap = fixtures::snapshot("New York, US", 21.5);
        let json = snap.to_json().unwrap();
        assert_eq!(WeatherSnapshot::from_json(&json).unwrap(), snap);
    }

    #[test]
    fn freshness_boundary_is_strict() {
        let entry = CacheEntry::new("10001", fixtures::snapshot("NYC", 20.0));
        let max_age = chrono::Duration::minutes(30);

        assert!(entry.is_fresh(entry.stored_at + chrono::Duration::minutes(29), max_age));
        assert!(!entry.is_fresh(entry.stored_at + max_age, max_age));
        assert!(!entry.is_fresh(entry.stored_at, chrono::Duration::zero()));
    }
}
