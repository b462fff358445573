use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ConfigError;
use crate::helpers::haversine_km;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Run configuration, parsed from environment variables with defaults.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Settings {
    pub api: ApiSettings,
    pub data: DataSettings,
    pub model: ModelSettings,
    #[serde(skip)]
    pub catalog: ReservoirCatalog,
}

/// Upstream endpoints, HTTP timeouts and retry policy.
#[derive(Debug, Clone, Serialize)]
pub struct ApiSettings {
    pub izsu_base_url: String,
    /// JSON endpoint returning `{ "results": [...] }`.
    pub izsu_api_endpoint: String,
    /// Public page with the fill-ratio table.
    pub izsu_page_endpoint: String,
    pub meteo_base_url: String,
    pub meteo_endpoint: String,
    pub mgm_base_url: String,
    pub mgm_endpoint: String,
    pub mgm_station_id: String,
    pub openweather_base_url: String,
    #[serde(skip)]
    pub openweather_api_key: Option<String>,
    pub user_agent: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff base; retry k sleeps `retry_delay * 2^(k-1)`.
    pub retry_delay: Duration,
    /// Cap on concurrent per-reservoir requests.
    pub max_concurrent_requests: usize,
    /// Pause between consecutive requests in one slot.
    pub request_pause: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            izsu_base_url: "https://www.izsu.gov.tr".to_string(),
            izsu_api_endpoint: "/api/dam-data".to_string(),
            izsu_page_endpoint: "/tr/baraj-doluluk-oranlari".to_string(),
            meteo_base_url: "https://api.open-meteo.com/v1".to_string(),
            meteo_endpoint: "/forecast".to_string(),
            mgm_base_url: "https://servis.mgm.gov.tr".to_string(),
            mgm_endpoint: "/web/sondurumlar".to_string(),
            mgm_station_id: "17200".to_string(),
            openweather_base_url: "https://api.openweathermap.org/data/2.5".to_string(),
            openweather_api_key: None,
            user_agent: format!("ReservoirWatch/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            max_concurrent_requests: 4,
            request_pause: Duration::from_millis(100),
        }
    }
}

/// Validation thresholds, caching and synthetic data generation.
#[derive(Debug, Clone, Serialize)]
pub struct DataSettings {
    pub cache_duration: Duration,
    /// Minimum rows for a local file or a healthy merged dataset.
    pub min_data_points: usize,
    /// Maximum fraction of missing cells in a quality-critical column.
    pub max_missing_ratio: f64,
    /// Default look-back window in days.
    pub default_days: u32,
    pub synthetic_seed: u64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            cache_duration: Duration::from_secs(1800),
            min_data_points: 30,
            max_missing_ratio: 0.2,
            default_days: 30,
            synthetic_seed: 42,
        }
    }
}

/// Heuristic forecast and trend constants.
///
/// These are tunable knobs, not physically derived values.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSettings {
    pub prediction_days: u32,
    pub trend_window_days: u32,
    pub balance_window_days: u32,
    /// Fill-ratio standard deviation above which a series is Volatile.
    pub volatility_threshold: f64,
    /// Per-step slope above (below the negative of) which a series trends.
    pub slope_threshold: f64,
    /// Daily volume change (mcm) applied for an Increasing/Decreasing trend.
    pub trend_daily_delta: f64,
    pub rain_threshold_mm: f64,
    pub rain_gain_factor: f64,
    pub heat_threshold_c: f64,
    pub heat_loss_factor: f64,
    /// Fetch an Open-Meteo forecast and feed it into `predict`.
    pub use_weather_forecast: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            prediction_days: 30,
            trend_window_days: 30,
            balance_window_days: 7,
            volatility_threshold: 0.10,
            slope_threshold: 0.01,
            trend_daily_delta: 0.5,
            rain_threshold_mm: 5.0,
            rain_gain_factor: 0.1,
            heat_threshold_c: 25.0,
            heat_loss_factor: 0.02,
            use_weather_forecast: false,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup; absent keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_defaults = ApiSettings::default();
        let data_defaults = DataSettings::default();
        let model_defaults = ModelSettings::default();

        let text = |key: &str, default: String| lookup(key).unwrap_or(default);
        let secs = |key: &str, default: Duration| {
            parsed::<u64, _>(&lookup, key)
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        let millis = |key: &str, default: Duration| {
            parsed::<u64, _>(&lookup, key)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };

        let api = ApiSettings {
            izsu_base_url: text("IZSU_BASE_URL", api_defaults.izsu_base_url),
            izsu_api_endpoint: api_defaults.izsu_api_endpoint,
            izsu_page_endpoint: api_defaults.izsu_page_endpoint,
            meteo_base_url: text("METEO_BASE_URL", api_defaults.meteo_base_url),
            meteo_endpoint: api_defaults.meteo_endpoint,
            mgm_base_url: text("MGM_BASE_URL", api_defaults.mgm_base_url),
            mgm_endpoint: api_defaults.mgm_endpoint,
            mgm_station_id: text("MGM_STATION_ID", api_defaults.mgm_station_id),
            openweather_base_url: text("OPENWEATHER_BASE_URL", api_defaults.openweather_base_url),
            openweather_api_key: lookup("OPENWEATHER_API_KEY").filter(|k| !k.trim().is_empty()),
            user_agent: text("USER_AGENT", api_defaults.user_agent),
            timeout: secs("API_TIMEOUT_SECS", api_defaults.timeout),
            max_retries: parsed(&lookup, "MAX_RETRIES").unwrap_or(api_defaults.max_retries),
            retry_delay: millis("RETRY_DELAY_MS", api_defaults.retry_delay),
            max_concurrent_requests: parsed(&lookup, "MAX_CONCURRENT_REQUESTS")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(api_defaults.max_concurrent_requests),
            request_pause: millis("REQUEST_PAUSE_MS", api_defaults.request_pause),
        };

        let data = DataSettings {
            cache_duration: secs("CACHE_DURATION_SECS", data_defaults.cache_duration),
            min_data_points: parsed(&lookup, "MIN_DATA_POINTS")
                .unwrap_or(data_defaults.min_data_points),
            max_missing_ratio: parsed(&lookup, "MAX_MISSING_RATIO")
                .unwrap_or(data_defaults.max_missing_ratio),
            default_days: parsed(&lookup, "DAYS").unwrap_or(data_defaults.default_days),
            synthetic_seed: parsed(&lookup, "SYNTHETIC_SEED")
                .unwrap_or(data_defaults.synthetic_seed),
        };

        let model = ModelSettings {
            prediction_days: parsed(&lookup, "PREDICTION_DAYS")
                .unwrap_or(model_defaults.prediction_days),
            use_weather_forecast: parsed(&lookup, "USE_WEATHER_FORECAST")
                .unwrap_or(model_defaults.use_weather_forecast),
            ..model_defaults
        };

        let catalog = match lookup("RESERVOIR_CATALOG") {
            Some(path) => match ReservoirCatalog::load(&path) {
                Ok(catalog) => {
                    tracing::info!("Loaded {} reservoirs from {}", catalog.len(), path);
                    catalog
                }
                Err(e) => {
                    tracing::warn!("{}; using built-in reservoir catalog", e);
                    ReservoirCatalog::default()
                }
            },
            None => ReservoirCatalog::default(),
        };

        Self {
            api,
            data,
            model,
            catalog,
        }
    }
}

/// Parse an optional variable, warning (and returning `None`) on garbage.
fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}='{}', using default", key, raw);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Reservoir catalog
// ---------------------------------------------------------------------------

/// Static attributes of a monitored reservoir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservoirSite {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub capacity_mcm: f64,
    pub district: String,
    pub water_source: String,
}

/// The set of reservoirs a run knows about, keyed by name.
///
/// Loaded from TOML as a list of `[[reservoir]]` tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservoirCatalog {
    #[serde(rename = "reservoir", default)]
    reservoirs: Vec<ReservoirSite>,
}

impl ReservoirCatalog {
    pub fn new(reservoirs: Vec<ReservoirSite>) -> Self {
        Self { reservoirs }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let catalog: ReservoirCatalog = toml::from_str(content)?;
        for site in &catalog.reservoirs {
            if !(site.capacity_mcm.is_finite() && site.capacity_mcm > 0.0) {
                return Err(ConfigError::InvalidEntry {
                    name: site.name.clone(),
                    reason: format!("capacity must be positive, got {}", site.capacity_mcm),
                });
            }
        }
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&ReservoirSite> {
        self.reservoirs.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.reservoirs.iter().map(|s| s.name.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReservoirSite> {
        self.reservoirs.iter()
    }

    pub fn len(&self) -> usize {
        self.reservoirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservoirs.is_empty()
    }
}

impl Default for ReservoirCatalog {
    /// The five İzmir supply reservoirs.
    fn default() -> Self {
        let site = |name: &str, lat, lon, cap, district: &str, source: &str| ReservoirSite {
            name: name.to_string(),
            latitude: lat,
            longitude: lon,
            capacity_mcm: cap,
            district: district.to_string(),
            water_source: source.to_string(),
        };
        Self::new(vec![
            site("Tahtalı", 38.3167, 27.15, 150.0, "Konak", "Tahtalı Deresi"),
            site("Balçova", 38.3833, 27.0167, 25.0, "Balçova", "Balçova Deresi"),
            site("Güzelhisar", 38.25, 27.1, 45.0, "Aliağa", "Güzelhisar Deresi"),
            site("Çamlı", 38.45, 27.2, 35.0, "Bornova", "Çamlı Deresi"),
            site("Gediz", 38.5, 27.3, 80.0, "Menemen", "Gediz Nehri"),
        ])
    }
}

// ---------------------------------------------------------------------------
// Weather stations
// ---------------------------------------------------------------------------

/// A ground weather station used to label observations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherStation {
    pub id: &'static str,
    pub name: &'static str,
    pub latitude: f64,
    pub longitude: f64,
}

/// Stations around İzmir.
pub const WEATHER_STATIONS: &[WeatherStation] = &[
    WeatherStation { id: "IZMIR_001", name: "İzmir Merkez", latitude: 38.4192, longitude: 27.1287 },
    WeatherStation { id: "IZMIR_002", name: "Çeşme", latitude: 38.3167, longitude: 26.3 },
    WeatherStation { id: "IZMIR_003", name: "Bergama", latitude: 39.1167, longitude: 27.1833 },
    WeatherStation { id: "IZMIR_004", name: "Menemen", latitude: 38.6, longitude: 27.0667 },
    WeatherStation { id: "IZMIR_005", name: "Tire", latitude: 38.0833, longitude: 27.7333 },
    WeatherStation { id: "IZMIR_006", name: "Ödemiş", latitude: 38.2167, longitude: 27.9667 },
    WeatherStation { id: "IZMIR_007", name: "Aliağa", latitude: 38.8, longitude: 26.9667 },
    WeatherStation { id: "IZMIR_008", name: "Bornova", latitude: 38.45, longitude: 27.2 },
];

/// Stations further than this are not considered representative.
pub const MAX_STATION_DISTANCE_KM: f64 = 50.0;

/// The closest station within [`MAX_STATION_DISTANCE_KM`], if any.
pub fn nearest_station(latitude: f64, longitude: f64) -> Option<&'static WeatherStation> {
    WEATHER_STATIONS
        .iter()
        .map(|s| (s, haversine_km(latitude, longitude, s.latitude, s.longitude)))
        .filter(|(_, d)| *d <= MAX_STATION_DISTANCE_KM)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(s, _)| s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let settings = Settings::from_lookup(|_| None);

        assert_eq!(settings.api.max_retries, 3);
        assert_eq!(settings.api.timeout, Duration::from_secs(30));
        assert_eq!(settings.api.retry_delay, Duration::from_secs(1));
        assert_eq!(settings.api.max_concurrent_requests, 4);
        assert_eq!(settings.data.cache_duration, Duration::from_secs(1800));
        assert_eq!(settings.data.min_data_points, 30);
        assert_eq!(settings.data.max_missing_ratio, 0.2);
        assert_eq!(settings.model.prediction_days, 30);
        assert_eq!(settings.model.volatility_threshold, 0.10);
        assert!(settings.api.openweather_api_key.is_none());
        assert_eq!(settings.catalog.len(), 5);
    }

    #[test]
    fn test_env_overrides() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("MAX_RETRIES", "5"),
            ("RETRY_DELAY_MS", "250"),
            ("CACHE_DURATION_SECS", "60"),
            ("OPENWEATHER_API_KEY", "abc"),
            ("USE_WEATHER_FORECAST", "true"),
            ("METEO_BASE_URL", "http://localhost:9999"),
        ]));

        assert_eq!(settings.api.max_retries, 5);
        assert_eq!(settings.api.retry_delay, Duration::from_millis(250));
        assert_eq!(settings.data.cache_duration, Duration::from_secs(60));
        assert_eq!(settings.api.openweather_api_key.as_deref(), Some("abc"));
        assert!(settings.model.use_weather_forecast);
        assert_eq!(settings.api.meteo_base_url, "http://localhost:9999");
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let settings = Settings::from_lookup(lookup_from(&[
            ("MAX_RETRIES", "many"),
            ("MAX_CONCURRENT_REQUESTS", "0"),
            ("OPENWEATHER_API_KEY", "  "),
        ]));
        assert_eq!(settings.api.max_retries, 3);
        assert_eq!(settings.api.max_concurrent_requests, 4);
        assert!(settings.api.openweather_api_key.is_none());
    }

    #[test]
    fn test_missing_catalog_file_falls_back() {
        let settings = Settings::from_lookup(lookup_from(&[(
            "RESERVOIR_CATALOG",
            "/definitely/not/here.toml",
        )]));
        assert_eq!(settings.catalog, ReservoirCatalog::default());
    }

    #[test]
    fn test_default_catalog() {
        let catalog = ReservoirCatalog::default();
        let tahtali = catalog.get("Tahtalı").unwrap();
        assert_eq!(tahtali.capacity_mcm, 150.0);
        assert_eq!(tahtali.district, "Konak");
        assert_eq!(
            catalog.names(),
            vec!["Tahtalı", "Balçova", "Güzelhisar", "Çamlı", "Gediz"]
        );
        assert!(catalog.get("Unknown").is_none());
    }

    #[test]
    fn test_catalog_from_toml() {
        let toml = r#"
            [[reservoir]]
            name = "Alpha"
            latitude = 38.0
            longitude = 27.0
            capacity_mcm = 100.0
            district = "North"
            water_source = "Alpha Creek"

            [[reservoir]]
            name = "Beta"
            latitude = 38.5
            longitude = 27.5
            capacity_mcm = 40.0
            district = "South"
            water_source = "Beta River"
        "#;
        let catalog = ReservoirCatalog::from_toml_str(toml).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("Beta").unwrap().capacity_mcm, 40.0);
    }

    #[test]
    fn test_catalog_rejects_zero_capacity() {
        let toml = r#"
            [[reservoir]]
            name = "Broken"
            latitude = 38.0
            longitude = 27.0
            capacity_mcm = 0.0
            district = "X"
            water_source = "Y"
        "#;
        let err = ReservoirCatalog::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEntry { .. }));
    }

    #[test]
    fn test_catalog_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.toml");
        std::fs::write(
            &path,
            "[[reservoir]]\nname = \"Solo\"\nlatitude = 1.0\nlongitude = 2.0\n\
             capacity_mcm = 10.0\ndistrict = \"D\"\nwater_source = \"W\"\n",
        )
        .unwrap();
        let catalog = ReservoirCatalog::load(&path).unwrap();
        assert_eq!(catalog.names(), vec!["Solo"]);
    }

    #[test]
    fn test_nearest_station_exact() {
        let s = nearest_station(38.45, 27.2).unwrap();
        assert_eq!(s.id, "IZMIR_008");
    }

    #[test]
    fn test_nearest_station_for_tahtali() {
        // Tahtalı lies south of the city centre
        let s = nearest_station(38.3167, 27.15).unwrap();
        assert_eq!(s.id, "IZMIR_001");
    }

    #[test]
    fn test_nearest_station_out_of_range() {
        assert!(nearest_station(41.0, 29.0).is_none());
    }
}
