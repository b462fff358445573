//! Data acquisition: cached, validated fetches per category and the
//! reservoir/weather merge.

use serde::Serialize;

use crate::config::{DataSettings, Settings};
use crate::errors::SourceError;
use crate::services::cache::{Fingerprint, ReconciliationCache, SharedCache};
use crate::services::http::RetryingHttpClient;
use crate::services::sources::{
    Category, FetchParams, RemoteContext, RemoteSource, SourceAdapter, SourceSelector,
    TabularResult,
};
use crate::table::{self, inner_join, Cell, Table};

/// Upper clip of the daily evaporation estimate (mm).
const MAX_EVAPORATION_MM: f64 = 10.0;

/// Result of joining reservoir and weather rows.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged(Table),
    /// No (date, reservoir) pair exists on both sides.
    Empty,
}

impl MergeOutcome {
    pub fn table(&self) -> Option<&Table> {
        match self {
            MergeOutcome::Merged(t) => Some(t),
            MergeOutcome::Empty => None,
        }
    }
}

/// Where each category currently comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSummary {
    pub reservoir_source: &'static str,
    pub reservoir_detail: String,
    pub weather_source: &'static str,
    pub weather_detail: String,
    pub cache_entries: usize,
    pub cache_ttl_secs: u64,
}

pub struct DataService {
    ctx: RemoteContext,
    data: DataSettings,
    reservoir: SourceAdapter,
    weather: SourceAdapter,
    cache: SharedCache,
}

impl DataService {
    /// Both categories start on their remote provider chains.
    pub fn new(settings: &Settings) -> Self {
        let ctx = RemoteContext {
            http: RetryingHttpClient::from_settings(&settings.api),
            api: settings.api.clone(),
            catalog: settings.catalog.clone(),
        };
        let remote = |category| {
            SourceAdapter::Remote(RemoteSource::new(category, None, ctx.clone(), &settings.data))
        };
        Self {
            reservoir: remote(Category::Reservoir),
            weather: remote(Category::Weather),
            cache: ReconciliationCache::shared(settings.data.cache_duration),
            data: settings.data.clone(),
            ctx,
        }
    }

    /// Use an existing cache instead of a private one.
    pub fn with_cache(mut self, cache: SharedCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn context(&self) -> &RemoteContext {
        &self.ctx
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn source(&self, category: Category) -> &SourceAdapter {
        match category {
            Category::Reservoir => &self.reservoir,
            Category::Weather => &self.weather,
        }
    }

    /// Replace the source for one category. Fails only for a missing or
    /// unsupported local file, leaving the previous source in place.
    pub fn set_source(
        &mut self,
        category: Category,
        selector: &SourceSelector,
    ) -> Result<(), SourceError> {
        let adapter = SourceAdapter::from_selector(category, selector, self.ctx.clone(), &self.data)?;
        tracing::info!(
            "{} data source set to {} ({})",
            category.as_str(),
            adapter.kind(),
            adapter.extras()
        );
        match category {
            Category::Reservoir => self.reservoir = adapter,
            Category::Weather => self.weather = adapter,
        }
        Ok(())
    }

    /// Fetch through the cache. Errors and results that fail validation are
    /// logged and come back as an empty table, so callers always get data.
    pub async fn fetch(&self, category: Category, params: &FetchParams) -> TabularResult {
        let adapter = self.source(category);
        let key = Fingerprint::new(category, adapter.kind(), params, &adapter.extras());

        if let Some(hit) = self.cache.get(&key).await {
            tracing::debug!("Cache hit for {} data ({} rows)", category.as_str(), hit.table.len());
            return hit;
        }

        let result = match adapter.fetch(params).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Fetching {} data failed: {}", category.as_str(), e);
                return TabularResult::empty(category, adapter.kind());
            }
        };

        if let Err(reason) = adapter.check(&result) {
            tracing::warn!(
                "{} data from {} failed quality check: {}",
                category.as_str(),
                result.origin,
                reason
            );
            return TabularResult::empty(category, result.origin);
        }

        tracing::info!(
            "Fetched {} {} rows from {}",
            result.table.len(),
            category.as_str(),
            result.origin
        );
        self.cache.put(key, result.clone()).await;
        result
    }

    /// Inner join on (date, reservoir) plus the evaporation estimate column.
    pub fn merge(reservoir: &Table, weather: &Table) -> MergeOutcome {
        let mut merged = inner_join(reservoir, weather);
        if merged.is_empty() {
            tracing::warn!(
                "No overlapping rows between {} reservoir and {} weather rows",
                reservoir.len(),
                weather.len()
            );
            return MergeOutcome::Empty;
        }

        merged.add_column(table::EVAPORATION_ESTIMATE, |row| {
            Cell::number(evaporation_estimate(
                row.number(table::TEMP_MAX),
                row.number(table::TEMP_MIN),
                row.number(table::HUMIDITY),
                row.number(table::WIND_SPEED),
            ))
        });
        tracing::info!("Merged dataset has {} rows", merged.len());
        MergeOutcome::Merged(merged)
    }

    pub async fn summary(&self) -> DataSummary {
        DataSummary {
            reservoir_source: self.reservoir.kind(),
            reservoir_detail: self.reservoir.extras(),
            weather_source: self.weather.kind(),
            weather_detail: self.weather.extras(),
            cache_entries: self.cache.len().await,
            cache_ttl_secs: self.cache.ttl().as_secs(),
        }
    }
}

/// Daily open-water evaporation (mm), a rough empirical estimate from mean
/// temperature, relative humidity and wind, clipped to `[0, 10]`.
pub fn evaporation_estimate(
    temp_max: Option<f64>,
    temp_min: Option<f64>,
    humidity_pct: Option<f64>,
    wind_speed: Option<f64>,
) -> Option<f64> {
    let t_avg = (temp_max? + temp_min?) / 2.0;
    let raw = (t_avg - 10.0) * (1.0 - humidity_pct? / 100.0) * (1.0 + wind_speed? / 10.0) * 0.1;
    Some(raw.clamp(0.0, MAX_EVAPORATION_MM))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sources::{DateWindow, SourceSelector};
    use chrono::NaiveDate;
    use std::io::Write;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn params(entities: &[&str]) -> FetchParams {
        FetchParams::new(
            entities.iter().map(|e| e.to_string()).collect(),
            DateWindow::Days(4),
            d(31),
        )
    }

    fn synthetic_service() -> DataService {
        let mut service = DataService::new(&Settings::default());
        service
            .set_source(Category::Reservoir, &SourceSelector::Synthetic)
            .unwrap();
        service
            .set_source(Category::Weather, &SourceSelector::Synthetic)
            .unwrap();
        service
    }

    #[test]
    fn test_evaporation_estimate() {
        // t_avg 30, h 50, w 10 → 20 * 0.5 * 2 * 0.1 = 2
        let e = evaporation_estimate(Some(35.0), Some(25.0), Some(50.0), Some(10.0)).unwrap();
        assert!((e - 2.0).abs() < 1e-9);
        // cold days clip to 0
        assert_eq!(evaporation_estimate(Some(5.0), Some(1.0), Some(50.0), Some(0.0)), Some(0.0));
        // extreme heat clips to 10
        assert_eq!(
            evaporation_estimate(Some(60.0), Some(60.0), Some(0.0), Some(100.0)),
            Some(MAX_EVAPORATION_MM)
        );
        assert_eq!(evaporation_estimate(Some(30.0), None, Some(50.0), Some(1.0)), None);
    }

    #[tokio::test]
    async fn test_fetch_caches_valid_result() {
        let service = synthetic_service();
        let first = service.fetch(Category::Reservoir, &params(&["Tahtalı"])).await;
        assert_eq!(first.table.len(), 5);
        assert_eq!(service.cache().len().await, 1);

        let second = service.fetch(Category::Reservoir, &params(&["Tahtalı"])).await;
        assert_eq!(first, second);
        assert_eq!(service.cache().len().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_file_yields_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.csv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "date,reservoir,fill_ratio").unwrap();
        writeln!(f, "2026-03-30,Tahtalı,0.5").unwrap();
        writeln!(f, "2026-03-31,Tahtalı,0.49").unwrap();

        let mut service = DataService::new(&Settings::default());
        service
            .set_source(Category::Reservoir, &SourceSelector::File { path })
            .unwrap();
        let result = service.fetch(Category::Reservoir, &params(&[])).await;
        assert!(result.is_empty());
        assert!(service.cache().is_empty().await);
    }

    #[test]
    fn test_set_source_keeps_previous_on_error() {
        let mut service = DataService::new(&Settings::default());
        let err = service.set_source(
            Category::Weather,
            &SourceSelector::File {
                path: "/missing/weather.csv".into(),
            },
        );
        tokio_test::assert_err!(err);
        assert_eq!(service.source(Category::Weather).kind(), "api");
    }

    #[tokio::test]
    async fn test_merge_adds_evaporation_estimate() {
        let service = synthetic_service();
        let reservoir = service.fetch(Category::Reservoir, &params(&["Gediz"])).await;
        let weather = service.fetch(Category::Weather, &params(&["Gediz"])).await;

        let MergeOutcome::Merged(merged) = DataService::merge(&reservoir.table, &weather.table) else {
            panic!("expected merged rows");
        };
        assert_eq!(merged.len(), 5);
        assert!(merged.has_column(table::EVAPORATION_ESTIMATE));
        assert!(merged.has_column(table::STATION));
        for e in merged.numbers(table::EVAPORATION_ESTIMATE) {
            assert!((0.0..=MAX_EVAPORATION_MM).contains(&e));
        }
    }

    #[tokio::test]
    async fn test_merge_without_overlap_is_empty() {
        let service = synthetic_service();
        let reservoir = service.fetch(Category::Reservoir, &params(&["Gediz"])).await;
        let weather = service.fetch(Category::Weather, &params(&["Balçova"])).await;
        assert_eq!(
            DataService::merge(&reservoir.table, &weather.table),
            MergeOutcome::Empty
        );
    }

    #[tokio::test]
    async fn test_summary() {
        let service = synthetic_service();
        service.fetch(Category::Weather, &params(&[])).await;
        let summary = service.summary().await;
        assert_eq!(summary.reservoir_source, "synthetic");
        assert_eq!(summary.weather_detail, "seed=42");
        assert_eq!(summary.cache_entries, 1);
        assert_eq!(summary.cache_ttl_secs, 1800);
    }
}
