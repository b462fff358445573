//! One analysis run: fetch, merge, populate, predict, report.

use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;

use crate::config::Settings;
use crate::errors::SourceError;
use crate::models::{ForecastDay, ReservoirRegistry};
use crate::services::cache::SharedCache;
use crate::services::data::{DataService, MergeOutcome};
use crate::services::report::{self, AnalysisReport, ReportInputs, SourcesReport};
use crate::services::sources::{weather, Category, DateWindow, FetchParams, SourceSelector};

/// Inbound description of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// Reservoir names; empty means the whole catalog.
    pub reservoirs: Vec<String>,
    pub window: DateWindow,
    pub reservoir_source: SourceSelector,
    pub weather_source: SourceSelector,
    /// Overrides `ModelSettings::prediction_days`.
    pub prediction_days: Option<u32>,
    /// Anchor for relative windows; today (UTC) when unset.
    pub as_of: Option<NaiveDate>,
}

impl RunRequest {
    /// Every catalog reservoir from the remote chains over `days` days.
    pub fn remote(days: u32) -> Self {
        Self {
            reservoirs: Vec::new(),
            window: DateWindow::Days(days),
            reservoir_source: SourceSelector::Api { provider: None },
            weather_source: SourceSelector::Api { provider: None },
            prediction_days: None,
            as_of: None,
        }
    }
}

/// Everything a run produced.
#[derive(Debug)]
pub struct RunOutput {
    pub report: AnalysisReport,
    pub merged: MergeOutcome,
    pub registry: ReservoirRegistry,
}

pub struct Pipeline {
    settings: Settings,
    service: DataService,
}

impl Pipeline {
    pub fn new(settings: Settings) -> Self {
        let service = DataService::new(&settings);
        Self { settings, service }
    }

    /// Share a cache across pipelines, e.g. between repeated runs.
    pub fn with_cache(mut self, cache: SharedCache) -> Self {
        self.service = self.service.with_cache(cache);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn data_service(&self) -> &DataService {
        &self.service
    }

    /// Run an analysis. Only a misconfigured local file source is an error;
    /// upstream failures degrade to fallback or empty data.
    pub async fn run(&mut self, request: &RunRequest) -> Result<RunOutput, SourceError> {
        self.service
            .set_source(Category::Reservoir, &request.reservoir_source)?;
        self.service
            .set_source(Category::Weather, &request.weather_source)?;

        let as_of = request.as_of.unwrap_or_else(|| Utc::now().date_naive());
        let params = FetchParams::new(request.reservoirs.clone(), request.window, as_of);
        let (start, end) = params.date_range();
        tracing::info!(
            "Starting run for {} reservoir(s), {} to {}",
            if params.entities.is_empty() {
                "all".to_string()
            } else {
                params.entities.len().to_string()
            },
            start,
            end
        );

        let reservoir = self.service.fetch(Category::Reservoir, &params).await;
        let weather = self.service.fetch(Category::Weather, &params).await;
        let merged = DataService::merge(&reservoir.table, &weather.table);

        let mut registry = ReservoirRegistry::new();
        let populate = match merged.table() {
            Some(t) => registry.populate(t, &self.settings.catalog, &self.settings.model),
            None => Default::default(),
        };

        let prediction_days = request
            .prediction_days
            .unwrap_or(self.settings.model.prediction_days);
        let forecasts = if self.settings.model.use_weather_forecast {
            self.fetch_forecasts(&registry, prediction_days).await
        } else {
            HashMap::new()
        };

        let sources = SourcesReport {
            data: self.service.summary().await,
            reservoir_origin: reservoir.origin.clone(),
            weather_origin: weather.origin.clone(),
            merged_rows: merged.table().map(|t| t.len()).unwrap_or(0),
            populate,
        };
        let report = report::assemble(
            &registry,
            ReportInputs {
                merged: merged.table(),
                weather: &weather.table,
                forecasts: &forecasts,
                prediction_days,
                sources,
                settings: &self.settings,
            },
        );

        Ok(RunOutput {
            report,
            merged,
            registry,
        })
    }

    /// Weather forecasts for every populated reservoir. A failed fetch
    /// leaves that reservoir on its trend-only prediction.
    async fn fetch_forecasts(
        &self,
        registry: &ReservoirRegistry,
        days: u32,
    ) -> HashMap<String, Vec<ForecastDay>> {
        let ctx = self.service.context();
        let fetched: Vec<(String, Result<Vec<ForecastDay>, SourceError>)> =
            stream::iter(registry.iter())
                .map(|r| async move {
                    let outcome = weather::fetch_forecast(ctx, r.site(), days).await;
                    (r.name().to_string(), outcome)
                })
                .buffered(ctx.api.max_concurrent_requests.max(1))
                .collect()
                .await;

        fetched
            .into_iter()
            .filter_map(|(name, outcome)| match outcome {
                Ok(days) if !days.is_empty() => Some((name, days)),
                Ok(_) => {
                    tracing::warn!("Empty weather forecast for {}", name);
                    None
                }
                Err(e) => {
                    tracing::warn!("Weather forecast for {} unavailable: {}", name, e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OverallStatus;

    fn synthetic_request(days: u32) -> RunRequest {
        RunRequest {
            reservoirs: vec!["Tahtalı".to_string(), "Gediz".to_string()],
            window: DateWindow::Days(days),
            reservoir_source: SourceSelector::Synthetic,
            weather_source: SourceSelector::Synthetic,
            prediction_days: Some(7),
            as_of: NaiveDate::from_ymd_opt(2026, 3, 31),
        }
    }

    #[tokio::test]
    async fn test_synthetic_run() {
        let mut pipeline = Pipeline::new(Settings::default());
        let out = tokio_test::assert_ok!(pipeline.run(&synthetic_request(29)).await);

        assert_eq!(out.merged.table().map(|t| t.len()), Some(60));
        assert_eq!(out.registry.len(), 2);
        assert_eq!(out.report.sources.populate.accepted, 60);
        assert_eq!(out.report.sources.reservoir_origin, "synthetic");
        assert_eq!(out.report.reservoirs["Gediz"].forecast.len(), 7);
        assert_eq!(out.report.data_quality.score, 100);
        assert!(out.report.weather_summary.is_some());
        match out.report.overall {
            OverallStatus::Summary { total, .. } => assert_eq!(total, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_is_deterministic() {
        let a = Pipeline::new(Settings::default())
            .run(&synthetic_request(10))
            .await
            .unwrap();
        let b = Pipeline::new(Settings::default())
            .run(&synthetic_request(10))
            .await
            .unwrap();
        assert_eq!(a.merged, b.merged);
        assert_eq!(a.report.reservoirs, b.report.reservoirs);
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let mut request = synthetic_request(5);
        request.reservoir_source = SourceSelector::File {
            path: "/nope/reservoirs.csv".into(),
        };
        let err = Pipeline::new(Settings::default())
            .run(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::SourceNotFound(_)));
    }

    #[test]
    fn test_remote_request_defaults() {
        let r = RunRequest::remote(14);
        assert_eq!(r.window, DateWindow::Days(14));
        assert!(r.reservoirs.is_empty());
        assert_eq!(r.weather_source, SourceSelector::Api { provider: None });
    }
}
