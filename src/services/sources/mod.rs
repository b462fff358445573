//! Source adapters: where reservoir and weather tables come from.
//!
//! Every adapter is bound to one [`Category`] and produces a [`TabularResult`]
//! with canonical column names. Remote adapters walk an ordered provider chain
//! and end with the synthetic generator, so a remote fetch always yields data.

pub mod file;
pub mod izsu;
pub mod synthetic;
pub mod weather;

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::path::PathBuf;

use crate::config::{ApiSettings, DataSettings, ReservoirCatalog};
use crate::errors::{SourceError, ValidationFailure};
use crate::services::http::RetryingHttpClient;
use crate::table::{self, Table};

pub use file::LocalFileSource;
pub use synthetic::SyntheticSource;

// ---------------------------------------------------------------------------
// Fetch parameters and results
// ---------------------------------------------------------------------------

/// The two kinds of data a run needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Reservoir,
    Weather,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Reservoir => "reservoir",
            Category::Weather => "weather",
        }
    }

    pub fn required_columns(self) -> &'static [&'static str] {
        match self {
            Category::Reservoir => &[table::DATE, table::RESERVOIR, table::FILL_RATIO],
            Category::Weather => &[
                table::DATE,
                table::RESERVOIR,
                table::TEMP_MAX,
                table::TEMP_MIN,
                table::PRECIPITATION,
            ],
        }
    }

    /// Column whose missing fraction decides whether a result is usable.
    pub fn quality_column(self) -> &'static str {
        match self {
            Category::Reservoir => table::FILL_RATIO,
            Category::Weather => table::PRECIPITATION,
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Category::Reservoir => table::RESERVOIR_COLUMNS,
            Category::Weather => table::WEATHER_COLUMNS,
        }
    }
}

/// Look-back window for a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateWindow {
    /// The `n` days up to and including `as_of`.
    Days(u32),
    Range { start: NaiveDate, end: NaiveDate },
}

impl DateWindow {
    /// Inclusive `(start, end)`; a reversed range is swapped.
    pub fn resolve(&self, as_of: NaiveDate) -> (NaiveDate, NaiveDate) {
        match *self {
            DateWindow::Days(n) => (as_of - Duration::days(i64::from(n)), as_of),
            DateWindow::Range { start, end } if start <= end => (start, end),
            DateWindow::Range { start, end } => (end, start),
        }
    }
}

/// What to fetch: which reservoirs, over which dates.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchParams {
    /// Reservoir names; empty means every reservoir the source knows.
    pub entities: Vec<String>,
    pub window: DateWindow,
    /// Anchor date for `DateWindow::Days`.
    pub as_of: NaiveDate,
}

impl FetchParams {
    pub fn new(entities: Vec<String>, window: DateWindow, as_of: NaiveDate) -> Self {
        Self {
            entities,
            window,
            as_of,
        }
    }

    pub fn date_range(&self) -> (NaiveDate, NaiveDate) {
        self.window.resolve(self.as_of)
    }

    /// Requested entities, or every catalog reservoir when none were named.
    pub fn entities_or_all(&self, catalog: &ReservoirCatalog) -> Vec<String> {
        if self.entities.is_empty() {
            catalog.names()
        } else {
            self.entities.clone()
        }
    }

    pub fn wants(&self, name: &str) -> bool {
        self.entities.is_empty() || self.entities.iter().any(|e| e == name)
    }
}

/// A fetched table with provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct TabularResult {
    pub table: Table,
    /// Records dropped because they could not be mapped.
    pub skipped: usize,
    /// Provider, file or generator that produced the table.
    pub origin: String,
}

impl TabularResult {
    pub fn new(table: Table, skipped: usize, origin: impl Into<String>) -> Self {
        Self {
            table,
            skipped,
            origin: origin.into(),
        }
    }

    pub fn empty(category: Category, origin: impl Into<String>) -> Self {
        Self::new(Table::with_columns(category.columns()), 0, origin)
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Thresholds applied by [`SourceAdapter::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationRules {
    pub max_missing_ratio: f64,
    /// Minimum row count, enforced for local files only.
    pub min_rows: Option<usize>,
}

impl ValidationRules {
    pub fn remote(data: &DataSettings) -> Self {
        Self {
            max_missing_ratio: data.max_missing_ratio,
            min_rows: None,
        }
    }

    pub fn local(data: &DataSettings) -> Self {
        Self {
            max_missing_ratio: data.max_missing_ratio,
            min_rows: Some(data.min_data_points),
        }
    }
}

/// Check a result against the schema and quality rules for `category`.
pub fn check(
    category: Category,
    result: &TabularResult,
    rules: &ValidationRules,
) -> Result<(), ValidationFailure> {
    let t = &result.table;
    if t.is_empty() {
        return Err(ValidationFailure::Empty);
    }

    let missing: Vec<String> = category
        .required_columns()
        .iter()
        .filter(|c| !t.has_column(c))
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ValidationFailure::MissingColumns(missing));
    }

    let column = category.quality_column();
    let ratio = t.missing_ratio(column);
    if ratio > rules.max_missing_ratio {
        return Err(ValidationFailure::TooManyMissing {
            column: column.to_string(),
            ratio,
            limit: rules.max_missing_ratio,
        });
    }

    if let Some(min) = rules.min_rows {
        if t.len() < min {
            return Err(ValidationFailure::TooFewRows { rows: t.len(), min });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Providers and remote chain
// ---------------------------------------------------------------------------

/// A concrete upstream API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// İZSU JSON endpoint.
    IzsuApi,
    /// İZSU public fill-ratio page.
    IzsuPage,
    OpenMeteo,
    /// Turkish State Meteorological Service station feed.
    Mgm,
    OpenWeather,
}

impl Provider {
    pub fn category(self) -> Category {
        match self {
            Provider::IzsuApi | Provider::IzsuPage => Category::Reservoir,
            Provider::OpenMeteo | Provider::Mgm | Provider::OpenWeather => Category::Weather,
        }
    }

    /// Default fallback order for a category.
    pub fn chain(category: Category) -> Vec<Provider> {
        match category {
            Category::Reservoir => vec![Provider::IzsuApi, Provider::IzsuPage],
            Category::Weather => vec![Provider::OpenMeteo, Provider::Mgm, Provider::OpenWeather],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::IzsuApi => "izsu_api",
            Provider::IzsuPage => "izsu_page",
            Provider::OpenMeteo => "open_meteo",
            Provider::Mgm => "mgm",
            Provider::OpenWeather => "openweather",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "izsu_api" | "izsu" => Ok(Provider::IzsuApi),
            "izsu_page" => Ok(Provider::IzsuPage),
            "open_meteo" | "meteo" => Ok(Provider::OpenMeteo),
            "mgm" => Ok(Provider::Mgm),
            "openweather" => Ok(Provider::OpenWeather),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Shared handles every remote provider needs.
#[derive(Debug, Clone)]
pub struct RemoteContext {
    pub http: RetryingHttpClient,
    pub api: ApiSettings,
    pub catalog: ReservoirCatalog,
}

/// Ordered provider chain for one category, ending in synthetic data.
#[derive(Debug, Clone)]
pub struct RemoteSource {
    category: Category,
    providers: Vec<Provider>,
    ctx: RemoteContext,
    rules: ValidationRules,
    synthetic: SyntheticSource,
}

impl RemoteSource {
    /// `start` moves a provider to the head of the chain; the rest keep
    /// their default order. A provider of the wrong category is ignored.
    pub fn new(
        category: Category,
        start: Option<Provider>,
        ctx: RemoteContext,
        data: &DataSettings,
    ) -> Self {
        let mut providers = Provider::chain(category);
        if let Some(first) = start {
            if first.category() == category {
                providers.retain(|p| *p != first);
                providers.insert(0, first);
            } else {
                tracing::warn!(
                    "Provider {} does not serve {} data, using default order",
                    first.as_str(),
                    category.as_str()
                );
            }
        }
        let synthetic = SyntheticSource::new(category, ctx.catalog.clone(), data.synthetic_seed)
            .with_rules(ValidationRules::remote(data));
        Self {
            category,
            providers,
            ctx,
            rules: ValidationRules::remote(data),
            synthetic,
        }
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// Try each provider in order; the first non-empty valid result wins.
    pub async fn fetch(&self, params: &FetchParams) -> Result<TabularResult, SourceError> {
        for provider in &self.providers {
            let outcome = match provider {
                Provider::IzsuApi => izsu::fetch_api(&self.ctx, params).await,
                Provider::IzsuPage => izsu::fetch_page(&self.ctx, params).await,
                Provider::OpenMeteo => weather::fetch_open_meteo(&self.ctx, params).await,
                Provider::Mgm => weather::fetch_mgm(&self.ctx, params).await,
                Provider::OpenWeather => weather::fetch_openweather(&self.ctx, params).await,
            };

            match outcome {
                Ok(result) => match check(self.category, &result, &self.rules) {
                    Ok(()) => {
                        tracing::info!(
                            "{} returned {} {} rows ({} skipped)",
                            provider.as_str(),
                            result.table.len(),
                            self.category.as_str(),
                            result.skipped
                        );
                        return Ok(result);
                    }
                    Err(reason) => {
                        tracing::warn!(
                            "{} result unusable ({}), trying next source",
                            provider.as_str(),
                            reason
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!("{} failed: {}, trying next source", provider.as_str(), e);
                }
            }
        }

        tracing::warn!(
            "All {} providers failed, generating synthetic data",
            self.category.as_str()
        );
        self.synthetic.fetch(params)
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// How a category is configured by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSelector {
    Api { provider: Option<Provider> },
    File { path: PathBuf },
    /// Generated data only, no network.
    Synthetic,
}

/// A configured source for one category.
#[derive(Debug, Clone)]
pub enum SourceAdapter {
    Remote(RemoteSource),
    LocalFile(LocalFileSource),
    Synthetic(SyntheticSource),
}

impl SourceAdapter {
    /// Build from a selector. Only a missing local file is an error.
    pub fn from_selector(
        category: Category,
        selector: &SourceSelector,
        ctx: RemoteContext,
        data: &DataSettings,
    ) -> Result<Self, SourceError> {
        match selector {
            SourceSelector::Api { provider } => Ok(SourceAdapter::Remote(RemoteSource::new(
                category, *provider, ctx, data,
            ))),
            SourceSelector::File { path } => Ok(SourceAdapter::LocalFile(LocalFileSource::new(
                category,
                path,
                ValidationRules::local(data),
            )?)),
            SourceSelector::Synthetic => Ok(SourceAdapter::Synthetic(
                SyntheticSource::new(category, ctx.catalog, data.synthetic_seed)
                    .with_rules(ValidationRules::remote(data)),
            )),
        }
    }

    pub fn category(&self) -> Category {
        match self {
            SourceAdapter::Remote(s) => s.category,
            SourceAdapter::LocalFile(s) => s.category(),
            SourceAdapter::Synthetic(s) => s.category(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceAdapter::Remote(_) => "api",
            SourceAdapter::LocalFile(_) => "file",
            SourceAdapter::Synthetic(_) => "synthetic",
        }
    }

    /// Source-specific parameters that distinguish otherwise equal fetches.
    pub fn extras(&self) -> String {
        match self {
            SourceAdapter::Remote(s) => s
                .providers
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(">"),
            SourceAdapter::LocalFile(s) => s.path().display().to_string(),
            SourceAdapter::Synthetic(s) => format!("seed={}", s.seed()),
        }
    }

    pub async fn fetch(&self, params: &FetchParams) -> Result<TabularResult, SourceError> {
        match self {
            SourceAdapter::Remote(s) => s.fetch(params).await,
            SourceAdapter::LocalFile(s) => s.fetch(params),
            SourceAdapter::Synthetic(s) => s.fetch(params),
        }
    }

    pub fn validate(&self, result: &TabularResult) -> bool {
        self.check(result).is_ok()
    }

    pub fn check(&self, result: &TabularResult) -> Result<(), ValidationFailure> {
        match self {
            SourceAdapter::Remote(s) => check(s.category, result, &s.rules),
            SourceAdapter::LocalFile(s) => check(s.category(), result, s.rules()),
            SourceAdapter::Synthetic(s) => check(s.category(), result, s.rules()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn reservoir_result(rows: usize, missing_every: Option<usize>) -> TabularResult {
        let mut t = Table::with_columns(table::RESERVOIR_COLUMNS);
        for i in 0..rows {
            let ratio = match missing_every {
                Some(k) if i % k == 0 => Cell::Missing,
                _ => Cell::Number(0.5),
            };
            t.push_row(vec![
                Cell::Date(d(2026, 1, 1) + Duration::days(i as i64)),
                Cell::text("A"),
                Cell::Number(50.0),
                Cell::Number(100.0),
                ratio,
            ]);
        }
        TabularResult::new(t, 0, "test")
    }

    fn remote_rules() -> ValidationRules {
        ValidationRules {
            max_missing_ratio: 0.2,
            min_rows: None,
        }
    }

    #[test]
    fn test_date_window_days() {
        let (start, end) = DateWindow::Days(30).resolve(d(2026, 3, 31));
        assert_eq!(start, d(2026, 3, 1));
        assert_eq!(end, d(2026, 3, 31));
    }

    #[test]
    fn test_date_window_reversed_range() {
        let w = DateWindow::Range {
            start: d(2026, 2, 1),
            end: d(2026, 1, 1),
        };
        assert_eq!(w.resolve(d(2030, 1, 1)), (d(2026, 1, 1), d(2026, 2, 1)));
    }

    #[test]
    fn test_check_accepts_good_table() {
        assert!(check(Category::Reservoir, &reservoir_result(5, None), &remote_rules()).is_ok());
    }

    #[test]
    fn test_check_empty() {
        let empty = TabularResult::empty(Category::Reservoir, "test");
        assert_eq!(
            check(Category::Reservoir, &empty, &remote_rules()),
            Err(ValidationFailure::Empty)
        );
    }

    #[test]
    fn test_check_missing_columns() {
        let mut t = Table::with_columns(&[table::DATE, table::RESERVOIR]);
        t.push_row(vec![Cell::Date(d(2026, 1, 1)), Cell::text("A")]);
        let err = check(Category::Reservoir, &TabularResult::new(t, 0, "x"), &remote_rules())
            .unwrap_err();
        assert_eq!(
            err,
            ValidationFailure::MissingColumns(vec![table::FILL_RATIO.to_string()])
        );
    }

    #[test]
    fn test_check_too_many_missing() {
        // every 2nd row missing → 50%
        let err = check(Category::Reservoir, &reservoir_result(10, Some(2)), &remote_rules())
            .unwrap_err();
        assert!(matches!(err, ValidationFailure::TooManyMissing { .. }));

        // every 5th row missing → exactly 20%, allowed
        assert!(check(Category::Reservoir, &reservoir_result(10, Some(5)), &remote_rules()).is_ok());
    }

    #[test]
    fn test_check_min_rows_for_local() {
        let rules = ValidationRules::local(&DataSettings::default());
        let err = check(Category::Reservoir, &reservoir_result(10, None), &rules).unwrap_err();
        assert_eq!(err, ValidationFailure::TooFewRows { rows: 10, min: 30 });
        assert!(check(Category::Reservoir, &reservoir_result(30, None), &rules).is_ok());
    }

    #[test]
    fn test_provider_parse() {
        assert_eq!("open-meteo".parse::<Provider>(), Ok(Provider::OpenMeteo));
        assert_eq!("IZSU".parse::<Provider>(), Ok(Provider::IzsuApi));
        assert!("nope".parse::<Provider>().is_err());
    }

    #[test]
    fn test_remote_source_reorders_chain() {
        let ctx = RemoteContext {
            http: RetryingHttpClient::from_settings(&ApiSettings::default()),
            api: ApiSettings::default(),
            catalog: ReservoirCatalog::default(),
        };
        let data = DataSettings::default();

        let s = RemoteSource::new(Category::Weather, Some(Provider::Mgm), ctx.clone(), &data);
        assert_eq!(
            s.providers(),
            &[Provider::Mgm, Provider::OpenMeteo, Provider::OpenWeather]
        );

        let s = RemoteSource::new(Category::Reservoir, Some(Provider::Mgm), ctx, &data);
        assert_eq!(s.providers(), &[Provider::IzsuApi, Provider::IzsuPage]);
    }

    #[test]
    fn test_synthetic_selector_uses_configured_rules() {
        let ctx = RemoteContext {
            http: RetryingHttpClient::from_settings(&ApiSettings::default()),
            api: ApiSettings::default(),
            catalog: ReservoirCatalog::default(),
        };
        let data = DataSettings {
            max_missing_ratio: 0.6,
            ..DataSettings::default()
        };
        let adapter =
            SourceAdapter::from_selector(Category::Reservoir, &SourceSelector::Synthetic, ctx, &data)
                .unwrap();

        // Half the fill ratios missing: over the default 0.2, under 0.6
        let result = reservoir_result(10, Some(2));
        assert!(adapter.validate(&result));
        assert!(!adapter.validate(&reservoir_result(10, Some(1))));
    }

    #[test]
    fn test_file_selector_missing_path() {
        let ctx = RemoteContext {
            http: RetryingHttpClient::from_settings(&ApiSettings::default()),
            api: ApiSettings::default(),
            catalog: ReservoirCatalog::default(),
        };
        let err = SourceAdapter::from_selector(
            Category::Reservoir,
            &SourceSelector::File {
                path: PathBuf::from("/no/such/file.csv"),
            },
            ctx,
            &DataSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::SourceNotFound(_)));
    }
}
