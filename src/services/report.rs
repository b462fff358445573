//! Analysis report assembled from a populated registry.
//!
//! The report is plain data; serialising or storing it is up to the caller.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::{DataSettings, Settings};
use crate::helpers::round_dp;
use crate::models::{
    DroughtLevel, ForecastDay, OverallStatus, PopulateReport, PredictionPoint, Reservoir,
    ReservoirReading, ReservoirRegistry, ReservoirSummary, Trend, WaterBalance, WeatherReading,
};
use crate::services::data::DataSummary;
use crate::table::{self, Table};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub reservoirs: BTreeMap<String, ReservoirAnalysis>,
    pub overall: OverallStatus,
    pub alerts: Vec<Alert>,
    pub data_quality: DataQuality,
    pub weather_summary: Option<WeatherSummary>,
    pub sources: SourcesReport,
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservoirAnalysis {
    pub current_status: Option<ReservoirReading>,
    pub drought_level: DroughtLevel,
    pub trend: Trend,
    pub water_balance: WaterBalance,
    pub forecast: Vec<PredictionPoint>,
    /// True when the forecast was driven by a weather forecast.
    pub weather_driven: bool,
    pub summary: ReservoirSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    CriticalDrought,
    SevereDrought,
    DecliningTrend,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub reservoir: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataQuality {
    /// 0 to 100.
    pub score: u32,
    pub issues: Vec<String>,
    pub total_records: usize,
    pub missing_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl Stats {
    fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            mean: round_dp(mean, 2),
            min: round_dp(min, 2),
            max: round_dp(max, 2),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureSummary {
    pub avg_max_c: Option<f64>,
    pub avg_min_c: Option<f64>,
    pub max_recorded_c: Option<f64>,
    pub min_recorded_c: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrecipitationSummary {
    pub total_mm: f64,
    pub avg_daily_mm: f64,
    pub max_daily_mm: f64,
    pub rainy_days: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherSummary {
    pub total_days: usize,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub temperature: TemperatureSummary,
    pub precipitation: PrecipitationSummary,
    pub humidity_pct: Option<Stats>,
    pub pressure_hpa: Option<Stats>,
}

/// Provenance of the data behind a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcesReport {
    pub data: DataSummary,
    pub reservoir_origin: String,
    pub weather_origin: String,
    pub merged_rows: usize,
    pub populate: PopulateReport,
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Everything the report needs besides the registry.
pub struct ReportInputs<'a> {
    /// `None` when the merge produced no rows.
    pub merged: Option<&'a Table>,
    pub weather: &'a Table,
    /// Per-reservoir weather forecasts, when fetched.
    pub forecasts: &'a HashMap<String, Vec<ForecastDay>>,
    pub prediction_days: u32,
    pub sources: SourcesReport,
    pub settings: &'a Settings,
}

pub fn assemble(registry: &ReservoirRegistry, inputs: ReportInputs<'_>) -> AnalysisReport {
    let model = &inputs.settings.model;
    let reservoirs = registry
        .iter()
        .map(|r| {
            let forecast = inputs.forecasts.get(r.name()).map(Vec::as_slice);
            let points = r.predict(inputs.prediction_days, forecast);
            // Only counts when some forecast day lands inside the prediction
            let weather_driven = forecast.is_some_and(|f| {
                points.iter().any(|p| f.iter().any(|w| w.date == p.date))
            });
            (
                r.name().to_string(),
                ReservoirAnalysis {
                    current_status: r.current_status().cloned(),
                    drought_level: r.drought_level(),
                    trend: r.trend(),
                    water_balance: r.water_balance(model.balance_window_days),
                    forecast: points,
                    weather_driven,
                    summary: r.summary(),
                },
            )
        })
        .collect();

    let empty = Table::default();
    let report = AnalysisReport {
        generated_at: Utc::now(),
        reservoirs,
        overall: registry.overall_status(),
        alerts: alerts(registry),
        data_quality: data_quality(inputs.merged.unwrap_or(&empty), &inputs.settings.data),
        weather_summary: weather_summary(inputs.weather),
        sources: inputs.sources,
        settings: inputs.settings.clone(),
    };
    tracing::info!(
        "Report ready: {} reservoirs, {} alerts, quality {}/100",
        report.reservoirs.len(),
        report.alerts.len(),
        report.data_quality.score
    );
    report
}

/// Drought and trend alerts, one reservoir at a time.
pub fn alerts(registry: &ReservoirRegistry) -> Vec<Alert> {
    registry.iter().flat_map(reservoir_alerts).collect()
}

fn reservoir_alerts(reservoir: &Reservoir) -> Vec<Alert> {
    let Some(latest) = reservoir.current_status() else {
        return Vec::new();
    };
    let name = reservoir.name().to_string();
    let pct = latest.fill_ratio() * 100.0;
    let mut out = Vec::new();

    match reservoir.drought_level() {
        DroughtLevel::Critical => out.push(Alert {
            kind: AlertKind::CriticalDrought,
            reservoir: name.clone(),
            severity: AlertSeverity::High,
            message: format!("{} is at a critical level, fill ratio {:.1}%", name, pct),
            date: latest.date(),
        }),
        DroughtLevel::Severe => out.push(Alert {
            kind: AlertKind::SevereDrought,
            reservoir: name.clone(),
            severity: AlertSeverity::Medium,
            message: format!("{} is in severe drought, fill ratio {:.1}%", name, pct),
            date: latest.date(),
        }),
        _ => {}
    }

    if reservoir.trend() == Trend::Decreasing {
        out.push(Alert {
            kind: AlertKind::DecliningTrend,
            reservoir: name.clone(),
            severity: AlertSeverity::Low,
            message: format!("{} shows a declining trend", name),
            date: latest.date(),
        });
    }
    out
}

/// Score the merged dataset out of 100.
pub fn data_quality(merged: &Table, data: &DataSettings) -> DataQuality {
    if merged.is_empty() {
        return DataQuality {
            score: 0,
            issues: vec!["No merged data".to_string()],
            total_records: 0,
            missing_ratio: 0.0,
        };
    }

    let mut score: i32 = 100;
    let mut issues = Vec::new();

    let missing_ratio = merged.overall_missing_ratio();
    if missing_ratio > data.max_missing_ratio {
        issues.push(format!("High missing-value ratio: {:.1}%", missing_ratio * 100.0));
        score -= 20;
    }

    let invalid = merged
        .numbers(table::FILL_RATIO)
        .into_iter()
        .filter(|r| !(0.0..=1.0).contains(r))
        .count();
    if invalid > 0 {
        issues.push(format!("Invalid fill ratios: {} records", invalid));
        score -= 15;
    }

    if merged.len() < data.min_data_points {
        issues.push(format!(
            "Insufficient data: {} rows, {} required",
            merged.len(),
            data.min_data_points
        ));
        score -= 25;
    }

    DataQuality {
        score: score.max(0) as u32,
        issues,
        total_records: merged.len(),
        missing_ratio: round_dp(missing_ratio, 4),
    }
}

/// Aggregate statistics over the weather rows; `None` when there are none.
pub fn weather_summary(weather: &Table) -> Option<WeatherSummary> {
    let readings: Vec<WeatherReading> = weather
        .rows()
        .filter_map(|row| WeatherReading::from_row(row).ok())
        .collect();
    if readings.is_empty() {
        return None;
    }

    let dates: BTreeSet<NaiveDate> = readings.iter().map(|r| r.date).collect();
    let (start, end) = (*dates.first()?, *dates.last()?);

    let collect = |f: fn(&WeatherReading) -> Option<f64>| -> Vec<f64> {
        readings.iter().filter_map(f).collect()
    };
    let t_max = Stats::of(&collect(|r| r.temp_max_c));
    let t_min = Stats::of(&collect(|r| r.temp_min_c));
    let rain: Vec<f64> = readings.iter().map(|r| r.precipitation_mm).collect();
    let rain_stats = Stats::of(&rain)?;

    Some(WeatherSummary {
        total_days: dates.len(),
        start,
        end,
        temperature: TemperatureSummary {
            avg_max_c: t_max.as_ref().map(|s| s.mean),
            avg_min_c: t_min.as_ref().map(|s| s.mean),
            max_recorded_c: t_max.as_ref().map(|s| s.max),
            min_recorded_c: t_min.as_ref().map(|s| s.min),
        },
        precipitation: PrecipitationSummary {
            total_mm: round_dp(rain.iter().sum(), 2),
            avg_daily_mm: rain_stats.mean,
            max_daily_mm: rain_stats.max,
            rainy_days: rain.iter().filter(|p| **p > 0.0).count(),
        },
        humidity_pct: Stats::of(&collect(|r| r.humidity_pct)),
        pressure_hpa: Stats::of(&collect(|r| r.pressure_hpa)),
    })
}
