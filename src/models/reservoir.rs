//! A single reservoir and the heuristics computed from its history.
//!
//! Drought level and trend are recomputed from the readings on every call;
//! nothing is cached on the struct. Trend and water-balance windows are
//! anchored at the latest reading date so results do not depend on the clock.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::config::{ModelSettings, ReservoirSite};
use crate::helpers::round_dp;
use crate::models::reading::{ForecastDay, ReservoirReading};

/// Slack on threshold comparisons so exact-boundary series are not flipped by
/// floating-point noise.
const THRESHOLD_EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Classifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DroughtLevel {
    Normal,
    Warning,
    Moderate,
    Severe,
    Critical,
}

impl DroughtLevel {
    pub const ALL: [DroughtLevel; 5] = [
        DroughtLevel::Normal,
        DroughtLevel::Warning,
        DroughtLevel::Moderate,
        DroughtLevel::Severe,
        DroughtLevel::Critical,
    ];

    /// Classify a fill ratio; each boundary belongs to the milder level.
    pub fn from_fill_ratio(ratio: f64) -> Self {
        if ratio >= 0.8 {
            DroughtLevel::Normal
        } else if ratio >= 0.6 {
            DroughtLevel::Warning
        } else if ratio >= 0.4 {
            DroughtLevel::Moderate
        } else if ratio >= 0.2 {
            DroughtLevel::Severe
        } else {
            DroughtLevel::Critical
        }
    }

    /// Severe or Critical.
    pub fn is_at_risk(self) -> bool {
        matches!(self, DroughtLevel::Severe | DroughtLevel::Critical)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DroughtLevel::Normal => "normal",
            DroughtLevel::Warning => "warning",
            DroughtLevel::Moderate => "moderate",
            DroughtLevel::Severe => "severe",
            DroughtLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    Volatile,
}

/// Net storage change over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WaterBalance {
    Computed {
        total_inflow_mcm: f64,
        total_outflow_mcm: f64,
        total_evaporation_mcm: f64,
        net_change_mcm: f64,
        period_days: u32,
    },
    /// Fewer than two readings fell in the window.
    InsufficientData { period_days: u32, readings: usize },
}

/// One simulated day of [`Reservoir::predict`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionPoint {
    pub date: NaiveDate,
    pub predicted_volume_mcm: f64,
    pub predicted_fill_ratio: f64,
    pub drought_level: DroughtLevel,
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservoirSummary {
    pub name: String,
    pub location: LocationBlock,
    pub capacity: CapacityBlock,
    pub status: StatusBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationBlock {
    pub latitude: f64,
    pub longitude: f64,
    pub district: String,
    pub water_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapacityBlock {
    pub total_capacity_mcm: f64,
    pub current_volume_mcm: Option<f64>,
    pub fill_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusBlock {
    pub drought_level: DroughtLevel,
    pub trend: Trend,
    pub data_points: usize,
}

// ---------------------------------------------------------------------------
// Reservoir
// ---------------------------------------------------------------------------

/// A reservoir with its date-ordered reading history.
#[derive(Debug, Clone)]
pub struct Reservoir {
    site: ReservoirSite,
    readings: Vec<ReservoirReading>,
    model: ModelSettings,
}

impl Reservoir {
    pub fn new(site: ReservoirSite, model: ModelSettings) -> Self {
        Self {
            site,
            readings: Vec::new(),
            model,
        }
    }

    pub fn name(&self) -> &str {
        &self.site.name
    }

    pub fn site(&self) -> &ReservoirSite {
        &self.site
    }

    pub fn readings(&self) -> &[ReservoirReading] {
        &self.readings
    }

    /// Insert a reading, keeping the history sorted ascending by date.
    ///
    /// Readings with equal dates keep their insertion order.
    pub fn add_reading(&mut self, reading: ReservoirReading) {
        let pos = self
            .readings
            .partition_point(|r| r.date() <= reading.date());
        self.readings.insert(pos, reading);
    }

    /// The most recent reading.
    pub fn current_status(&self) -> Option<&ReservoirReading> {
        self.readings.last()
    }

    /// Drought level from the latest fill ratio (`Normal` without readings).
    pub fn drought_level(&self) -> DroughtLevel {
        self.current_status()
            .map(|r| DroughtLevel::from_fill_ratio(r.fill_ratio()))
            .unwrap_or(DroughtLevel::Normal)
    }

    /// Readings dated within `window_days` of the latest one (inclusive).
    fn window(&self, window_days: u32) -> &[ReservoirReading] {
        let Some(latest) = self.current_status() else {
            return &[];
        };
        let start = latest.date() - Duration::days(i64::from(window_days));
        let first = self.readings.partition_point(|r| r.date() < start);
        &self.readings[first..]
    }

    /// Classify the fill-ratio trend over the trailing window.
    ///
    /// Volatility is checked before slope: a series that trends but swings
    /// more than the volatility threshold is `Volatile`.
    pub fn calculate_trend(&self, window_days: u32) -> Trend {
        let ratios: Vec<f64> = self
            .window(window_days)
            .iter()
            .map(|r| r.fill_ratio())
            .collect();
        if ratios.len() < 2 {
            return Trend::Stable;
        }

        let (slope, std_dev) = slope_and_std(&ratios);

        if std_dev > self.model.volatility_threshold + THRESHOLD_EPSILON {
            Trend::Volatile
        } else if slope > self.model.slope_threshold + THRESHOLD_EPSILON {
            Trend::Increasing
        } else if slope < -self.model.slope_threshold - THRESHOLD_EPSILON {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    /// Trend over the configured default window.
    pub fn trend(&self) -> Trend {
        self.calculate_trend(self.model.trend_window_days)
    }

    /// Sum flows over the trailing window; missing components count as zero.
    ///
    /// A window where no reading reports any flow is insufficient data.
    pub fn water_balance(&self, window_days: u32) -> WaterBalance {
        let recent = self.window(window_days);
        let has_flows = recent.iter().any(|r| {
            r.inflow_mcm().is_some() || r.outflow_mcm().is_some() || r.evaporation_mcm().is_some()
        });
        if recent.len() < 2 || !has_flows {
            return WaterBalance::InsufficientData {
                period_days: window_days,
                readings: recent.len(),
            };
        }

        let total_inflow: f64 = recent.iter().filter_map(|r| r.inflow_mcm()).sum();
        let total_outflow: f64 = recent.iter().filter_map(|r| r.outflow_mcm()).sum();
        let total_evaporation: f64 = recent.iter().filter_map(|r| r.evaporation_mcm()).sum();

        WaterBalance::Computed {
            total_inflow_mcm: total_inflow,
            total_outflow_mcm: total_outflow,
            total_evaporation_mcm: total_evaporation,
            net_change_mcm: total_inflow - total_outflow - total_evaporation,
            period_days: window_days,
        }
    }

    /// Day-by-day storage simulation from the latest volume.
    ///
    /// Each day's volume seeds the next and is clamped to the latest
    /// reading's capacity. Forecast entries apply to the day with the same
    /// date; days the forecast does not cover follow the trend alone.
    /// Returns an empty list for a reservoir without readings.
    pub fn predict(&self, days_ahead: u32, forecast: Option<&[ForecastDay]>) -> Vec<PredictionPoint> {
        let Some(latest) = self.current_status() else {
            return Vec::new();
        };

        let m = &self.model;
        let capacity = latest.capacity_mcm();
        let trend_delta = match self.trend() {
            Trend::Increasing => m.trend_daily_delta,
            Trend::Decreasing => -m.trend_daily_delta,
            Trend::Stable | Trend::Volatile => 0.0,
        };

        let mut volume = latest.volume_mcm();
        let mut points = Vec::with_capacity(days_ahead as usize);

        for day in 1..=days_ahead {
            let date = latest.date() + Duration::days(i64::from(day));
            let mut change = trend_delta;

            if let Some(weather) = forecast.and_then(|f| f.iter().find(|w| w.date == date)) {
                if weather.precipitation_mm > m.rain_threshold_mm {
                    change += weather.precipitation_mm * m.rain_gain_factor;
                }
                if weather.temperature_c > m.heat_threshold_c {
                    change -= (weather.temperature_c - m.heat_threshold_c) * m.heat_loss_factor;
                }
            }

            volume = (volume + change).clamp(0.0, capacity);
            let ratio = volume / capacity;

            points.push(PredictionPoint {
                date,
                predicted_volume_mcm: round_dp(volume, 2),
                predicted_fill_ratio: round_dp(ratio, 3),
                drought_level: DroughtLevel::from_fill_ratio(ratio),
            });
        }

        points
    }

    pub fn summary(&self) -> ReservoirSummary {
        let current = self.current_status();
        ReservoirSummary {
            name: self.site.name.clone(),
            location: LocationBlock {
                latitude: self.site.latitude,
                longitude: self.site.longitude,
                district: self.site.district.clone(),
                water_source: self.site.water_source.clone(),
            },
            capacity: CapacityBlock {
                total_capacity_mcm: self.site.capacity_mcm,
                current_volume_mcm: current.map(|r| r.volume_mcm()),
                fill_ratio: current.map(|r| r.fill_ratio()),
            },
            status: StatusBlock {
                drought_level: self.drought_level(),
                trend: self.trend(),
                data_points: self.readings.len(),
            },
        }
    }
}

/// Least-squares slope of `ys` against their index, and population std-dev.
fn slope_and_std(ys: &[f64]) -> (f64, f64) {
    let n = ys.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = ys.iter().sum::<f64>() / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = y - y_mean;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    (slope, (syy / n).sqrt())
}
