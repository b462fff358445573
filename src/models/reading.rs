//! Validated per-day observations.
//!
//! A [`ReservoirReading`] can only be obtained through [`ReadingDraft::build`],
//! which enforces `0 ≤ volume ≤ capacity` and checks a declared fill ratio
//! against the computed one.

use chrono::NaiveDate;
use serde::Serialize;

use crate::errors::ReadingError;
use crate::table::{self, Row};

/// Maximum absolute difference between a declared and a computed fill ratio.
pub const FILL_RATIO_TOLERANCE: f64 = 0.01;

/// One day of storage data for one reservoir.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReservoirReading {
    reservoir: String,
    date: NaiveDate,
    volume_mcm: f64,
    capacity_mcm: f64,
    fill_ratio: f64,
    inflow_mcm: Option<f64>,
    outflow_mcm: Option<f64>,
    evaporation_mcm: Option<f64>,
}

impl ReservoirReading {
    /// Shorthand for a reading without flow components.
    pub fn new(
        reservoir: impl Into<String>,
        date: NaiveDate,
        volume_mcm: f64,
        capacity_mcm: f64,
    ) -> Result<Self, ReadingError> {
        ReadingDraft {
            reservoir: reservoir.into(),
            date,
            volume_mcm,
            capacity_mcm,
            ..Default::default()
        }
        .build()
    }

    pub fn reservoir(&self) -> &str {
        &self.reservoir
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn volume_mcm(&self) -> f64 {
        self.volume_mcm
    }

    pub fn capacity_mcm(&self) -> f64 {
        self.capacity_mcm
    }

    pub fn fill_ratio(&self) -> f64 {
        self.fill_ratio
    }

    pub fn inflow_mcm(&self) -> Option<f64> {
        self.inflow_mcm
    }

    pub fn outflow_mcm(&self) -> Option<f64> {
        self.outflow_mcm
    }

    pub fn evaporation_mcm(&self) -> Option<f64> {
        self.evaporation_mcm
    }
}

/// Unvalidated reading fields, as read from a table row.
#[derive(Debug, Clone, Default)]
pub struct ReadingDraft {
    pub reservoir: String,
    pub date: NaiveDate,
    pub volume_mcm: f64,
    pub capacity_mcm: f64,
    /// Fill ratio as reported by the source, if any.
    pub fill_ratio: Option<f64>,
    pub inflow_mcm: Option<f64>,
    pub outflow_mcm: Option<f64>,
    pub evaporation_mcm: Option<f64>,
}

impl ReadingDraft {
    /// Read a draft from a canonical reservoir row.
    ///
    /// `fallback_capacity` is used when the row carries no capacity. A missing
    /// volume is derived from the declared fill ratio when possible.
    pub fn from_row(row: Row<'_>, fallback_capacity: Option<f64>) -> Result<Self, ReadingError> {
        let unreadable = |reason: &str| ReadingError::UnreadableRow {
            row: row.index(),
            reason: reason.to_string(),
        };

        let reservoir = row
            .text(table::RESERVOIR)
            .ok_or_else(|| unreadable("missing reservoir name"))?
            .to_string();
        let date = row
            .date(table::DATE)
            .ok_or_else(|| unreadable("missing or unparsable date"))?;
        let capacity_mcm = row
            .number(table::CAPACITY)
            .or(fallback_capacity)
            .ok_or_else(|| unreadable("missing capacity"))?;
        let fill_ratio = row.number(table::FILL_RATIO);
        let volume_mcm = row
            .number(table::VOLUME)
            .or_else(|| fill_ratio.map(|r| r * capacity_mcm))
            .ok_or_else(|| unreadable("missing volume"))?;

        Ok(Self {
            reservoir,
            date,
            volume_mcm,
            capacity_mcm,
            fill_ratio,
            inflow_mcm: row.number(table::INFLOW),
            outflow_mcm: row.number(table::OUTFLOW),
            evaporation_mcm: row.number(table::EVAPORATION),
        })
    }

    pub fn build(self) -> Result<ReservoirReading, ReadingError> {
        let violation = |reason: String| ReadingError::InvariantViolation {
            reservoir: self.reservoir.clone(),
            date: self.date,
            reason,
        };

        if !self.capacity_mcm.is_finite() || self.capacity_mcm <= 0.0 {
            return Err(violation(format!(
                "capacity must be positive, got {}",
                self.capacity_mcm
            )));
        }
        if !self.volume_mcm.is_finite() || self.volume_mcm < 0.0 {
            return Err(violation(format!(
                "volume must be non-negative, got {}",
                self.volume_mcm
            )));
        }
        if self.volume_mcm > self.capacity_mcm {
            return Err(violation(format!(
                "volume {} exceeds capacity {}",
                self.volume_mcm, self.capacity_mcm
            )));
        }

        let fill_ratio = self.volume_mcm / self.capacity_mcm;
        if let Some(declared) = self.fill_ratio {
            if !declared.is_finite() || (declared - fill_ratio).abs() > FILL_RATIO_TOLERANCE {
                return Err(violation(format!(
                    "declared fill ratio {} disagrees with computed {:.4}",
                    declared, fill_ratio
                )));
            }
        }

        for (label, value) in [
            ("inflow", self.inflow_mcm),
            ("outflow", self.outflow_mcm),
            ("evaporation", self.evaporation_mcm),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(violation(format!("{} must be non-negative, got {}", label, v)));
                }
            }
        }

        Ok(ReservoirReading {
            reservoir: self.reservoir,
            date: self.date,
            volume_mcm: self.volume_mcm,
            capacity_mcm: self.capacity_mcm,
            fill_ratio,
            inflow_mcm: self.inflow_mcm,
            outflow_mcm: self.outflow_mcm,
            evaporation_mcm: self.evaporation_mcm,
        })
    }
}

/// One day of weather near one reservoir.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReading {
    pub location: String,
    pub date: NaiveDate,
    pub temp_max_c: Option<f64>,
    pub temp_min_c: Option<f64>,
    pub precipitation_mm: f64,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind_speed: Option<f64>,
    pub station: String,
}

impl WeatherReading {
    /// Read a weather row; negative precipitation is rejected, missing is 0.
    pub fn from_row(row: Row<'_>) -> Result<Self, ReadingError> {
        let unreadable = |reason: &str| ReadingError::UnreadableRow {
            row: row.index(),
            reason: reason.to_string(),
        };
        let location = row
            .text(table::RESERVOIR)
            .ok_or_else(|| unreadable("missing location"))?
            .to_string();
        let date = row
            .date(table::DATE)
            .ok_or_else(|| unreadable("missing or unparsable date"))?;
        let precipitation_mm = row.number(table::PRECIPITATION).unwrap_or(0.0);
        if precipitation_mm < 0.0 {
            return Err(ReadingError::InvariantViolation {
                reservoir: location,
                date,
                reason: format!("precipitation must be non-negative, got {}", precipitation_mm),
            });
        }

        Ok(Self {
            station: row.text(table::STATION).unwrap_or("unknown").to_string(),
            location,
            date,
            temp_max_c: row.number(table::TEMP_MAX),
            temp_min_c: row.number(table::TEMP_MIN),
            precipitation_mm,
            humidity_pct: row.number(table::HUMIDITY),
            pressure_hpa: row.number(table::PRESSURE),
            wind_speed: row.number(table::WIND_SPEED),
        })
    }

    /// Mean of max/min temperature when both are known.
    pub fn mean_temperature_c(&self) -> Option<f64> {
        Some((self.temp_max_c? + self.temp_min_c?) / 2.0)
    }
}

/// One day of forecast input for [`crate::models::Reservoir::predict`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub precipitation_mm: f64,
    pub temperature_c: f64,
}

impl ForecastDay {
    /// Defaults for a day the forecast leaves blank.
    pub const DEFAULT_TEMPERATURE_C: f64 = 20.0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Cell, Table};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, d).unwrap()
    }

    #[test]
    fn test_reading_computes_fill_ratio() {
        let r = ReservoirReading::new("Tahtalı", day(1), 75.0, 150.0).unwrap();
        assert_eq!(r.fill_ratio(), 0.5);
        assert_eq!(r.reservoir(), "Tahtalı");
    }

    #[test]
    fn test_reading_full_and_empty_are_valid() {
        assert_eq!(ReservoirReading::new("A", day(1), 100.0, 100.0).unwrap().fill_ratio(), 1.0);
        assert_eq!(ReservoirReading::new("A", day(1), 0.0, 100.0).unwrap().fill_ratio(), 0.0);
    }

    #[test]
    fn test_reading_volume_above_capacity() {
        let err = ReservoirReading::new("A", day(1), 101.0, 100.0).unwrap_err();
        assert!(matches!(err, ReadingError::InvariantViolation { .. }));
    }

    #[test]
    fn test_reading_negative_volume() {
        assert!(ReservoirReading::new("A", day(1), -0.1, 100.0).is_err());
    }

    #[test]
    fn test_reading_zero_capacity() {
        assert!(ReservoirReading::new("A", day(1), 0.0, 0.0).is_err());
    }

    #[test]
    fn test_reading_non_finite() {
        assert!(ReservoirReading::new("A", day(1), f64::NAN, 100.0).is_err());
        assert!(ReservoirReading::new("A", day(1), 1.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_declared_ratio_within_tolerance() {
        let r = ReadingDraft {
            reservoir: "A".into(),
            date: day(1),
            volume_mcm: 50.0,
            capacity_mcm: 100.0,
            fill_ratio: Some(0.505),
            ..Default::default()
        }
        .build()
        .unwrap();
        // Stored ratio is the computed one
        assert_eq!(r.fill_ratio(), 0.5);
    }

    #[test]
    fn test_declared_ratio_diverges() {
        let err = ReadingDraft {
            reservoir: "A".into(),
            date: day(1),
            volume_mcm: 50.0,
            capacity_mcm: 100.0,
            fill_ratio: Some(0.52),
            ..Default::default()
        }
        .build()
        .unwrap_err();
        assert!(err.to_string().contains("disagrees"));
    }

    #[test]
    fn test_negative_inflow_rejected() {
        let err = ReadingDraft {
            reservoir: "A".into(),
            date: day(1),
            volume_mcm: 50.0,
            capacity_mcm: 100.0,
            inflow_mcm: Some(-1.0),
            ..Default::default()
        }
        .build()
        .unwrap_err();
        assert!(err.to_string().contains("inflow"));
    }

    #[test]
    fn test_draft_from_row() {
        let mut t = Table::with_columns(table::RESERVOIR_COLUMNS);
        t.push_row(vec![
            Cell::text("2026-04-02"),
            Cell::text("Balçova"),
            Cell::Number(12.5),
            Cell::Number(25.0),
            Cell::Number(0.5),
            Cell::Number(1.0),
            Cell::Missing,
            Cell::Number(0.2),
        ]);
        let r = ReadingDraft::from_row(t.row(0).unwrap(), None)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(r.date(), day(2));
        assert_eq!(r.volume_mcm(), 12.5);
        assert_eq!(r.inflow_mcm(), Some(1.0));
        assert_eq!(r.outflow_mcm(), None);
    }

    #[test]
    fn test_draft_from_row_derives_volume_and_capacity() {
        let mut t = Table::with_columns(&[table::DATE, table::RESERVOIR, table::FILL_RATIO]);
        t.push_row(vec![Cell::Date(day(3)), Cell::text("Gediz"), Cell::Number(0.25)]);
        let draft = ReadingDraft::from_row(t.row(0).unwrap(), Some(80.0)).unwrap();
        assert_eq!(draft.capacity_mcm, 80.0);
        assert_eq!(draft.volume_mcm, 20.0);
    }

    #[test]
    fn test_draft_from_row_missing_date() {
        let mut t = Table::with_columns(&[table::DATE, table::RESERVOIR, table::VOLUME]);
        t.push_row(vec![Cell::text("soon"), Cell::text("Gediz"), Cell::Number(1.0)]);
        let err = ReadingDraft::from_row(t.row(0).unwrap(), Some(80.0)).unwrap_err();
        assert!(matches!(err, ReadingError::UnreadableRow { row: 0, .. }));
    }

    #[test]
    fn test_weather_from_row() {
        let mut t = Table::with_columns(table::WEATHER_COLUMNS);
        t.push_row(vec![
            Cell::Date(day(1)),
            Cell::text("Çamlı"),
            Cell::Number(28.0),
            Cell::Number(16.0),
            Cell::Missing,
            Cell::Number(55.0),
            Cell::Number(1012.0),
            Cell::Number(9.0),
            Cell::text("IZMIR_008"),
            Cell::Number(38.45),
            Cell::Number(27.2),
        ]);
        let w = WeatherReading::from_row(t.row(0).unwrap()).unwrap();
        assert_eq!(w.precipitation_mm, 0.0);
        assert_eq!(w.mean_temperature_c(), Some(22.0));
        assert_eq!(w.station, "IZMIR_008");
    }

    #[test]
    fn test_weather_negative_precipitation() {
        let mut t = Table::with_columns(&[table::DATE, table::RESERVOIR, table::PRECIPITATION]);
        t.push_row(vec![Cell::Date(day(1)), Cell::text("Çamlı"), Cell::Number(-2.0)]);
        assert!(WeatherReading::from_row(t.row(0).unwrap()).is_err());
    }
}
