//! Deterministic sample data, the last link of every remote chain.
//!
//! Each reservoir gets its own RNG seeded from the configured seed and the
//! reservoir name, so output is stable across runs and independent of which
//! other reservoirs were requested.

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Exp1, StandardNormal};
use std::collections::hash_map::DefaultHasher;
use std::f64::consts::PI;
use std::hash::{Hash, Hasher};

use crate::config::{DataSettings, ReservoirCatalog, ReservoirSite};
use crate::errors::SourceError;
use crate::services::sources::{Category, FetchParams, TabularResult, ValidationRules};
use crate::table::{Cell, Table};

/// Origin tag of generated results.
pub const SYNTHETIC_ORIGIN: &str = "synthetic";

#[derive(Debug, Clone)]
pub struct SyntheticSource {
    category: Category,
    catalog: ReservoirCatalog,
    seed: u64,
    rules: ValidationRules,
}

impl SyntheticSource {
    /// Validated with the default remote rules until [`Self::with_rules`].
    pub fn new(category: Category, catalog: ReservoirCatalog, seed: u64) -> Self {
        Self {
            category,
            catalog,
            seed,
            rules: ValidationRules::remote(&DataSettings::default()),
        }
    }

    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generate one row per reservoir per day in the window.
    ///
    /// Names outside the catalog are skipped since they have no capacity or
    /// coordinates to generate from.
    pub fn fetch(&self, params: &FetchParams) -> Result<TabularResult, SourceError> {
        let (start, end) = params.date_range();
        let days: Vec<NaiveDate> = start
            .iter_days()
            .take_while(|d| *d <= end)
            .collect();

        let mut table = Table::with_columns(self.category.columns());
        let mut skipped = 0;

        for name in params.entities_or_all(&self.catalog) {
            let Some(site) = self.catalog.get(&name) else {
                tracing::warn!("No catalog entry for '{}', cannot generate sample data", name);
                skipped += 1;
                continue;
            };
            let mut rng = StdRng::seed_from_u64(self.seed_for(&name));
            match self.category {
                Category::Reservoir => push_reservoir_rows(&mut table, site, &days, &mut rng),
                Category::Weather => push_weather_rows(&mut table, site, &days, &mut rng),
            }
        }

        tracing::info!(
            "Generated {} synthetic {} rows",
            table.len(),
            self.category.as_str()
        );
        Ok(TabularResult::new(table, skipped, SYNTHETIC_ORIGIN))
    }

    fn seed_for(&self, name: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.category.as_str().hash(&mut hasher);
        name.hash(&mut hasher);
        self.seed ^ hasher.finish()
    }
}

/// Noisy fill ratio around 0.6 with an annual cycle.
fn push_reservoir_rows(table: &mut Table, site: &ReservoirSite, days: &[NaiveDate], rng: &mut StdRng) {
    for (i, date) in days.iter().enumerate() {
        let noise: f64 = rng.sample(StandardNormal);
        let base = (0.6 + 0.1 * noise).clamp(0.1, 0.95);
        let seasonal = 0.1 * (2.0 * PI * i as f64 / 365.0).sin();
        let ratio = (base + seasonal).clamp(0.05, 0.98);

        table.push_row(vec![
            Cell::Date(*date),
            Cell::text(site.name.clone()),
            Cell::Number(site.capacity_mcm * ratio),
            Cell::Number(site.capacity_mcm),
            Cell::Number(ratio),
            Cell::Number(rng.random_range(1.0..3.0)),
            Cell::Number(rng.random_range(1.0..2.5)),
            Cell::Number(rng.random_range(0.1..0.5)),
        ]);
    }
}

fn push_weather_rows(table: &mut Table, site: &ReservoirSite, days: &[NaiveDate], rng: &mut StdRng) {
    let station = format!("{}:{}", SYNTHETIC_ORIGIN, site.name);
    for date in days {
        // Exponential with mean 2 mm
        let rain: f64 = rng.sample::<f64, _>(Exp1) * 2.0;
        table.push_row(vec![
            Cell::Date(*date),
            Cell::text(site.name.clone()),
            Cell::Number(rng.random_range(15.0..35.0)),
            Cell::Number(rng.random_range(5.0..20.0)),
            Cell::Number(rain),
            Cell::Number(rng.random_range(40.0..80.0)),
            Cell::Number(rng.random_range(1000.0..1020.0)),
            Cell::Number(rng.random_range(5.0..15.0)),
            Cell::text(station.clone()),
            Cell::Number(site.latitude),
            Cell::Number(site.longitude),
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sources::DateWindow;
    use crate::table;

    fn params(entities: &[&str], days: u32) -> FetchParams {
        FetchParams::new(
            entities.iter().map(|e| e.to_string()).collect(),
            DateWindow::Days(days),
            NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
        )
    }

    #[test]
    fn test_reservoir_rows_shape() {
        let source = SyntheticSource::new(Category::Reservoir, ReservoirCatalog::default(), 42);
        let result = source.fetch(&params(&["Tahtalı", "Gediz"], 9)).unwrap();

        assert_eq!(result.origin, SYNTHETIC_ORIGIN);
        assert_eq!(result.table.len(), 2 * 10);
        assert_eq!(result.table.columns(), table::RESERVOIR_COLUMNS);
        for row in result.table.rows() {
            let ratio = row.number(table::FILL_RATIO).unwrap();
            assert!((0.05..=0.98).contains(&ratio));
            let volume = row.number(table::VOLUME).unwrap();
            let capacity = row.number(table::CAPACITY).unwrap();
            assert!((volume / capacity - ratio).abs() < 1e-9);
        }
    }

    #[test]
    fn test_deterministic_for_seed() {
        let a = SyntheticSource::new(Category::Weather, ReservoirCatalog::default(), 7);
        let b = SyntheticSource::new(Category::Weather, ReservoirCatalog::default(), 7);
        let c = SyntheticSource::new(Category::Weather, ReservoirCatalog::default(), 8);
        let p = params(&["Çamlı"], 5);
        assert_eq!(a.fetch(&p).unwrap(), b.fetch(&p).unwrap());
        assert_ne!(a.fetch(&p).unwrap(), c.fetch(&p).unwrap());
    }

    #[test]
    fn test_rows_independent_of_other_entities() {
        let s = SyntheticSource::new(Category::Reservoir, ReservoirCatalog::default(), 42);
        let alone = s.fetch(&params(&["Balçova"], 3)).unwrap();
        let together = s.fetch(&params(&["Tahtalı", "Balçova"], 3)).unwrap();
        let balcova: Vec<_> = together
            .table
            .rows()
            .filter(|r| r.text(table::RESERVOIR) == Some("Balçova"))
            .map(|r| r.number(table::FILL_RATIO))
            .collect();
        assert_eq!(balcova, alone.table.rows().map(|r| r.number(table::FILL_RATIO)).collect::<Vec<_>>());
    }

    #[test]
    fn test_weather_station_tag() {
        let source = SyntheticSource::new(Category::Weather, ReservoirCatalog::default(), 42);
        let result = source.fetch(&params(&["Gediz"], 2)).unwrap();
        assert_eq!(result.table.len(), 3);
        for row in result.table.rows() {
            assert_eq!(row.text(table::STATION), Some("synthetic:Gediz"));
            assert!(row.number(table::PRECIPITATION).unwrap() >= 0.0);
            let t_max = row.number(table::TEMP_MAX).unwrap();
            assert!((15.0..35.0).contains(&t_max));
        }
    }

    #[test]
    fn test_all_catalog_entries_when_none_requested() {
        let source = SyntheticSource::new(Category::Reservoir, ReservoirCatalog::default(), 1);
        let result = source.fetch(&params(&[], 0)).unwrap();
        assert_eq!(result.table.len(), 5);
    }

    #[test]
    fn test_unknown_entity_skipped() {
        let source = SyntheticSource::new(Category::Reservoir, ReservoirCatalog::default(), 1);
        let result = source.fetch(&params(&["Atlantis"], 3)).unwrap();
        assert!(result.table.is_empty());
        assert_eq!(result.skipped, 1);
    }
}
