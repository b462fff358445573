use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::config::{ModelSettings, ReservoirCatalog};
use crate::models::reading::ReadingDraft;
use crate::models::reservoir::{DroughtLevel, Reservoir};
use crate::table::{self, Table};

/// Aggregate over every reservoir in the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OverallStatus {
    NoReservoirs,
    Summary {
        total: usize,
        /// Every level is present, zero-filled.
        distribution: BTreeMap<DroughtLevel, usize>,
        /// Reservoirs at Severe or Critical.
        at_risk: usize,
        /// Mean latest fill ratio over reservoirs that have readings.
        mean_fill_ratio: Option<f64>,
    },
}

/// Outcome of loading a merged table into the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PopulateReport {
    pub accepted: usize,
    /// Rows rejected by reading invariants or unreadable fields.
    pub rejected: usize,
    /// Rows naming a reservoir outside the catalog.
    pub unknown: usize,
}

/// Reservoirs of one run, keyed by name.
///
/// Built once from the merged table, then only read.
#[derive(Debug, Clone, Default)]
pub struct ReservoirRegistry {
    reservoirs: BTreeMap<String, Reservoir>,
}

impl ReservoirRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reservoir: Reservoir) {
        self.reservoirs
            .insert(reservoir.name().to_string(), reservoir);
    }

    pub fn get(&self, name: &str) -> Option<&Reservoir> {
        self.reservoirs.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservoir> {
        self.reservoirs.values()
    }

    pub fn len(&self) -> usize {
        self.reservoirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservoirs.is_empty()
    }

    pub fn by_district<'a>(&'a self, district: &'a str) -> impl Iterator<Item = &'a Reservoir> {
        self.iter().filter(move |r| r.site().district == district)
    }

    pub fn by_drought_level(&self, level: DroughtLevel) -> impl Iterator<Item = &Reservoir> {
        self.iter().filter(move |r| r.drought_level() == level)
    }

    /// Reservoirs at Severe or Critical.
    pub fn critical(&self) -> impl Iterator<Item = &Reservoir> {
        self.iter().filter(|r| r.drought_level().is_at_risk())
    }

    /// Load reservoir rows into the registry.
    ///
    /// Reservoirs are created on first sight of a catalog name. A bad row is
    /// rejected on its own and the rest of the batch continues.
    pub fn populate(
        &mut self,
        merged: &Table,
        catalog: &ReservoirCatalog,
        model: &ModelSettings,
    ) -> PopulateReport {
        let mut report = PopulateReport::default();
        let mut unknown_names: HashSet<String> = HashSet::new();

        for row in merged.rows() {
            let name = row.text(table::RESERVOIR).unwrap_or_default();
            let Some(site) = catalog.get(name) else {
                if unknown_names.insert(name.to_string()) {
                    tracing::warn!("Skipping rows for unknown reservoir '{}'", name);
                }
                report.unknown += 1;
                continue;
            };

            let reservoir = self
                .reservoirs
                .entry(site.name.clone())
                .or_insert_with(|| Reservoir::new(site.clone(), model.clone()));

            match ReadingDraft::from_row(row, Some(site.capacity_mcm)).and_then(|d| d.build()) {
                Ok(reading) => {
                    reservoir.add_reading(reading);
                    report.accepted += 1;
                }
                Err(e) => {
                    tracing::warn!("Rejected reading: {}", e);
                    report.rejected += 1;
                }
            }
        }

        tracing::info!(
            "Registry populated: {} accepted, {} rejected, {} unknown",
            report.accepted,
            report.rejected,
            report.unknown
        );
        report
    }

    pub fn overall_status(&self) -> OverallStatus {
        if self.reservoirs.is_empty() {
            return OverallStatus::NoReservoirs;
        }

        let mut distribution: BTreeMap<DroughtLevel, usize> =
            DroughtLevel::ALL.iter().map(|l| (*l, 0)).collect();
        for reservoir in self.iter() {
            *distribution.entry(reservoir.drought_level()).or_insert(0) += 1;
        }

        let latest: Vec<f64> = self
            .iter()
            .filter_map(|r| r.current_status().map(|c| c.fill_ratio()))
            .collect();
        let mean_fill_ratio =
            (!latest.is_empty()).then(|| latest.iter().sum::<f64>() / latest.len() as f64);

        OverallStatus::Summary {
            total: self.reservoirs.len(),
            distribution,
            at_risk: self.critical().count(),
            mean_fill_ratio,
        }
    }
}
