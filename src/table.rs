//! Row-major tabular payload shared by every source.
//!
//! Sources disagree on layout (JSON arrays, HTML tables, CSV, spreadsheets),
//! so everything is normalised into a [`Table`] with canonical column names
//! before validation, caching and merging.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Canonical column names
// ---------------------------------------------------------------------------

pub const DATE: &str = "date";
pub const RESERVOIR: &str = "reservoir";
pub const VOLUME: &str = "volume_mcm";
pub const CAPACITY: &str = "capacity_mcm";
pub const FILL_RATIO: &str = "fill_ratio";
pub const INFLOW: &str = "inflow_mcm";
pub const OUTFLOW: &str = "outflow_mcm";
pub const EVAPORATION: &str = "evaporation_mcm";
pub const TEMP_MAX: &str = "temp_max_c";
pub const TEMP_MIN: &str = "temp_min_c";
pub const PRECIPITATION: &str = "precipitation_mm";
pub const HUMIDITY: &str = "humidity_pct";
pub const PRESSURE: &str = "pressure_hpa";
pub const WIND_SPEED: &str = "wind_speed";
pub const STATION: &str = "station";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const EVAPORATION_ESTIMATE: &str = "evaporation_estimate_mm";

/// Column layout produced by reservoir sources.
pub const RESERVOIR_COLUMNS: &[&str] = &[
    DATE,
    RESERVOIR,
    VOLUME,
    CAPACITY,
    FILL_RATIO,
    INFLOW,
    OUTFLOW,
    EVAPORATION,
];

/// Column layout produced by weather sources.
pub const WEATHER_COLUMNS: &[&str] = &[
    DATE,
    RESERVOIR,
    TEMP_MAX,
    TEMP_MIN,
    PRECIPITATION,
    HUMIDITY,
    PRESSURE,
    WIND_SPEED,
    STATION,
    LATITUDE,
    LONGITUDE,
];

/// Legacy header names found in older exports, mapped to canonical names.
const HEADER_ALIASES: &[(&str, &str)] = &[
    ("dam_name", RESERVOIR),
    ("dam", RESERVOIR),
    ("current_volume_mcm", VOLUME),
    ("volume", VOLUME),
    ("total_capacity_mcm", CAPACITY),
    ("capacity", CAPACITY),
    ("inflow", INFLOW),
    ("outflow", OUTFLOW),
    ("evaporation", EVAPORATION),
    ("temp_max", TEMP_MAX),
    ("temp_min", TEMP_MIN),
    ("precipitation", PRECIPITATION),
    ("humidity", HUMIDITY),
    ("pressure", PRESSURE),
    ("nearest_station", STATION),
];

/// Map a raw header to its canonical column name (trimmed, lowercased, aliased).
pub fn canonical_column(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    HEADER_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(lowered)
}

// ---------------------------------------------------------------------------
// Cells
// ---------------------------------------------------------------------------

/// A single table cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Missing,
    Number(f64),
    Text(String),
    Date(NaiveDate),
}

impl Cell {
    /// NaN numbers and blank text count as missing, like pandas `isna`.
    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Missing => true,
            Cell::Number(v) => v.is_nan(),
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Date(_) => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(v) if !v.is_nan() => Some(*v),
            Cell::Text(s) => crate::helpers::parse_number(s),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Cell::Text(s) if !s.trim().is_empty() => Some(s.trim()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            Cell::Text(s) => crate::helpers::parse_date(s),
            _ => None,
        }
    }

    /// Build a number cell from an optional value.
    pub fn number(v: Option<f64>) -> Self {
        v.map(Cell::Number).unwrap_or(Cell::Missing)
    }

    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Named columns over row-major cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_columns(columns: &[&str]) -> Self {
        Self::new(columns.iter().map(|c| c.to_string()).collect())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append a row; short rows are padded with `Missing`, long rows truncated.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), Cell::Missing);
        self.rows.push(row);
    }

    /// Append a derived column computed from each row.
    pub fn add_column<F>(&mut self, name: &str, mut f: F)
    where
        F: FnMut(Row<'_>) -> Cell,
    {
        let values: Vec<Cell> = self.rows().map(&mut f).collect();
        self.columns.push(name.to_string());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        (0..self.rows.len()).map(move |index| Row { table: self, index })
    }

    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        (index < self.rows.len()).then_some(Row { table: self, index })
    }

    /// Fraction of missing cells in `column` (1.0 when the column is absent).
    pub fn missing_ratio(&self, column: &str) -> f64 {
        let Some(idx) = self.column_index(column) else {
            return 1.0;
        };
        if self.rows.is_empty() {
            return 0.0;
        }
        let missing = self.rows.iter().filter(|r| r[idx].is_missing()).count();
        missing as f64 / self.rows.len() as f64
    }

    /// Fraction of missing cells across the whole table.
    pub fn overall_missing_ratio(&self) -> f64 {
        let total = self.rows.len() * self.columns.len();
        if total == 0 {
            return 0.0;
        }
        let missing = self
            .rows
            .iter()
            .flat_map(|r| r.iter())
            .filter(|c| c.is_missing())
            .count();
        missing as f64 / total as f64
    }

    /// Numbers in `column`, skipping missing cells.
    pub fn numbers(&self, column: &str) -> Vec<f64> {
        self.rows().filter_map(|r| r.number(column)).collect()
    }

    /// Rows as JSON objects keyed by column name, for report collaborators.
    pub fn to_json_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(col, cell)| {
                        let value = serde_json::to_value(cell).unwrap_or(serde_json::Value::Null);
                        (col.clone(), value)
                    })
                    .collect()
            })
            .collect()
    }
}

/// Borrowed view of one table row with typed accessors by column name.
#[derive(Clone, Copy)]
pub struct Row<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> Row<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn cell(&self, column: &str) -> &'a Cell {
        const MISSING: &Cell = &Cell::Missing;
        self.table
            .column_index(column)
            .map(|idx| &self.table.rows[self.index][idx])
            .unwrap_or(MISSING)
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        self.cell(column).as_number()
    }

    pub fn text(&self, column: &str) -> Option<&'a str> {
        self.cell(column).as_text()
    }

    pub fn date(&self, column: &str) -> Option<NaiveDate> {
        self.cell(column).as_date()
    }

    /// The (date, reservoir) join key, when both parts are present.
    pub fn key(&self) -> Option<(NaiveDate, &'a str)> {
        Some((self.date(DATE)?, self.text(RESERVOIR)?))
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Inner join of two tables on (`date`, `reservoir`).
///
/// Rows without a counterpart on the other side are dropped, as are rows whose
/// key cannot be read. A left row matching several right rows yields one
/// output row per match. Right-hand columns already present on the left are
/// not repeated. Output rows follow left-table order.
pub fn inner_join(left: &Table, right: &Table) -> Table {
    let extra_columns: Vec<(usize, String)> = right
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| !left.has_column(c))
        .map(|(i, c)| (i, c.clone()))
        .collect();

    let mut columns = left.columns.clone();
    columns.extend(extra_columns.iter().map(|(_, c)| c.clone()));
    let mut merged = Table::new(columns);

    let mut right_index: HashMap<(NaiveDate, &str), Vec<usize>> = HashMap::new();
    for row in right.rows() {
        if let Some(key) = row.key() {
            right_index.entry(key).or_default().push(row.index);
        }
    }

    for row in left.rows() {
        let Some(key) = row.key() else {
            continue;
        };
        let Some(matches) = right_index.get(&key) else {
            continue;
        };
        for &r in matches {
            let mut cells = left.rows[row.index].clone();
            cells.extend(extra_columns.iter().map(|(i, _)| right.rows[r][*i].clone()));
            merged.push_row(cells);
        }
    }

    merged
}
