//! Local tabular files: delimited text via `csv`, spreadsheets via `calamine`.

use calamine::{open_workbook_auto, Data, Reader};
use std::path::{Path, PathBuf};

use crate::errors::SourceError;
use crate::helpers::{parse_date, parse_number};
use crate::services::sources::{Category, DateWindow, FetchParams, TabularResult, ValidationRules};
use crate::table::{self, canonical_column, Cell, Table};

/// Columns kept as text even when they look numeric.
const TEXT_COLUMNS: &[&str] = &[table::RESERVOIR, table::STATION];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Delimited(u8),
    Spreadsheet,
}

impl FileFormat {
    fn from_path(path: &Path) -> Result<Self, SourceError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => Ok(FileFormat::Delimited(b',')),
            "tsv" => Ok(FileFormat::Delimited(b'\t')),
            "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => Ok(FileFormat::Spreadsheet),
            other => Err(SourceError::UnsupportedFormat(format!(
                "'{}' ({})",
                other,
                path.display()
            ))),
        }
    }
}

/// A flat file holding one category of data.
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    category: Category,
    path: PathBuf,
    rules: ValidationRules,
}

impl LocalFileSource {
    /// Fails with `SourceNotFound` when the path does not exist.
    pub fn new(
        category: Category,
        path: impl Into<PathBuf>,
        rules: ValidationRules,
    ) -> Result<Self, SourceError> {
        let path = path.into();
        if !path.exists() {
            return Err(SourceError::SourceNotFound(path));
        }
        FileFormat::from_path(&path)?;
        Ok(Self {
            category,
            path,
            rules,
        })
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Read the file and keep the requested reservoirs and dates.
    ///
    /// A `DateWindow::Days` window is anchored at the latest date in the file
    /// rather than at `as_of`, since files are historical snapshots.
    pub fn fetch(&self, params: &FetchParams) -> Result<TabularResult, SourceError> {
        let (mut raw, skipped) = match FileFormat::from_path(&self.path)? {
            FileFormat::Delimited(delimiter) => read_delimited(&self.path, delimiter)?,
            FileFormat::Spreadsheet => read_spreadsheet(&self.path)?,
        };

        if self.category == Category::Reservoir && !raw.has_column(table::FILL_RATIO) {
            derive_fill_ratio(&mut raw);
        }

        let latest = raw.rows().filter_map(|r| r.date(table::DATE)).max();
        let (start, end) = match (params.window, latest) {
            (DateWindow::Days(_), Some(latest)) => params.window.resolve(latest),
            _ => params.date_range(),
        };

        let mut filtered = Table::new(raw.columns().to_vec());
        for row in raw.rows() {
            let wanted = row
                .text(table::RESERVOIR)
                .map(|name| params.wants(name))
                .unwrap_or(params.entities.is_empty());
            let in_range = row
                .date(table::DATE)
                .map(|d| d >= start && d <= end)
                .unwrap_or(true);
            if wanted && in_range {
                filtered.push_row(
                    raw.columns()
                        .iter()
                        .map(|c| row.cell(c).clone())
                        .collect(),
                );
            }
        }

        tracing::info!(
            "Read {} of {} rows from {} ({} skipped)",
            filtered.len(),
            raw.len(),
            self.path.display(),
            skipped
        );
        Ok(TabularResult::new(
            filtered,
            skipped,
            format!("file:{}", self.path.display()),
        ))
    }
}

fn read_delimited(path: &Path, delimiter: u8) -> Result<(Table, usize), SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    let mut rows = Vec::new();
    let mut skipped = 0;

    for (i, record) in reader.records().enumerate() {
        match record {
            Ok(record) => rows.push(
                record
                    .iter()
                    .map(|v| {
                        if v.is_empty() {
                            Cell::Missing
                        } else {
                            Cell::text(v)
                        }
                    })
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!("Skipping line {} of {}: {}", i + 2, path.display(), e);
                skipped += 1;
            }
        }
    }

    Ok((build_table(headers, rows), skipped))
}

fn read_spreadsheet(path: &Path) -> Result<(Table, usize), SourceError> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| SourceError::Spreadsheet(format!("{} has no sheets", path.display())))??;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok((Table::default(), 0));
    };
    let headers: Vec<String> = header_row.iter().map(|c| c.to_string()).collect();
    let body: Vec<Vec<Cell>> = rows.map(|r| r.iter().map(spreadsheet_cell).collect()).collect();

    Ok((build_table(headers, body), 0))
}

fn spreadsheet_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Missing,
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::text(s.clone()),
        Data::Bool(b) => Cell::text(b.to_string()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| Cell::Date(d.date()))
            .unwrap_or(Cell::Number(dt.as_f64())),
    }
}

/// Canonicalise headers and coerce cells: dates in `date`, numbers elsewhere.
fn build_table(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Table {
    let columns: Vec<String> = headers.iter().map(|h| canonical_column(h)).collect();
    let mut t = Table::new(columns.clone());

    for raw in rows {
        let cells = raw
            .into_iter()
            .zip(&columns)
            .map(|(cell, column)| coerce(cell, column))
            .collect();
        t.push_row(cells);
    }
    t
}

fn coerce(cell: Cell, column: &str) -> Cell {
    match cell {
        Cell::Text(s) if column == table::DATE => parse_date(&s).map(Cell::Date).unwrap_or(Cell::Text(s)),
        Cell::Text(s) if TEXT_COLUMNS.contains(&column) => Cell::Text(s),
        Cell::Text(s) => parse_number(&s).map(Cell::Number).unwrap_or(Cell::Text(s)),
        other => other,
    }
}

fn derive_fill_ratio(t: &mut Table) {
    if !(t.has_column(table::VOLUME) && t.has_column(table::CAPACITY)) {
        return;
    }
    t.add_column(table::FILL_RATIO, |row| {
        match (row.number(table::VOLUME), row.number(table::CAPACITY)) {
            (Some(v), Some(c)) if c > 0.0 => Cell::Number(v / c),
            _ => Cell::Missing,
        }
    });
}
