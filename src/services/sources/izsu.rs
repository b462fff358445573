//! İZSU reservoir providers.
//!
//! The JSON endpoint returns `{ "results": [ {...}, ... ] }` with one object
//! per reservoir-day. The public page only carries a table of current
//! volumes, scraped here with quick-xml in lenient mode.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;

use crate::errors::SourceError;
use crate::helpers::{parse_date, parse_number};
use crate::services::sources::{FetchParams, RemoteContext, TabularResult};
use crate::table::{self, canonical_column, Cell, Table};

/// Suffix the page appends to reservoir names ("Tahtalı Barajı").
const NAME_SUFFIX: &str = "Barajı";

// ---------------------------------------------------------------------------
// JSON endpoint
// ---------------------------------------------------------------------------

pub async fn fetch_api(ctx: &RemoteContext, params: &FetchParams) -> Result<TabularResult, SourceError> {
    let url = format!("{}{}", ctx.api.izsu_base_url, ctx.api.izsu_api_endpoint);
    let (start, end) = params.date_range();
    let mut query = vec![
        ("start_date", start.to_string()),
        ("end_date", end.to_string()),
    ];
    if !params.entities.is_empty() {
        query.push(("dam_names", params.entities.join(",")));
    }

    let payload = ctx.http.request(&url, &query).await?;
    let (table, skipped) = parse_results(&payload, params)?;
    if skipped > 0 {
        tracing::warn!("İZSU API: skipped {} malformed records", skipped);
    }
    Ok(TabularResult::new(table, skipped, "izsu_api"))
}

/// Map the `results` array to canonical reservoir rows.
pub(crate) fn parse_results(payload: &Value, params: &FetchParams) -> Result<(Table, usize), SourceError> {
    let records = payload
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Malformed("İZSU response has no 'results' array".to_string()))?;

    let (start, end) = params.date_range();
    let mut t = Table::with_columns(table::RESERVOIR_COLUMNS);
    let mut skipped = 0;

    for record in records {
        let Some(obj) = record.as_object() else {
            skipped += 1;
            continue;
        };
        // Re-key with canonical column names
        let field = |column: &str| {
            obj.iter()
                .find(|(k, _)| canonical_column(k) == column)
                .map(|(_, v)| v)
        };

        let name = field(table::RESERVOIR).and_then(Value::as_str).map(str::trim);
        let date = field(table::DATE).and_then(Value::as_str).and_then(parse_date);
        let (Some(name), Some(date)) = (name, date) else {
            skipped += 1;
            continue;
        };
        if !params.wants(name) || date < start || date > end {
            continue;
        }

        let number = |column: &str| Cell::number(field(column).and_then(json_number));
        t.push_row(vec![
            Cell::Date(date),
            Cell::text(name),
            number(table::VOLUME),
            number(table::CAPACITY),
            number(table::FILL_RATIO),
            number(table::INFLOW),
            number(table::OUTFLOW),
            number(table::EVAPORATION),
        ]);
    }

    Ok((t, skipped))
}

/// A JSON number, or a string holding one (comma decimals allowed).
pub(crate) fn json_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Public page
// ---------------------------------------------------------------------------

pub async fn fetch_page(ctx: &RemoteContext, params: &FetchParams) -> Result<TabularResult, SourceError> {
    let url = format!("{}{}", ctx.api.izsu_base_url, ctx.api.izsu_page_endpoint);
    let html = ctx.http.request_text(&url, &[]).await?;

    let mut t = Table::with_columns(table::RESERVOIR_COLUMNS);
    let mut skipped = 0;

    for cells in extract_table_rows(&html) {
        if cells.len() < 4 {
            continue;
        }
        let name = clean_name(&cells[0]);
        let volume = parse_number(&cells[1]);
        let capacity = parse_number(&cells[2]).filter(|c| *c > 0.0);
        let (Some(volume), Some(capacity)) = (volume, capacity) else {
            tracing::warn!("İZSU page: unparsable row {:?}", cells);
            skipped += 1;
            continue;
        };
        if !params.wants(&name) {
            continue;
        }
        t.push_row(vec![
            Cell::Date(params.as_of),
            Cell::text(name),
            Cell::Number(volume),
            Cell::Number(capacity),
            Cell::Number(volume / capacity),
            // The page publishes levels only, no flows
            Cell::Missing,
            Cell::Missing,
            Cell::Missing,
        ]);
    }

    Ok(TabularResult::new(t, skipped, "izsu_page"))
}

fn clean_name(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(NAME_SUFFIX)
        .trim()
        .to_string()
}

/// Text of every `<td>`/`<th>` per `<tr>`, skipping each table's header row.
///
/// Parsing stops at the first hard error and keeps what was read so far,
/// since real pages are rarely well-formed.
pub(crate) fn extract_table_rows(html: &str) -> Vec<Vec<String>> {
    let mut reader = Reader::from_str(html);
    {
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
        config.trim_text(true);
    }

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut current_row: Option<Vec<String>> = None;
    let mut current_cell: Option<String> = None;
    let mut first_row_in_table = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match local_name_str(e.name().as_ref()).as_str() {
                "table" => first_row_in_table = true,
                "tr" => current_row = Some(Vec::new()),
                "td" | "th" => current_cell = Some(String::new()),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                if matches!(local_name_str(e.name().as_ref()).as_str(), "td" | "th") {
                    if let Some(row) = current_row.as_mut() {
                        row.push(String::new());
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(cell) = current_cell.as_mut() {
                    let text = e
                        .unescape()
                        .map(|t| t.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(e).into_owned());
                    if !cell.is_empty() {
                        cell.push(' ');
                    }
                    cell.push_str(text.trim());
                }
            }
            Ok(Event::End(ref e)) => match local_name_str(e.name().as_ref()).as_str() {
                "td" | "th" => {
                    if let (Some(row), Some(cell)) = (current_row.as_mut(), current_cell.take()) {
                        row.push(cell);
                    }
                }
                "tr" => {
                    if let Some(row) = current_row.take() {
                        if first_row_in_table {
                            first_row_in_table = false;
                        } else {
                            rows.push(row);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::warn!("Stopped parsing HTML at byte {}: {}", reader.buffer_position(), e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    rows
}

/// Lowercased element name without namespace prefix.
fn local_name_str(full: &[u8]) -> String {
    let s = std::str::from_utf8(full).unwrap_or("");
    let local = s.rsplit(':').next().unwrap_or(s);
    local.to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiSettings, ReservoirCatalog};
    use crate::services::http::{RetryPolicy, RetryingHttpClient};
    use crate::services::sources::DateWindow;
    use chrono::NaiveDate;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params(entities: &[&str]) -> FetchParams {
        FetchParams::new(
            entities.iter().map(|e| e.to_string()).collect(),
            DateWindow::Days(30),
            NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
        )
    }

    fn ctx(base: &str) -> RemoteContext {
        let api = ApiSettings {
            izsu_base_url: base.to_string(),
            ..ApiSettings::default()
        };
        RemoteContext {
            http: RetryingHttpClient::new(
                RetryPolicy {
                    max_retries: 0,
                    base_delay: Duration::from_millis(1),
                    timeout: Duration::from_secs(5),
                },
                "test",
            ),
            api,
            catalog: ReservoirCatalog::default(),
        }
    }

    const PAGE: &str = r#"
        <html><body>
        <table class="dams">
          <tr><th>Baraj</th><th>Hacim</th><th>Kapasite</th><th>Doluluk</th></tr>
          <tr><td>Tahtalı Barajı</td><td>75,0</td><td>150,0</td><td>%50</td></tr>
          <tr><td>Balçova</td><td>12,5</td><td>25</td><td>%50</td></tr>
          <tr><td>Bozuk</td><td>yok</td><td>10</td><td>-</td></tr>
          <tr><td>Kısa</td><td>1</td></tr>
        </table>
        </body></html>
    "#;

    #[test]
    fn test_extract_table_rows_skips_header() {
        let rows = extract_table_rows(PAGE);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], vec!["Tahtalı Barajı", "75,0", "150,0", "%50"]);
    }

    #[test]
    fn test_extract_table_rows_tolerates_bad_markup() {
        let html = "<table><tr><th>h</th></tr><tr><td>A<br>x</td><td>1</td></tr></table>";
        let rows = extract_table_rows(html);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], "A x");
    }

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name(" Tahtalı Barajı "), "Tahtalı");
        assert_eq!(clean_name("Gediz"), "Gediz");
    }

    #[test]
    fn test_parse_results() {
        let payload = serde_json::json!({
            "results": [
                {"date": "2026-03-30", "dam_name": "Tahtalı", "current_volume_mcm": 75.0,
                 "total_capacity_mcm": 150.0, "fill_ratio": 0.5, "inflow_mcm": "1,5"},
                {"date": "2026-03-31", "reservoir": "Gediz", "volume_mcm": 40, "capacity_mcm": 80,
                 "fill_ratio": 0.5},
                {"date": "not a date", "dam_name": "Gediz"},
                {"dam_name": "Çamlı"},
                "garbage",
                {"date": "2025-01-01", "dam_name": "Gediz", "fill_ratio": 0.5}
            ]
        });
        let (t, skipped) = parse_results(&payload, &params(&[])).unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(skipped, 3);
        let first = t.row(0).unwrap();
        assert_eq!(first.number(table::INFLOW), Some(1.5));
        assert_eq!(first.number(table::VOLUME), Some(75.0));
        assert_eq!(t.row(1).unwrap().text(table::RESERVOIR), Some("Gediz"));
    }

    #[test]
    fn test_parse_results_filters_entities() {
        let payload = serde_json::json!({"results": [
            {"date": "2026-03-30", "dam_name": "Tahtalı", "fill_ratio": 0.5},
            {"date": "2026-03-30", "dam_name": "Gediz", "fill_ratio": 0.5}
        ]});
        let (t, _) = parse_results(&payload, &params(&["Gediz"])).unwrap();
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_parse_results_requires_results_key() {
        let err = parse_results(&serde_json::json!({"data": []}), &params(&[])).unwrap_err();
        assert!(matches!(err, SourceError::Malformed(_)));
    }

    #[test]
    fn test_json_number() {
        assert_eq!(json_number(&serde_json::json!(2)), Some(2.0));
        assert_eq!(json_number(&serde_json::json!("2,5")), Some(2.5));
        assert_eq!(json_number(&serde_json::json!(null)), None);
    }

    #[tokio::test]
    async fn test_fetch_api_sends_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/dam-data"))
            .and(query_param("start_date", "2026-03-01"))
            .and(query_param("end_date", "2026-03-31"))
            .and(query_param("dam_names", "Tahtalı"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"date": "2026-03-31", "dam_name": "Tahtalı",
                             "current_volume_mcm": 90, "total_capacity_mcm": 150, "fill_ratio": 0.6}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = fetch_api(&ctx(&server.uri()), &params(&["Tahtalı"])).await.unwrap();
        assert_eq!(result.table.len(), 1);
        assert_eq!(result.origin, "izsu_api");
    }

    #[tokio::test]
    async fn test_fetch_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tr/baraj-doluluk-oranlari"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let result = fetch_page(&ctx(&server.uri()), &params(&[])).await.unwrap();
        assert_eq!(result.table.len(), 2);
        assert_eq!(result.skipped, 1);
        let tahtali = result.table.row(0).unwrap();
        assert_eq!(tahtali.text(table::RESERVOIR), Some("Tahtalı"));
        assert_eq!(tahtali.number(table::FILL_RATIO), Some(0.5));
        assert_eq!(
            tahtali.date(table::DATE),
            NaiveDate::from_ymd_opt(2026, 3, 31)
        );
        assert_eq!(tahtali.number(table::INFLOW), None);
        assert_eq!(tahtali.number(table::OUTFLOW), None);
        assert_eq!(tahtali.number(table::EVAPORATION), None);
    }
}
