//! Weather providers: Open-Meteo, MGM and OpenWeather.
//!
//! Open-Meteo and OpenWeather are queried once per reservoir at the
//! reservoir's coordinates, with at most `max_concurrent_requests` calls in
//! flight. MGM reports a single city station, so its records are copied to
//! every requested reservoir.

use chrono::{DateTime, NaiveDate};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;

use crate::config::{nearest_station, ReservoirSite};
use crate::errors::SourceError;
use crate::helpers::parse_date;
use crate::models::ForecastDay;
use crate::services::sources::izsu::json_number;
use crate::services::sources::{FetchParams, RemoteContext, TabularResult};
use crate::table::{self, Cell, Table};

const METEO_DAILY: &str = "temperature_2m_max,temperature_2m_min,precipitation_sum,\
relative_humidity_2m_mean,pressure_msl_mean,wind_speed_10m_max";
const METEO_FORECAST_DAILY: &str = "temperature_2m_max,precipitation_sum";
const TIMEZONE: &str = "Europe/Istanbul";

/// Coordinates reported for the MGM city station.
const MGM_LATITUDE: f64 = 38.4192;
const MGM_LONGITUDE: f64 = 27.1287;

type SiteRows = (Vec<Vec<Cell>>, usize);

// ---------------------------------------------------------------------------
// Open-Meteo
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MeteoResponse {
    daily: MeteoDaily,
}

#[derive(Debug, Deserialize)]
struct MeteoDaily {
    time: Vec<String>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_sum: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    pressure_msl_mean: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m_max: Vec<Option<f64>>,
}

fn at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

pub async fn fetch_open_meteo(
    ctx: &RemoteContext,
    params: &FetchParams,
) -> Result<TabularResult, SourceError> {
    let url = format!("{}{}", ctx.api.meteo_base_url, ctx.api.meteo_endpoint);
    let url = url.as_str();
    let (start, end) = params.date_range();

    let (rows, skipped) = for_each_site(ctx, sites_for(ctx, params), |site| async move {
        let query = [
            ("latitude", site.latitude.to_string()),
            ("longitude", site.longitude.to_string()),
            ("start_date", start.to_string()),
            ("end_date", end.to_string()),
            ("daily", METEO_DAILY.to_string()),
            ("timezone", TIMEZONE.to_string()),
        ];
        let payload = ctx.http.request(url, &query).await?;
        meteo_rows(payload, &site)
    })
    .await?;

    Ok(TabularResult::new(into_table(rows), skipped, "open_meteo"))
}

fn meteo_rows(payload: Value, site: &ReservoirSite) -> Result<SiteRows, SourceError> {
    let response: MeteoResponse = serde_json::from_value(payload)
        .map_err(|e| SourceError::Malformed(format!("Open-Meteo daily block: {}", e)))?;
    let daily = response.daily;
    let station = nearest_station(site.latitude, site.longitude)
        .map(|s| s.id.to_string())
        .unwrap_or_else(|| format!("Open-Meteo_{}", site.name));

    let mut rows = Vec::with_capacity(daily.time.len());
    let mut skipped = 0;
    for (i, raw_date) in daily.time.iter().enumerate() {
        let Some(date) = parse_date(raw_date) else {
            skipped += 1;
            continue;
        };
        rows.push(vec![
            Cell::Date(date),
            Cell::text(site.name.clone()),
            Cell::number(at(&daily.temperature_2m_max, i)),
            Cell::number(at(&daily.temperature_2m_min, i)),
            Cell::number(at(&daily.precipitation_sum, i)),
            Cell::number(at(&daily.relative_humidity_2m_mean, i)),
            Cell::number(at(&daily.pressure_msl_mean, i)),
            Cell::number(at(&daily.wind_speed_10m_max, i)),
            Cell::text(station.clone()),
            Cell::Number(site.latitude),
            Cell::Number(site.longitude),
        ]);
    }
    Ok((rows, skipped))
}

/// Daily Open-Meteo forecast for one site, used to drive `predict`.
///
/// Blank days fall back to 0 mm and [`ForecastDay::DEFAULT_TEMPERATURE_C`].
pub async fn fetch_forecast(
    ctx: &RemoteContext,
    site: &ReservoirSite,
    days: u32,
) -> Result<Vec<ForecastDay>, SourceError> {
    let url = format!("{}{}", ctx.api.meteo_base_url, ctx.api.meteo_endpoint);
    let query = [
        ("latitude", site.latitude.to_string()),
        ("longitude", site.longitude.to_string()),
        ("daily", METEO_FORECAST_DAILY.to_string()),
        ("forecast_days", days.to_string()),
        ("timezone", TIMEZONE.to_string()),
    ];
    let payload = ctx.http.request(&url, &query).await?;
    let response: MeteoResponse = serde_json::from_value(payload)
        .map_err(|e| SourceError::Malformed(format!("Open-Meteo forecast: {}", e)))?;
    let daily = response.daily;

    Ok(daily
        .time
        .iter()
        .enumerate()
        .filter_map(|(i, raw)| {
            Some(ForecastDay {
                date: parse_date(raw)?,
                precipitation_mm: at(&daily.precipitation_sum, i).unwrap_or(0.0),
                temperature_c: at(&daily.temperature_2m_max, i)
                    .unwrap_or(ForecastDay::DEFAULT_TEMPERATURE_C),
            })
        })
        .collect())
}

// ---------------------------------------------------------------------------
// MGM
// ---------------------------------------------------------------------------

pub async fn fetch_mgm(ctx: &RemoteContext, params: &FetchParams) -> Result<TabularResult, SourceError> {
    let url = format!("{}{}", ctx.api.mgm_base_url, ctx.api.mgm_endpoint);
    let query = [
        ("istno", ctx.api.mgm_station_id.clone()),
        ("gunluk", "1".to_string()),
    ];
    let payload = ctx.http.request(&url, &query).await?;
    let entities = params.entities_or_all(&ctx.catalog);
    let (table, skipped) = mgm_table(&payload, &entities, &ctx.api.mgm_station_id, params)?;
    Ok(TabularResult::new(table, skipped, "mgm"))
}

pub(crate) fn mgm_table(
    payload: &Value,
    entities: &[String],
    station_id: &str,
    params: &FetchParams,
) -> Result<(Table, usize), SourceError> {
    let records = payload
        .as_array()
        .ok_or_else(|| SourceError::Malformed("MGM response is not an array".to_string()))?;
    let (start, end) = params.date_range();
    let station = format!("MGM_{}", station_id);

    let mut skipped = 0;
    let mut days = Vec::new();
    for record in records {
        let Some(date) = record.get("tarih").and_then(Value::as_str).and_then(parse_date) else {
            skipped += 1;
            continue;
        };
        if date < start || date > end {
            continue;
        }
        let field = |key: &str| Cell::number(record.get(key).and_then(json_number));
        days.push((
            date,
            [field("mak"), field("min"), field("yagis"), field("nem"), field("basinc"), field("ruzgar")],
        ));
    }

    let mut t = Table::with_columns(table::WEATHER_COLUMNS);
    for name in entities {
        for (date, [t_max, t_min, rain, humidity, pressure, wind]) in &days {
            t.push_row(vec![
                Cell::Date(*date),
                Cell::text(name.clone()),
                t_max.clone(),
                t_min.clone(),
                rain.clone(),
                humidity.clone(),
                pressure.clone(),
                wind.clone(),
                Cell::text(station.clone()),
                Cell::Number(MGM_LATITUDE),
                Cell::Number(MGM_LONGITUDE),
            ]);
        }
    }
    Ok((t, skipped))
}

// ---------------------------------------------------------------------------
// OpenWeather
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OneCallResponse {
    #[serde(default)]
    daily: Vec<OneCallDay>,
}

#[derive(Debug, Deserialize)]
struct OneCallDay {
    dt: i64,
    temp: OneCallTemp,
    rain: Option<Value>,
    snow: Option<Value>,
    humidity: Option<f64>,
    pressure: Option<f64>,
    wind_speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OneCallTemp {
    max: Option<f64>,
    min: Option<f64>,
}

/// Precipitation comes either as a number or as `{"1h": x}`.
fn volume_mm(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Object(map)) => map.get("1h").and_then(json_number).unwrap_or(0.0),
        Some(other) => json_number(other).unwrap_or(0.0),
        None => 0.0,
    }
}

/// OpenWeather One Call `daily` block.
///
/// The block only holds today and the days ahead, so this provider can
/// only fill windows that reach today. Days outside the window are dropped;
/// a purely historical window comes back empty and the chain moves on.
pub async fn fetch_openweather(
    ctx: &RemoteContext,
    params: &FetchParams,
) -> Result<TabularResult, SourceError> {
    let Some(key) = ctx.api.openweather_api_key.as_deref() else {
        return Err(SourceError::MissingApiKey("OpenWeather"));
    };
    let url = format!("{}/onecall", ctx.api.openweather_base_url);
    let url = url.as_str();
    let window = params.date_range();

    let (rows, skipped) = for_each_site(ctx, sites_for(ctx, params), |site| async move {
        let query = [
            ("lat", site.latitude.to_string()),
            ("lon", site.longitude.to_string()),
            ("appid", key.to_string()),
            ("units", "metric".to_string()),
            ("exclude", "minutely,alerts".to_string()),
        ];
        let payload = ctx.http.request(url, &query).await?;
        openweather_rows(payload, &site, window)
    })
    .await?;

    Ok(TabularResult::new(into_table(rows), skipped, "openweather"))
}

fn openweather_rows(
    payload: Value,
    site: &ReservoirSite,
    (start, end): (NaiveDate, NaiveDate),
) -> Result<SiteRows, SourceError> {
    let response: OneCallResponse = serde_json::from_value(payload)
        .map_err(|e| SourceError::Malformed(format!("OpenWeather daily block: {}", e)))?;
    let station = format!("OpenWeather_{}", site.name);

    let mut rows = Vec::new();
    let mut skipped = 0;
    for day in &response.daily {
        let Some(date) = DateTime::from_timestamp(day.dt, 0).map(|dt| dt.date_naive()) else {
            skipped += 1;
            continue;
        };
        if date < start || date > end {
            continue;
        }
        let precipitation = volume_mm(day.rain.as_ref()) + volume_mm(day.snow.as_ref());
        rows.push(vec![
            Cell::Date(date),
            Cell::text(site.name.clone()),
            Cell::number(day.temp.max),
            Cell::number(day.temp.min),
            Cell::Number(precipitation),
            Cell::number(day.humidity),
            Cell::number(day.pressure),
            Cell::number(day.wind_speed),
            Cell::text(station.clone()),
            Cell::Number(site.latitude),
            Cell::Number(site.longitude),
        ]);
    }
    Ok((rows, skipped))
}

// ---------------------------------------------------------------------------
// Per-site fan-out
// ---------------------------------------------------------------------------

/// Catalog entries for the requested reservoirs; unknown names are skipped.
fn sites_for(ctx: &RemoteContext, params: &FetchParams) -> Vec<ReservoirSite> {
    params
        .entities_or_all(&ctx.catalog)
        .into_iter()
        .filter_map(|name| {
            let site = ctx.catalog.get(&name).cloned();
            if site.is_none() {
                tracing::warn!("No coordinates for '{}', skipping weather fetch", name);
            }
            site
        })
        .collect()
}

/// Run `fetch` for each site with bounded concurrency, pausing after each
/// request. A failing site is logged and left out; only when every site
/// fails is the last error returned.
async fn for_each_site<F, Fut>(
    ctx: &RemoteContext,
    sites: Vec<ReservoirSite>,
    fetch: F,
) -> Result<SiteRows, SourceError>
where
    F: Fn(ReservoirSite) -> Fut,
    Fut: Future<Output = Result<SiteRows, SourceError>>,
{
    let pause = ctx.api.request_pause;
    let outcomes: Vec<(String, Result<SiteRows, SourceError>)> = stream::iter(sites)
        .map(|site| {
            let name = site.name.clone();
            let request = fetch(site);
            async move {
                let outcome = request.await;
                tokio::time::sleep(pause).await;
                (name, outcome)
            }
        })
        .buffered(ctx.api.max_concurrent_requests.max(1))
        .collect()
        .await;

    let mut rows = Vec::new();
    let mut skipped = 0;
    let mut succeeded = 0;
    let mut last_error = None;
    for (name, outcome) in outcomes {
        match outcome {
            Ok((site_rows, site_skipped)) => {
                succeeded += 1;
                rows.extend(site_rows);
                skipped += site_skipped;
            }
            Err(e) => {
                tracing::warn!("Weather fetch for {} failed: {}", name, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if succeeded == 0 => Err(e),
        _ => Ok((rows, skipped)),
    }
}

fn into_table(rows: Vec<Vec<Cell>>) -> Table {
    let mut t = Table::with_columns(table::WEATHER_COLUMNS);
    for row in rows {
        t.push_row(row);
    }
    t
}
