// Reservoir Watch v0.1
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reservoir_watch::models::OverallStatus;
use reservoir_watch::services::sources::{DateWindow, Provider, SourceSelector};
use reservoir_watch::{Pipeline, RunRequest, Settings};

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout carries only the report
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reservoir_watch=info".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let settings = Settings::from_env();
    let request = match request_from_lookup(&settings, |key| std::env::var(key).ok()) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!("Invalid run configuration: {}", e);
            std::process::exit(2);
        }
    };

    let mut pipeline = Pipeline::new(settings);
    let output = match pipeline.run(&request).await {
        Ok(output) => output,
        Err(e) => {
            tracing::error!("Run failed: {}", e);
            std::process::exit(1);
        }
    };

    match &output.report.overall {
        OverallStatus::Summary {
            total,
            at_risk,
            mean_fill_ratio,
            ..
        } => tracing::info!(
            "{} reservoirs analysed, {} at risk, mean fill ratio {}",
            total,
            at_risk,
            mean_fill_ratio.map_or("n/a".to_string(), |r| format!("{:.1}%", r * 100.0))
        ),
        OverallStatus::NoReservoirs => tracing::warn!("No reservoir data could be analysed"),
    }

    match serde_json::to_string_pretty(&output.report) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            tracing::error!("Failed to serialise report: {}", e);
            std::process::exit(1);
        }
    }
}

/// Build a run from `RESERVOIR_SOURCE`/`WEATHER_SOURCE` (api, file or
/// synthetic), their `*_FILE` and `*_PROVIDER` companions, `RESERVOIRS`
/// (comma separated) and the `DAYS` window from settings.
fn request_from_lookup<F>(settings: &Settings, lookup: F) -> Result<RunRequest, String>
where
    F: Fn(&str) -> Option<String>,
{
    let reservoirs = lookup("RESERVOIRS")
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(RunRequest {
        reservoirs,
        window: DateWindow::Days(settings.data.default_days),
        reservoir_source: selector(&lookup, "RESERVOIR")?,
        weather_source: selector(&lookup, "WEATHER")?,
        prediction_days: None,
        as_of: None,
    })
}

fn selector<F>(lookup: &F, prefix: &str) -> Result<SourceSelector, String>
where
    F: Fn(&str) -> Option<String>,
{
    let kind = lookup(&format!("{}_SOURCE", prefix)).unwrap_or_else(|| "api".to_string());
    match kind.trim().to_lowercase().as_str() {
        "api" => {
            let provider = lookup(&format!("{}_PROVIDER", prefix))
                .map(|p| p.parse::<Provider>())
                .transpose()?;
            Ok(SourceSelector::Api { provider })
        }
        "file" => {
            let var = format!("{}_FILE", prefix);
            let path = lookup(&var).ok_or_else(|| format!("{} is required for file sources", var))?;
            Ok(SourceSelector::File {
                path: PathBuf::from(path),
            })
        }
        "synthetic" => Ok(SourceSelector::Synthetic),
        other => Err(format!("unknown {}_SOURCE '{}'", prefix, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_api() {
        let r = request_from_lookup(&Settings::default(), lookup(&[])).unwrap();
        assert_eq!(r.reservoir_source, SourceSelector::Api { provider: None });
        assert_eq!(r.window, DateWindow::Days(30));
        assert!(r.reservoirs.is_empty());
    }

    #[test]
    fn test_file_and_provider() {
        let r = request_from_lookup(
            &Settings::default(),
            lookup(&[
                ("RESERVOIR_SOURCE", "file"),
                ("RESERVOIR_FILE", "data/dams.csv"),
                ("WEATHER_PROVIDER", "mgm"),
                ("RESERVOIRS", "Tahtalı, Gediz,"),
            ]),
        )
        .unwrap();
        assert_eq!(
            r.reservoir_source,
            SourceSelector::File {
                path: PathBuf::from("data/dams.csv")
            }
        );
        assert_eq!(
            r.weather_source,
            SourceSelector::Api {
                provider: Some(Provider::Mgm)
            }
        );
        assert_eq!(r.reservoirs, vec!["Tahtalı", "Gediz"]);
    }

    #[test]
    fn test_invalid_selectors() {
        assert!(request_from_lookup(&Settings::default(), lookup(&[("WEATHER_SOURCE", "file")])).is_err());
        assert!(request_from_lookup(&Settings::default(), lookup(&[("RESERVOIR_SOURCE", "ftp")])).is_err());
        assert!(request_from_lookup(&Settings::default(), lookup(&[("RESERVOIR_PROVIDER", "x")])).is_err());
    }
}
