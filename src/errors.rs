use std::path::PathBuf;

/// Errors raised while acquiring tabular data from a source.
///
/// Only `SourceNotFound` is meant to reach the caller of a constructor; every
/// other variant is absorbed by the fallback chain or by `DataService`, which
/// degrade to the next provider or to an empty result.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Upstream unavailable after {attempts} attempt(s) to {url}: {last_error}")]
    UpstreamUnavailable {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Missing API key for {0}")]
    MissingApiKey(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Delimited text error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),
}

impl From<calamine::Error> for SourceError {
    fn from(err: calamine::Error) -> Self {
        SourceError::Spreadsheet(err.to_string())
    }
}

/// Errors raised while loading configuration files.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read catalog {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid catalog entry '{name}': {reason}")]
    InvalidEntry { name: String, reason: String },
}

/// Why a fetched table was judged unusable.
///
/// Validation never fails a run: `DataService` logs the reason and treats the
/// category as empty for that call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("result is empty")]
    Empty,

    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("column '{column}' is {pct:.1}% missing (limit {limit_pct:.1}%)", pct = .ratio * 100.0, limit_pct = .limit * 100.0)]
    TooManyMissing {
        column: String,
        ratio: f64,
        limit: f64,
    },

    #[error("only {rows} rows, at least {min} required")]
    TooFewRows { rows: usize, min: usize },
}

/// A single reading violated a domain invariant and was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadingError {
    #[error("Invariant violation for '{reservoir}' on {date}: {reason}")]
    InvariantViolation {
        reservoir: String,
        date: chrono::NaiveDate,
        reason: String,
    },

    #[error("Row {row}: {reason}")]
    UnreadableRow { row: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_not_found_display() {
        let err = SourceError::SourceNotFound(PathBuf::from("/data/missing.csv"));
        assert_eq!(err.to_string(), "Source not found: /data/missing.csv");
    }

    #[test]
    fn test_upstream_unavailable_display() {
        let err = SourceError::UpstreamUnavailable {
            url: "http://example.test/api".to_string(),
            attempts: 4,
            last_error: "HTTP 503".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Upstream unavailable after 4 attempt(s) to http://example.test/api: HTTP 503"
        );
    }

    #[test]
    fn test_too_many_missing_display() {
        let err = ValidationFailure::TooManyMissing {
            column: "fill_ratio".to_string(),
            ratio: 0.5,
            limit: 0.2,
        };
        assert_eq!(
            err.to_string(),
            "column 'fill_ratio' is 50.0% missing (limit 20.0%)"
        );
    }

    #[test]
    fn test_missing_columns_display() {
        let err = ValidationFailure::MissingColumns(vec!["date".into(), "reservoir".into()]);
        assert_eq!(err.to_string(), "missing required columns: date, reservoir");
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SourceError = io.into();
        assert!(matches!(err, SourceError::Io(_)));
    }

    #[test]
    fn test_errors_are_send_sync() {
        fn assert_bounds<T: Send + Sync + std::error::Error>() {}
        assert_bounds::<SourceError>();
        assert_bounds::<ValidationFailure>();
        assert_bounds::<ReadingError>();
        assert_bounds::<ConfigError>();
    }
}
