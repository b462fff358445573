pub mod reading;
pub mod registry;
pub mod reservoir;

pub use reading::{ForecastDay, ReadingDraft, ReservoirReading, WeatherReading};
pub use registry::{OverallStatus, PopulateReport, ReservoirRegistry};
pub use reservoir::{DroughtLevel, PredictionPoint, Reservoir, ReservoirSummary, Trend, WaterBalance};
