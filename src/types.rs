use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PredictorError;

/// Track condition during a session.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Weather {
    #[default]
    Dry,
    Damp,
    Wet,
}

impl Weather {
    pub const ALL: [Weather; 3] = [Weather::Dry, Weather::Damp, Weather::Wet];

    /// Index used in the feature matrix (dry=0, damp=1, wet=2).
    pub fn index(self) -> usize {
        match self {
            Weather::Dry => 0,
            Weather::Damp => 1,
            Weather::Wet => 2,
        }
    }

    /// Map a free-form label from a timing feed onto the fixed vocabulary.
    pub fn coerce(label: &str) -> Option<Weather> {
        match label.trim().to_ascii_lowercase().as_str() {
            "dry" | "sunny" | "clear" | "fine" | "cloudy" | "overcast" => Some(Weather::Dry),
            "damp" | "mixed" | "drying" | "intermediate" | "inter" | "light rain"
            | "drizzle" => Some(Weather::Damp),
            "wet" | "rain" | "rainy" | "heavy rain" | "storm" => Some(Weather::Wet),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Weather::Dry => "dry",
            Weather::Damp => "damp",
            Weather::Wet => "wet",
        }
    }
}

impl fmt::Display for Weather {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Weather {
    type Err = PredictorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Weather::coerce(s)
            .ok_or_else(|| PredictorError::Configuration(format!("unknown weather '{}'", s)))
    }
}

/// One row as delivered by a session source, before any cleaning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawSessionRecord {
    pub driver: String,
    pub team: String,
    pub circuit: String,
    pub season: i32,
    pub round: u32,
    // null/absent: the driver did not reach that segment
    #[serde(default)]
    pub q1_sec: Option<f64>,
    #[serde(default)]
    pub q2_sec: Option<f64>,
    #[serde(default)]
    pub q3_sec: Option<f64>,
    #[serde(default)]
    pub weather: Option<String>,
}

/// One driver's result in one qualifying session after cleaning.
///
/// A `None` segment time means the driver was eliminated before that segment.
/// Cleaning guarantees `q3_sec.is_some() => q2_sec.is_some() => q1_sec.is_some()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub driver: String,
    pub team: String,
    pub circuit: String,
    pub season: i32,
    pub round: u32,
    pub q1_sec: Option<f64>,
    pub q2_sec: Option<f64>,
    pub q3_sec: Option<f64>,
    pub weather: Weather,
}

impl SessionRecord {
    /// Ordering key of the session this record belongs to.
    pub fn session_key(&self) -> (i32, u32) {
        (self.season, self.round)
    }

    /// Fastest lap the driver set in any segment they took part in.
    pub fn best_lap(&self) -> Option<f64> {
        [self.q1_sec, self.q2_sec, self.q3_sec]
            .into_iter()
            .flatten()
            .reduce(f64::min)
    }
}

/// Cleaned historical sessions, in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionDataset {
    records: Vec<SessionRecord>,
}

impl SessionDataset {
    pub fn new(records: Vec<SessionRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_records(self) -> Vec<SessionRecord> {
        self.records
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPrediction {
    pub position: usize,
    pub driver: String,
    pub team: String,
    pub predicted_q3_sec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationMetrics {
    pub mae_mean: f64,
    pub mae_std: f64,
    pub r2_mean: f64,
    pub r2_std: f64,
}

/// Actual vs predicted lap for one held-out row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticPoint {
    pub driver: String,
    pub team: String,
    pub circuit: String,
    pub season: i32,
    pub round: u32,
    pub actual: f64,
    pub predicted: f64,
    pub residual: f64,
}

/// Data behind the actual-vs-predicted and per-group error plots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionDiagnostics {
    pub points: Vec<DiagnosticPoint>,
    pub mae_by_driver: BTreeMap<String, f64>,
    pub mae_by_circuit: BTreeMap<String, f64>,
}
