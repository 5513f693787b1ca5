//! Grid projection for a race that has not happened yet.
//!
//! The model was trained on Q1/Q2 inputs that do not exist before the
//! weekend, so each driver gets a synthetic feature row built from history.
//! The model's estimate is then blended with a heuristic built from relative
//! pace factors and a circuit baseline lap.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PredictorError, Result};
use crate::features::{
    pace_ratios, sessions, sorted_records, EngineeredDataset, EngineeredRow, FeatureEngineer,
    FeatureMatrix, FormTracker, FEATURE_NAMES,
};
use crate::model::RegressionModel;
use crate::types::{GridPrediction, SessionDataset, Weather};

/// Multiplicative lap-time coefficient per track condition, dry = 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherFactors {
    pub dry: f64,
    pub damp: f64,
    pub wet: f64,
}

impl Default for WeatherFactors {
    fn default() -> Self {
        Self {
            dry: 1.0,
            damp: 1.05,
            wet: 1.12,
        }
    }
}

impl WeatherFactors {
    pub fn coefficient(&self, weather: Weather) -> f64 {
        match weather {
            Weather::Dry => self.dry,
            Weather::Damp => self.damp,
            Weather::Wet => self.wet,
        }
    }
}

/// Where the heuristic takes its reference lap for a circuit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum BaselineSource {
    /// Mean session-best lap at the circuit, dry sessions preferred.
    #[default]
    Historical,
    /// Fixed reference laps in seconds, keyed by circuit name.
    Static { laps: BTreeMap<String, f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridSettings {
    /// Share of the driver factor in the heuristic; the team gets the rest.
    pub driver_weight: f64,
    pub baseline: BaselineSource,
    /// Used for damp/wet when history has no comparable sessions.
    pub default_weather: WeatherFactors,
}

impl Default for HybridSettings {
    fn default() -> Self {
        Self {
            driver_weight: 0.5,
            baseline: BaselineSource::default(),
            default_weather: WeatherFactors::default(),
        }
    }
}

impl HybridSettings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.driver_weight) {
            return Err(PredictorError::Configuration(format!(
                "driver_weight must be in [0, 1], got {}",
                self.driver_weight
            )));
        }
        for weather in Weather::ALL {
            let c = self.default_weather.coefficient(weather);
            if !(c.is_finite() && c > 0.0) {
                return Err(PredictorError::Configuration(format!(
                    "{} weather coefficient must be positive, got {}",
                    weather, c
                )));
            }
        }
        if let BaselineSource::Static { laps } = &self.baseline {
            if let Some((circuit, lap)) = laps.iter().find(|(_, v)| !(v.is_finite() && **v > 0.0)) {
                return Err(PredictorError::Configuration(format!(
                    "static baseline for {} must be a positive lap time, got {}",
                    circuit, lap
                )));
            }
        }
        Ok(())
    }
}

/// Relative pace per driver and team (1.0 = session best, larger is slower)
/// plus weather coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceFactors {
    pub drivers: BTreeMap<String, f64>,
    pub teams: BTreeMap<String, f64>,
    pub weather: WeatherFactors,
}

impl PerformanceFactors {
    /// Factors over every session in `dataset`.
    ///
    /// A damp/wet coefficient is the mean ratio of a session's best lap to the
    /// mean dry best lap at the same circuit; conditions never observed next
    /// to a dry session keep the value from `defaults`.
    pub fn from_history(dataset: &SessionDataset, defaults: &WeatherFactors) -> Self {
        let sorted = sorted_records(dataset.records());
        let mut drivers: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let mut teams: BTreeMap<String, (f64, usize)> = BTreeMap::new();

        for session in sessions(&sorted) {
            for (record, ratio) in session.iter().zip(pace_ratios(session)) {
                let Some(ratio) = ratio else { continue };
                accumulate(&mut drivers, &record.driver, ratio);
                accumulate(&mut teams, &record.team, ratio);
            }
        }

        let bests = session_bests(dataset);
        let mut dry_by_circuit: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        for b in bests.iter().filter(|b| b.weather == Weather::Dry) {
            let e = dry_by_circuit.entry(b.circuit.as_str()).or_insert((0.0, 0));
            e.0 += b.lap;
            e.1 += 1;
        }
        let weather_ratio = |weather: Weather, fallback: f64| {
            let ratios: Vec<f64> = bests
                .iter()
                .filter(|b| b.weather == weather)
                .filter_map(|b| {
                    dry_by_circuit
                        .get(b.circuit.as_str())
                        .map(|(sum, n)| b.lap / (sum / *n as f64))
                })
                .collect();
            if ratios.is_empty() {
                fallback
            } else {
                ratios.iter().sum::<f64>() / ratios.len() as f64
            }
        };

        let weather = WeatherFactors {
            dry: 1.0,
            damp: weather_ratio(Weather::Damp, defaults.damp),
            wet: weather_ratio(Weather::Wet, defaults.wet),
        };
        debug!(
            "performance factors: {} drivers, {} teams, damp={:.4} wet={:.4}",
            drivers.len(),
            teams.len(),
            weather.damp,
            weather.wet
        );

        Self {
            drivers: finish_means(drivers),
            teams: finish_means(teams),
            weather,
        }
    }

    pub fn driver_factor(&self, driver: &str) -> Result<f64> {
        self.drivers.get(driver).copied().ok_or_else(|| {
            PredictorError::DataQuality(format!("no performance factor for driver {}", driver))
        })
    }

    pub fn team_factor(&self, team: &str) -> Result<f64> {
        self.teams.get(team).copied().ok_or_else(|| {
            PredictorError::DataQuality(format!("no performance factor for team {}", team))
        })
    }
}

fn accumulate(acc: &mut BTreeMap<String, (f64, usize)>, key: &str, value: f64) {
    let e = acc.entry(key.to_string()).or_insert((0.0, 0));
    e.0 += value;
    e.1 += 1;
}

fn finish_means(acc: BTreeMap<String, (f64, usize)>) -> BTreeMap<String, f64> {
    acc.into_iter()
        .map(|(k, (sum, n))| (k, sum / n as f64))
        .collect()
}

struct SessionBest {
    circuit: String,
    weather: Weather,
    lap: f64,
}

fn session_bests(dataset: &SessionDataset) -> Vec<SessionBest> {
    let sorted = sorted_records(dataset.records());
    sessions(&sorted)
        .into_iter()
        .filter_map(|session| {
            let lap = session.iter().filter_map(|r| r.best_lap()).reduce(f64::min)?;
            let first = session.first()?;
            Some(SessionBest {
                circuit: first.circuit.clone(),
                weather: first.weather,
                lap,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub driver: String,
    pub team: String,
}

impl RosterEntry {
    pub fn new(driver: impl Into<String>, team: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            team: team.into(),
        }
    }
}

/// Everything the predictor derives from the cleaned history.
#[derive(Debug, Clone)]
pub struct RaceHistory {
    dataset: SessionDataset,
    engineered: EngineeredDataset,
    form: FormTracker,
    roster: Vec<RosterEntry>,
}

impl RaceHistory {
    pub fn build(engineer: &FeatureEngineer, dataset: SessionDataset) -> Self {
        let engineered = engineer.engineer_features(&dataset);
        let form = engineer.current_form(&dataset);
        let roster = latest_roster(&dataset);
        info!(
            "race history: {} records, {} circuits, roster of {}",
            dataset.len(),
            engineered.circuits().len(),
            roster.len()
        );
        Self {
            dataset,
            engineered,
            form,
            roster,
        }
    }

    pub fn dataset(&self) -> &SessionDataset {
        &self.dataset
    }

    pub fn engineered(&self) -> &EngineeredDataset {
        &self.engineered
    }

    pub fn form(&self) -> &FormTracker {
        &self.form
    }

    /// Drivers of the latest season in first-appearance order, each with the
    /// last team they drove for that season.
    pub fn roster(&self) -> &[RosterEntry] {
        &self.roster
    }
}

fn latest_roster(dataset: &SessionDataset) -> Vec<RosterEntry> {
    let sorted = sorted_records(dataset.records());
    let Some(latest) = sorted.iter().map(|r| r.season).max() else {
        return Vec::new();
    };
    let mut roster: Vec<RosterEntry> = Vec::new();
    for record in sorted
        .iter()
        .filter(|r| r.season == latest && r.best_lap().is_some())
    {
        match roster.iter_mut().find(|e| e.driver == record.driver) {
            Some(entry) => entry.team = record.team.clone(),
            None => roster.push(RosterEntry::new(record.driver.clone(), record.team.clone())),
        }
    }
    roster
}

/// One driver's two estimates before blending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub driver: String,
    pub team: String,
    pub ml_estimate: f64,
    pub heuristic_estimate: f64,
}

/// Blend `ml_weight · ml + (1 - ml_weight) · heuristic` and rank ascending.
///
/// Exactly equal times keep their input order.
pub fn blend_and_rank(candidates: Vec<Candidate>, ml_weight: f64) -> Result<Vec<GridPrediction>> {
    check_ml_weight(ml_weight)?;
    let mut blended: Vec<(Candidate, f64)> = candidates
        .into_iter()
        .map(|c| {
            let time = ml_weight * c.ml_estimate + (1.0 - ml_weight) * c.heuristic_estimate;
            (c, time)
        })
        .collect();
    if let Some((c, _)) = blended.iter().find(|(_, t)| !t.is_finite()) {
        return Err(PredictorError::DataQuality(format!(
            "non-finite predicted time for {}",
            c.driver
        )));
    }
    blended.sort_by(|a, b| a.1.total_cmp(&b.1));

    Ok(blended
        .into_iter()
        .enumerate()
        .map(|(i, (c, time))| GridPrediction {
            position: i + 1,
            driver: c.driver,
            team: c.team,
            predicted_q3_sec: time,
        })
        .collect())
}

fn check_ml_weight(ml_weight: f64) -> Result<()> {
    if (0.0..=1.0).contains(&ml_weight) {
        Ok(())
    } else {
        Err(PredictorError::Configuration(format!(
            "ml_weight must be in [0, 1], got {}",
            ml_weight
        )))
    }
}

pub struct HybridPredictor<'a> {
    history: &'a RaceHistory,
    model: Option<&'a RegressionModel>,
    factors: Option<PerformanceFactors>,
    roster: Option<Vec<RosterEntry>>,
    settings: HybridSettings,
}

impl<'a> HybridPredictor<'a> {
    pub fn new(history: &'a RaceHistory, model: &'a RegressionModel) -> Self {
        Self {
            model: Some(model),
            ..Self::without_model(history)
        }
    }

    pub fn without_model(history: &'a RaceHistory) -> Self {
        Self {
            history,
            model: None,
            factors: None,
            roster: None,
            settings: HybridSettings::default(),
        }
    }

    /// Use a precomputed factor table instead of deriving one from history.
    pub fn with_factors(mut self, factors: PerformanceFactors) -> Self {
        self.factors = Some(factors);
        self
    }

    pub fn with_roster(mut self, roster: Vec<RosterEntry>) -> Self {
        self.roster = Some(roster);
        self
    }

    pub fn with_settings(mut self, settings: HybridSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn roster(&self) -> &[RosterEntry] {
        self.roster.as_deref().unwrap_or(self.history.roster())
    }

    pub fn factors(&self) -> Cow<'_, PerformanceFactors> {
        match &self.factors {
            Some(f) => Cow::Borrowed(f),
            None => Cow::Owned(PerformanceFactors::from_history(
                self.history.dataset(),
                &self.settings.default_weather,
            )),
        }
    }

    /// Ranked grid for `circuit` under `weather`.
    pub fn predict_future_race(
        &self,
        circuit: &str,
        weather: Weather,
        ml_weight: f64,
    ) -> Result<Vec<GridPrediction>> {
        check_ml_weight(ml_weight)?;
        self.settings.validate()?;
        let model = self
            .model
            .filter(|m| m.is_trained())
            .ok_or(PredictorError::MissingModel)?;

        let roster = self.roster();
        if roster.is_empty() {
            debug!("empty roster for {}, nothing to rank", circuit);
            return Ok(Vec::new());
        }

        let baselines = self.baseline_features(circuit, weather)?;
        let ml = model.predict(&baselines)?;

        let candidates: Vec<Candidate> = if ml_weight == 1.0 {
            // the heuristic carries no weight, so its tables are not consulted
            roster
                .iter()
                .zip(ml)
                .map(|(entry, ml_estimate)| Candidate {
                    driver: entry.driver.clone(),
                    team: entry.team.clone(),
                    ml_estimate,
                    heuristic_estimate: ml_estimate,
                })
                .collect()
        } else {
            let factors = self.factors();
            let reference = self.circuit_baseline(circuit)?;
            let weather_coefficient = factors.weather.coefficient(weather);
            let w_d = self.settings.driver_weight;

            roster
                .iter()
                .zip(ml)
                .map(|(entry, ml_estimate)| -> Result<Candidate> {
                    let pace = w_d * factors.driver_factor(&entry.driver)?
                        + (1.0 - w_d) * factors.team_factor(&entry.team)?;
                    Ok(Candidate {
                        driver: entry.driver.clone(),
                        team: entry.team.clone(),
                        ml_estimate,
                        heuristic_estimate: reference * pace * weather_coefficient,
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        let grid = blend_and_rank(candidates, ml_weight)?;
        info!(
            "predicted {} grid of {} at {} ({}), ml_weight={}",
            model.kind(),
            grid.len(),
            circuit,
            weather,
            ml_weight
        );
        Ok(grid)
    }

    /// Synthetic feature rows for the roster, in roster order.
    pub fn baseline_features(&self, circuit: &str, weather: Weather) -> Result<FeatureMatrix> {
        let engineered = self.history.engineered();
        let circuit_idx = engineered.circuit_index(circuit) as f64;
        let form = self.history.form();

        let rows = self
            .roster()
            .iter()
            .map(|entry| -> Result<Vec<f64>> {
                let laps = lap_averages(engineered.rows(), &entry.driver, circuit).ok_or_else(|| {
                    PredictorError::DataQuality("history has no rows with Q1 and Q2 times".into())
                })?;
                let driver_form = form.driver_form(&entry.driver).ok_or_else(|| {
                    PredictorError::DataQuality(format!("no recent form for driver {}", entry.driver))
                })?;
                let team_form = form.team_form(&entry.team).ok_or_else(|| {
                    PredictorError::DataQuality(format!("no recent form for team {}", entry.team))
                })?;
                let mut row = laps.to_vec();
                row.extend([driver_form, team_form, circuit_idx, weather.index() as f64]);
                Ok(row)
            })
            .collect::<Result<Vec<_>>>()?;

        FeatureMatrix::from_rows(FEATURE_NAMES.iter().map(|s| s.to_string()).collect(), &rows)
    }

    /// Reference lap the heuristic scales from.
    pub fn circuit_baseline(&self, circuit: &str) -> Result<f64> {
        match &self.settings.baseline {
            BaselineSource::Static { laps } => laps.get(circuit).copied().ok_or_else(|| {
                PredictorError::Configuration(format!("no static baseline lap for {}", circuit))
            }),
            BaselineSource::Historical => {
                let bests = session_bests(self.history.dataset());
                mean_lap(&bests, |b| b.circuit == circuit && b.weather == Weather::Dry)
                    .or_else(|| mean_lap(&bests, |b| b.circuit == circuit))
                    .or_else(|| mean_lap(&bests, |b| b.weather == Weather::Dry))
                    .or_else(|| mean_lap(&bests, |_| true))
                    .ok_or_else(|| {
                        PredictorError::DataQuality("history has no timed sessions".into())
                    })
            }
        }
    }
}

fn mean_lap<F>(bests: &[SessionBest], keep: F) -> Option<f64>
where
    F: Fn(&SessionBest) -> bool,
{
    let laps: Vec<f64> = bests.iter().filter(|b| keep(b)).map(|b| b.lap).collect();
    (!laps.is_empty()).then(|| laps.iter().sum::<f64>() / laps.len() as f64)
}

/// Mean `q1_sec`, `q2_sec`, `q1_q2_gap` and `gap_to_session_best`, narrowing
/// from the driver at this circuit out to every row in history.
fn lap_averages(rows: &[EngineeredRow], driver: &str, circuit: &str) -> Option<[f64; 4]> {
    let scopes = [
        (Some(driver), Some(circuit)),
        (None, Some(circuit)),
        (Some(driver), None),
        (None, None),
    ];
    scopes.into_iter().find_map(|(want_driver, want_circuit)| {
        let mut sum = [0.0; 4];
        let mut n = 0usize;
        for row in rows {
            if want_driver.map_or(false, |d| row.record.driver != d)
                || want_circuit.map_or(false, |c| row.record.circuit != c)
            {
                continue;
            }
            let (Some(q1), Some(q2), Some(gap), Some(to_best)) = (
                row.record.q1_sec,
                row.record.q2_sec,
                row.q1_q2_gap,
                row.gap_to_session_best,
            ) else {
                continue;
            };
            for (acc, v) in sum.iter_mut().zip([q1, q2, gap, to_best]) {
                *acc += v;
            }
            n += 1;
        }
        (n > 0).then(|| sum.map(|s| s / n as f64))
    })
}
