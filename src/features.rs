//! Cleaning and feature engineering for historical qualifying sessions.
//!
//! The pipeline is `clean` → `engineer_features` → `prepare_features`. The
//! engineer only carries configuration; every call works on its arguments.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PredictorError, Result};
use crate::types::{RawSessionRecord, SessionDataset, SessionRecord, Weather};

/// Numeric columns of the feature matrix, in order.
pub const FEATURE_NAMES: [&str; 8] = [
    "q1_sec",
    "q2_sec",
    "q1_q2_gap",
    "gap_to_session_best",
    "driver_form",
    "team_form",
    "circuit_idx",
    "weather_idx",
];

pub const DEFAULT_MIN_TRAINING_ROWS: usize = 10;
pub const DEFAULT_FORM_WINDOW: usize = 5;

pub type LabelVector = Array1<f64>;

/// Numeric predictors with their column names.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if columns.len() != values.ncols() {
            return Err(PredictorError::Shape {
                expected: columns.len(),
                actual: values.ncols(),
            });
        }
        Ok(Self { columns, values })
    }

    /// Build a matrix from row vectors. Every row must match `columns`.
    pub fn from_rows(columns: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let width = columns.len();
        let mut flat = Vec::with_capacity(rows.len() * width);
        for row in rows {
            if row.len() != width {
                return Err(PredictorError::Shape {
                    expected: width,
                    actual: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }
        let values = Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|e| PredictorError::DataQuality(e.to_string()))?;
        Ok(Self { columns, values })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), indices),
        }
    }
}

/// Identity of the record a feature row came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowMetadata {
    pub driver: String,
    pub team: String,
    pub circuit: String,
    pub season: i32,
    pub round: u32,
}

impl From<&SessionRecord> for RowMetadata {
    fn from(r: &SessionRecord) -> Self {
        Self {
            driver: r.driver.clone(),
            team: r.team.clone(),
            circuit: r.circuit.clone(),
            season: r.season,
            round: r.round,
        }
    }
}

/// A cleaned record with its derived context features.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineeredRow {
    pub record: SessionRecord,
    pub q1_q2_gap: Option<f64>,
    /// Contains the label, so it never enters the feature matrix.
    pub q2_q3_gap: Option<f64>,
    pub gap_to_session_best: Option<f64>,
    pub driver_form: Option<f64>,
    pub team_form: Option<f64>,
    pub circuit_idx: usize,
    pub weather_idx: usize,
}

impl EngineeredRow {
    /// Values in `FEATURE_NAMES` order, or `None` if any is missing.
    pub fn feature_vector(&self) -> Option<[f64; 8]> {
        Some([
            self.record.q1_sec?,
            self.record.q2_sec?,
            self.q1_q2_gap?,
            self.gap_to_session_best?,
            self.driver_form?,
            self.team_form?,
            self.circuit_idx as f64,
            self.weather_idx as f64,
        ])
    }
}

/// Engineered rows sorted by `(season, round, circuit, driver)`.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineeredDataset {
    rows: Vec<EngineeredRow>,
    circuits: Vec<String>,
}

impl EngineeredDataset {
    pub fn rows(&self) -> &[EngineeredRow] {
        &self.rows
    }

    /// Sorted circuit vocabulary used for `circuit_idx`.
    pub fn circuits(&self) -> &[String] {
        &self.circuits
    }

    /// Index of `circuit`; unseen circuits map to one past the vocabulary.
    pub fn circuit_index(&self, circuit: &str) -> usize {
        self.circuits
            .binary_search_by(|c| c.as_str().cmp(circuit))
            .unwrap_or(self.circuits.len())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureSettings {
    /// Historical team name → canonical name. Matched case-insensitively.
    pub team_aliases: BTreeMap<String, String>,
    pub form_window: usize,
    pub min_training_rows: usize,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        let aliases = [
            ("Toro Rosso", "RB"),
            ("Scuderia Toro Rosso", "RB"),
            ("AlphaTauri", "RB"),
            ("Scuderia AlphaTauri", "RB"),
            ("Racing Bulls", "RB"),
            ("Visa Cash App RB", "RB"),
            ("RB F1 Team", "RB"),
            ("Sauber", "Kick Sauber"),
            ("Alfa Romeo", "Kick Sauber"),
            ("Alfa Romeo Racing", "Kick Sauber"),
            ("Stake F1 Team Kick Sauber", "Kick Sauber"),
            ("Force India", "Aston Martin"),
            ("Racing Point", "Aston Martin"),
            ("Renault", "Alpine"),
            ("Alpine F1 Team", "Alpine"),
            ("Red Bull", "Red Bull Racing"),
            ("Haas", "Haas F1 Team"),
        ];
        Self {
            team_aliases: aliases
                .iter()
                .map(|(from, to)| (from.to_string(), to.to_string()))
                .collect(),
            form_window: DEFAULT_FORM_WINDOW,
            min_training_rows: DEFAULT_MIN_TRAINING_ROWS,
        }
    }
}

/// Row-aligned train/test partition of a prepared dataset.
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub x_train: FeatureMatrix,
    pub x_test: FeatureMatrix,
    pub y_train: LabelVector,
    pub y_test: LabelVector,
    pub meta_train: Vec<RowMetadata>,
    pub meta_test: Vec<RowMetadata>,
}

#[derive(Debug, Default)]
struct DropCounts {
    corrupt_lap: usize,
    segment_order: usize,
    missing_identity: usize,
    unknown_weather: usize,
    duplicate: usize,
}

impl DropCounts {
    fn total(&self) -> usize {
        self.corrupt_lap
            + self.segment_order
            + self.missing_identity
            + self.unknown_weather
            + self.duplicate
    }
}

#[derive(Debug, Clone)]
pub struct FeatureEngineer {
    aliases: HashMap<String, String>,
    form_window: usize,
    min_training_rows: usize,
}

impl Default for FeatureEngineer {
    fn default() -> Self {
        Self::new(&FeatureSettings::default())
    }
}

impl FeatureEngineer {
    pub fn new(settings: &FeatureSettings) -> Self {
        Self {
            aliases: settings
                .team_aliases
                .iter()
                .map(|(from, to)| (from.trim().to_lowercase(), to.trim().to_string()))
                .collect(),
            form_window: settings.form_window.max(1),
            min_training_rows: settings.min_training_rows,
        }
    }

    pub fn min_training_rows(&self) -> usize {
        self.min_training_rows
    }

    pub fn form_window(&self) -> usize {
        self.form_window
    }

    /// Canonical identifier for a team name, following the alias table.
    pub fn canonical_team(&self, name: &str) -> String {
        let trimmed = name.trim();
        self.aliases
            .get(&trimmed.to_lowercase())
            .cloned()
            .unwrap_or_else(|| trimmed.to_string())
    }

    /// Drop corrupt rows, canonicalise team names and weather labels.
    pub fn clean(&self, raw: &[RawSessionRecord]) -> Result<SessionDataset> {
        let mut drops = DropCounts::default();
        let mut records = Vec::with_capacity(raw.len());

        for row in raw {
            let driver = row.driver.trim();
            let circuit = row.circuit.trim();
            if driver.is_empty() || circuit.is_empty() || row.team.trim().is_empty() {
                drops.missing_identity += 1;
                continue;
            }

            let (q1, q2, q3) = match (lap(row.q1_sec), lap(row.q2_sec), lap(row.q3_sec)) {
                (Ok(q1), Ok(q2), Ok(q3)) => (q1, q2, q3),
                _ => {
                    drops.corrupt_lap += 1;
                    continue;
                }
            };
            if (q3.is_some() && q2.is_none()) || (q2.is_some() && q1.is_none()) {
                drops.segment_order += 1;
                continue;
            }

            let Some(weather) = row.weather.as_deref().and_then(Weather::coerce) else {
                drops.unknown_weather += 1;
                continue;
            };

            records.push(SessionRecord {
                driver: driver.to_string(),
                team: self.canonical_team(&row.team),
                circuit: circuit.to_string(),
                season: row.season,
                round: row.round,
                q1_sec: q1,
                q2_sec: q2,
                q3_sec: q3,
                weather,
            });
        }

        let records = dedup_sessions(records, &mut drops.duplicate);

        if drops.total() > 0 {
            warn!(
                "dropped {} of {} rows: corrupt_lap={} segment_order={} missing_identity={} unknown_weather={} duplicate={}",
                drops.total(),
                raw.len(),
                drops.corrupt_lap,
                drops.segment_order,
                drops.missing_identity,
                drops.unknown_weather,
                drops.duplicate
            );
        }

        if records.is_empty() {
            return Err(PredictorError::DataQuality(format!(
                "no usable rows left after cleaning {} input rows",
                raw.len()
            )));
        }
        debug!("cleaned dataset: {} rows", records.len());
        Ok(SessionDataset::new(records))
    }

    /// Derive per-row context features.
    ///
    /// Rows are re-sorted by `(season, round)` first, so the rolling form of a
    /// row only ever sees sessions strictly before its own.
    pub fn engineer_features(&self, dataset: &SessionDataset) -> EngineeredDataset {
        let sorted = sorted_records(dataset.records());
        let circuits: Vec<String> = sorted
            .iter()
            .map(|r| r.circuit.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut tracker = FormTracker::new(self.form_window);
        let mut rows = Vec::with_capacity(sorted.len());

        for session in sessions(&sorted) {
            let ratios = pace_ratios(session);
            let best_q2 = session
                .iter()
                .filter_map(|r| r.q2_sec)
                .reduce(f64::min);

            for record in session {
                let circuit_idx = circuits
                    .binary_search(&record.circuit)
                    .unwrap_or(circuits.len());
                rows.push(EngineeredRow {
                    q1_q2_gap: record.q1_sec.zip(record.q2_sec).map(|(q1, q2)| q1 - q2),
                    q2_q3_gap: record.q2_sec.zip(record.q3_sec).map(|(q2, q3)| q2 - q3),
                    gap_to_session_best: record.q2_sec.zip(best_q2).map(|(q2, b)| q2 - b),
                    driver_form: tracker.driver_form(&record.driver),
                    team_form: tracker.team_form(&record.team),
                    circuit_idx,
                    weather_idx: record.weather.index(),
                    record: (*record).clone(),
                });
            }

            tracker.push_session(session, &ratios);
        }

        debug!(
            "engineered {} rows over {} circuits",
            rows.len(),
            circuits.len()
        );
        EngineeredDataset { rows, circuits }
    }

    /// Select the fixed numeric columns and the `q3_sec` label.
    pub fn prepare_features(
        &self,
        engineered: &EngineeredDataset,
    ) -> Result<(FeatureMatrix, LabelVector, Vec<RowMetadata>)> {
        let mut flat = Vec::new();
        let mut labels = Vec::new();
        let mut metadata = Vec::new();

        for row in engineered.rows() {
            let (Some(label), Some(features)) = (row.record.q3_sec, row.feature_vector()) else {
                continue;
            };
            flat.extend_from_slice(&features);
            labels.push(label);
            metadata.push(RowMetadata::from(&row.record));
        }

        if labels.len() < self.min_training_rows {
            return Err(PredictorError::InsufficientData {
                required: self.min_training_rows,
                actual: labels.len(),
            });
        }

        let values = Array2::from_shape_vec((labels.len(), FEATURE_NAMES.len()), flat)
            .map_err(|e| PredictorError::DataQuality(e.to_string()))?;
        let x = FeatureMatrix::new(FEATURE_NAMES.iter().map(|s| s.to_string()).collect(), values)?;
        info!(
            "prepared {} training rows from {} engineered rows",
            labels.len(),
            engineered.len()
        );
        Ok((x, Array1::from(labels), metadata))
    }

    /// Driver and team form after every session in `dataset`.
    pub fn current_form(&self, dataset: &SessionDataset) -> FormTracker {
        let sorted = sorted_records(dataset.records());
        let mut tracker = FormTracker::new(self.form_window);
        for session in sessions(&sorted) {
            let ratios = pace_ratios(session);
            tracker.push_session(session, &ratios);
        }
        tracker
    }
}

/// Seeded shuffle-and-split of a prepared dataset.
pub fn train_test_split(
    x: &FeatureMatrix,
    y: &LabelVector,
    metadata: &[RowMetadata],
    test_fraction: f64,
    seed: u64,
) -> Result<TrainTestSplit> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(PredictorError::Configuration(format!(
            "test_fraction must be in (0, 1), got {}",
            test_fraction
        )));
    }
    let n = x.nrows();
    if y.len() != n || metadata.len() != n {
        return Err(PredictorError::DataQuality(format!(
            "row count mismatch: {} features, {} labels, {} metadata rows",
            n,
            y.len(),
            metadata.len()
        )));
    }

    let n_test = (n as f64 * test_fraction).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(PredictorError::InsufficientData {
            required: 2,
            actual: n,
        });
    }

    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let (test_idx, train_idx) = indices.split_at(n_test);

    Ok(TrainTestSplit {
        x_train: x.select_rows(train_idx),
        x_test: x.select_rows(test_idx),
        y_train: y.select(Axis(0), train_idx),
        y_test: y.select(Axis(0), test_idx),
        meta_train: train_idx.iter().map(|&i| metadata[i].clone()).collect(),
        meta_test: test_idx.iter().map(|&i| metadata[i].clone()).collect(),
    })
}

/// Rolling pace ratios per driver and per team.
///
/// A ratio is a lap divided by the session's best lap, so 1.0 is pole pace
/// and larger is slower.
#[derive(Debug, Clone)]
pub struct FormTracker {
    window: usize,
    drivers: HashMap<String, VecDeque<f64>>,
    teams: HashMap<String, VecDeque<f64>>,
}

impl FormTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            drivers: HashMap::new(),
            teams: HashMap::new(),
        }
    }

    pub fn driver_form(&self, driver: &str) -> Option<f64> {
        self.drivers.get(driver).and_then(mean_of)
    }

    pub fn team_form(&self, team: &str) -> Option<f64> {
        self.teams.get(team).and_then(mean_of)
    }

    fn push_session(&mut self, session: &[&SessionRecord], ratios: &[Option<f64>]) {
        let mut team_ratios: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
        for (record, ratio) in session.iter().zip(ratios) {
            let Some(ratio) = *ratio else { continue };
            push_window(
                self.drivers.entry(record.driver.clone()).or_default(),
                ratio,
                self.window,
            );
            let entry = team_ratios.entry(record.team.as_str()).or_insert((0.0, 0));
            entry.0 += ratio;
            entry.1 += 1;
        }
        for (team, (sum, count)) in team_ratios {
            push_window(
                self.teams.entry(team.to_string()).or_default(),
                sum / count as f64,
                self.window,
            );
        }
    }
}

fn push_window(window: &mut VecDeque<f64>, value: f64, size: usize) {
    if window.len() >= size {
        window.pop_front();
    }
    window.push_back(value);
}

fn mean_of(values: &VecDeque<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Each record's best lap over the session's best lap.
pub(crate) fn pace_ratios(session: &[&SessionRecord]) -> Vec<Option<f64>> {
    let best = session.iter().filter_map(|r| r.best_lap()).reduce(f64::min);
    session
        .iter()
        .map(|r| r.best_lap().zip(best).map(|(lap, best)| lap / best))
        .collect()
}

/// Records ordered by session, then circuit, driver and team.
pub(crate) fn sorted_records(records: &[SessionRecord]) -> Vec<&SessionRecord> {
    let mut sorted: Vec<&SessionRecord> = records.iter().collect();
    sorted.sort_by(|a, b| {
        (a.season, a.round, &a.circuit, &a.driver, &a.team)
            .cmp(&(b.season, b.round, &b.circuit, &b.driver, &b.team))
    });
    sorted
}

/// Split sorted records into runs sharing the same `(season, round)`.
pub(crate) fn sessions<'a, 'r>(sorted: &'a [&'r SessionRecord]) -> Vec<&'a [&'r SessionRecord]> {
    let mut out = Vec::new();
    let mut start = 0;
    for i in 1..=sorted.len() {
        if i == sorted.len() || sorted[i].session_key() != sorted[start].session_key() {
            if i > start {
                out.push(&sorted[start..i]);
            }
            start = i;
        }
    }
    out
}

/// One record per `(driver, season, round)`.
///
/// Identical copies collapse onto the first one. Copies that disagree leave no
/// way to tell which is right, so every copy of that key is dropped.
fn dedup_sessions(records: Vec<SessionRecord>, dropped: &mut usize) -> Vec<SessionRecord> {
    let mut first_seen: HashMap<(&str, i32, u32), (usize, bool)> = HashMap::new();
    for (i, r) in records.iter().enumerate() {
        let entry = first_seen
            .entry((r.driver.as_str(), r.season, r.round))
            .or_insert((i, false));
        if records[entry.0] != *r {
            entry.1 = true;
        }
    }
    let keep: Vec<bool> = records
        .iter()
        .enumerate()
        .map(|(i, r)| first_seen[&(r.driver.as_str(), r.season, r.round)] == (i, false))
        .collect();
    drop(first_seen);

    let before = records.len();
    let kept: Vec<SessionRecord> = records
        .into_iter()
        .zip(keep)
        .filter_map(|(r, keep)| keep.then_some(r))
        .collect();
    *dropped += before - kept.len();
    kept
}

fn lap(value: Option<f64>) -> std::result::Result<Option<f64>, ()> {
    match value {
        None => Ok(None),
        Some(v) if v.is_finite() && v > 0.0 => Ok(Some(v)),
        Some(_) => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::synthetic_history;

    fn raw(driver: &str, team: &str, q: [Option<f64>; 3], weather: &str) -> RawSessionRecord {
        RawSessionRecord {
            driver: driver.into(),
            team: team.into(),
            circuit: "Japan".into(),
            season: 2024,
            round: 4,
            q1_sec: q[0],
            q2_sec: q[1],
            q3_sec: q[2],
            weather: Some(weather.into()),
        }
    }

    #[test]
    fn test_clean_drops_corrupt_rows() {
        let engineer = FeatureEngineer::default();
        let rows = vec![
            raw("VER", "Red Bull", [Some(90.1), Some(89.7), Some(89.3)], "Dry"),
            raw("BAD", "Ferrari", [Some(-1.0), None, None], "dry"),
            raw("NAN", "Ferrari", [Some(f64::NAN), None, None], "dry"),
            raw("GAP", "McLaren", [Some(90.5), None, Some(89.9)], "dry"),
            raw("SNO", "McLaren", [Some(90.5), None, None], "snow"),
            raw("TSU", "AlphaTauri", [Some(90.9), None, None], "rain"),
        ];

        let cleaned = engineer.clean(&rows).expect("clean should succeed");
        assert_eq!(cleaned.len(), 2, "only VER and TSU survive");

        let ver = &cleaned.records()[0];
        assert_eq!(ver.team, "Red Bull Racing");
        assert_eq!(ver.weather, Weather::Dry);

        let tsu = &cleaned.records()[1];
        assert_eq!(tsu.team, "RB");
        assert_eq!(tsu.weather, Weather::Wet);
        assert_eq!(tsu.q2_sec, None, "elimination is kept as None");
    }

    #[test]
    fn test_clean_rejects_empty_result() {
        let engineer = FeatureEngineer::default();
        let err = engineer
            .clean(&[raw("BAD", "Ferrari", [Some(0.0), None, None], "dry")])
            .unwrap_err();
        assert!(matches!(err, PredictorError::DataQuality(_)));

        let err = engineer.clean(&[]).unwrap_err();
        assert!(matches!(err, PredictorError::DataQuality(_)));
    }

    #[test]
    fn test_duplicate_sessions_do_not_depend_on_order() {
        let engineer = FeatureEngineer::default();
        let mut rows = synthetic_history();
        let mut conflicting = rows
            .iter()
            .find(|r| r.driver == "VER" && r.season == 2023 && r.round == 1)
            .cloned()
            .unwrap();
        conflicting.q3_sec = conflicting.q3_sec.map(|q3| q3 + 0.5);
        let exact = rows
            .iter()
            .find(|r| r.driver == "LEC" && r.season == 2024 && r.round == 3)
            .cloned()
            .unwrap();
        rows.push(conflicting);
        rows.push(exact);

        let mut reversed = rows.clone();
        reversed.reverse();

        let cleaned = engineer.clean(&rows).unwrap();
        // both VER copies go, the exact LEC copy collapses to one
        assert_eq!(cleaned.len(), synthetic_history().len() - 1);
        assert!(!cleaned
            .records()
            .iter()
            .any(|r| r.driver == "VER" && r.session_key() == (2023, 1)));
        assert_eq!(
            cleaned
                .records()
                .iter()
                .filter(|r| r.driver == "LEC" && r.session_key() == (2024, 3))
                .count(),
            1
        );

        let a = engineer.engineer_features(&cleaned);
        let b = engineer.engineer_features(&engineer.clean(&reversed).unwrap());
        assert_eq!(a, b, "engineered output depends on input order");
    }

    #[test]
    fn test_team_aliases_are_case_insensitive() {
        let engineer = FeatureEngineer::default();
        assert_eq!(engineer.canonical_team("  racing point "), "Aston Martin");
        assert_eq!(engineer.canonical_team("Williams"), "Williams");
    }

    #[test]
    fn test_form_uses_only_earlier_sessions() {
        let engineer = FeatureEngineer::default();
        let cleaned = engineer.clean(&synthetic_history()).unwrap();
        let engineered = engineer.engineer_features(&cleaned);

        // first session has no history at all
        let first_key = engineered.rows()[0].record.session_key();
        for row in engineered.rows().iter().take_while(|r| r.record.session_key() == first_key) {
            assert!(row.driver_form.is_none());
            assert!(row.team_form.is_none());
        }

        // second session sees exactly the first session's ratio
        let first: Vec<&SessionRecord> = engineered
            .rows()
            .iter()
            .filter(|r| r.record.session_key() == first_key)
            .map(|r| &r.record)
            .collect();
        let ratios = pace_ratios(&first);
        let ver_ratio = first
            .iter()
            .zip(&ratios)
            .find(|(r, _)| r.driver == "VER")
            .and_then(|(_, ratio)| *ratio)
            .unwrap();
        let ver_second = engineered
            .rows()
            .iter()
            .find(|r| r.record.driver == "VER" && r.record.session_key() != first_key)
            .unwrap();
        assert_eq!(ver_second.driver_form, Some(ver_ratio));
    }

    #[test]
    fn test_engineering_is_order_independent() {
        let engineer = FeatureEngineer::default();
        let rows = synthetic_history();
        let mut reversed = rows.clone();
        reversed.reverse();
        let mut rotated = rows.clone();
        rotated.rotate_left(13);

        let a = engineer.engineer_features(&engineer.clean(&rows).unwrap());
        let b = engineer.engineer_features(&engineer.clean(&reversed).unwrap());
        let c = engineer.engineer_features(&engineer.clean(&rotated).unwrap());
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_prepare_features_keeps_observed_labels() {
        let engineer = FeatureEngineer::default();
        let cleaned = engineer.clean(&synthetic_history()).unwrap();
        let engineered = engineer.engineer_features(&cleaned);
        let (x, y, meta) = engineer.prepare_features(&engineered).unwrap();

        assert_eq!(x.ncols(), FEATURE_NAMES.len());
        assert_eq!(x.nrows(), y.len());
        assert_eq!(meta.len(), y.len());
        // 4 Q3 runners per session, first session has no form yet
        assert_eq!(y.len(), 28);

        for (label, m) in y.iter().zip(&meta) {
            let source = cleaned
                .records()
                .iter()
                .find(|r| r.driver == m.driver && r.session_key() == (m.season, m.round))
                .unwrap();
            assert_eq!(source.q3_sec, Some(*label));
        }
    }

    #[test]
    fn test_prepare_features_rejects_small_datasets() {
        let settings = FeatureSettings {
            min_training_rows: 50,
            ..FeatureSettings::default()
        };
        let engineer = FeatureEngineer::new(&settings);
        let cleaned = engineer.clean(&synthetic_history()).unwrap();
        let err = engineer
            .prepare_features(&engineer.engineer_features(&cleaned))
            .unwrap_err();
        assert!(matches!(
            err,
            PredictorError::InsufficientData { required: 50, actual: 28 }
        ));
    }

    #[test]
    fn test_unseen_circuit_index() {
        let engineer = FeatureEngineer::default();
        let engineered = engineer.engineer_features(&engineer.clean(&synthetic_history()).unwrap());
        assert_eq!(engineered.circuits(), ["Bahrain", "Italy", "Japan", "Monaco"]);
        assert_eq!(engineered.circuit_index("Japan"), 2);
        assert_eq!(engineered.circuit_index("Las Vegas"), 4);
    }

    #[test]
    fn test_train_test_split_is_seeded_and_aligned() {
        let engineer = FeatureEngineer::default();
        let engineered = engineer.engineer_features(&engineer.clean(&synthetic_history()).unwrap());
        let (x, y, meta) = engineer.prepare_features(&engineered).unwrap();

        let a = train_test_split(&x, &y, &meta, 0.2, 42).unwrap();
        let b = train_test_split(&x, &y, &meta, 0.2, 42).unwrap();
        assert_eq!(a.meta_test, b.meta_test);
        assert_eq!(a.x_test.nrows(), 6);
        assert_eq!(a.x_train.nrows(), 22);
        assert_eq!(a.y_train.len(), a.meta_train.len());

        assert!(train_test_split(&x, &y, &meta, 1.0, 42).is_err());
    }
}
