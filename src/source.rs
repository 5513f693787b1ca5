//! Historical session acquisition.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::types::RawSessionRecord;

/// Anything that can hand over past qualifying sessions.
///
/// `None` means the source could not deliver. Callers treat it, and an empty
/// result, as a hard stop.
pub trait SessionSource {
    fn fetch_recent_seasons(&self, verbose: bool) -> Option<Vec<RawSessionRecord>>;
}

/// JSON array of raw records on disk.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionSource for JsonFileSource {
    fn fetch_recent_seasons(&self, verbose: bool) -> Option<Vec<RawSessionRecord>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) => {
                warn!("cannot read session file {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str::<Vec<RawSessionRecord>>(&data) {
            Ok(records) => {
                if verbose {
                    info!("loaded {} session rows from {}", records.len(), self.path.display());
                }
                Some(records)
            }
            Err(e) => {
                warn!("invalid session JSON in {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

impl SessionSource for Vec<RawSessionRecord> {
    fn fetch_recent_seasons(&self, _verbose: bool) -> Option<Vec<RawSessionRecord>> {
        Some(self.clone())
    }
}
