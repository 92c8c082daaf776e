//! Score-state file: the accumulator saved as JSON between runs.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use shoal_core::error::StateError;
use shoal_scoring::ScoreAccumulator;

/// Current on-disk format version.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    saved_at: DateTime<Utc>,
    accumulator: ScoreAccumulator,
}

/// Write `accumulator` to `path`, replacing any previous file atomically.
pub fn save_state(path: &Path, accumulator: &ScoreAccumulator) -> Result<(), StateError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StateError::Io(e.to_string()))?;
    }
    let file = StateFile {
        version: STATE_VERSION,
        saved_at: Utc::now(),
        accumulator: accumulator.clone(),
    };
    let json =
        serde_json::to_vec_pretty(&file).map_err(|e| StateError::Serialization(e.to_string()))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| StateError::Io(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| StateError::Io(e.to_string()))?;
    debug!(path = %path.display(), step = accumulator.step(), "state: saved");
    Ok(())
}

/// Read the accumulator from `path`. A missing file is `Ok(None)`.
pub fn load_state(path: &Path) -> Result<Option<ScoreAccumulator>, StateError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StateError::Io(e.to_string())),
    };
    let file: StateFile =
        serde_json::from_slice(&bytes).map_err(|e| StateError::Serialization(e.to_string()))?;
    if file.version != STATE_VERSION {
        return Err(StateError::Serialization(format!(
            "unsupported state version {}",
            file.version
        )));
    }
    if file.accumulator.scores().iter().any(|s| !s.is_finite()) {
        return Err(StateError::Serialization("non-finite score in state file".into()));
    }
    info!(
        path = %path.display(),
        saved_at = %file.saved_at,
        step = file.accumulator.step(),
        slots = file.accumulator.len(),
        "state: loaded"
    );
    Ok(Some(file.accumulator))
}
