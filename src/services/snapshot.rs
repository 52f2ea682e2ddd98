//! Single persisted snapshot of the last loaded stat.

use crate::models::representation::ParseError;
use crate::models::stat::Stat;
use chrono::{DateTime, Utc};
use core::fmt;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub saved_at: DateTime<Utc>,
    /// Stat representation, as produced by `Stat::to_representation`.
    pub stat: Value,
}

#[derive(Debug)]
pub enum SnapshotError {
    Io(io::Error),
    Decode(serde_path_to_error::Error<serde_json::Error>),
    Encode(ParseError),
}

impl Display for SnapshotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Io(e) => write!(f, "io error: {}", e),
            SnapshotError::Decode(e) => write!(f, "invalid snapshot at {}: {}", e.path(), e.inner()),
            SnapshotError::Encode(e) => write!(f, "cannot serialize stat: {}", e),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SnapshotError::Io(e) => Some(e),
            SnapshotError::Decode(e) => Some(e.inner()),
            SnapshotError::Encode(e) => Some(e),
        }
    }
}

impl From<io::Error> for SnapshotError {
    fn from(value: io::Error) -> Self {
        SnapshotError::Io(value)
    }
}

impl From<ParseError> for SnapshotError {
    fn from(value: ParseError) -> Self {
        SnapshotError::Encode(value)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(value: serde_json::Error) -> Self {
        SnapshotError::Encode(ParseError::Json(value))
    }
}

pub fn save(path: &Path, stat: &Stat) -> Result<(), SnapshotError> {
    let snapshot = Snapshot {
        saved_at: Utc::now(),
        stat: stat.to_representation()?,
    };
    let body = serde_json::to_string_pretty(&snapshot)?;
    fs::write(path, body)?;
    info!("Snapshot of \"{}\" saved to {}", stat.name(), path.display());
    Ok(())
}

/// `Ok(None)` when no snapshot has been saved yet.
pub fn load(path: &Path) -> Result<Option<Snapshot>, SnapshotError> {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let de = &mut serde_json::Deserializer::from_str(&body);
    let snapshot = serde_path_to_error::deserialize(de).map_err(SnapshotError::Decode)?;
    Ok(Some(snapshot))
}

/// Returns whether a snapshot existed.
pub fn clear(path: &Path) -> Result<bool, SnapshotError> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("Snapshot {} removed", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::point::Actor;
    use crate::models::role::PointRole;
    use std::path::PathBuf;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("virtual-stat-{}-{}.json", tag, std::process::id()))
    }

    #[test]
    fn save_load_clear() {
        let path = temp_path("roundtrip");
        let _ = fs::remove_file(&path);
        assert!(load(&path).expect("missing is fine").is_none());

        let mut stat = crate::models::stat::tests::loaded_stat();
        stat.apply(PointRole::Blinds, "25", Actor::System);
        save(&path, &stat).expect("save");

        let snapshot = load(&path).expect("load").expect("present");
        let mut restored = Stat::new();
        restored.load_from_representation(&snapshot.stat);
        assert_eq!(restored.name(), stat.name());
        assert_eq!(restored.point(PointRole::Blinds).value(), "25");
        assert_eq!(restored.references(false), stat.references(false));

        assert!(clear(&path).expect("clear"));
        assert!(!clear(&path).expect("clear again"));
    }

    #[test]
    fn decode_error_names_the_field() {
        let path = temp_path("corrupt");
        fs::write(&path, r#"{ "savedAt": "yesterday", "stat": {} }"#).expect("write");
        let err = load(&path).expect_err("corrupt snapshot");
        assert!(err.to_string().contains("savedAt"), "{}", err);
        let _ = fs::remove_file(&path);
    }
}
