//! Model artifact persistence.
//!
//! Artifacts are written to a temporary file next to the destination and then
//! renamed over it, so a reader never observes a partially written model and a
//! failed write leaves the previous artifact untouched.

use super::ForecastError;
use serde::{de::DeserializeOwned, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Serializes `value` as JSON and atomically replaces `path` with it.
pub fn write_json_atomically<T: Serialize>(path: &Path, value: &T) -> Result<(), ForecastError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let tmp = NamedTempFile::new_in(dir).map_err(|e| ForecastError::io(path, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut writer, value)?;
        writer.flush().map_err(|e| ForecastError::io(path, e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| ForecastError::io(path, e))?;

    tmp.persist(path)
        .map_err(|e| ForecastError::io(path, e.error))?;
    debug!(path = %path.display(), "model artifact persisted");
    Ok(())
}

/// Reads a JSON artifact written by [`write_json_atomically`].
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ForecastError> {
    let file = File::open(path).map_err(|e| ForecastError::io(path, e))?;
    let value = serde_json::from_reader(BufReader::new(file))?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Blob {
        version: u32,
        weights: Vec<f64>,
    }

    #[test]
    fn replaces_existing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "old contents").unwrap();

        let blob = Blob {
            version: 2,
            weights: vec![0.5, -1.25],
        };
        write_json_atomically(&path, &blob).unwrap();

        let restored: Blob = read_json(&path).unwrap();
        assert_eq!(restored, blob);
        // only the artifact remains, no temp files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_write_keeps_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing_subdir").join("model.json");

        let err = write_json_atomically(&path, &Blob {
            version: 1,
            weights: vec![],
        })
        .unwrap_err();
        assert!(matches!(err, ForecastError::Io { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn reading_garbage_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = read_json::<Blob>(&path).unwrap_err();
        assert!(matches!(err, ForecastError::Serialization(_)));
    }
}
