//! Persisted daemon state
//!
//! `daemon.json` is the human-readable record of the running daemon: its
//! pid, volume, profiles, pitch shift and control port. It is written
//! atomically (temp file, fsync, rename) so readers never see half a record,
//! and removed on clean shutdown.

use crate::audio::pitch::PitchRange;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Pitch shift as recorded on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchShiftRecord {
    pub lower: i32,
    pub upper: i32,
    /// Profile the shift is restricted to, absent for all profiles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl PitchShiftRecord {
    pub fn range(&self) -> PitchRange {
        PitchRange::new(self.lower, self.upper)
    }
}

/// The daemon state record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonState {
    pub pid: u32,
    pub volume: u8,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub mouse_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch_shift: Option<PitchShiftRecord>,
    pub api_port: u16,
}

/// The state file and its writer lock
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    writer: Mutex<()>,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the record atomically
    pub fn write(&self, state: &DaemonState) -> std::io::Result<()> {
        let _guard = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(state)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".daemon-")
            .suffix(".json.tmp")
            .tempfile_in(dir)?;
        temp.write_all(&json)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;

        tracing::trace!("State file updated: {:?}", self.path);
        Ok(())
    }

    /// Read the current record, if there is one
    pub fn read(&self) -> std::io::Result<Option<DaemonState>> {
        read_state(&self.path)
    }

    /// Delete the record if it still belongs to `pid`
    pub fn remove_if_owned(&self, pid: u32) -> std::io::Result<bool> {
        let _guard = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        match read_state(&self.path) {
            Ok(Some(state)) if state.pid == pid => {
                std::fs::remove_file(&self.path)?;
                Ok(true)
            }
            Ok(_) => Ok(false),
            // Unreadable garbage written by us is still ours to clean up
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                std::fs::remove_file(&self.path)?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }
}

/// Read a state record from disk
///
/// Returns `Ok(None)` when the file does not exist and an `InvalidData`
/// error when it exists but does not parse.
pub fn read_state(path: &Path) -> std::io::Result<Option<DaemonState>> {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    serde_json::from_slice(&contents)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Delete a state record unconditionally
pub fn remove_state(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pid: u32) -> DaemonState {
        DaemonState {
            pid,
            volume: 70,
            profile: Some("ios".into()),
            mouse_profile: None,
            pitch_shift: Some(PitchShiftRecord {
                lower: -2,
                upper: 3,
                profile: None,
            }),
            api_port: 41234,
        }
    }

    #[test]
    fn test_write_and_read() {
        let tmp = tempfile::tempdir().unwrap();
        let file = StateFile::new(tmp.path().join("daemon.json"));
        assert_eq!(file.read().unwrap(), None);

        file.write(&sample(42)).unwrap();
        assert_eq!(file.read().unwrap(), Some(sample(42)));

        // No temp files left behind
        let entries: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_record_field_names() {
        let json = serde_json::to_value(sample(7)).unwrap();
        assert_eq!(json["pid"], 7);
        assert_eq!(json["volume"], 70);
        assert_eq!(json["profile"], "ios");
        assert!(json["mouse_profile"].is_null());
        assert_eq!(json["pitch_shift"]["lower"], -2);
        assert_eq!(json["api_port"], 41234);
    }

    #[test]
    fn test_minimal_record_parses() {
        let state: DaemonState =
            serde_json::from_str(r#"{"pid": 1, "volume": 100, "api_port": 0}"#).unwrap();
        assert!(state.profile.is_none());
        assert!(state.pitch_shift.is_none());
    }

    #[test]
    fn test_remove_only_own_record() {
        let tmp = tempfile::tempdir().unwrap();
        let file = StateFile::new(tmp.path().join("daemon.json"));
        file.write(&sample(42)).unwrap();

        assert!(!file.remove_if_owned(43).unwrap());
        assert!(file.path().exists());
        assert!(file.remove_if_owned(42).unwrap());
        assert!(!file.path().exists());
        assert!(!file.remove_if_owned(42).unwrap());
    }

    #[test]
    fn test_corrupt_record_is_invalid_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("daemon.json");
        std::fs::write(&path, "{\"pid\": ").unwrap();
        let err = read_state(&path).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);

        remove_state(&path).unwrap();
        remove_state(&path).unwrap();
    }
}
