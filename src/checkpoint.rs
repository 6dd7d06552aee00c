use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use tracing::{info, warn};

use crate::domain::TargetName;
use crate::error::HarvestError;
use crate::store::{ResultSet, merge, read_json_or_default, write_bytes_atomic, write_json_atomic};

/// Single-line file holding the last completed title of a run.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: Utf8PathBuf,
}

impl CheckpointFile {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<TargetName>, HarvestError> {
        match fs::read_to_string(self.path.as_std_path()) {
            Ok(content) => match content.trim().parse() {
                Ok(name) => Ok(Some(name)),
                Err(_) => {
                    warn!(path = %self.path, "checkpoint file is empty, ignoring it");
                    Ok(None)
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(HarvestError::Persistence(format!(
                "read checkpoint {}: {err}",
                self.path
            ))),
        }
    }

    /// Replaces the previous checkpoint.
    pub fn save(&self, name: &TargetName) -> Result<(), HarvestError> {
        write_bytes_atomic(&self.path, name.as_str().as_bytes())
            .map_err(|err| HarvestError::CheckpointWrite(err.to_string()))
    }

    pub fn clear(&self) -> Result<bool, HarvestError> {
        match fs::remove_file(self.path.as_std_path()) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(HarvestError::Persistence(format!(
                "remove checkpoint {}: {err}",
                self.path
            ))),
        }
    }
}

/// JSON list of titles whose detail page could not be parsed. They are put
/// back into the pending set on the next run whatever the checkpoint says,
/// and leave the list once they complete.
#[derive(Debug, Clone)]
pub struct RetryList {
    path: Utf8PathBuf,
}

impl RetryList {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn load(&self) -> IndexSet<TargetName> {
        let raw: Vec<String> = read_json_or_default(&self.path).unwrap_or_else(|reason| {
            warn!(path = %self.path, reason = %reason, "unreadable retry list, ignoring it");
            Vec::new()
        });
        raw.into_iter()
            .filter_map(|value| value.parse().ok())
            .collect()
    }

    /// Rewrites the list; an empty list removes the file.
    pub fn save(&self, names: &IndexSet<TargetName>) -> Result<(), HarvestError> {
        if names.is_empty() {
            return match fs::remove_file(self.path.as_std_path()) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
                Err(err) => Err(HarvestError::CheckpointWrite(format!(
                    "remove retry list {}: {err}",
                    self.path
                ))),
            };
        }
        write_json_atomic(&self.path, names)
            .map_err(|err| HarvestError::CheckpointWrite(err.to_string()))
    }
}

/// Writes `<prefix>_<count>.json` snapshots of the in-memory results.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    prefix: Utf8PathBuf,
}

impl SnapshotWriter {
    pub fn new(prefix: impl Into<Utf8PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn path_for(&self, completed: usize) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}_{completed}.json", self.prefix))
    }

    /// Merges `results` into whatever the snapshot file for `completed`
    /// already holds and writes it back.
    pub fn flush(&self, results: &ResultSet, completed: usize) -> Result<Utf8PathBuf, HarvestError> {
        let path = self.path_for(completed);
        let mut snapshot: ResultSet = read_json_or_default(&path).unwrap_or_else(|reason| {
            warn!(path = %path, reason = %reason, "unreadable snapshot, replacing it");
            ResultSet::new()
        });
        merge(&mut snapshot, results);
        write_json_atomic(&path, &snapshot)?;
        info!(path = %path, records = results.len(), "partial snapshot saved");
        Ok(path)
    }
}
