use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::domain::{CatalogEntry, JournalRecord, TargetName};
use crate::error::HarvestError;

/// Titles to look up, in the order the source file lists them.
pub type InputCatalog = IndexMap<TargetName, CatalogEntry>;

/// Harvested records keyed by title, in insertion order.
pub type ResultSet = IndexMap<TargetName, JournalRecord>;

/// The input catalog (read-only) and the accumulated output catalog.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    input: Utf8PathBuf,
    output: Utf8PathBuf,
}

impl CatalogStore {
    pub fn new(input: impl Into<Utf8PathBuf>, output: impl Into<Utf8PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    pub fn input_path(&self) -> &Utf8Path {
        &self.input
    }

    pub fn output_path(&self) -> &Utf8Path {
        &self.output
    }

    pub fn load_input(&self) -> Result<InputCatalog, HarvestError> {
        let unavailable = |reason: String| HarvestError::InputUnavailable {
            path: self.input.clone().into_std_path_buf(),
            reason,
        };
        let content =
            fs::read_to_string(self.input.as_std_path()).map_err(|err| unavailable(err.to_string()))?;
        let raw: IndexMap<String, CatalogEntry> =
            serde_json::from_str(&content).map_err(|err| unavailable(err.to_string()))?;
        Ok(keyed_by_name(raw, &self.input))
    }

    /// A missing output catalog is an empty one; an unreadable one is fatal so
    /// that it is never overwritten with a partial result.
    pub fn load_output(&self) -> Result<ResultSet, HarvestError> {
        let raw: IndexMap<String, JournalRecord> =
            read_json_or_default(&self.output).map_err(|reason| HarvestError::CatalogCorrupt {
                path: self.output.clone().into_std_path_buf(),
                reason,
            })?;
        Ok(keyed_by_name(raw, &self.output))
    }

    pub fn save_output(&self, catalog: &ResultSet) -> Result<(), HarvestError> {
        write_json_atomic(&self.output, catalog)
    }
}

/// Re-keys a catalog by normalized title. Keys that normalize to nothing are
/// dropped with a warning; keys that collapse onto the same title keep the
/// position of the first and the value of the last.
pub fn keyed_by_name<V>(raw: IndexMap<String, V>, source: &Utf8Path) -> IndexMap<TargetName, V> {
    raw.into_iter()
        .filter_map(|(key, value)| match key.parse::<TargetName>() {
            Ok(name) => Some((name, value)),
            Err(_) => {
                warn!(path = %source, key = ?key, "skipping entry without a usable title");
                None
            }
        })
        .collect()
}

/// Right-biased union: entries of `update` replace those of `base`.
pub fn merge(base: &mut ResultSet, update: &ResultSet) {
    base.extend(
        update
            .iter()
            .map(|(name, record)| (name.clone(), record.clone())),
    );
}

pub fn read_json_or_default<T>(path: &Utf8Path) -> Result<T, String>
where
    T: DeserializeOwned + Default,
{
    match fs::read_to_string(path.as_std_path()) {
        Ok(content) => serde_json::from_str(&content).map_err(|err| err.to_string()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err.to_string()),
    }
}

pub fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Utf8Path,
    value: &T,
) -> Result<(), HarvestError> {
    let mut content = serde_json::to_vec_pretty(value)
        .map_err(|err| HarvestError::Persistence(err.to_string()))?;
    content.push(b'\n');
    write_bytes_atomic(path, &content)
}

/// Opens `path` for appending, creating it and its parent directory.
pub fn open_append(path: &Utf8Path) -> Result<File, HarvestError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HarvestError::Persistence(format!("create {parent}: {err}")))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| HarvestError::Persistence(format!("open {path}: {err}")))
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| HarvestError::Persistence(format!("create {parent}: {err}")))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".scimago-harvest")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| HarvestError::Persistence(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| HarvestError::Persistence(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| HarvestError::Persistence(format!("persist {path}: {err}")))?;
    Ok(())
}
