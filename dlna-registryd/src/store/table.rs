//! Whole-file JSON tables. Every save rewrites the full document; every load
//! parses it again. Loading never fails: a missing, unreadable or corrupt
//! file reads as an empty table and the reason travels in [`LoadStatus`].
//! A single record that does not fit its type is kept verbatim in the
//! record's `extra` fields instead of discarding the whole file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use shared::types::TableRecord;
use super::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded,
    Missing,
    /// The file parsed, but these keys hold records of the wrong shape
    Partial { rejected: Vec<String> },
    Unreadable { reason: String },
    Corrupt { reason: String },
}

#[derive(Debug, Clone)]
pub struct TableLoad<T> {
    pub table: T,
    pub status: LoadStatus,
}

impl<T> TableLoad<T> {
    /// True when the table reflects the file (or the file simply does not exist yet)
    pub fn is_pristine(&self) -> bool {
        matches!(self.status, LoadStatus::Loaded | LoadStatus::Missing)
    }

    pub fn into_table(self) -> T {
        self.table
    }
}

pub fn table_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(file_name)
}

/// Load a table, falling back to an empty one on any failure
pub fn load_table<R>(dir: &Path, file_name: &str) -> TableLoad<BTreeMap<String, R>>
where
    R: TableRecord + DeserializeOwned,
{
    let path = table_path(dir, file_name);

    if let Err(e) = fs::create_dir_all(dir) {
        tracing::warn!("Cannot create config directory {}: {}", dir.display(), e);
        return empty(LoadStatus::Unreadable { reason: e.to_string() });
    }

    let content = match fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("{} does not exist yet", path.display());
            return empty(LoadStatus::Missing);
        }
        Err(e) => {
            tracing::warn!("Cannot read {}: {}", path.display(), e);
            return empty(LoadStatus::Unreadable { reason: e.to_string() });
        }
    };

    let raw = match serde_json::from_slice::<BTreeMap<String, Value>>(&content) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("{} is not a valid table, treating as empty: {}", path.display(), e);
            backup_corrupt(&path, &content);
            return empty(LoadStatus::Corrupt { reason: e.to_string() });
        }
    };

    let mut table = BTreeMap::new();
    let mut rejected = Vec::new();

    for (key, value) in raw {
        match serde_json::from_value::<R>(value.clone()) {
            Ok(record) => {
                table.insert(key, record);
            }
            Err(e) => {
                match value {
                    Value::Object(fields) => {
                        tracing::warn!("Record {:?} in {} kept verbatim: {}", key, path.display(), e);
                        let mut record = R::default();
                        record.extra_mut().extend(fields);
                        table.insert(key.clone(), record);
                    }
                    _ => {
                        tracing::warn!("Record {:?} in {} is not an object, dropping it: {}", key, path.display(), e);
                        backup_corrupt(&path, &content);
                    }
                }
                rejected.push(key);
            }
        }
    }

    tracing::debug!("Loaded {}", path.display());
    let status = if rejected.is_empty() {
        LoadStatus::Loaded
    } else {
        LoadStatus::Partial { rejected }
    };
    TableLoad { table, status }
}

/// Serialize `table` with 4-space indentation and replace the file
pub fn save_table<T>(table: &T, dir: &Path, file_name: &str) -> Result<(), StoreError>
where
    T: Serialize,
{
    let path = table_path(dir, file_name);
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;

    let mut json = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut json, PrettyFormatter::with_indent(b"    "));
    table
        .serialize(&mut ser)
        .map_err(|e| StoreError::Serialize { path: path.clone(), source: e })?;
    json.push(b'\n');

    // Rename is atomic, so readers see either the old or the new content.
    // Concurrent writers still race: the last rename wins.
    let tmp = temp_path(&path);
    fs::write(&tmp, &json).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))?;

    tracing::debug!("Saved {}", path.display());
    Ok(())
}

// `data.json` -> `data.json.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

// Unique per process and per call, so two writers never share a temp file
fn temp_path(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    sibling(path, &format!("{}.{}.tmp", std::process::id(), n))
}

fn empty<T: Default>(status: LoadStatus) -> TableLoad<T> {
    TableLoad { table: T::default(), status }
}

// The next save overwrites the file, so keep the unparsable bytes around.
fn backup_corrupt(path: &Path, content: &[u8]) {
    let bak = sibling(path, "bak");
    match fs::write(&bak, content) {
        Ok(()) => tracing::warn!("Backed up {} to {}", path.display(), bak.display()),
        Err(e) => tracing::error!("Failed to write backup {}: {}", bak.display(), e),
    }
}
