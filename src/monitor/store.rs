//! Durable monitor state.
//!
//! # Layout (FileStore)
//! ```text
//! <state_dir>/
//!     <formation>.<group>.group.json     snapshot of the group record
//!     <formation>.<group>.events.jsonl   one event per line, append-only
//! ```
//! Formation names are percent-encoded outside `[A-Za-z0-9_-]`, so two
//! formations never share a file. Snapshots are written to a temp file and
//! renamed into place so a crash never leaves a torn record behind.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::monitor::events::Event;
use crate::monitor::model::{Group, GroupKey};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage task did not complete: {0}")]
    Interrupted(String),

    #[error("corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything persisted for one group.
#[derive(Debug, Clone)]
pub struct StoredGroup {
    pub group: Group,
    pub events: Vec<Event>,
}

/// Durable storage used by the monitor.
///
/// Calls for one group are serialised by that group's lock; calls for
/// different groups may arrive concurrently.
pub trait StateStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<StoredGroup>, StoreError>;

    /// Persist one group: the new snapshot plus the events it produced.
    fn commit(&self, group: &Group, events: &[Event]) -> Result<(), StoreError>;
}

/// Volatile store for tests and for monitors started without a state dir.
#[derive(Debug, Default)]
pub struct MemoryStore {
    groups: Mutex<HashMap<GroupKey, StoredGroup>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<StoredGroup>, StoreError> {
        Ok(self.groups.lock().values().cloned().collect())
    }

    fn commit(&self, group: &Group, events: &[Event]) -> Result<(), StoreError> {
        let mut groups = self.groups.lock();
        let entry = groups.entry(group.key.clone()).or_insert_with(|| StoredGroup {
            group: group.clone(),
            events: Vec::new(),
        });
        entry.group = group.clone();
        entry.events.extend_from_slice(events);
        Ok(())
    }
}

/// JSON files under a state directory.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn stem(key: &GroupKey) -> String {
        let mut formation = String::with_capacity(key.formation.len());
        for byte in key.formation.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                formation.push(char::from(byte));
            } else {
                formation.push_str(&format!("%{byte:02X}"));
            }
        }
        format!("{}.{}", formation, key.group)
    }

    fn group_path(&self, key: &GroupKey) -> PathBuf {
        self.dir.join(format!("{}.group.json", Self::stem(key)))
    }

    fn events_path(&self, key: &GroupKey) -> PathBuf {
        self.dir.join(format!("{}.events.jsonl", Self::stem(key)))
    }

    fn read_group(path: &Path) -> Result<Group, StoreError> {
        let file = File::open(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read_events(path: &Path) -> Result<Vec<Event>, StoreError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_err)?;
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                // A crash mid-append can leave a partial last line behind.
                Err(e) if e.is_eof() => {
                    tracing::warn!(path = %path.display(), "Ignoring truncated event line");
                }
                Err(source) => {
                    return Err(StoreError::Corrupt {
                        path: path.to_path_buf(),
                        source,
                    })
                }
            }
        }
        Ok(events)
    }

    fn write_group(&self, group: &Group) -> Result<(), StoreError> {
        let path = self.group_path(&group.key);
        let tmp = path.with_extension("json.tmp");
        let io_err = |source| StoreError::Io {
            path: tmp.clone(),
            source,
        };

        let file = File::create(&tmp).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, group).map_err(|source| StoreError::Corrupt {
            path: tmp.clone(),
            source,
        })?;
        writer.flush().map_err(io_err)?;
        writer.get_ref().sync_all().map_err(io_err)?;
        drop(writer);

        fs::rename(&tmp, &path).map_err(|source| StoreError::Io { path, source })
    }

    /// Current length of the event log, 0 when it does not exist yet.
    fn log_len(path: &Path) -> Result<u64, StoreError> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn truncate_log(path: &Path, len: u64) -> std::io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_data()
    }

    fn append_events(&self, path: &Path, events: &[Event]) -> Result<(), StoreError> {
        let path = path.to_path_buf();
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            serde_json::to_writer(&mut writer, event).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?;
            writer.write_all(b"\n").map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;
        writer.get_ref().sync_data().map_err(io_err)
    }
}

impl StateStore for FileStore {
    fn load_all(&self) -> Result<Vec<StoredGroup>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut stored = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            let is_group_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".group.json"))
                .unwrap_or(false);
            if !is_group_file {
                continue;
            }

            let group = Self::read_group(&path)?;
            let events = Self::read_events(&self.events_path(&group.key))?;
            stored.push(StoredGroup { group, events });
        }

        tracing::info!(dir = %self.dir.display(), groups = stored.len(), "Loaded monitor state");
        Ok(stored)
    }

    fn commit(&self, group: &Group, events: &[Event]) -> Result<(), StoreError> {
        if events.is_empty() {
            return self.write_group(group);
        }

        // Events first: a snapshot must never reference history that is missing.
        // A failed commit cuts the log back so the discarded events never replay.
        let log = self.events_path(&group.key);
        let mark = Self::log_len(&log)?;
        let result = self
            .append_events(&log, events)
            .and_then(|()| self.write_group(group));
        if result.is_err() {
            if let Err(e) = Self::truncate_log(&log, mark) {
                tracing::error!(path = %log.display(), error = %e, "Could not roll back the event log");
            }
        }
        result
    }
}
