//! Last-applied state
//!
//! The snapshot records every resource the provider has materialized: its
//! provider id, the properties it was applied with and the outputs it
//! returned. The executor persists changes one resource at a time, so a
//! crash in the middle of a run leaves a usable partial state behind.

use crate::error::{Error, Result};
use crate::types::{Attributes, ResourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Current state file format version
pub const STATE_VERSION: u32 = 1;

/// A resource after successful provider-side creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveResource {
    pub id: ResourceId,
    /// Identifier assigned by the provider
    pub provider_id: String,
    /// Resolved properties the resource was last applied with
    #[serde(default)]
    pub properties: Attributes,
    /// Outputs returned by the provider
    #[serde(default)]
    pub outputs: Attributes,
    /// Dependencies at the time of the last apply
    #[serde(default)]
    pub depends_on: BTreeSet<ResourceId>,
    pub applied_at: DateTime<Utc>,
    /// Provider ids of superseded instances still awaiting deletion
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deposed: Vec<String>,
}

/// Mapping from resource id to its last-applied record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, LiveResource>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ResourceId) -> Option<&LiveResource> {
        self.resources.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    pub fn insert(&mut self, resource: LiveResource) {
        self.resources.insert(resource.id.clone(), resource);
    }

    pub fn remove(&mut self, id: &ResourceId) -> Option<LiveResource> {
        self.resources.remove(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiveResource> {
        self.resources.values()
    }

    /// Outputs recorded for a resource
    pub fn outputs(&self, id: &ResourceId) -> Option<&Attributes> {
        self.resources.get(id).map(|r| &r.outputs)
    }

    /// Resources whose recorded dependencies include `id`
    pub fn dependents(&self, id: &ResourceId) -> impl Iterator<Item = &ResourceId> {
        self.resources
            .values()
            .filter(move |r| r.depends_on.contains(id))
            .map(|r| &r.id)
    }
}

/// Persistence for the state snapshot
///
/// Implementations must serialize concurrent writers and must never expose
/// a partially written save on reload.
pub trait StateStore: Send + Sync {
    /// Load the last persisted snapshot (empty if none)
    fn load(&self) -> Result<Snapshot>;

    /// Record a resource after a successful create or update
    fn save(&self, resource: &LiveResource) -> Result<()>;

    /// Forget a resource after a successful delete
    fn remove(&self, id: &ResourceId) -> Result<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory state, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshot: Mutex<Snapshot>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Snapshot {
        lock(&self.snapshot).clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Snapshot> {
        Ok(self.snapshot())
    }

    fn save(&self, resource: &LiveResource) -> Result<()> {
        lock(&self.snapshot).insert(resource.clone());
        Ok(())
    }

    fn remove(&self, id: &ResourceId) -> Result<()> {
        lock(&self.snapshot).remove(id);
        Ok(())
    }
}

/// On-disk layout of the state file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    serial: u64,
    #[serde(default)]
    resources: BTreeMap<ResourceId, LiveResource>,
}

/// JSON state file with atomic replace semantics
///
/// Every write goes to a temporary file in the same directory, is synced,
/// and is then renamed over the state file. A single mutex serializes
/// writers inside the process; [`StateLock`] keeps other processes out.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    cache: Mutex<Option<StateFile>>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serial number of the last durable write (0 if never written)
    pub fn serial(&self) -> Result<u64> {
        let mut cache = lock(&self.cache);
        Ok(self.cached(&mut cache)?.serial)
    }

    /// Take the cross-process lock guarding this state file
    pub fn lock(&self) -> Result<StateLock> {
        StateLock::acquire(&self.path)
    }

    fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::StateCorruption {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn read_file(&self) -> Result<StateFile> {
        if !self.path.exists() {
            log::debug!("State file {} does not exist, starting empty", self.path.display());
            return Ok(StateFile {
                version: STATE_VERSION,
                ..StateFile::default()
            });
        }

        let content = fs::read_to_string(&self.path)?;
        let file: StateFile =
            serde_json::from_str(&content).map_err(|e| self.corrupt(e.to_string()))?;

        if file.version != STATE_VERSION {
            return Err(self.corrupt(format!(
                "unsupported version {} (expected {STATE_VERSION})",
                file.version
            )));
        }
        if let Some((key, record)) = file.resources.iter().find(|(key, r)| **key != r.id) {
            return Err(self.corrupt(format!("entry {key} holds record for {}", record.id)));
        }

        log::debug!(
            "Loaded state serial {} with {} resources from {}",
            file.serial,
            file.resources.len(),
            self.path.display()
        );
        Ok(file)
    }

    fn cached<'a>(&self, cache: &'a mut Option<StateFile>) -> Result<&'a mut StateFile> {
        if cache.is_none() {
            *cache = Some(self.read_file()?);
        }
        cache
            .as_mut()
            .ok_or_else(|| self.corrupt("state cache unavailable"))
    }

    fn write_file(&self, file: &StateFile) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, file)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        sync_dir(&dir)?;

        log::debug!("Saved state serial {} to {}", file.serial, self.path.display());
        Ok(())
    }

    /// Apply a mutation and persist it; the cache only changes once the
    /// write is durable.
    fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<ResourceId, LiveResource>),
    {
        let mut cache = lock(&self.cache);
        let current = self.cached(&mut cache)?;

        let mut next = current.clone();
        mutate(&mut next.resources);
        next.serial += 1;

        self.write_file(&next)?;
        *current = next;
        Ok(())
    }
}

/// Make a completed rename durable
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Snapshot> {
        let file = self.read_file()?;
        let snapshot = Snapshot {
            resources: file.resources.clone(),
        };
        *lock(&self.cache) = Some(file);
        Ok(snapshot)
    }

    fn save(&self, resource: &LiveResource) -> Result<()> {
        self.update(|resources| {
            resources.insert(resource.id.clone(), resource.clone());
        })
    }

    fn remove(&self, id: &ResourceId) -> Result<()> {
        self.update(|resources| {
            resources.remove(id);
        })
    }
}

/// Exclusive lock on a state file, released on drop
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    /// Create `<state>.lock`, failing if another run already holds it
    pub fn acquire(state_path: &Path) -> Result<Self> {
        let mut name = state_path.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                log::debug!("Acquired state lock {}", path.display());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::StateLocked(path))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to release state lock {}: {}", self.path.display(), e);
        }
    }
}
