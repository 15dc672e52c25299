//! Persisted configuration snapshots
//!
//! The store keeps three document slots (pending, current, previous) and the
//! meta-configuration. Slots hold `Arc<Document>` values that are replaced
//! whole under a write lock, so a reader always sees a complete snapshot.
//!
//! A store opened on a directory mirrors each slot to a JSON file. Writes go
//! to a temporary sibling first and are renamed into place. Other processes
//! may share the directory; [`SnapshotStore::reload`] picks up what they
//! wrote.

use crate::document::{Document, DocumentFormat};
use crate::error::Result;
use crate::meta::MetaConfiguration;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

const PENDING_FILE: &str = "pending.json";
const CURRENT_FILE: &str = "current.json";
const PREVIOUS_FILE: &str = "previous.json";
const META_FILE: &str = "meta.json";

/// Point-in-time view of the document slots
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Staged but never applied
    pub pending: Option<Arc<Document>>,
    /// Last successfully applied
    pub current: Option<Arc<Document>>,
    /// What `current` replaced, kept for rollback
    pub previous: Option<Arc<Document>>,
}

#[derive(Debug)]
pub struct SnapshotStore {
    slots: RwLock<Snapshot>,
    meta: RwLock<Arc<MetaConfiguration>>,
    dir: Option<PathBuf>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SnapshotStore {
    /// A store that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            slots: RwLock::new(Snapshot::default()),
            meta: RwLock::new(Arc::new(MetaConfiguration::default())),
            dir: None,
        }
    }

    /// Open (or create) a store in a directory, loading any saved state
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let slots = Snapshot {
            pending: load_slot(&dir.join(PENDING_FILE), None)?,
            current: load_slot(&dir.join(CURRENT_FILE), None)?,
            previous: load_slot(&dir.join(PREVIOUS_FILE), None)?,
        };
        let meta = load_meta(dir)?;

        log::debug!("Opened snapshot store at {}", dir.display());
        Ok(Self {
            slots: RwLock::new(slots),
            meta: RwLock::new(Arc::new(meta)),
            dir: Some(dir.to_path_buf()),
        })
    }

    /// Re-read every slot and the meta-configuration from disk
    ///
    /// A slot whose file still holds the document already loaded keeps the
    /// same `Arc`. No-op for an in-memory store.
    pub fn reload(&self) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };

        let mut slots = self.write();
        let next = Snapshot {
            pending: load_slot(&dir.join(PENDING_FILE), slots.pending.as_ref())?,
            current: load_slot(&dir.join(CURRENT_FILE), slots.current.as_ref())?,
            previous: load_slot(&dir.join(PREVIOUS_FILE), slots.previous.as_ref())?,
        };
        *slots = next;
        drop(slots);

        let meta = load_meta(dir)?;
        *self.meta_write() = Arc::new(meta);
        Ok(())
    }

    /// Directory backing the store, if persistent
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        match self.slots.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Snapshot> {
        match self.slots.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.read().clone()
    }

    pub fn pending(&self) -> Option<Arc<Document>> {
        self.read().pending.clone()
    }

    pub fn current(&self) -> Option<Arc<Document>> {
        self.read().current.clone()
    }

    pub fn previous(&self) -> Option<Arc<Document>> {
        self.read().previous.clone()
    }

    /// Replace the pending slot
    pub fn stage(&self, document: Document) -> Result<Arc<Document>> {
        let document = Arc::new(document);
        let mut slots = self.write();
        let next = Snapshot {
            pending: Some(Arc::clone(&document)),
            ..slots.clone()
        };
        self.persist(&slots, &next)?;
        *slots = next;
        Ok(document)
    }

    /// Copy current into previous ahead of applying `applying`
    ///
    /// Without a current document, or when current is the document being
    /// re-applied, the previous slot is left alone.
    pub fn begin_apply(&self, applying: &Arc<Document>) -> Result<()> {
        let mut slots = self.write();
        let current = match &slots.current {
            Some(current) if !Arc::ptr_eq(current, applying) => Arc::clone(current),
            _ => return Ok(()),
        };
        let next = Snapshot {
            previous: Some(current),
            ..slots.clone()
        };
        self.persist(&slots, &next)?;
        *slots = next;
        Ok(())
    }

    /// Make an applied document current; clears pending if it was the one applied
    pub fn promote(&self, document: Arc<Document>) -> Result<()> {
        let mut slots = self.write();
        let pending = match &slots.pending {
            Some(p) if Arc::ptr_eq(p, &document) => None,
            other => other.clone(),
        };
        let next = Snapshot {
            pending,
            current: Some(document),
            previous: slots.previous.clone(),
        };
        self.persist(&slots, &next)?;
        *slots = next;
        Ok(())
    }

    /// Make a re-applied previous document current, keeping the replaced one as previous
    pub fn complete_rollback(&self, restored: Arc<Document>) -> Result<()> {
        let mut slots = self.write();
        let next = Snapshot {
            pending: slots.pending.clone(),
            current: Some(restored),
            previous: slots.current.clone(),
        };
        self.persist(&slots, &next)?;
        *slots = next;
        Ok(())
    }

    pub fn meta(&self) -> Arc<MetaConfiguration> {
        match self.meta.read() {
            Ok(meta) => Arc::clone(&meta),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn meta_write(&self) -> RwLockWriteGuard<'_, Arc<MetaConfiguration>> {
        match self.meta.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replace the meta-configuration (already validated by the caller)
    pub fn set_meta(&self, meta: MetaConfiguration) -> Result<()> {
        let mut guard = self.meta_write();
        if let Some(dir) = &self.dir {
            write_atomic(&dir.join(META_FILE), &serde_json::to_string_pretty(&meta)?)?;
        }
        *guard = Arc::new(meta);
        Ok(())
    }

    /// Write the slots that changed between `old` and `new`
    fn persist(&self, old: &Snapshot, new: &Snapshot) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };

        let slots = [
            (PENDING_FILE, &old.pending, &new.pending),
            (CURRENT_FILE, &old.current, &new.current),
            (PREVIOUS_FILE, &old.previous, &new.previous),
        ];

        for (file, before, after) in slots {
            let unchanged = match (before, after) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                continue;
            }

            let path = dir.join(file);
            match after {
                Some(document) => write_atomic(&path, &document.to_json()?)?,
                None if path.exists() => fs::remove_file(&path)?,
                None => {}
            }
        }

        Ok(())
    }
}

/// Load a slot file, reusing `held` when the file still holds it
fn load_slot(path: &Path, held: Option<&Arc<Document>>) -> Result<Option<Arc<Document>>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if let Some(held) = held
        && held.to_json()? == content
    {
        return Ok(Some(Arc::clone(held)));
    }
    Ok(Some(Arc::new(Document::parse(&content, DocumentFormat::Json)?)))
}

fn load_meta(dir: &Path) -> Result<MetaConfiguration> {
    let path = dir.join(META_FILE);
    if path.exists() {
        MetaConfiguration::load(&path)
    } else {
        Ok(MetaConfiguration::default())
    }
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
