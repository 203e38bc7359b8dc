//! The unified entry model.
//!
//! An [`Entry`] is one catalog object (file, directory, symlink or something
//! the backend could not classify) from one open volume session. Entries
//! compare and hash by catalog id only, so the same object fetched by two
//! listings is the same entry even though the HFS+ backend hands out a new
//! native handle per query.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{RwLock, RwLockReadGuard};

use crate::backend::plus::PlusEntryHandle;
use crate::error::{VolumeError, VolumeResult};
use crate::volume::{DEFAULT_READ_LIMIT, Volume, VolumeShared};

/// Catalog node identifier, unique within one open volume session.
pub type CatalogId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Unknown,
}

/// Finder metadata kept by the classic format for files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FinderInfo {
    pub file_type: [u8; 4],
    pub creator: [u8; 4],
    pub locked: bool,
}

impl FinderInfo {
    pub fn type_code(&self) -> String {
        String::from_utf8_lossy(&self.file_type).into_owned()
    }

    pub fn creator_code(&self) -> String {
        String::from_utf8_lossy(&self.creator).into_owned()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedAttribute {
    pub name: String,
    pub size: u64,
}

/// How the owning backend addresses an entry.
#[derive(Debug)]
pub(crate) enum Locator {
    /// Absolute colon path, rebuilt from the root.
    Classic { path: String },
    /// Native file entry, owned by this locator alone.
    Plus(PlusEntryHandle),
}

/// Everything an adapter knows about an object, before it is tied to a volume.
#[derive(Debug)]
pub(crate) struct EntryRecord {
    pub(crate) id: CatalogId,
    pub(crate) parent_id: CatalogId,
    pub(crate) name: String,
    pub(crate) kind: EntryKind,
    pub(crate) data_size: u64,
    pub(crate) resource_size: u64,
    pub(crate) created: Option<SystemTime>,
    pub(crate) modified: Option<SystemTime>,
    pub(crate) accessed: Option<SystemTime>,
    pub(crate) mode: u32,
    pub(crate) uid: u32,
    pub(crate) gid: u32,
    pub(crate) finder: Option<FinderInfo>,
    pub(crate) locator: Locator,
}

/// Seconds since the Unix epoch as reported by the classic library; 0 is unset.
pub(crate) fn unix_time(secs: i64) -> Option<SystemTime> {
    match secs {
        0 => None,
        s if s > 0 => Some(UNIX_EPOCH + Duration::from_secs(s as u64)),
        s => Some(UNIX_EPOCH - Duration::from_secs(s.unsigned_abs())),
    }
}

struct EntryInner {
    id: CatalogId,
    parent_id: CatalogId,
    name: String,
    kind: EntryKind,
    data_size: u64,
    resource_size: u64,
    created: Option<SystemTime>,
    modified: Option<SystemTime>,
    accessed: Option<SystemTime>,
    mode: u32,
    uid: u32,
    gid: u32,
    finder: Option<FinderInfo>,
    // only rename and move touch this
    locator: RwLock<Locator>,
    volume: Weak<VolumeShared>,
}

/// One object on an open volume. Cheap to clone; the native handle behind an
/// HFS+ entry is released when the last clone is dropped.
#[derive(Clone)]
pub struct Entry {
    inner: Arc<EntryInner>,
}

impl Entry {
    pub(crate) fn from_record(record: EntryRecord, volume: Weak<VolumeShared>) -> Self {
        let EntryRecord {
            id,
            parent_id,
            name,
            kind,
            data_size,
            resource_size,
            created,
            modified,
            accessed,
            mode,
            uid,
            gid,
            finder,
            locator,
        } = record;
        Entry {
            inner: Arc::new(EntryInner {
                id,
                parent_id,
                name,
                kind,
                data_size,
                resource_size,
                created,
                modified,
                accessed,
                mode,
                uid,
                gid,
                finder,
                locator: RwLock::new(locator),
                volume,
            }),
        }
    }

    pub fn id(&self) -> CatalogId {
        self.inner.id
    }

    pub fn parent_id(&self) -> CatalogId {
        self.inner.parent_id
    }

    /// Name at the time the entry was listed. Empty for the root.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> EntryKind {
        self.inner.kind
    }

    pub fn is_directory(&self) -> bool {
        self.inner.kind == EntryKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.inner.kind == EntryKind::Symlink
    }

    /// Data fork size (the single logical size on HFS+).
    pub fn data_size(&self) -> u64 {
        self.inner.data_size
    }

    /// Resource fork size; always 0 on HFS+, see [`Volume::resource_fork_size`].
    pub fn resource_size(&self) -> u64 {
        self.inner.resource_size
    }

    /// Data plus resource fork.
    pub fn size(&self) -> u64 {
        self.inner.data_size + self.inner.resource_size
    }

    pub fn created(&self) -> Option<SystemTime> {
        self.inner.created
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.inner.modified
    }

    /// Last access, tracked by HFS+ only.
    pub fn accessed(&self) -> Option<SystemTime> {
        self.inner.accessed
    }

    /// Raw mode word. Synthesized as 0755/0644 on classic HFS.
    pub fn mode(&self) -> u32 {
        self.inner.mode
    }

    pub fn permissions(&self) -> u32 {
        self.inner.mode & 0o7777
    }

    pub fn uid(&self) -> u32 {
        self.inner.uid
    }

    pub fn gid(&self) -> u32 {
        self.inner.gid
    }

    pub fn finder_info(&self) -> Option<FinderInfo> {
        self.inner.finder
    }

    /// Filename extension without the dot, if any.
    pub fn extension(&self) -> Option<&str> {
        let name = self.name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx + 1..]),
        }
    }

    /// Current colon path on classic HFS, `None` on HFS+.
    pub fn classic_path(&self) -> Option<String> {
        match &*self.inner.locator.read() {
            Locator::Classic { path } => Some(path.clone()),
            Locator::Plus(_) => None,
        }
    }

    pub(crate) fn locator(&self) -> RwLockReadGuard<'_, Locator> {
        self.inner.locator.read()
    }

    pub(crate) fn relocate(&self, path: String) {
        let mut locator = self.inner.locator.write();
        if let Locator::Classic { path: current } = &mut *locator {
            *current = path;
        }
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<VolumeShared>) -> bool {
        std::ptr::eq(self.inner.volume.as_ptr(), Arc::as_ptr(shared))
    }

    /// The volume this entry was listed from, if it is still alive.
    pub fn volume(&self) -> VolumeResult<Volume> {
        self.inner
            .volume
            .upgrade()
            .map(Volume::from_shared)
            .ok_or(VolumeError::Closed)
    }

    /// Read up to `max` bytes from offset 0 in a single call.
    pub fn read_data(&self, max: usize) -> VolumeResult<Vec<u8>> {
        self.volume()?.read_data(self, max)
    }

    /// [`read_data`](Self::read_data) with the default 10 MiB limit.
    pub fn read_preview(&self) -> VolumeResult<Vec<u8>> {
        self.read_data(DEFAULT_READ_LIMIT)
    }

    /// Link target on HFS+; always `None` on classic HFS.
    pub fn symlink_target(&self) -> VolumeResult<Option<String>> {
        self.volume()?.symlink_target(self)
    }

    pub fn delete(&self) -> VolumeResult<()> {
        self.volume()?.delete(self)
    }

    pub fn rename(&self, new_name: &str) -> VolumeResult<Entry> {
        self.volume()?.rename(self, new_name)
    }

    pub fn copy_to(&self, destination_path: &str) -> VolumeResult<Entry> {
        self.volume()?.copy_to(self, destination_path)
    }

    pub fn move_to(&self, destination_path: &str) -> VolumeResult<Entry> {
        self.volume()?.move_to(self, destination_path)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Entry {}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("data_size", &self.inner.data_size)
            .field("resource_size", &self.inner.resource_size)
            .field("locator", &*self.inner.locator.read())
            .finish()
    }
}
