//! Adapter for the handle-addressed HFS+ library.

use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::entry::{EntryKind, EntryRecord, Locator};
use crate::error::{VolumeError, VolumeResult};
use crate::native::{NativeError, PlusLibrary, RawHandle};

/// Seconds between 1904-01-01 and 1970-01-01.
const HFS_EPOCH_OFFSET: u64 = 2_082_844_800;

const S_IFMT: u16 = 0o170000;
const S_IFDIR: u16 = 0o040000;
const S_IFREG: u16 = 0o100000;
const S_IFLNK: u16 = 0o120000;

const READ_CHUNK: usize = 64 * 1024;

/// Convert an HFS+ timestamp (seconds since 1904) to a `SystemTime`.
pub fn hfs_time(secs: u32) -> Option<SystemTime> {
    if secs == 0 {
        return None;
    }
    let secs = u64::from(secs);
    if secs >= HFS_EPOCH_OFFSET {
        Some(UNIX_EPOCH + Duration::from_secs(secs - HFS_EPOCH_OFFSET))
    } else {
        Some(UNIX_EPOCH - Duration::from_secs(HFS_EPOCH_OFFSET - secs))
    }
}

pub(crate) fn kind_from_mode(mode: u16) -> EntryKind {
    match mode & S_IFMT {
        S_IFDIR => EntryKind::Directory,
        S_IFREG => EntryKind::File,
        S_IFLNK => EntryKind::Symlink,
        _ => EntryKind::Unknown,
    }
}

/// An open native volume. Closed and freed once the session and every entry
/// handed out from it are gone.
struct PlusVolumeHandle {
    lib: Arc<dyn PlusLibrary>,
    raw: RawHandle,
}

impl Drop for PlusVolumeHandle {
    fn drop(&mut self) {
        if let Err(e) = self.lib.close_volume(self.raw) {
            warn!(error = %e, "failed to close HFS+ volume");
        }
    }
}

/// Owned native file entry. Freed exactly once, on drop, and always before
/// the volume it came from.
pub struct PlusEntryHandle {
    volume: Arc<PlusVolumeHandle>,
    raw: RawHandle,
}

impl PlusEntryHandle {
    fn new(volume: Arc<PlusVolumeHandle>, raw: RawHandle) -> Self {
        Self { volume, raw }
    }

    pub(crate) fn raw(&self) -> RawHandle {
        self.raw
    }
}

impl fmt::Debug for PlusEntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PlusEntryHandle").field(&self.raw).finish()
    }
}

impl Drop for PlusEntryHandle {
    fn drop(&mut self) {
        if let Err(e) = self.volume.lib.free_entry(self.raw) {
            warn!(error = %e, "failed to free HFS+ file entry");
        }
    }
}

/// An open HFS+ volume session.
pub(crate) struct PlusSession {
    volume: Arc<PlusVolumeHandle>,
    name: String,
}

impl PlusSession {
    /// Check the signature and open. `Ok(None)` means the signature did not match.
    pub(crate) fn open(
        lib: Arc<dyn PlusLibrary>,
        path: &str,
    ) -> Result<Option<Self>, NativeError> {
        if !lib.check_signature(path)? {
            return Ok(None);
        }
        let raw = lib.open_volume(path)?;
        let name = lib.volume_name(raw).unwrap_or_default();
        let session = PlusSession {
            volume: Arc::new(PlusVolumeHandle { lib, raw }),
            name,
        };
        debug!(path, name = %session.name, "HFS+ volume opened");
        Ok(Some(session))
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn lib(&self) -> &dyn PlusLibrary {
        &*self.volume.lib
    }

    fn adopt(&self, raw: RawHandle) -> PlusEntryHandle {
        PlusEntryHandle::new(self.volume.clone(), raw)
    }

    pub(crate) fn root(&self) -> VolumeResult<EntryRecord> {
        let raw = self
            .lib()
            .root_directory(self.volume.raw)
            .map_err(|e| VolumeError::operation("plus.root_directory", e))?;
        let handle = self.adopt(raw);
        let mut record = self.record(handle)?;
        record.name.clear();
        Ok(record)
    }

    pub(crate) fn list_children(&self, dir: &PlusEntryHandle) -> VolumeResult<Vec<EntryRecord>> {
        let count = self
            .lib()
            .sub_entry_count(dir.raw)
            .map_err(|e| VolumeError::operation("plus.sub_entry_count", e))?;
        let mut children = Vec::with_capacity(count);
        for index in 0..count {
            let raw = self
                .lib()
                .sub_entry(dir.raw, index)
                .map_err(|e| VolumeError::operation("plus.sub_entry", e))?;
            // owned before any attribute is read so a failing getter still frees it
            let handle = self.adopt(raw);
            children.push(self.record(handle)?);
        }
        debug!(count, "HFS+ directory listed");
        Ok(children)
    }

    pub(crate) fn lookup(&self, path: &str) -> VolumeResult<EntryRecord> {
        let raw = self
            .lib()
            .entry_by_path(self.volume.raw, path)
            .map_err(|e| VolumeError::operation("plus.entry_by_path", e))?
            .ok_or_else(|| VolumeError::NotFound(path.to_string()))?;
        self.record(self.adopt(raw))
    }

    fn record(&self, handle: PlusEntryHandle) -> VolumeResult<EntryRecord> {
        let lib = self.lib();
        let raw = handle.raw;
        let attr = |op: &'static str| move |e: NativeError| VolumeError::operation(op, e);

        let id = lib.identifier(raw).map_err(attr("plus.identifier"))?;
        let parent_id = lib
            .parent_identifier(raw)
            .map_err(attr("plus.parent_identifier"))?;
        let mode = lib.file_mode(raw).map_err(attr("plus.file_mode"))?;
        let name = lib.name(raw).map_err(attr("plus.name"))?;
        let size = lib.size(raw).map_err(attr("plus.size"))?;
        let created = lib.creation_time(raw).map_err(attr("plus.creation_time"))?;
        let modified = lib
            .modification_time(raw)
            .map_err(attr("plus.modification_time"))?;
        let accessed = lib.access_time(raw).map_err(attr("plus.access_time"))?;
        let uid = lib.owner_identifier(raw).map_err(attr("plus.owner"))?;
        let gid = lib.group_identifier(raw).map_err(attr("plus.group"))?;

        Ok(EntryRecord {
            id,
            parent_id,
            name,
            kind: kind_from_mode(mode),
            data_size: size,
            resource_size: 0,
            created: hfs_time(created),
            modified: hfs_time(modified),
            accessed: hfs_time(accessed),
            mode: u32::from(mode),
            uid,
            gid,
            finder: None,
            locator: Locator::Plus(handle),
        })
    }

    /// Single read of up to `max` bytes at offset 0.
    pub(crate) fn read_bytes(&self, entry: &PlusEntryHandle, max: usize) -> VolumeResult<Vec<u8>> {
        let mut buf = vec![0u8; max];
        let read = self
            .lib()
            .read_at(entry.raw, &mut buf, 0)
            .map_err(|e| VolumeError::operation("plus.read", e))?;
        buf.truncate(read);
        Ok(buf)
    }

    pub(crate) fn copy_out(&self, entry: &PlusEntryHandle, out: &mut dyn Write) -> VolumeResult<u64> {
        let mut buf = vec![0u8; READ_CHUNK];
        let mut offset = 0u64;
        loop {
            let read = self
                .lib()
                .read_at(entry.raw, &mut buf, offset)
                .map_err(|e| VolumeError::operation("plus.read", e))?;
            if read == 0 {
                break;
            }
            out.write_all(&buf[..read])?;
            offset += read as u64;
        }
        Ok(offset)
    }

    pub(crate) fn symlink_target(&self, entry: &PlusEntryHandle) -> VolumeResult<Option<String>> {
        self.lib()
            .symlink_target(entry.raw)
            .map_err(|e| VolumeError::operation("plus.symlink_target", e))
    }

    pub(crate) fn extended_attributes(
        &self,
        entry: &PlusEntryHandle,
    ) -> VolumeResult<Vec<(String, u64)>> {
        self.lib()
            .extended_attributes(entry.raw)
            .map_err(|e| VolumeError::operation("plus.extended_attributes", e))
    }

    pub(crate) fn resource_fork_size(&self, entry: &PlusEntryHandle) -> VolumeResult<Option<u64>> {
        self.lib()
            .resource_fork_size(entry.raw)
            .map_err(|e| VolumeError::operation("plus.resource_fork", e))
    }
}
