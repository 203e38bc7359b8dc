//! Adapter for the path-addressed classic HFS library.
//!
//! Every object is located by a colon-delimited path rebuilt from the root,
//! so [`child_path`] must agree with the library's own path grammar.

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::entry::{EntryKind, EntryRecord, FinderInfo, Locator, unix_time};
use crate::error::{VolumeError, VolumeResult};
use crate::native::{
    ClassicDirEntry, ClassicLibrary, ClassicMountMode, ClassicVolumeInfo, NativeError, RawHandle,
};

/// Path of the root directory.
pub const ROOT_PATH: &str = ":";
/// Catalog node id of the root directory on every HFS volume.
pub const ROOT_CNID: u32 = 2;
/// Longest file or directory name the format can store.
pub const MAX_NAME_LEN: usize = 31;

pub(crate) const DEFAULT_DIR_MODE: u32 = 0o755;
pub(crate) const DEFAULT_FILE_MODE: u32 = 0o644;

const READ_CHUNK: usize = 32 * 1024;

/// Join a parent path and a child name.
///
/// The root is `":"`; its children are `":name"`, everything deeper is
/// `"parent:name"`.
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH {
        format!(":{name}")
    } else {
        format!("{parent}:{name}")
    }
}

/// Split a path into its parent path and final name.
///
/// Returns `None` for the root.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    if path == ROOT_PATH || path.is_empty() {
        return None;
    }
    let idx = path.rfind(':')?;
    let name = &path[idx + 1..];
    if name.is_empty() {
        return None;
    }
    let parent = if idx == 0 { ROOT_PATH } else { &path[..idx] };
    Some((parent, name))
}

/// Check that `name` can be stored as a single path component.
pub fn validate_name(name: &str) -> VolumeResult<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.contains(':') {
        "name contains ':'"
    } else if name.len() > MAX_NAME_LEN {
        "name is longer than 31 bytes"
    } else {
        return Ok(());
    };
    Err(VolumeError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

fn not_found_or(operation: &'static str, path: &str, err: NativeError) -> VolumeError {
    let lowered = err.message().to_ascii_lowercase();
    if lowered.contains("no such") || lowered.contains("not found") {
        VolumeError::NotFound(path.to_string())
    } else {
        VolumeError::operation(operation, err)
    }
}

/// A mounted classic volume. Unmounts on drop.
pub(crate) struct ClassicSession {
    lib: Arc<dyn ClassicLibrary>,
    volume: RawHandle,
    writable: bool,
    info: ClassicVolumeInfo,
}

impl ClassicSession {
    pub(crate) fn mount(
        lib: Arc<dyn ClassicLibrary>,
        path: &str,
        partition: u32,
        mode: ClassicMountMode,
    ) -> Result<Self, NativeError> {
        let volume = lib.mount(path, partition, mode)?;
        let mut session = ClassicSession {
            lib,
            volume,
            writable: mode == ClassicMountMode::ReadWrite,
            info: ClassicVolumeInfo::default(),
        };
        // dropping `session` on error unmounts again
        session.info = session.lib.vstat(volume)?;
        if session.info.locked {
            session.writable = false;
        }
        debug!(path, name = %session.info.name, writable = session.writable, "classic volume mounted");
        Ok(session)
    }

    pub(crate) fn info(&self) -> &ClassicVolumeInfo {
        &self.info
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn root(&self) -> EntryRecord {
        EntryRecord {
            id: ROOT_CNID,
            parent_id: 1,
            name: String::new(),
            kind: EntryKind::Directory,
            data_size: 0,
            resource_size: 0,
            created: unix_time(self.info.created),
            modified: unix_time(self.info.modified),
            accessed: None,
            mode: DEFAULT_DIR_MODE,
            uid: 0,
            gid: 0,
            finder: None,
            locator: Locator::Classic {
                path: ROOT_PATH.to_string(),
            },
        }
    }

    pub(crate) fn list_children(&self, path: &str) -> VolumeResult<Vec<EntryRecord>> {
        let dir = self
            .lib
            .opendir(self.volume, path)
            .map_err(|e| not_found_or("classic.opendir", path, e))?;
        let dir = DirGuard {
            lib: &*self.lib,
            dir,
        };

        let mut children = Vec::new();
        while let Some(ent) = self
            .lib
            .readdir(dir.dir)
            .map_err(|e| VolumeError::operation("classic.readdir", e))?
        {
            let child = child_path(path, &ent.name);
            children.push(record_from_dirent(ent, child));
        }
        debug!(path, count = children.len(), "classic directory listed");
        Ok(children)
    }

    pub(crate) fn stat(&self, path: &str) -> VolumeResult<EntryRecord> {
        if path == ROOT_PATH {
            return Ok(self.root());
        }
        let ent = self
            .lib
            .stat(self.volume, path)
            .map_err(|e| not_found_or("classic.stat", path, e))?;
        Ok(record_from_dirent(ent, path.to_string()))
    }

    pub(crate) fn exists(&self, path: &str) -> bool {
        path == ROOT_PATH || self.lib.stat(self.volume, path).is_ok()
    }

    /// Single read of up to `max` bytes from the start of the data fork.
    pub(crate) fn read_bytes(&self, path: &str, max: usize) -> VolumeResult<Vec<u8>> {
        let file = self.open_file(path)?;
        let mut buf = vec![0u8; max];
        let read = self
            .lib
            .read(file.file, &mut buf)
            .map_err(|e| VolumeError::operation("classic.read", e))?;
        buf.truncate(read);
        Ok(buf)
    }

    /// Stream the whole data fork into `out`.
    pub(crate) fn copy_out(&self, path: &str, out: &mut dyn Write) -> VolumeResult<u64> {
        let file = self.open_file(path)?;
        let mut buf = vec![0u8; READ_CHUNK];
        let mut total = 0u64;
        loop {
            let read = self
                .lib
                .read(file.file, &mut buf)
                .map_err(|e| VolumeError::operation("classic.read", e))?;
            if read == 0 {
                break;
            }
            out.write_all(&buf[..read])?;
            total += read as u64;
        }
        Ok(total)
    }

    fn open_file(&self, path: &str) -> VolumeResult<FileGuard<'_>> {
        let file = self
            .lib
            .open(self.volume, path)
            .map_err(|e| not_found_or("classic.open", path, e))?;
        Ok(FileGuard {
            lib: &*self.lib,
            file,
        })
    }

    pub(crate) fn mkdir(&self, path: &str) -> VolumeResult<()> {
        self.lib
            .mkdir(self.volume, path)
            .map_err(|e| VolumeError::write("classic.mkdir", path, e))
    }

    pub(crate) fn create_file(
        &self,
        path: &str,
        file_type: [u8; 4],
        creator: [u8; 4],
    ) -> VolumeResult<ClassicWriter<'_>> {
        let file = self
            .lib
            .create(self.volume, path, file_type, creator)
            .map_err(|e| VolumeError::write("classic.create", path, e))?;
        Ok(ClassicWriter {
            guard: FileGuard {
                lib: &*self.lib,
                file,
            },
            path: path.to_string(),
        })
    }

    pub(crate) fn delete_file(&self, path: &str) -> VolumeResult<()> {
        self.lib
            .delete(self.volume, path)
            .map_err(|e| VolumeError::write("classic.delete", path, e))
    }

    pub(crate) fn remove_directory(&self, path: &str) -> VolumeResult<()> {
        self.lib
            .rmdir(self.volume, path)
            .map_err(|e| VolumeError::write("classic.rmdir", path, e))
    }

    pub(crate) fn rename(&self, old_path: &str, new_path: &str) -> VolumeResult<()> {
        self.lib
            .rename(self.volume, old_path, new_path)
            .map_err(|e| VolumeError::write("classic.rename", new_path, e))
    }

    /// Copy the data fork of `source` into a new file at `destination`.
    pub(crate) fn copy_file(
        &self,
        source: &str,
        destination: &str,
        file_type: [u8; 4],
        creator: [u8; 4],
    ) -> VolumeResult<()> {
        let input = self.open_file(source)?;
        let mut writer = self.create_file(destination, file_type, creator)?;
        let mut buf = vec![0u8; READ_CHUNK];
        let result = loop {
            let read = match self.lib.read(input.file, &mut buf) {
                Ok(read) => read,
                Err(e) => break Err(VolumeError::operation("classic.read", e)),
            };
            if read == 0 {
                break Ok(());
            }
            if let Err(e) = writer.write_chunk(&buf[..read]) {
                break Err(e);
            }
        };
        drop(writer);
        if result.is_err() {
            if let Err(e) = self.delete_file(destination) {
                warn!(destination, error = %e, "failed to remove partial copy");
            }
        }
        result
    }
}

/// Name for the `n`th duplicate of `name`: `"a copy.txt"`, `"a copy 2.txt"`.
///
/// The stem is shortened so the result still fits in [`MAX_NAME_LEN`] bytes.
pub fn duplicate_name(name: &str, is_directory: bool, n: u32) -> String {
    let (stem, extension) = match name.rfind('.') {
        Some(idx) if idx > 0 && !is_directory => name.split_at(idx),
        _ => (name, ""),
    };
    let suffix = if n <= 1 {
        " copy".to_string()
    } else {
        format!(" copy {n}")
    };
    let budget = MAX_NAME_LEN.saturating_sub(suffix.len() + extension.len());
    let mut end = stem.len().min(budget);
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{suffix}{extension}", &stem[..end])
}

impl Drop for ClassicSession {
    fn drop(&mut self) {
        if let Err(e) = self.lib.umount(self.volume) {
            warn!(error = %e, "failed to unmount classic volume");
        }
    }
}

/// Open file created for writing; closed on drop.
pub(crate) struct ClassicWriter<'a> {
    guard: FileGuard<'a>,
    path: String,
}

impl ClassicWriter<'_> {
    /// Write one chunk. A zero-byte result is treated as a failure.
    pub(crate) fn write_chunk(&mut self, mut chunk: &[u8]) -> VolumeResult<()> {
        while !chunk.is_empty() {
            let written = self
                .guard
                .lib
                .write(self.guard.file, chunk)
                .map_err(|e| VolumeError::write("classic.write", &self.path, e))?;
            if written == 0 {
                return Err(VolumeError::WriteFailed {
                    operation: "classic.write",
                    reason: format!("no bytes written to \"{}\"", self.path),
                });
            }
            chunk = &chunk[written.min(chunk.len())..];
        }
        Ok(())
    }
}

struct DirGuard<'a> {
    lib: &'a dyn ClassicLibrary,
    dir: RawHandle,
}

impl Drop for DirGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lib.closedir(self.dir) {
            warn!(error = %e, "failed to close classic directory");
        }
    }
}

struct FileGuard<'a> {
    lib: &'a dyn ClassicLibrary,
    file: RawHandle,
}

impl Drop for FileGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lib.close(self.file) {
            warn!(error = %e, "failed to close classic file");
        }
    }
}

fn record_from_dirent(ent: ClassicDirEntry, path: String) -> EntryRecord {
    let (kind, data_size, resource_size, mode, finder) = if ent.is_directory {
        (EntryKind::Directory, 0, 0, DEFAULT_DIR_MODE, None)
    } else {
        (
            EntryKind::File,
            ent.data_size,
            ent.resource_size,
            DEFAULT_FILE_MODE,
            Some(FinderInfo {
                file_type: ent.file_type,
                creator: ent.creator,
                locked: ent.locked,
            }),
        )
    };
    EntryRecord {
        id: ent.cnid,
        parent_id: ent.parent_cnid,
        name: ent.name,
        kind,
        data_size,
        resource_size,
        created: unix_time(ent.created),
        modified: unix_time(ent.modified),
        accessed: None,
        mode,
        uid: 0,
        gid: 0,
        finder,
        locator: Locator::Classic { path },
    }
}
