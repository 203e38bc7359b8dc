//! The unified volume model.
//!
//! A [`Volume`] owns exactly one native session. Opening tries the HFS+
//! backend first and falls back to classic HFS, so the caller never picks a
//! format. Mutations are only accepted by a classic session mounted
//! read-write; everything else fails up front with a non-retryable error.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::Session;
use crate::backend::classic::{self, ClassicSession, ROOT_PATH, child_path, split_path};
use crate::backend::plus::PlusSession;
use crate::entry::{Entry, EntryKind, EntryRecord, ExtendedAttribute, Locator};
use crate::error::{VolumeError, VolumeResult};
use crate::native::{ClassicLibrary, ClassicMountMode, ClassicVolumeInfo, PlusLibrary};

/// Default cap for [`Volume::read_data`].
pub const DEFAULT_READ_LIMIT: usize = 10 * 1024 * 1024;
/// Imports are written in chunks of this size.
pub const IMPORT_CHUNK_SIZE: usize = 32 * 1024;

const DEVICE_PREFIX: &str = "/dev/";
const MAX_DUPLICATES: u32 = 999;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OpenMode {
    #[default]
    ReadOnly,
    ReadWrite,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub mode: OpenMode,
    /// Partition number handed to the classic library; 0 picks the first HFS
    /// partition or an unpartitioned image.
    pub partition: u32,
}

impl OpenOptions {
    pub fn read_only() -> Self {
        Self::default()
    }

    pub fn read_write() -> Self {
        Self {
            mode: OpenMode::ReadWrite,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeFormat {
    /// Classic HFS, path addressed.
    Hfs,
    /// HFS+, handle addressed.
    HfsPlus,
}

bitflags! {
    /// What the active backend can do for this session.
    pub struct Capabilities: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const SYMLINKS = 1 << 2;
        const RESOURCE_FORKS = 1 << 3;
        const EXTENDED_ATTRIBUTES = 1 << 4;
        const ACCESS_TIMES = 1 << 5;
        const POSIX_PERMISSIONS = 1 << 6;
    }
}

/// The pair of native libraries a volume can be opened with.
#[derive(Clone)]
pub struct Backends {
    pub classic: Arc<dyn ClassicLibrary>,
    pub plus: Arc<dyn PlusLibrary>,
}

impl Backends {
    pub fn new(classic: Arc<dyn ClassicLibrary>, plus: Arc<dyn PlusLibrary>) -> Self {
        Self { classic, plus }
    }

    /// The system libhfs and libfshfs.
    #[cfg(feature = "native")]
    pub fn native() -> Self {
        Self {
            classic: Arc::new(crate::native::ffi::NativeClassic::new()),
            plus: Arc::new(crate::native::ffi::NativePlus::new()),
        }
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

/// Whether `path` names a raw device rather than an image file.
pub fn is_device_path(path: &str) -> bool {
    path.starts_with(DEVICE_PREFIX)
}

pub(crate) struct VolumeShared {
    path: String,
    name: String,
    format: VolumeFormat,
    read_only: bool,
    open_warning: Option<String>,
    root: Entry,
    session: Mutex<Option<Session>>,
}

/// One open volume session. Clones share the session.
#[derive(Clone)]
pub struct Volume {
    shared: Arc<VolumeShared>,
}

impl Volume {
    pub(crate) fn from_shared(shared: Arc<VolumeShared>) -> Self {
        Self { shared }
    }

    /// Open `path`, detecting the format by trial: HFS+ first, then classic HFS.
    pub fn open(path: &str, options: &OpenOptions, backends: &Backends) -> VolumeResult<Volume> {
        let (session, open_warning) = open_session(path, options, backends)?;

        let (root, format, name, read_only) = match &session {
            Session::Classic(s) => (
                s.root(),
                VolumeFormat::Hfs,
                s.info().name.clone(),
                !s.is_writable(),
            ),
            Session::Plus(s) => (s.root()?, VolumeFormat::HfsPlus, s.name().to_string(), true),
        };
        let name = if name.is_empty() {
            fallback_name(path)
        } else {
            name
        };

        let shared = Arc::new_cyclic(|weak: &Weak<VolumeShared>| VolumeShared {
            path: path.to_string(),
            name,
            format,
            read_only,
            open_warning,
            root: Entry::from_record(root, weak.clone()),
            session: Mutex::new(Some(session)),
        });
        info!(
            path,
            name = %shared.name,
            format = ?shared.format,
            read_only = shared.read_only,
            "volume opened"
        );
        Ok(Volume { shared })
    }

    pub fn path(&self) -> &str {
        &self.shared.path
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn format(&self) -> VolumeFormat {
        self.shared.format
    }

    pub fn is_read_only(&self) -> bool {
        self.shared.read_only
    }

    /// Opened from a raw device path rather than an image file.
    pub fn is_device(&self) -> bool {
        is_device_path(&self.shared.path)
    }

    /// Set when a requested read-write open had to settle for read-only.
    pub fn open_warning(&self) -> Option<&str> {
        self.shared.open_warning.as_deref()
    }

    pub fn capabilities(&self) -> Capabilities {
        match self.shared.format {
            VolumeFormat::Hfs if self.shared.read_only => {
                Capabilities::READ | Capabilities::RESOURCE_FORKS
            }
            VolumeFormat::Hfs => {
                Capabilities::READ | Capabilities::WRITE | Capabilities::RESOURCE_FORKS
            }
            // libfshfs is a read-only library: no write entry points exist
            VolumeFormat::HfsPlus => {
                Capabilities::READ
                    | Capabilities::SYMLINKS
                    | Capabilities::RESOURCE_FORKS
                    | Capabilities::EXTENDED_ATTRIBUTES
                    | Capabilities::ACCESS_TIMES
                    | Capabilities::POSIX_PERMISSIONS
            }
        }
    }

    /// Space and object counts; only the classic library reports them.
    pub fn usage(&self) -> VolumeResult<Option<ClassicVolumeInfo>> {
        self.with_session(|s| match s {
            Session::Classic(c) => Ok(Some(c.info().clone())),
            Session::Plus(_) => Ok(None),
        })
    }

    pub fn root(&self) -> Entry {
        self.shared.root.clone()
    }

    pub fn is_open(&self) -> bool {
        self.shared.session.lock().is_some()
    }

    /// Whether two handles share the same session.
    pub fn same_session(&self, other: &Volume) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Release the native session. Calling it again is a no-op. An HFS+
    /// volume stays open natively until the last entry listed from it is
    /// dropped.
    pub fn close(&self) {
        let session = self.shared.session.lock().take();
        if let Some(session) = session {
            let backend = session.backend_name();
            drop(session);
            info!(path = %self.shared.path, backend, "volume closed");
        }
    }

    /// Fail unless mutations can run on this session.
    pub fn ensure_writable(&self, operation: &'static str) -> VolumeResult<()> {
        self.with_session(|s| s.writable_classic(operation).map(|_| ()))
    }

    fn with_session<T>(&self, f: impl FnOnce(&Session) -> VolumeResult<T>) -> VolumeResult<T> {
        let guard = self.shared.session.lock();
        let session = guard.as_ref().ok_or(VolumeError::Closed)?;
        f(session)
    }

    fn with_writable<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&ClassicSession) -> VolumeResult<T>,
    ) -> VolumeResult<T> {
        self.with_session(|s| f(s.writable_classic(operation)?))
    }

    fn adopt(&self, record: EntryRecord) -> Entry {
        Entry::from_record(record, Arc::downgrade(&self.shared))
    }

    fn check_owned(&self, entry: &Entry) -> VolumeResult<()> {
        if entry.belongs_to(&self.shared) {
            Ok(())
        } else {
            Err(VolumeError::ForeignEntry {
                name: entry.name().to_string(),
            })
        }
    }

    /// Children of `dir` in native iteration order.
    pub fn list_children(&self, dir: &Entry) -> VolumeResult<Vec<Entry>> {
        self.check_owned(dir)?;
        if !dir.is_directory() {
            return Err(VolumeError::Operation {
                operation: "list_children",
                reason: format!("\"{}\" is not a directory", dir.name()),
            });
        }
        let records = {
            let locator = dir.locator();
            self.with_session(|s| s.list_children(&locator))?
        };
        Ok(records.into_iter().map(|r| self.adopt(r)).collect())
    }

    /// Look an object up by path: `":a:b"` on classic HFS, `"/a/b"` on HFS+.
    pub fn lookup(&self, path: &str) -> VolumeResult<Entry> {
        let record = self.with_session(|s| s.lookup(path))?;
        Ok(self.adopt(record))
    }

    /// Read up to `max` bytes from offset 0 with a single native read.
    ///
    /// A short read is returned as is; no bytes at all from a non-empty file
    /// is an error.
    pub fn read_data(&self, entry: &Entry, max: usize) -> VolumeResult<Vec<u8>> {
        self.check_owned(entry)?;
        if entry.is_directory() {
            return Err(VolumeError::Operation {
                operation: "read_data",
                reason: format!("\"{}\" is a directory", entry.name()),
            });
        }
        let wanted = usize::try_from(entry.data_size()).unwrap_or(usize::MAX).min(max);
        if wanted == 0 {
            return Ok(Vec::new());
        }
        let data = {
            let locator = entry.locator();
            self.with_session(|s| s.read_bytes(&locator, wanted))?
        };
        if data.is_empty() {
            return Err(VolumeError::Operation {
                operation: "read_data",
                reason: format!("no data could be read from \"{}\"", entry.name()),
            });
        }
        Ok(data)
    }

    pub fn symlink_target(&self, entry: &Entry) -> VolumeResult<Option<String>> {
        self.check_owned(entry)?;
        let locator = entry.locator();
        self.with_session(|s| match (s, &*locator) {
            (Session::Plus(p), Locator::Plus(handle)) => p.symlink_target(handle),
            _ => Ok(None),
        })
    }

    pub fn extended_attributes(&self, entry: &Entry) -> VolumeResult<Vec<ExtendedAttribute>> {
        self.check_owned(entry)?;
        let locator = entry.locator();
        let attrs = self.with_session(|s| match (s, &*locator) {
            (Session::Plus(p), Locator::Plus(handle)) => p.extended_attributes(handle),
            _ => Ok(Vec::new()),
        })?;
        Ok(attrs
            .into_iter()
            .map(|(name, size)| ExtendedAttribute { name, size })
            .collect())
    }

    /// Resource fork size, `None` when the object has no resource fork.
    pub fn resource_fork_size(&self, entry: &Entry) -> VolumeResult<Option<u64>> {
        self.check_owned(entry)?;
        let locator = entry.locator();
        self.with_session(|s| match (s, &*locator) {
            (Session::Plus(p), Locator::Plus(handle)) => p.resource_fork_size(handle),
            _ if entry.kind() == EntryKind::File && entry.resource_size() > 0 => {
                Ok(Some(entry.resource_size()))
            }
            _ => Ok(None),
        })
    }

    /// Copy `entry` (recursively for directories) into the host directory
    /// `destination`. Returns the path written.
    pub fn export(&self, entry: &Entry, destination: &Path) -> VolumeResult<PathBuf> {
        self.check_owned(entry)?;
        let name = if entry.name().is_empty() {
            self.shared.name.clone()
        } else {
            entry.name().to_string()
        };
        let target = destination.join(host_file_name(&name));
        let locator = entry.locator();
        self.with_session(|s| export_into(s, &locator, entry.kind(), &target))?;
        info!(name = %name, target = %target.display(), "entry exported");
        Ok(target)
    }

    /// Create a directory at the absolute colon path `path`.
    pub fn create_directory(&self, path: &str) -> VolumeResult<Entry> {
        let record = self.with_writable("create_directory", |c| {
            let (_, name) = split_path(path).ok_or_else(|| invalid_path(path))?;
            classic::validate_name(name)?;
            c.mkdir(path)?;
            // mkdir does not report the new catalog record
            c.stat(path)
        })?;
        info!(path, "directory created");
        Ok(self.adopt(record))
    }

    /// Copy the host file or directory `source` to `destination_path`.
    pub fn import_file(&self, source: &Path, destination_path: &str) -> VolumeResult<Entry> {
        let record = self.with_writable("import_file", |c| {
            import_into(c, source, destination_path)?;
            c.stat(destination_path)
        })?;
        info!(source = %source.display(), destination_path, "imported");
        Ok(self.adopt(record))
    }

    /// Delete `entry`; directories are emptied first.
    pub fn delete(&self, entry: &Entry) -> VolumeResult<()> {
        self.check_owned(entry)?;
        let path = self.classic_path_of(entry, "delete")?;
        self.with_writable("delete", |c| {
            if path == ROOT_PATH {
                return Err(VolumeError::Operation {
                    operation: "delete",
                    reason: "the root directory cannot be deleted".to_string(),
                });
            }
            delete_recursive(c, &path, entry.is_directory())
        })?;
        info!(path = %path, "entry deleted");
        Ok(())
    }

    /// Rename in place. The passed entry is re-pointed at the new path; the
    /// returned entry carries the new name. The catalog id does not change.
    pub fn rename(&self, entry: &Entry, new_name: &str) -> VolumeResult<Entry> {
        self.check_owned(entry)?;
        let old_path = self.classic_path_of(entry, "rename")?;
        let (record, new_path) = self.with_writable("rename", |c| {
            classic::validate_name(new_name)?;
            let (parent, _) = split_path(&old_path).ok_or_else(|| invalid_path(&old_path))?;
            let new_path = child_path(parent, new_name);
            c.rename(&old_path, &new_path)?;
            Ok((c.stat(&new_path)?, new_path))
        })?;
        entry.relocate(new_path.clone());
        info!(from = %old_path, to = %new_path, "entry renamed");
        Ok(self.adopt(record))
    }

    /// Move to the absolute colon path `destination_path`.
    pub fn move_to(&self, entry: &Entry, destination_path: &str) -> VolumeResult<Entry> {
        self.check_owned(entry)?;
        let old_path = self.classic_path_of(entry, "move")?;
        let record = self.with_writable("move", |c| {
            let (_, name) =
                split_path(destination_path).ok_or_else(|| invalid_path(destination_path))?;
            classic::validate_name(name)?;
            c.rename(&old_path, destination_path)?;
            c.stat(destination_path)
        })?;
        entry.relocate(destination_path.to_string());
        info!(from = %old_path, to = destination_path, "entry moved");
        Ok(self.adopt(record))
    }

    /// Copy to the absolute colon path `destination_path`, recursively for
    /// directories.
    pub fn copy_to(&self, entry: &Entry, destination_path: &str) -> VolumeResult<Entry> {
        self.check_owned(entry)?;
        let source = self.classic_path_of(entry, "copy")?;
        let record = self.with_writable("copy", |c| {
            let (_, name) =
                split_path(destination_path).ok_or_else(|| invalid_path(destination_path))?;
            classic::validate_name(name)?;
            if destination_path.starts_with(&format!("{source}:")) {
                return Err(VolumeError::Operation {
                    operation: "copy",
                    reason: "a directory cannot be copied into itself".to_string(),
                });
            }
            if c.exists(destination_path) {
                return Err(VolumeError::AlreadyExists {
                    path: destination_path.to_string(),
                });
            }
            copy_within(c, &source, destination_path)?;
            c.stat(destination_path)
        })?;
        info!(from = %source, to = destination_path, "entry copied");
        Ok(self.adopt(record))
    }

    /// Copy next to the original as `"<name> copy"`, `"<name> copy 2"`, ...
    pub fn duplicate(&self, entry: &Entry) -> VolumeResult<Entry> {
        self.check_owned(entry)?;
        let source = self.classic_path_of(entry, "duplicate")?;
        let (parent, _) = split_path(&source).ok_or_else(|| invalid_path(&source))?;
        let parent = parent.to_string();
        let destination = self.with_writable("duplicate", |c| {
            (1..=MAX_DUPLICATES)
                .map(|n| {
                    child_path(
                        &parent,
                        &classic::duplicate_name(entry.name(), entry.is_directory(), n),
                    )
                })
                .find(|candidate| !c.exists(candidate))
                .ok_or_else(|| VolumeError::AlreadyExists {
                    path: child_path(&parent, entry.name()),
                })
        })?;
        self.copy_to(entry, &destination)
    }

    fn classic_path_of(&self, entry: &Entry, operation: &'static str) -> VolumeResult<String> {
        match entry.classic_path() {
            Some(path) => Ok(path),
            None => Err(VolumeError::Unsupported {
                operation,
                backend: "HFS+",
            }),
        }
    }
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("path", &self.shared.path)
            .field("name", &self.shared.name)
            .field("format", &self.shared.format)
            .field("read_only", &self.shared.read_only)
            .finish()
    }
}

fn open_session(
    path: &str,
    options: &OpenOptions,
    backends: &Backends,
) -> VolumeResult<(Session, Option<String>)> {
    let plus_failure = match PlusSession::open(backends.plus.clone(), path) {
        Ok(Some(session)) => {
            let warning = (options.mode == OpenMode::ReadWrite)
                .then(|| "HFS+ volumes are opened read-only".to_string());
            return Ok((Session::Plus(session), warning));
        }
        Ok(None) => None,
        Err(e) if e.is_initialization() => {
            return Err(VolumeError::Initialization {
                backend: "HFS+",
                reason: e.into_message(),
            });
        }
        Err(e) => {
            debug!(path, error = %e, "HFS+ open failed");
            Some(e)
        }
    };

    let mode = match options.mode {
        OpenMode::ReadOnly => ClassicMountMode::ReadOnly,
        OpenMode::ReadWrite => ClassicMountMode::ReadWrite,
    };
    let classic_failure =
        match ClassicSession::mount(backends.classic.clone(), path, options.partition, mode) {
            Ok(session) => return Ok((Session::Classic(session), None)),
            Err(e) if mode == ClassicMountMode::ReadWrite => {
                warn!(path, error = %e, "read-write mount failed, retrying read-only");
                match ClassicSession::mount(
                    backends.classic.clone(),
                    path,
                    options.partition,
                    ClassicMountMode::ReadOnly,
                ) {
                    Ok(session) => {
                        let warning = format!("opened read-only because write access failed: {e}");
                        return Ok((Session::Classic(session), Some(warning)));
                    }
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };
    debug!(path, error = %classic_failure, "classic mount failed");

    match plus_failure {
        Some(e) => Err(VolumeError::Open {
            path: path.to_string(),
            reason: e.into_message(),
        }),
        None => Err(VolumeError::NotHfsVolume {
            path: path.to_string(),
        }),
    }
}

fn fallback_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn invalid_path(path: &str) -> VolumeError {
    VolumeError::InvalidName {
        name: path.to_string(),
        reason: "path has no final component",
    }
}

/// HFS names may contain '/', which the host cannot store.
fn host_file_name(name: &str) -> String {
    name.replace('/', ":")
}

fn export_into(session: &Session, locator: &Locator, kind: EntryKind, target: &Path) -> VolumeResult<()> {
    if kind == EntryKind::Directory {
        fs::create_dir_all(target)?;
        for child in session.list_children(locator)? {
            let child_target = target.join(host_file_name(&child.name));
            export_into(session, &child.locator, child.kind, &child_target)?;
        }
        return Ok(());
    }
    let mut out = File::create(target)?;
    let written = session.copy_out(locator, &mut out)?;
    debug!(target = %target.display(), written, "file exported");
    Ok(())
}

fn import_into(c: &ClassicSession, source: &Path, destination: &str) -> VolumeResult<()> {
    let (_, name) = split_path(destination).ok_or_else(|| invalid_path(destination))?;
    classic::validate_name(name)?;

    if source.is_dir() {
        c.mkdir(destination)?;
        let mut children: Vec<_> = fs::read_dir(source)?.collect::<Result<_, _>>()?;
        children.sort_by_key(|e| e.file_name());
        for child in children {
            let child_name = child.file_name().to_string_lossy().replace(':', "/");
            import_into(c, &child.path(), &child_path(destination, &child_name))?;
        }
        return Ok(());
    }

    let mut file = File::open(source)?;
    let (file_type, creator) = finder_codes_for(source);
    let mut writer = c.create_file(destination, file_type, creator)?;
    let mut chunk = vec![0u8; IMPORT_CHUNK_SIZE];
    let result: VolumeResult<u64> = (|| {
        let mut total = 0u64;
        loop {
            let filled = read_full(&mut file, &mut chunk)?;
            if filled == 0 {
                return Ok(total);
            }
            writer.write_chunk(&chunk[..filled])?;
            total += filled as u64;
        }
    })();
    drop(writer);

    match result {
        Ok(total) => {
            debug!(destination, bytes = total, "file imported");
            Ok(())
        }
        Err(e) => {
            if let Err(cleanup) = c.delete_file(destination) {
                warn!(destination, error = %cleanup, "failed to remove partial import");
            }
            Err(e)
        }
    }
}

fn read_full(source: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn finder_codes_for(source: &Path) -> ([u8; 4], [u8; 4]) {
    let extension = source
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    match extension.as_deref() {
        Some("txt" | "text" | "md" | "c" | "h" | "rs") => (*b"TEXT", *b"ttxt"),
        _ => (*b"????", *b"????"),
    }
}

fn copy_within(c: &ClassicSession, source: &str, destination: &str) -> VolumeResult<()> {
    let record = c.stat(source)?;
    if record.kind == EntryKind::Directory {
        c.mkdir(destination)?;
        for child in c.list_children(source)? {
            copy_within(
                c,
                &child_path(source, &child.name),
                &child_path(destination, &child.name),
            )?;
        }
        return Ok(());
    }
    let (file_type, creator) = record
        .finder
        .map(|f| (f.file_type, f.creator))
        .unwrap_or((*b"????", *b"????"));
    c.copy_file(source, destination, file_type, creator)
}

fn delete_recursive(c: &ClassicSession, path: &str, is_directory: bool) -> VolumeResult<()> {
    if !is_directory {
        return c.delete_file(path);
    }
    for child in c.list_children(path)? {
        delete_recursive(
            c,
            &child_path(path, &child.name),
            child.kind == EntryKind::Directory,
        )?;
    }
    c.remove_directory(path)
}
