//! Contracts for the two native volume libraries.
//!
//! The classic library (libhfs) addresses every object by a colon-delimited
//! path and keeps its last error in a global string. The richer library
//! (libfshfs) hands out opaque file-entry pointers that must be freed one by
//! one. Both are modelled here as object-safe traits so the adapters in
//! [`crate::backend`] can be driven by the real libraries (feature `native`)
//! or by the in-memory implementations in [`crate::mem`].
//!
//! Implementations report failures as [`NativeError`], carrying the library's
//! own error text. The text must be captured right after the failing call,
//! before anything else can overwrite it.

#[cfg(feature = "native")]
pub mod ffi;
pub mod macroman;

use std::fmt;

/// Opaque pointer-sized token for a native volume, directory, file or entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RawHandle(usize);

impl RawHandle {
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Failure reported by a native library call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeError {
    message: String,
    initialization: bool,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            initialization: false,
        }
    }

    /// The library could not set up its own state, so no file was examined.
    pub fn initialization(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            initialization: true,
        }
    }

    pub fn is_initialization(&self) -> bool {
        self.initialization
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_message(self) -> String {
        self.message
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for NativeError {}

pub type NativeResult<T> = Result<T, NativeError>;

/// Mount mode understood by the classic library.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassicMountMode {
    ReadOnly,
    ReadWrite,
}

/// Volume record produced by the classic library's `vstat`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassicVolumeInfo {
    pub name: String,
    pub locked: bool,
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub file_count: u64,
    pub directory_count: u64,
    /// Seconds since the Unix epoch, 0 when unset.
    pub created: i64,
    pub modified: i64,
}

/// Catalog record produced by the classic library's `readdir` and `stat`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassicDirEntry {
    pub name: String,
    pub is_directory: bool,
    pub locked: bool,
    pub cnid: u32,
    pub parent_cnid: u32,
    /// Seconds since the Unix epoch, 0 when unset.
    pub created: i64,
    pub modified: i64,
    pub data_size: u64,
    pub resource_size: u64,
    pub file_type: [u8; 4],
    pub creator: [u8; 4],
    /// Number of children, directories only.
    pub valence: u16,
}

/// Path-addressed classic HFS library.
pub trait ClassicLibrary: Send + Sync {
    fn mount(&self, path: &str, partition: u32, mode: ClassicMountMode) -> NativeResult<RawHandle>;
    fn umount(&self, volume: RawHandle) -> NativeResult<()>;
    fn vstat(&self, volume: RawHandle) -> NativeResult<ClassicVolumeInfo>;

    fn opendir(&self, volume: RawHandle, path: &str) -> NativeResult<RawHandle>;
    /// Next record, or `None` once the directory is exhausted.
    fn readdir(&self, dir: RawHandle) -> NativeResult<Option<ClassicDirEntry>>;
    fn closedir(&self, dir: RawHandle) -> NativeResult<()>;

    fn open(&self, volume: RawHandle, path: &str) -> NativeResult<RawHandle>;
    fn read(&self, file: RawHandle, buf: &mut [u8]) -> NativeResult<usize>;
    fn write(&self, file: RawHandle, buf: &[u8]) -> NativeResult<usize>;
    fn close(&self, file: RawHandle) -> NativeResult<()>;

    fn stat(&self, volume: RawHandle, path: &str) -> NativeResult<ClassicDirEntry>;
    fn create(
        &self,
        volume: RawHandle,
        path: &str,
        file_type: [u8; 4],
        creator: [u8; 4],
    ) -> NativeResult<RawHandle>;
    fn mkdir(&self, volume: RawHandle, path: &str) -> NativeResult<()>;
    fn rmdir(&self, volume: RawHandle, path: &str) -> NativeResult<()>;
    fn delete(&self, volume: RawHandle, path: &str) -> NativeResult<()>;
    fn rename(&self, volume: RawHandle, old_path: &str, new_path: &str) -> NativeResult<()>;
}

/// Handle-addressed HFS+ library.
///
/// Every handle returned by [`root_directory`](Self::root_directory),
/// [`sub_entry`](Self::sub_entry) or [`entry_by_path`](Self::entry_by_path)
/// must be passed to [`free_entry`](Self::free_entry) exactly once.
pub trait PlusLibrary: Send + Sync {
    fn check_signature(&self, path: &str) -> NativeResult<bool>;
    /// Initialize a volume object and open `path` for reading.
    fn open_volume(&self, path: &str) -> NativeResult<RawHandle>;
    /// Close and free a volume object.
    fn close_volume(&self, volume: RawHandle) -> NativeResult<()>;
    fn volume_name(&self, volume: RawHandle) -> NativeResult<String>;

    fn root_directory(&self, volume: RawHandle) -> NativeResult<RawHandle>;
    fn entry_by_path(&self, volume: RawHandle, path: &str) -> NativeResult<Option<RawHandle>>;
    fn free_entry(&self, entry: RawHandle) -> NativeResult<()>;

    fn sub_entry_count(&self, entry: RawHandle) -> NativeResult<usize>;
    fn sub_entry(&self, entry: RawHandle, index: usize) -> NativeResult<RawHandle>;

    fn identifier(&self, entry: RawHandle) -> NativeResult<u32>;
    fn parent_identifier(&self, entry: RawHandle) -> NativeResult<u32>;
    /// Times are seconds since 1904-01-01 UTC, 0 when unset.
    fn creation_time(&self, entry: RawHandle) -> NativeResult<u32>;
    fn modification_time(&self, entry: RawHandle) -> NativeResult<u32>;
    fn access_time(&self, entry: RawHandle) -> NativeResult<u32>;
    fn file_mode(&self, entry: RawHandle) -> NativeResult<u16>;
    fn owner_identifier(&self, entry: RawHandle) -> NativeResult<u32>;
    fn group_identifier(&self, entry: RawHandle) -> NativeResult<u32>;
    fn size(&self, entry: RawHandle) -> NativeResult<u64>;
    fn name(&self, entry: RawHandle) -> NativeResult<String>;

    fn read_at(&self, entry: RawHandle, buf: &mut [u8], offset: u64) -> NativeResult<usize>;
    /// Target of a symbolic link, `None` for anything else.
    fn symlink_target(&self, entry: RawHandle) -> NativeResult<Option<String>>;
    /// Names and sizes of the entry's extended attributes.
    fn extended_attributes(&self, entry: RawHandle) -> NativeResult<Vec<(String, u64)>>;
    /// Size of the resource fork, `None` when the entry has none.
    fn resource_fork_size(&self, entry: RawHandle) -> NativeResult<Option<u64>>;
}
