//! Bindings to the system libhfs and libfshfs.
//!
//! libhfs keeps its state, including the last error string, in globals, so
//! every call through [`NativeClassic`] holds one process-wide lock and reads
//! `hfs_error` before releasing it. libfshfs reports errors through an
//! out-parameter that is formatted and freed right after the failing call.

use std::ffi::{CStr, CString};
use std::io;
use std::mem;
use std::ptr;

use libc::{c_char, c_int, c_long, c_short, c_ulong, c_ushort, c_void, size_t, ssize_t, time_t};
use parking_lot::Mutex;

use super::macroman;
use super::{
    ClassicDirEntry, ClassicLibrary, ClassicMountMode, ClassicVolumeInfo, NativeError,
    NativeResult, PlusLibrary, RawHandle,
};

const HFS_MODE_RDONLY: c_int = 0;
const HFS_MODE_RDWR: c_int = 1;
const HFS_ISDIR: c_int = 0x0001;
const HFS_ISLOCKED: c_int = 0x0002;
const HFS_VOL_LOCKED: c_int = 0x0001;
const HFS_MAX_FLEN: usize = 31;
const HFS_MAX_VLEN: usize = 27;

#[repr(C)]
struct HfsVolEnt {
    name: [c_char; HFS_MAX_VLEN + 1],
    flags: c_int,
    totbytes: c_ulong,
    freebytes: c_ulong,
    alblocksz: c_ulong,
    clumpsz: c_ulong,
    numfiles: c_ulong,
    numdirs: c_ulong,
    crdate: time_t,
    mddate: time_t,
    bkdate: time_t,
    blessed: c_ulong,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct HfsPoint {
    v: c_short,
    h: c_short,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct HfsFileInfo {
    dsize: c_ulong,
    rsize: c_ulong,
    type_: [c_char; 5],
    creator: [c_char; 5],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct HfsDirInfo {
    valence: c_ushort,
    rect: [c_short; 4],
}

#[repr(C)]
union HfsDirEntUnion {
    file: HfsFileInfo,
    dir: HfsDirInfo,
}

#[repr(C)]
struct HfsDirEnt {
    name: [c_char; HFS_MAX_FLEN + 1],
    flags: c_int,
    cnid: c_ulong,
    parid: c_ulong,
    crdate: time_t,
    mddate: time_t,
    bkdate: time_t,
    fdflags: c_short,
    fdlocation: HfsPoint,
    u: HfsDirEntUnion,
}

#[link(name = "hfs")]
unsafe extern "C" {
    static mut hfs_error: *const c_char;

    fn hfs_mount(path: *const c_char, pnum: c_int, mode: c_int) -> *mut c_void;
    fn hfs_umount(vol: *mut c_void) -> c_int;
    fn hfs_vstat(vol: *mut c_void, ent: *mut HfsVolEnt) -> c_int;
    fn hfs_opendir(vol: *mut c_void, path: *const c_char) -> *mut c_void;
    fn hfs_readdir(dir: *mut c_void, ent: *mut HfsDirEnt) -> c_int;
    fn hfs_closedir(dir: *mut c_void) -> c_int;
    fn hfs_open(vol: *mut c_void, path: *const c_char) -> *mut c_void;
    fn hfs_read(file: *mut c_void, buf: *mut c_void, len: c_ulong) -> c_long;
    fn hfs_write(file: *mut c_void, buf: *const c_void, len: c_ulong) -> c_long;
    fn hfs_close(file: *mut c_void) -> c_int;
    fn hfs_stat(vol: *mut c_void, path: *const c_char, ent: *mut HfsDirEnt) -> c_int;
    fn hfs_create(
        vol: *mut c_void,
        path: *const c_char,
        type_: *const c_char,
        creator: *const c_char,
    ) -> *mut c_void;
    fn hfs_mkdir(vol: *mut c_void, path: *const c_char) -> c_int;
    fn hfs_rmdir(vol: *mut c_void, path: *const c_char) -> c_int;
    fn hfs_delete(vol: *mut c_void, path: *const c_char) -> c_int;
    fn hfs_rename(vol: *mut c_void, src: *const c_char, dst: *const c_char) -> c_int;
}

fn handle_of(ptr: *mut c_void) -> RawHandle {
    RawHandle::from_raw(ptr as usize)
}

fn ptr_of(handle: RawHandle) -> *mut c_void {
    handle.as_raw() as *mut c_void
}

fn c_path(path: &str) -> NativeResult<CString> {
    CString::new(macroman::encode(path)).map_err(|_| NativeError::new("path contains NUL"))
}

fn c_name(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw.iter().take_while(|&&c| c != 0).map(|&c| c as u8).collect();
    macroman::decode(&bytes)
}

fn code(raw: &[c_char; 5]) -> [u8; 4] {
    [raw[0] as u8, raw[1] as u8, raw[2] as u8, raw[3] as u8]
}

/// libhfs through its C interface.
#[derive(Debug, Default)]
pub struct NativeClassic {
    lock: Mutex<()>,
}

impl NativeClassic {
    pub fn new() -> Self {
        Self::default()
    }

    /// The library's last error, read while the call lock is still held.
    fn last_error(fallback: &str) -> NativeError {
        let message = unsafe { (&raw const hfs_error).read() };
        if message.is_null() {
            return NativeError::new(fallback);
        }
        let text = unsafe { CStr::from_ptr(message) };
        NativeError::new(macroman::decode(text.to_bytes()))
    }

    fn check(&self, res: c_int, fallback: &str) -> NativeResult<()> {
        if res == -1 {
            Err(Self::last_error(fallback))
        } else {
            Ok(())
        }
    }

    fn non_null(ptr: *mut c_void, fallback: &str) -> NativeResult<RawHandle> {
        if ptr.is_null() {
            Err(Self::last_error(fallback))
        } else {
            Ok(handle_of(ptr))
        }
    }
}

fn dirent(ent: &HfsDirEnt) -> ClassicDirEntry {
    let is_directory = ent.flags & HFS_ISDIR != 0;
    let mut out = ClassicDirEntry {
        name: c_name(&ent.name),
        is_directory,
        locked: ent.flags & HFS_ISLOCKED != 0,
        cnid: ent.cnid as u32,
        parent_cnid: ent.parid as u32,
        created: ent.crdate as i64,
        modified: ent.mddate as i64,
        ..ClassicDirEntry::default()
    };
    if is_directory {
        out.valence = unsafe { ent.u.dir.valence };
    } else {
        let file = unsafe { ent.u.file };
        out.data_size = file.dsize as u64;
        out.resource_size = file.rsize as u64;
        out.file_type = code(&file.type_);
        out.creator = code(&file.creator);
    }
    out
}

impl ClassicLibrary for NativeClassic {
    fn mount(&self, path: &str, partition: u32, mode: ClassicMountMode) -> NativeResult<RawHandle> {
        let cpath = CString::new(path).map_err(|_| NativeError::new("path contains NUL"))?;
        let mode = match mode {
            ClassicMountMode::ReadOnly => HFS_MODE_RDONLY,
            ClassicMountMode::ReadWrite => HFS_MODE_RDWR,
        };
        let _guard = self.lock.lock();
        let vol = unsafe { hfs_mount(cpath.as_ptr(), partition as c_int, mode) };
        Self::non_null(vol, "unable to mount volume")
    }

    fn umount(&self, volume: RawHandle) -> NativeResult<()> {
        let _guard = self.lock.lock();
        let res = unsafe { hfs_umount(ptr_of(volume)) };
        self.check(res, "unable to unmount volume")
    }

    fn vstat(&self, volume: RawHandle) -> NativeResult<ClassicVolumeInfo> {
        let _guard = self.lock.lock();
        let mut ent = unsafe { mem::zeroed::<HfsVolEnt>() };
        let res = unsafe { hfs_vstat(ptr_of(volume), &mut ent) };
        self.check(res, "unable to stat volume")?;
        Ok(ClassicVolumeInfo {
            name: c_name(&ent.name),
            locked: ent.flags & HFS_VOL_LOCKED != 0,
            total_bytes: ent.totbytes as u64,
            free_bytes: ent.freebytes as u64,
            file_count: ent.numfiles as u64,
            directory_count: ent.numdirs as u64,
            created: ent.crdate as i64,
            modified: ent.mddate as i64,
        })
    }

    fn opendir(&self, volume: RawHandle, path: &str) -> NativeResult<RawHandle> {
        let cpath = c_path(path)?;
        let _guard = self.lock.lock();
        let dir = unsafe { hfs_opendir(ptr_of(volume), cpath.as_ptr()) };
        Self::non_null(dir, "unable to open directory")
    }

    fn readdir(&self, dir: RawHandle) -> NativeResult<Option<ClassicDirEntry>> {
        let _guard = self.lock.lock();
        let mut ent = unsafe { mem::zeroed::<HfsDirEnt>() };
        let res = unsafe { hfs_readdir(ptr_of(dir), &mut ent) };
        if res == -1 {
            // end of directory is reported as ENOENT
            if io::Error::last_os_error().raw_os_error() == Some(libc::ENOENT) {
                return Ok(None);
            }
            return Err(Self::last_error("unable to read directory"));
        }
        Ok(Some(dirent(&ent)))
    }

    fn closedir(&self, dir: RawHandle) -> NativeResult<()> {
        let _guard = self.lock.lock();
        let res = unsafe { hfs_closedir(ptr_of(dir)) };
        self.check(res, "unable to close directory")
    }

    fn open(&self, volume: RawHandle, path: &str) -> NativeResult<RawHandle> {
        let cpath = c_path(path)?;
        let _guard = self.lock.lock();
        let file = unsafe { hfs_open(ptr_of(volume), cpath.as_ptr()) };
        Self::non_null(file, "unable to open file")
    }

    fn read(&self, file: RawHandle, buf: &mut [u8]) -> NativeResult<usize> {
        let _guard = self.lock.lock();
        let n = unsafe { hfs_read(ptr_of(file), buf.as_mut_ptr().cast(), buf.len() as c_ulong) };
        if n < 0 {
            return Err(Self::last_error("unable to read file"));
        }
        Ok(n as usize)
    }

    fn write(&self, file: RawHandle, buf: &[u8]) -> NativeResult<usize> {
        let _guard = self.lock.lock();
        let n = unsafe { hfs_write(ptr_of(file), buf.as_ptr().cast(), buf.len() as c_ulong) };
        if n < 0 {
            return Err(Self::last_error("unable to write file"));
        }
        Ok(n as usize)
    }

    fn close(&self, file: RawHandle) -> NativeResult<()> {
        let _guard = self.lock.lock();
        let res = unsafe { hfs_close(ptr_of(file)) };
        self.check(res, "unable to close file")
    }

    fn stat(&self, volume: RawHandle, path: &str) -> NativeResult<ClassicDirEntry> {
        let cpath = c_path(path)?;
        let _guard = self.lock.lock();
        let mut ent = unsafe { mem::zeroed::<HfsDirEnt>() };
        let res = unsafe { hfs_stat(ptr_of(volume), cpath.as_ptr(), &mut ent) };
        self.check(res, "unable to stat path")?;
        Ok(dirent(&ent))
    }

    fn create(
        &self,
        volume: RawHandle,
        path: &str,
        file_type: [u8; 4],
        creator: [u8; 4],
    ) -> NativeResult<RawHandle> {
        let cpath = c_path(path)?;
        let ctype = CString::new(file_type).map_err(|_| NativeError::new("type contains NUL"))?;
        let ccreator =
            CString::new(creator).map_err(|_| NativeError::new("creator contains NUL"))?;
        let _guard = self.lock.lock();
        let file = unsafe {
            hfs_create(
                ptr_of(volume),
                cpath.as_ptr(),
                ctype.as_ptr(),
                ccreator.as_ptr(),
            )
        };
        Self::non_null(file, "unable to create file")
    }

    fn mkdir(&self, volume: RawHandle, path: &str) -> NativeResult<()> {
        let cpath = c_path(path)?;
        let _guard = self.lock.lock();
        let res = unsafe { hfs_mkdir(ptr_of(volume), cpath.as_ptr()) };
        self.check(res, "unable to create directory")
    }

    fn rmdir(&self, volume: RawHandle, path: &str) -> NativeResult<()> {
        let cpath = c_path(path)?;
        let _guard = self.lock.lock();
        let res = unsafe { hfs_rmdir(ptr_of(volume), cpath.as_ptr()) };
        self.check(res, "unable to remove directory")
    }

    fn delete(&self, volume: RawHandle, path: &str) -> NativeResult<()> {
        let cpath = c_path(path)?;
        let _guard = self.lock.lock();
        let res = unsafe { hfs_delete(ptr_of(volume), cpath.as_ptr()) };
        self.check(res, "unable to delete file")
    }

    fn rename(&self, volume: RawHandle, old_path: &str, new_path: &str) -> NativeResult<()> {
        let old = c_path(old_path)?;
        let new = c_path(new_path)?;
        let _guard = self.lock.lock();
        let res = unsafe { hfs_rename(ptr_of(volume), old.as_ptr(), new.as_ptr()) };
        self.check(res, "unable to rename")
    }
}

const LIBFSHFS_OPEN_READ: c_int = 0x01;
const ERROR_BUFFER_SIZE: usize = 1024;

#[repr(C)]
struct LibfshfsError {
    _private: [u8; 0],
}

type ErrorPtr = *mut LibfshfsError;

#[link(name = "fshfs")]
unsafe extern "C" {
    fn libfshfs_error_sprint(error: ErrorPtr, string: *mut c_char, size: size_t) -> c_int;
    fn libfshfs_error_free(error: *mut ErrorPtr);

    fn libfshfs_check_volume_signature(filename: *const c_char, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_volume_initialize(volume: *mut *mut c_void, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_volume_open(
        volume: *mut c_void,
        filename: *const c_char,
        access_flags: c_int,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_volume_close(volume: *mut c_void, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_volume_free(volume: *mut *mut c_void, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_volume_get_utf8_name_size(
        volume: *mut c_void,
        size: *mut size_t,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_volume_get_utf8_name(
        volume: *mut c_void,
        name: *mut u8,
        size: size_t,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_volume_get_root_directory(
        volume: *mut c_void,
        entry: *mut *mut c_void,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_volume_get_file_entry_by_utf8_path(
        volume: *mut c_void,
        path: *const u8,
        length: size_t,
        entry: *mut *mut c_void,
        error: *mut ErrorPtr,
    ) -> c_int;

    fn libfshfs_file_entry_free(entry: *mut *mut c_void, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_file_entry_get_identifier(entry: *mut c_void, value: *mut u32, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_file_entry_get_parent_identifier(
        entry: *mut c_void,
        value: *mut u32,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_file_entry_get_creation_time(entry: *mut c_void, value: *mut u32, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_file_entry_get_modification_time(
        entry: *mut c_void,
        value: *mut u32,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_file_entry_get_access_time(entry: *mut c_void, value: *mut u32, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_file_entry_get_file_mode(entry: *mut c_void, value: *mut u16, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_file_entry_get_owner_identifier(
        entry: *mut c_void,
        value: *mut u32,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_file_entry_get_group_identifier(
        entry: *mut c_void,
        value: *mut u32,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_file_entry_get_size(entry: *mut c_void, value: *mut u64, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_file_entry_get_utf8_name_size(
        entry: *mut c_void,
        size: *mut size_t,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_file_entry_get_utf8_name(
        entry: *mut c_void,
        name: *mut u8,
        size: size_t,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_file_entry_get_utf8_symbolic_link_target_size(
        entry: *mut c_void,
        size: *mut size_t,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_file_entry_get_utf8_symbolic_link_target(
        entry: *mut c_void,
        target: *mut u8,
        size: size_t,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_file_entry_get_number_of_sub_file_entries(
        entry: *mut c_void,
        count: *mut c_int,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_file_entry_get_sub_file_entry_by_index(
        entry: *mut c_void,
        index: c_int,
        sub_entry: *mut *mut c_void,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_file_entry_read_buffer_at_offset(
        entry: *mut c_void,
        buffer: *mut c_void,
        size: size_t,
        offset: i64,
        error: *mut ErrorPtr,
    ) -> ssize_t;
    fn libfshfs_file_entry_get_number_of_extended_attributes(
        entry: *mut c_void,
        count: *mut c_int,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_file_entry_get_extended_attribute_by_index(
        entry: *mut c_void,
        index: c_int,
        attribute: *mut *mut c_void,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_extended_attribute_get_utf8_name_size(
        attribute: *mut c_void,
        size: *mut size_t,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_extended_attribute_get_utf8_name(
        attribute: *mut c_void,
        name: *mut u8,
        size: size_t,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_extended_attribute_get_size(attribute: *mut c_void, size: *mut u64, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_extended_attribute_free(attribute: *mut *mut c_void, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_file_entry_has_resource_fork(entry: *mut c_void, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_file_entry_get_resource_fork(
        entry: *mut c_void,
        stream: *mut *mut c_void,
        error: *mut ErrorPtr,
    ) -> c_int;
    fn libfshfs_data_stream_get_size(stream: *mut c_void, size: *mut u64, error: *mut ErrorPtr) -> c_int;
    fn libfshfs_data_stream_free(stream: *mut *mut c_void, error: *mut ErrorPtr) -> c_int;
}

/// Format and free a libfshfs error.
fn take_error(mut error: ErrorPtr, fallback: &str) -> NativeError {
    if error.is_null() {
        return NativeError::new(fallback);
    }
    let mut buf = [0 as c_char; ERROR_BUFFER_SIZE];
    let res = unsafe { libfshfs_error_sprint(error, buf.as_mut_ptr(), buf.len()) };
    unsafe { libfshfs_error_free(&mut error) };
    if res <= 0 {
        return NativeError::new(fallback);
    }
    let text = unsafe { CStr::from_ptr(buf.as_ptr()) };
    NativeError::new(text.to_string_lossy().trim_end().to_string())
}

/// Run one libfshfs call that reports through `(return value, error)`.
fn call(fallback: &str, f: impl FnOnce(*mut ErrorPtr) -> c_int) -> NativeResult<c_int> {
    let mut error: ErrorPtr = ptr::null_mut();
    let res = f(&mut error);
    if res == -1 {
        return Err(take_error(error, fallback));
    }
    if !error.is_null() {
        unsafe { libfshfs_error_free(&mut error) };
    }
    Ok(res)
}

/// Fetch a UTF-8 string through the usual size-then-copy pair of calls.
fn utf8_string(
    fallback: &str,
    size: impl FnOnce(*mut size_t, *mut ErrorPtr) -> c_int,
    copy: impl FnOnce(*mut u8, size_t, *mut ErrorPtr) -> c_int,
) -> NativeResult<Option<String>> {
    let mut len: size_t = 0;
    if call(fallback, |e| size(&mut len, e))? == 0 || len == 0 {
        return Ok(None);
    }
    let mut buf = vec![0u8; len];
    call(fallback, |e| copy(buf.as_mut_ptr(), len, e))?;
    // the size includes the terminating NUL
    if let Some(end) = buf.iter().position(|&b| b == 0) {
        buf.truncate(end);
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// libfshfs through its C interface.
#[derive(Debug, Default)]
pub struct NativePlus;

impl NativePlus {
    pub fn new() -> Self {
        Self
    }
}

impl PlusLibrary for NativePlus {
    fn check_signature(&self, path: &str) -> NativeResult<bool> {
        let cpath = CString::new(path).map_err(|_| NativeError::new("path contains NUL"))?;
        let res = call("unable to check volume signature", |e| unsafe {
            libfshfs_check_volume_signature(cpath.as_ptr(), e)
        })?;
        Ok(res == 1)
    }

    fn open_volume(&self, path: &str) -> NativeResult<RawHandle> {
        let cpath = CString::new(path).map_err(|_| NativeError::new("path contains NUL"))?;
        let mut volume: *mut c_void = ptr::null_mut();
        call("unable to initialize volume", |e| unsafe {
            libfshfs_volume_initialize(&mut volume, e)
        })
        .map_err(|e| NativeError::initialization(e.into_message()))?;
        let opened = call("unable to open volume", |e| unsafe {
            libfshfs_volume_open(volume, cpath.as_ptr(), LIBFSHFS_OPEN_READ, e)
        });
        if let Err(err) = opened {
            let _ = call("unable to free volume", |e| unsafe {
                libfshfs_volume_free(&mut volume, e)
            });
            return Err(err);
        }
        Ok(handle_of(volume))
    }

    fn close_volume(&self, volume: RawHandle) -> NativeResult<()> {
        let mut raw = ptr_of(volume);
        let closed = call("unable to close volume", |e| unsafe {
            libfshfs_volume_close(raw, e)
        });
        call("unable to free volume", |e| unsafe {
            libfshfs_volume_free(&mut raw, e)
        })?;
        closed.map(|_| ())
    }

    fn volume_name(&self, volume: RawHandle) -> NativeResult<String> {
        let raw = ptr_of(volume);
        utf8_string(
            "unable to read volume name",
            |size, e| unsafe { libfshfs_volume_get_utf8_name_size(raw, size, e) },
            |buf, len, e| unsafe { libfshfs_volume_get_utf8_name(raw, buf, len, e) },
        )
        .map(Option::unwrap_or_default)
    }

    fn root_directory(&self, volume: RawHandle) -> NativeResult<RawHandle> {
        let mut entry: *mut c_void = ptr::null_mut();
        call("unable to read root directory", |e| unsafe {
            libfshfs_volume_get_root_directory(ptr_of(volume), &mut entry, e)
        })?;
        Ok(handle_of(entry))
    }

    fn entry_by_path(&self, volume: RawHandle, path: &str) -> NativeResult<Option<RawHandle>> {
        let mut entry: *mut c_void = ptr::null_mut();
        let found = call("unable to look up path", |e| unsafe {
            libfshfs_volume_get_file_entry_by_utf8_path(
                ptr_of(volume),
                path.as_ptr(),
                path.len(),
                &mut entry,
                e,
            )
        })?;
        Ok((found == 1).then(|| handle_of(entry)))
    }

    fn free_entry(&self, entry: RawHandle) -> NativeResult<()> {
        let mut raw = ptr_of(entry);
        call("unable to free file entry", |e| unsafe {
            libfshfs_file_entry_free(&mut raw, e)
        })
        .map(|_| ())
    }

    fn sub_entry_count(&self, entry: RawHandle) -> NativeResult<usize> {
        let mut count: c_int = 0;
        call("unable to count sub entries", |e| unsafe {
            libfshfs_file_entry_get_number_of_sub_file_entries(ptr_of(entry), &mut count, e)
        })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn sub_entry(&self, entry: RawHandle, index: usize) -> NativeResult<RawHandle> {
        let index = c_int::try_from(index).map_err(|_| NativeError::new("index out of range"))?;
        let mut sub: *mut c_void = ptr::null_mut();
        call("unable to read sub entry", |e| unsafe {
            libfshfs_file_entry_get_sub_file_entry_by_index(ptr_of(entry), index, &mut sub, e)
        })?;
        Ok(handle_of(sub))
    }

    fn identifier(&self, entry: RawHandle) -> NativeResult<u32> {
        let mut value = 0u32;
        call("unable to read identifier", |e| unsafe {
            libfshfs_file_entry_get_identifier(ptr_of(entry), &mut value, e)
        })?;
        Ok(value)
    }

    fn parent_identifier(&self, entry: RawHandle) -> NativeResult<u32> {
        let mut value = 0u32;
        call("unable to read parent identifier", |e| unsafe {
            libfshfs_file_entry_get_parent_identifier(ptr_of(entry), &mut value, e)
        })?;
        Ok(value)
    }

    fn creation_time(&self, entry: RawHandle) -> NativeResult<u32> {
        let mut value = 0u32;
        call("unable to read creation time", |e| unsafe {
            libfshfs_file_entry_get_creation_time(ptr_of(entry), &mut value, e)
        })?;
        Ok(value)
    }

    fn modification_time(&self, entry: RawHandle) -> NativeResult<u32> {
        let mut value = 0u32;
        call("unable to read modification time", |e| unsafe {
            libfshfs_file_entry_get_modification_time(ptr_of(entry), &mut value, e)
        })?;
        Ok(value)
    }

    fn access_time(&self, entry: RawHandle) -> NativeResult<u32> {
        let mut value = 0u32;
        call("unable to read access time", |e| unsafe {
            libfshfs_file_entry_get_access_time(ptr_of(entry), &mut value, e)
        })?;
        Ok(value)
    }

    fn file_mode(&self, entry: RawHandle) -> NativeResult<u16> {
        let mut value = 0u16;
        call("unable to read file mode", |e| unsafe {
            libfshfs_file_entry_get_file_mode(ptr_of(entry), &mut value, e)
        })?;
        Ok(value)
    }

    fn owner_identifier(&self, entry: RawHandle) -> NativeResult<u32> {
        let mut value = 0u32;
        call("unable to read owner", |e| unsafe {
            libfshfs_file_entry_get_owner_identifier(ptr_of(entry), &mut value, e)
        })?;
        Ok(value)
    }

    fn group_identifier(&self, entry: RawHandle) -> NativeResult<u32> {
        let mut value = 0u32;
        call("unable to read group", |e| unsafe {
            libfshfs_file_entry_get_group_identifier(ptr_of(entry), &mut value, e)
        })?;
        Ok(value)
    }

    fn size(&self, entry: RawHandle) -> NativeResult<u64> {
        let mut value = 0u64;
        call("unable to read size", |e| unsafe {
            libfshfs_file_entry_get_size(ptr_of(entry), &mut value, e)
        })?;
        Ok(value)
    }

    fn name(&self, entry: RawHandle) -> NativeResult<String> {
        let raw = ptr_of(entry);
        utf8_string(
            "unable to read name",
            |size, e| unsafe { libfshfs_file_entry_get_utf8_name_size(raw, size, e) },
            |buf, len, e| unsafe { libfshfs_file_entry_get_utf8_name(raw, buf, len, e) },
        )
        .map(Option::unwrap_or_default)
    }

    fn read_at(&self, entry: RawHandle, buf: &mut [u8], offset: u64) -> NativeResult<usize> {
        let offset = i64::try_from(offset).map_err(|_| NativeError::new("offset out of range"))?;
        let mut error: ErrorPtr = ptr::null_mut();
        let n = unsafe {
            libfshfs_file_entry_read_buffer_at_offset(
                ptr_of(entry),
                buf.as_mut_ptr().cast(),
                buf.len(),
                offset,
                &mut error,
            )
        };
        if n < 0 {
            return Err(take_error(error, "unable to read data"));
        }
        Ok(n as usize)
    }

    fn symlink_target(&self, entry: RawHandle) -> NativeResult<Option<String>> {
        let raw = ptr_of(entry);
        utf8_string(
            "unable to read symbolic link target",
            |size, e| unsafe { libfshfs_file_entry_get_utf8_symbolic_link_target_size(raw, size, e) },
            |buf, len, e| unsafe {
                libfshfs_file_entry_get_utf8_symbolic_link_target(raw, buf, len, e)
            },
        )
    }

    fn extended_attributes(&self, entry: RawHandle) -> NativeResult<Vec<(String, u64)>> {
        let raw = ptr_of(entry);
        let mut count: c_int = 0;
        call("unable to count extended attributes", |e| unsafe {
            libfshfs_file_entry_get_number_of_extended_attributes(raw, &mut count, e)
        })?;
        let mut attributes = Vec::new();
        for index in 0..count {
            let mut attr: *mut c_void = ptr::null_mut();
            call("unable to read extended attribute", |e| unsafe {
                libfshfs_file_entry_get_extended_attribute_by_index(raw, index, &mut attr, e)
            })?;
            let name = utf8_string(
                "unable to read extended attribute name",
                |size, e| unsafe { libfshfs_extended_attribute_get_utf8_name_size(attr, size, e) },
                |buf, len, e| unsafe { libfshfs_extended_attribute_get_utf8_name(attr, buf, len, e) },
            );
            let mut size = 0u64;
            let sized = call("unable to read extended attribute size", |e| unsafe {
                libfshfs_extended_attribute_get_size(attr, &mut size, e)
            });
            let _ = call("unable to free extended attribute", |e| unsafe {
                libfshfs_extended_attribute_free(&mut attr, e)
            });
            sized?;
            attributes.push((name?.unwrap_or_default(), size));
        }
        Ok(attributes)
    }

    fn resource_fork_size(&self, entry: RawHandle) -> NativeResult<Option<u64>> {
        let raw = ptr_of(entry);
        let has = call("unable to check resource fork", |e| unsafe {
            libfshfs_file_entry_has_resource_fork(raw, e)
        })?;
        if has == 0 {
            return Ok(None);
        }
        let mut stream: *mut c_void = ptr::null_mut();
        call("unable to open resource fork", |e| unsafe {
            libfshfs_file_entry_get_resource_fork(raw, &mut stream, e)
        })?;
        let mut size = 0u64;
        let sized = call("unable to read resource fork size", |e| unsafe {
            libfshfs_data_stream_get_size(stream, &mut size, e)
        });
        let _ = call("unable to free resource fork", |e| unsafe {
            libfshfs_data_stream_free(&mut stream, e)
        });
        sized?;
        Ok(Some(size))
    }
}
