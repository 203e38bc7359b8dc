//! In-memory implementations of both native library contracts.
//!
//! [`MemClassic`] behaves like libhfs (colon paths, open directory and file
//! handles, last-error style messages) and [`MemPlus`] like libfshfs (entry
//! handles that must each be freed). Both serve [`MemImage`] catalogs
//! registered under a path, count every native call by name and can be told
//! to fail the next call of a given function.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::native::{
    ClassicDirEntry, ClassicLibrary, ClassicMountMode, ClassicVolumeInfo, NativeError,
    NativeResult, PlusLibrary, RawHandle,
};

const ROOT_ID: u32 = 2;
const ROOT_PARENT_ID: u32 = 1;
const FIRST_USER_ID: u32 = 16;
const DEFAULT_CAPACITY: u64 = 20 * 1024 * 1024;
const HFS_EPOCH_OFFSET: i64 = 2_082_844_800;

const NO_SUCH_FILE: &str = "no such file or directory";
const FILE_EXISTS: &str = "file exists";
const VOLUME_FULL: &str = "volume full";
const NOT_EMPTY: &str = "directory not empty";
const NOT_A_DIRECTORY: &str = "not a directory";
const IS_A_DIRECTORY: &str = "is a directory";
const READ_ONLY: &str = "volume is read-only";
const BAD_HANDLE: &str = "invalid handle";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemNodeKind {
    File,
    Directory,
    Symlink,
}

/// One catalog record of a [`MemImage`].
#[derive(Clone, Debug)]
pub struct MemNode {
    pub id: u32,
    pub parent: u32,
    pub name: String,
    pub kind: MemNodeKind,
    pub data: Vec<u8>,
    pub resource_size: u64,
    /// Unix seconds, 0 when unset.
    pub created: i64,
    pub modified: i64,
    pub accessed: i64,
    /// Mode word reported by the HFS+ flavour; 0 picks a default per kind.
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub file_type: [u8; 4],
    pub creator: [u8; 4],
    pub locked: bool,
    pub symlink_target: Option<String>,
    pub xattrs: Vec<(String, u64)>,
}

impl MemNode {
    fn new(id: u32, parent: u32, name: &str, kind: MemNodeKind) -> Self {
        MemNode {
            id,
            parent,
            name: name.to_string(),
            kind,
            data: Vec::new(),
            resource_size: 0,
            created: 0,
            modified: 0,
            accessed: 0,
            mode: 0,
            uid: 0,
            gid: 0,
            file_type: *b"????",
            creator: *b"????",
            locked: false,
            symlink_target: None,
            xattrs: Vec::new(),
        }
    }

    fn plus_mode(&self) -> u16 {
        if self.mode != 0 {
            return self.mode;
        }
        match self.kind {
            MemNodeKind::Directory => 0o040755,
            MemNodeKind::File => 0o100644,
            MemNodeKind::Symlink => 0o120755,
        }
    }

    fn logical_size(&self) -> u64 {
        match (&self.kind, &self.symlink_target) {
            (MemNodeKind::Symlink, Some(target)) => target.len() as u64,
            _ => self.data.len() as u64,
        }
    }
}

/// A volume catalog held in memory.
#[derive(Clone, Debug)]
pub struct MemImage {
    name: String,
    nodes: BTreeMap<u32, MemNode>,
    next_id: u32,
    capacity: u64,
    locked: bool,
    write_protected: bool,
}

impl MemImage {
    pub fn new(name: &str) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            ROOT_ID,
            MemNode::new(ROOT_ID, ROOT_PARENT_ID, name, MemNodeKind::Directory),
        );
        MemImage {
            name: name.to_string(),
            nodes,
            next_id: FIRST_USER_ID,
            capacity: DEFAULT_CAPACITY,
            locked: false,
            write_protected: false,
        }
    }

    pub fn root_id(&self) -> u32 {
        ROOT_ID
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total bytes file data may occupy.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = bytes;
        self
    }

    /// The volume header carries the software lock bit.
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    /// The medium refuses read-write mounts.
    pub fn write_protected(mut self) -> Self {
        self.write_protected = true;
        self
    }

    fn insert(&mut self, parent: u32, name: &str, kind: MemNodeKind) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, MemNode::new(id, parent, name, kind));
        id
    }

    pub fn add_dir(&mut self, parent: u32, name: &str) -> u32 {
        self.insert(parent, name, MemNodeKind::Directory)
    }

    pub fn add_file(&mut self, parent: u32, name: &str, data: impl Into<Vec<u8>>) -> u32 {
        let id = self.insert(parent, name, MemNodeKind::File);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.data = data.into();
        }
        id
    }

    pub fn add_symlink(&mut self, parent: u32, name: &str, target: &str) -> u32 {
        let id = self.insert(parent, name, MemNodeKind::Symlink);
        if let Some(node) = self.nodes.get_mut(&id) {
            node.symlink_target = Some(target.to_string());
        }
        id
    }

    pub fn node(&self, id: u32) -> Option<&MemNode> {
        self.nodes.get(&id)
    }

    /// Edit a node in place, e.g. to set timestamps or Finder codes.
    pub fn node_mut(&mut self, id: u32) -> Option<&mut MemNode> {
        self.nodes.get_mut(&id)
    }

    /// Children of `id` in insertion order.
    pub fn children(&self, id: u32) -> Vec<&MemNode> {
        self.nodes.values().filter(|n| n.parent == id && n.id != ROOT_ID).collect()
    }

    fn child_named(&self, parent: u32, name: &str) -> Option<u32> {
        // HFS names compare case-insensitively
        self.nodes
            .values()
            .find(|n| n.parent == parent && n.id != ROOT_ID && n.name.eq_ignore_ascii_case(name))
            .map(|n| n.id)
    }

    fn resolve_components<'a>(&self, components: impl Iterator<Item = &'a str>) -> Option<u32> {
        let mut current = ROOT_ID;
        for component in components.filter(|c| !c.is_empty()) {
            if self.nodes.get(&current)?.kind != MemNodeKind::Directory {
                return None;
            }
            current = self.child_named(current, component)?;
        }
        Some(current)
    }

    /// Resolve an absolute colon path such as `":Docs:a.txt"`.
    pub fn resolve_colon(&self, path: &str) -> Option<u32> {
        self.resolve_components(path.split(':'))
    }

    /// Resolve an absolute slash path such as `"/Docs/a.txt"`.
    pub fn resolve_slash(&self, path: &str) -> Option<u32> {
        self.resolve_components(path.split('/'))
    }

    pub fn used_bytes(&self) -> u64 {
        self.nodes.values().map(|n| n.data.len() as u64).sum()
    }

    fn is_ancestor(&self, ancestor: u32, mut id: u32) -> bool {
        while let Some(node) = self.nodes.get(&id) {
            if node.id == ancestor {
                return true;
            }
            if node.id == ROOT_ID {
                break;
            }
            id = node.parent;
        }
        false
    }

    /// Split a colon path into the resolved parent id and the final name.
    fn parent_and_name<'p>(&self, path: &'p str) -> NativeResult<(u32, &'p str)> {
        let (parent, name) = match path.rfind(':') {
            Some(idx) => (&path[..idx], &path[idx + 1..]),
            None => ("", path),
        };
        if name.is_empty() {
            return Err(NativeError::new("invalid pathname"));
        }
        let parent = self
            .resolve_colon(parent)
            .ok_or_else(|| NativeError::new(NO_SUCH_FILE))?;
        if self.nodes.get(&parent).map(|n| n.kind) != Some(MemNodeKind::Directory) {
            return Err(NativeError::new(NOT_A_DIRECTORY));
        }
        Ok((parent, name))
    }
}

/// Per-function call counts and one-shot injected failures.
#[derive(Debug, Default)]
struct CallLog {
    counts: Mutex<HashMap<&'static str, usize>>,
    failures: Mutex<HashMap<&'static str, String>>,
}

impl CallLog {
    fn record(&self, function: &'static str) -> NativeResult<()> {
        *self.counts.lock().entry(function).or_default() += 1;
        match self.failures.lock().remove(function) {
            Some(message) => Err(NativeError::new(message)),
            None => Ok(()),
        }
    }

    fn count(&self, function: &str) -> usize {
        self.counts.lock().get(function).copied().unwrap_or(0)
    }

    fn total(&self) -> usize {
        self.counts.lock().values().sum()
    }

    fn reset(&self) {
        self.counts.lock().clear();
    }

    fn fail_next(&self, function: &'static str, message: &str) {
        self.failures.lock().insert(function, message.to_string());
    }
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn to_hfs_time(unix: i64) -> u32 {
    if unix == 0 {
        0
    } else {
        (unix + HFS_EPOCH_OFFSET).clamp(1, i64::from(u32::MAX)) as u32
    }
}

#[derive(Debug)]
struct MountedVolume {
    path: String,
    writable: bool,
}

#[derive(Debug)]
struct OpenFile {
    path: String,
    node: u32,
    position: usize,
    writable: bool,
}

#[derive(Debug, Default)]
struct ClassicState {
    images: HashMap<String, MemImage>,
    next_handle: usize,
    volumes: HashMap<usize, MountedVolume>,
    dirs: HashMap<usize, VecDeque<ClassicDirEntry>>,
    files: HashMap<usize, OpenFile>,
    write_limit: Option<usize>,
    read_write_mounts: usize,
}

impl ClassicState {
    fn handle(&mut self) -> usize {
        self.next_handle += 1;
        self.next_handle
    }

    fn mounted(&self, volume: RawHandle) -> NativeResult<&MountedVolume> {
        self.volumes
            .get(&volume.as_raw())
            .ok_or_else(|| NativeError::new(BAD_HANDLE))
    }

    fn image(&self, volume: RawHandle) -> NativeResult<&MemImage> {
        let path = &self.mounted(volume)?.path;
        self.images
            .get(path)
            .ok_or_else(|| NativeError::new(BAD_HANDLE))
    }

    fn writable_image(&mut self, volume: RawHandle) -> NativeResult<&mut MemImage> {
        let mounted = self.mounted(volume)?;
        if !mounted.writable {
            return Err(NativeError::new(READ_ONLY));
        }
        let path = mounted.path.clone();
        self.images
            .get_mut(&path)
            .ok_or_else(|| NativeError::new(BAD_HANDLE))
    }
}

fn dir_entry(image: &MemImage, node: &MemNode) -> ClassicDirEntry {
    let is_directory = node.kind == MemNodeKind::Directory;
    ClassicDirEntry {
        name: node.name.clone(),
        is_directory,
        locked: node.locked,
        cnid: node.id,
        parent_cnid: node.parent,
        created: node.created,
        modified: node.modified,
        data_size: node.data.len() as u64,
        resource_size: node.resource_size,
        file_type: node.file_type,
        creator: node.creator,
        valence: if is_directory {
            image.children(node.id).len() as u16
        } else {
            0
        },
    }
}

/// In-memory stand-in for libhfs.
#[derive(Debug, Default)]
pub struct MemClassic {
    state: Mutex<ClassicState>,
    calls: CallLog,
}

impl MemClassic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `image` when `path` is mounted.
    pub fn insert_image(&self, path: &str, image: MemImage) {
        self.state.lock().images.insert(path.to_string(), image);
    }

    /// Current state of the image at `path`.
    pub fn image(&self, path: &str) -> Option<MemImage> {
        self.state.lock().images.get(path).cloned()
    }

    /// Calls made to the named library function, e.g. `"readdir"`.
    pub fn calls(&self, function: &str) -> usize {
        self.calls.count(function)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.total()
    }

    pub fn reset_calls(&self) {
        self.calls.reset();
    }

    /// Make the next call to `function` fail with `message`.
    pub fn fail_next(&self, function: &'static str, message: &str) {
        self.calls.fail_next(function, message);
    }

    /// Cap the bytes accepted by a single `write`; `Some(0)` makes writes
    /// report zero bytes.
    pub fn set_write_limit(&self, limit: Option<usize>) {
        self.state.lock().write_limit = limit;
    }

    pub fn mounted_volumes(&self) -> usize {
        self.state.lock().volumes.len()
    }

    /// Successful mounts that asked for write access.
    pub fn read_write_mounts(&self) -> usize {
        self.state.lock().read_write_mounts
    }

    /// Directory and file handles not closed yet.
    pub fn open_handles(&self) -> usize {
        let state = self.state.lock();
        state.dirs.len() + state.files.len()
    }
}

impl ClassicLibrary for MemClassic {
    fn mount(&self, path: &str, _partition: u32, mode: ClassicMountMode) -> NativeResult<RawHandle> {
        self.calls.record("mount")?;
        let mut state = self.state.lock();
        let image = state
            .images
            .get(path)
            .ok_or_else(|| NativeError::new("not a Macintosh HFS volume"))?;
        let writable = mode == ClassicMountMode::ReadWrite;
        if writable && image.write_protected {
            return Err(NativeError::new("permission denied"));
        }
        if writable {
            state.read_write_mounts += 1;
        }
        let handle = state.handle();
        state.volumes.insert(
            handle,
            MountedVolume {
                path: path.to_string(),
                writable,
            },
        );
        Ok(RawHandle::from_raw(handle))
    }

    fn umount(&self, volume: RawHandle) -> NativeResult<()> {
        self.calls.record("umount")?;
        self.state
            .lock()
            .volumes
            .remove(&volume.as_raw())
            .map(|_| ())
            .ok_or_else(|| NativeError::new(BAD_HANDLE))
    }

    fn vstat(&self, volume: RawHandle) -> NativeResult<ClassicVolumeInfo> {
        self.calls.record("vstat")?;
        let state = self.state.lock();
        let image = state.image(volume)?;
        let root = image.node(ROOT_ID).ok_or_else(|| NativeError::new(BAD_HANDLE))?;
        let used = image.used_bytes();
        let (dirs, files): (Vec<_>, Vec<_>) = image
            .nodes
            .values()
            .filter(|n| n.id != ROOT_ID)
            .partition(|n| n.kind == MemNodeKind::Directory);
        Ok(ClassicVolumeInfo {
            name: image.name.clone(),
            locked: image.locked,
            total_bytes: image.capacity,
            free_bytes: image.capacity.saturating_sub(used),
            file_count: files.len() as u64,
            directory_count: dirs.len() as u64,
            created: root.created,
            modified: root.modified,
        })
    }

    fn opendir(&self, volume: RawHandle, path: &str) -> NativeResult<RawHandle> {
        self.calls.record("opendir")?;
        let mut state = self.state.lock();
        let image = state.image(volume)?;
        let id = image
            .resolve_colon(path)
            .ok_or_else(|| NativeError::new(NO_SUCH_FILE))?;
        let children = match image.node(id) {
            Some(node) if node.kind == MemNodeKind::Directory => image
                .children(id)
                .into_iter()
                .map(|child| dir_entry(image, child))
                .collect::<VecDeque<_>>(),
            _ => return Err(NativeError::new(NOT_A_DIRECTORY)),
        };
        let handle = state.handle();
        state.dirs.insert(handle, children);
        Ok(RawHandle::from_raw(handle))
    }

    fn readdir(&self, dir: RawHandle) -> NativeResult<Option<ClassicDirEntry>> {
        self.calls.record("readdir")?;
        let mut state = self.state.lock();
        let pending = state
            .dirs
            .get_mut(&dir.as_raw())
            .ok_or_else(|| NativeError::new(BAD_HANDLE))?;
        Ok(pending.pop_front())
    }

    fn closedir(&self, dir: RawHandle) -> NativeResult<()> {
        self.calls.record("closedir")?;
        self.state
            .lock()
            .dirs
            .remove(&dir.as_raw())
            .map(|_| ())
            .ok_or_else(|| NativeError::new(BAD_HANDLE))
    }

    fn open(&self, volume: RawHandle, path: &str) -> NativeResult<RawHandle> {
        self.calls.record("open")?;
        let mut state = self.state.lock();
        let image = state.image(volume)?;
        let id = image
            .resolve_colon(path)
            .ok_or_else(|| NativeError::new(NO_SUCH_FILE))?;
        if image.node(id).map(|n| n.kind) != Some(MemNodeKind::File) {
            return Err(NativeError::new(IS_A_DIRECTORY));
        }
        let image_path = state.mounted(volume)?.path.clone();
        let handle = state.handle();
        state.files.insert(
            handle,
            OpenFile {
                path: image_path,
                node: id,
                position: 0,
                writable: false,
            },
        );
        Ok(RawHandle::from_raw(handle))
    }

    fn read(&self, file: RawHandle, buf: &mut [u8]) -> NativeResult<usize> {
        self.calls.record("read")?;
        let mut state = self.state.lock();
        let ClassicState { images, files, .. } = &mut *state;
        let open = files
            .get_mut(&file.as_raw())
            .ok_or_else(|| NativeError::new(BAD_HANDLE))?;
        let data = images
            .get(&open.path)
            .and_then(|image| image.node(open.node))
            .map(|node| node.data.as_slice())
            .ok_or_else(|| NativeError::new(NO_SUCH_FILE))?;
        let remaining = data.get(open.position..).unwrap_or(&[]);
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        open.position += n;
        Ok(n)
    }

    fn write(&self, file: RawHandle, buf: &[u8]) -> NativeResult<usize> {
        self.calls.record("write")?;
        let mut state = self.state.lock();
        let ClassicState {
            images,
            files,
            write_limit,
            ..
        } = &mut *state;
        let open = files
            .get_mut(&file.as_raw())
            .ok_or_else(|| NativeError::new(BAD_HANDLE))?;
        if !open.writable {
            return Err(NativeError::new("file not open for writing"));
        }
        let image = images
            .get_mut(&open.path)
            .ok_or_else(|| NativeError::new(BAD_HANDLE))?;
        let n = write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        if image.used_bytes() + n as u64 > image.capacity {
            return Err(NativeError::new(VOLUME_FULL));
        }
        let node = image
            .node_mut(open.node)
            .ok_or_else(|| NativeError::new(NO_SUCH_FILE))?;
        node.data.extend_from_slice(&buf[..n]);
        node.modified = now_unix();
        open.position += n;
        Ok(n)
    }

    fn close(&self, file: RawHandle) -> NativeResult<()> {
        self.calls.record("close")?;
        self.state
            .lock()
            .files
            .remove(&file.as_raw())
            .map(|_| ())
            .ok_or_else(|| NativeError::new(BAD_HANDLE))
    }

    fn stat(&self, volume: RawHandle, path: &str) -> NativeResult<ClassicDirEntry> {
        self.calls.record("stat")?;
        let state = self.state.lock();
        let image = state.image(volume)?;
        image
            .resolve_colon(path)
            .and_then(|id| image.node(id))
            .map(|node| dir_entry(image, node))
            .ok_or_else(|| NativeError::new(NO_SUCH_FILE))
    }

    fn create(
        &self,
        volume: RawHandle,
        path: &str,
        file_type: [u8; 4],
        creator: [u8; 4],
    ) -> NativeResult<RawHandle> {
        self.calls.record("create")?;
        let mut state = self.state.lock();
        let image_path = state.mounted(volume)?.path.clone();
        let image = state.writable_image(volume)?;
        let (parent, name) = image.parent_and_name(path)?;
        if image.child_named(parent, name).is_some() {
            return Err(NativeError::new(FILE_EXISTS));
        }
        let id = image.add_file(parent, name, Vec::new());
        if let Some(node) = image.node_mut(id) {
            node.file_type = file_type;
            node.creator = creator;
            node.created = now_unix();
            node.modified = node.created;
        }
        let handle = state.handle();
        state.files.insert(
            handle,
            OpenFile {
                path: image_path,
                node: id,
                position: 0,
                writable: true,
            },
        );
        Ok(RawHandle::from_raw(handle))
    }

    fn mkdir(&self, volume: RawHandle, path: &str) -> NativeResult<()> {
        self.calls.record("mkdir")?;
        let mut state = self.state.lock();
        let image = state.writable_image(volume)?;
        let (parent, name) = image.parent_and_name(path)?;
        if image.child_named(parent, name).is_some() {
            return Err(NativeError::new(FILE_EXISTS));
        }
        let id = image.add_dir(parent, name);
        if let Some(node) = image.node_mut(id) {
            node.created = now_unix();
            node.modified = node.created;
        }
        Ok(())
    }

    fn rmdir(&self, volume: RawHandle, path: &str) -> NativeResult<()> {
        self.calls.record("rmdir")?;
        let mut state = self.state.lock();
        let image = state.writable_image(volume)?;
        let id = image
            .resolve_colon(path)
            .ok_or_else(|| NativeError::new(NO_SUCH_FILE))?;
        if id == ROOT_ID {
            return Err(NativeError::new("cannot remove the root directory"));
        }
        if image.node(id).map(|n| n.kind) != Some(MemNodeKind::Directory) {
            return Err(NativeError::new(NOT_A_DIRECTORY));
        }
        if !image.children(id).is_empty() {
            return Err(NativeError::new(NOT_EMPTY));
        }
        image.nodes.remove(&id);
        Ok(())
    }

    fn delete(&self, volume: RawHandle, path: &str) -> NativeResult<()> {
        self.calls.record("delete")?;
        let mut state = self.state.lock();
        let image = state.writable_image(volume)?;
        let id = image
            .resolve_colon(path)
            .ok_or_else(|| NativeError::new(NO_SUCH_FILE))?;
        if image.node(id).map(|n| n.kind) == Some(MemNodeKind::Directory) {
            return Err(NativeError::new(IS_A_DIRECTORY));
        }
        image.nodes.remove(&id);
        Ok(())
    }

    fn rename(&self, volume: RawHandle, old_path: &str, new_path: &str) -> NativeResult<()> {
        self.calls.record("rename")?;
        let mut state = self.state.lock();
        let image = state.writable_image(volume)?;
        let id = image
            .resolve_colon(old_path)
            .ok_or_else(|| NativeError::new(NO_SUCH_FILE))?;
        if id == ROOT_ID {
            return Err(NativeError::new("cannot rename the root directory"));
        }
        let (parent, name) = image.parent_and_name(new_path)?;
        if image.child_named(parent, name).is_some_and(|other| other != id) {
            return Err(NativeError::new(FILE_EXISTS));
        }
        if image.is_ancestor(id, parent) {
            return Err(NativeError::new("invalid argument"));
        }
        let name = name.to_string();
        if let Some(node) = image.node_mut(id) {
            node.parent = parent;
            node.name = name;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct PlusEntry {
    volume: usize,
    path: String,
    node: u32,
}

#[derive(Debug, Default)]
struct PlusState {
    images: HashMap<String, MemImage>,
    next_handle: usize,
    volumes: HashMap<usize, String>,
    entries: HashMap<usize, PlusEntry>,
    invalid_frees: usize,
    frees_after_close: usize,
    init_failure: Option<String>,
}

impl PlusState {
    fn handle(&mut self) -> usize {
        self.next_handle += 1;
        self.next_handle
    }

    fn new_entry(&mut self, volume: usize, path: String, node: u32) -> RawHandle {
        let handle = self.handle();
        self.entries.insert(handle, PlusEntry { volume, path, node });
        RawHandle::from_raw(handle)
    }

    fn volume_image(&self, volume: RawHandle) -> NativeResult<(&String, &MemImage)> {
        let path = self
            .volumes
            .get(&volume.as_raw())
            .ok_or_else(|| NativeError::new(BAD_HANDLE))?;
        let image = self
            .images
            .get(path)
            .ok_or_else(|| NativeError::new(BAD_HANDLE))?;
        Ok((path, image))
    }

    fn entry(&self, entry: RawHandle) -> NativeResult<(&MemImage, &MemNode)> {
        let PlusEntry { path, node, .. } = self
            .entries
            .get(&entry.as_raw())
            .ok_or_else(|| NativeError::new("invalid file entry"))?;
        let image = self
            .images
            .get(path)
            .ok_or_else(|| NativeError::new(BAD_HANDLE))?;
        let node = image
            .node(*node)
            .ok_or_else(|| NativeError::new("missing catalog record"))?;
        Ok((image, node))
    }
}

/// In-memory stand-in for libfshfs.
#[derive(Debug, Default)]
pub struct MemPlus {
    state: Mutex<PlusState>,
    calls: CallLog,
}

impl MemPlus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_image(&self, path: &str, image: MemImage) {
        self.state.lock().images.insert(path.to_string(), image);
    }

    pub fn calls(&self, function: &str) -> usize {
        self.calls.count(function)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.total()
    }

    pub fn reset_calls(&self) {
        self.calls.reset();
    }

    pub fn fail_next(&self, function: &'static str, message: &str) {
        self.calls.fail_next(function, message);
    }

    pub fn open_volumes(&self) -> usize {
        self.state.lock().volumes.len()
    }

    /// File entries handed out and not freed yet.
    pub fn outstanding_entries(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Frees of handles that were unknown or already freed.
    pub fn invalid_frees(&self) -> usize {
        self.state.lock().invalid_frees
    }

    /// Entries freed after the volume they came from was closed.
    pub fn frees_after_close(&self) -> usize {
        self.state.lock().frees_after_close
    }

    /// Make the next `open_volume` fail while setting up the volume object,
    /// before any file is touched.
    pub fn fail_next_initialization(&self, message: &str) {
        self.state.lock().init_failure = Some(message.to_string());
    }
}

impl PlusLibrary for MemPlus {
    fn check_signature(&self, path: &str) -> NativeResult<bool> {
        self.calls.record("check_signature")?;
        Ok(self.state.lock().images.contains_key(path))
    }

    fn open_volume(&self, path: &str) -> NativeResult<RawHandle> {
        self.calls.record("open_volume")?;
        let mut state = self.state.lock();
        if let Some(message) = state.init_failure.take() {
            return Err(NativeError::initialization(message));
        }
        if !state.images.contains_key(path) {
            return Err(NativeError::new("unable to open file"));
        }
        let handle = state.handle();
        state.volumes.insert(handle, path.to_string());
        Ok(RawHandle::from_raw(handle))
    }

    fn close_volume(&self, volume: RawHandle) -> NativeResult<()> {
        self.calls.record("close_volume")?;
        self.state
            .lock()
            .volumes
            .remove(&volume.as_raw())
            .map(|_| ())
            .ok_or_else(|| NativeError::new(BAD_HANDLE))
    }

    fn volume_name(&self, volume: RawHandle) -> NativeResult<String> {
        self.calls.record("volume_name")?;
        let state = self.state.lock();
        Ok(state.volume_image(volume)?.1.name.clone())
    }

    fn root_directory(&self, volume: RawHandle) -> NativeResult<RawHandle> {
        self.calls.record("root_directory")?;
        let mut state = self.state.lock();
        let path = state.volume_image(volume)?.0.clone();
        Ok(state.new_entry(volume.as_raw(), path, ROOT_ID))
    }

    fn entry_by_path(&self, volume: RawHandle, path: &str) -> NativeResult<Option<RawHandle>> {
        self.calls.record("entry_by_path")?;
        let mut state = self.state.lock();
        let (image_path, image) = state.volume_image(volume)?;
        let Some(node) = image.resolve_slash(path) else {
            return Ok(None);
        };
        let image_path = image_path.clone();
        Ok(Some(state.new_entry(volume.as_raw(), image_path, node)))
    }

    fn free_entry(&self, entry: RawHandle) -> NativeResult<()> {
        self.calls.record("free_entry")?;
        let mut state = self.state.lock();
        let Some(freed) = state.entries.remove(&entry.as_raw()) else {
            state.invalid_frees += 1;
            return Err(NativeError::new("invalid file entry"));
        };
        if !state.volumes.contains_key(&freed.volume) {
            state.frees_after_close += 1;
        }
        Ok(())
    }

    fn sub_entry_count(&self, entry: RawHandle) -> NativeResult<usize> {
        self.calls.record("sub_entry_count")?;
        let state = self.state.lock();
        let (image, node) = state.entry(entry)?;
        Ok(image.children(node.id).len())
    }

    fn sub_entry(&self, entry: RawHandle, index: usize) -> NativeResult<RawHandle> {
        self.calls.record("sub_entry")?;
        let mut state = self.state.lock();
        let (image, node) = state.entry(entry)?;
        let child = image
            .children(node.id)
            .get(index)
            .map(|c| c.id)
            .ok_or_else(|| NativeError::new("sub file entry index out of bounds"))?;
        let parent = &state.entries[&entry.as_raw()];
        let (volume, path) = (parent.volume, parent.path.clone());
        Ok(state.new_entry(volume, path, child))
    }

    fn identifier(&self, entry: RawHandle) -> NativeResult<u32> {
        self.calls.record("identifier")?;
        Ok(self.state.lock().entry(entry)?.1.id)
    }

    fn parent_identifier(&self, entry: RawHandle) -> NativeResult<u32> {
        self.calls.record("parent_identifier")?;
        Ok(self.state.lock().entry(entry)?.1.parent)
    }

    fn creation_time(&self, entry: RawHandle) -> NativeResult<u32> {
        self.calls.record("creation_time")?;
        Ok(to_hfs_time(self.state.lock().entry(entry)?.1.created))
    }

    fn modification_time(&self, entry: RawHandle) -> NativeResult<u32> {
        self.calls.record("modification_time")?;
        Ok(to_hfs_time(self.state.lock().entry(entry)?.1.modified))
    }

    fn access_time(&self, entry: RawHandle) -> NativeResult<u32> {
        self.calls.record("access_time")?;
        Ok(to_hfs_time(self.state.lock().entry(entry)?.1.accessed))
    }

    fn file_mode(&self, entry: RawHandle) -> NativeResult<u16> {
        self.calls.record("file_mode")?;
        Ok(self.state.lock().entry(entry)?.1.plus_mode())
    }

    fn owner_identifier(&self, entry: RawHandle) -> NativeResult<u32> {
        self.calls.record("owner_identifier")?;
        Ok(self.state.lock().entry(entry)?.1.uid)
    }

    fn group_identifier(&self, entry: RawHandle) -> NativeResult<u32> {
        self.calls.record("group_identifier")?;
        Ok(self.state.lock().entry(entry)?.1.gid)
    }

    fn size(&self, entry: RawHandle) -> NativeResult<u64> {
        self.calls.record("size")?;
        Ok(self.state.lock().entry(entry)?.1.logical_size())
    }

    fn name(&self, entry: RawHandle) -> NativeResult<String> {
        self.calls.record("name")?;
        Ok(self.state.lock().entry(entry)?.1.name.clone())
    }

    fn read_at(&self, entry: RawHandle, buf: &mut [u8], offset: u64) -> NativeResult<usize> {
        self.calls.record("read_at")?;
        let state = self.state.lock();
        let (_, node) = state.entry(entry)?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let remaining = node.data.get(start..).unwrap_or(&[]);
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        Ok(n)
    }

    fn symlink_target(&self, entry: RawHandle) -> NativeResult<Option<String>> {
        self.calls.record("symlink_target")?;
        Ok(self.state.lock().entry(entry)?.1.symlink_target.clone())
    }

    fn extended_attributes(&self, entry: RawHandle) -> NativeResult<Vec<(String, u64)>> {
        self.calls.record("extended_attributes")?;
        Ok(self.state.lock().entry(entry)?.1.xattrs.clone())
    }

    fn resource_fork_size(&self, entry: RawHandle) -> NativeResult<Option<u64>> {
        self.calls.record("resource_fork_size")?;
        let state = self.state.lock();
        let (_, node) = state.entry(entry)?;
        Ok((node.resource_size > 0).then_some(node.resource_size))
    }
}
