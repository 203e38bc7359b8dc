//! The single owner of navigation state.
//!
//! A [`Navigator`] holds the open volume, the directory cache, the
//! navigation stack and the write gate. Every call into the volume runs on
//! the blocking pool of a tokio runtime; results come back over a channel
//! and are applied, one at a time, by [`Navigator::next_update`]. Results
//! tagged with an older session epoch are dropped, so a listing that
//! finishes after its volume was closed or replaced never reaches the cache.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::DirectoryCache;
use crate::entry::{CatalogId, Entry};
use crate::error::{VolumeError, VolumeResult};
use crate::gate::{GateDecision, PendingConfirmation, WriteGate, WriteOperation};
use crate::listing::{ListingOptions, sorted_filtered};
use crate::prefs::{PreferenceStore, Preferences};
use crate::volume::{Backends, DEFAULT_READ_LIMIT, OpenOptions, Volume};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavigatorConfig {
    /// Cap for preview reads.
    pub read_limit: usize,
    /// Most matches a search reports.
    pub search_limit: usize,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            read_limit: DEFAULT_READ_LIMIT,
            search_limit: 500,
        }
    }
}

/// What [`Navigator::navigate`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavigationOutcome {
    /// A file was selected; nothing was read.
    Selected,
    /// Served from the cache.
    Cached,
    /// A listing is on its way.
    Loading,
}

/// What [`Navigator::request`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    Started,
    NeedsConfirmation(u64),
}

/// Preview bytes of one file.
#[derive(Clone, Debug)]
pub struct Preview {
    pub entry: Entry,
    pub data: Vec<u8>,
}

/// One applied background result.
#[derive(Debug)]
pub enum Update {
    Opened(Volume),
    OpenFailed(VolumeError),
    Listed { dir: CatalogId, count: usize },
    ListFailed { dir: CatalogId, error: VolumeError },
    Mutated { operation: &'static str, entries: Vec<Entry> },
    MutationFailed { operation: &'static str, error: VolumeError },
    Exported(Vec<PathBuf>),
    ExportFailed(VolumeError),
    SearchFinished { query: String, matches: usize },
    SearchFailed(VolumeError),
    Preloaded { directories: usize },
    PreviewReady(CatalogId),
    PreviewUnavailable(CatalogId),
    /// Belonged to a volume that is no longer open.
    Discarded,
}

enum Event {
    Opened(VolumeResult<Volume>),
    Listed {
        dir: Entry,
        result: VolumeResult<Vec<Entry>>,
    },
    Mutated {
        operation: &'static str,
        affected: Vec<CatalogId>,
        removed: Option<CatalogId>,
        relocated: Option<CatalogId>,
        result: VolumeResult<Vec<Entry>>,
    },
    Exported(VolumeResult<Vec<PathBuf>>),
    Searched {
        query: String,
        result: VolumeResult<Vec<Entry>>,
    },
    Preloaded(Vec<(Entry, Vec<Entry>)>),
    Previewed {
        entry: Entry,
        result: VolumeResult<Vec<u8>>,
    },
}

struct Envelope {
    epoch: u64,
    event: Event,
}

pub struct Navigator {
    runtime: Handle,
    backends: Backends,
    prefs: Box<dyn PreferenceStore>,
    config: NavigatorConfig,
    gate: WriteGate,
    listing: ListingOptions,

    epoch: u64,
    volume: Option<Volume>,
    opening: bool,
    cache: DirectoryCache,
    stack: Vec<Entry>,
    current: Option<Entry>,
    contents: Arc<[Entry]>,
    loading: Option<CatalogId>,
    selection: Option<Entry>,
    search_results: Option<Vec<Entry>>,
    preview: Option<Preview>,
    last_error: Option<String>,

    in_flight: usize,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl Navigator {
    pub fn new(
        runtime: Handle,
        backends: Backends,
        prefs: Box<dyn PreferenceStore>,
        config: NavigatorConfig,
    ) -> Self {
        let stored = prefs.load();
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            backends,
            gate: WriteGate::new(stored.suppress_device_write_warnings),
            listing: stored.listing_options(),
            prefs,
            config,
            epoch: 0,
            volume: None,
            opening: false,
            cache: DirectoryCache::new(),
            stack: Vec::new(),
            current: None,
            contents: Arc::from(Vec::new()),
            loading: None,
            selection: None,
            search_results: None,
            preview: None,
            last_error: None,
            in_flight: 0,
            tx,
            rx,
        }
    }

    pub fn volume(&self) -> Option<&Volume> {
        self.volume.as_ref()
    }

    pub fn current(&self) -> Option<&Entry> {
        self.current.as_ref()
    }

    /// Root first, current directory last.
    pub fn stack(&self) -> &[Entry] {
        &self.stack
    }

    pub fn selection(&self) -> Option<&Entry> {
        self.selection.as_ref()
    }

    /// Unfiltered children of the current directory in native order.
    pub fn contents(&self) -> &[Entry] {
        &self.contents
    }

    /// Contents after the listing options are applied.
    pub fn visible_entries(&self) -> Vec<Entry> {
        sorted_filtered(&self.contents, &self.listing)
    }

    pub fn listing_options(&self) -> &ListingOptions {
        &self.listing
    }

    /// Replace the listing options. Sort order and hidden-file visibility
    /// are remembered in the preferences.
    pub fn set_listing_options(&mut self, options: ListingOptions) {
        self.listing = options;
        let mut prefs = self.prefs.load();
        prefs.sort_field = self.listing.sort_field;
        prefs.sort_order = self.listing.sort_order;
        prefs.show_hidden = self.listing.show_hidden;
        self.save_prefs(&prefs);
    }

    pub fn is_loading(&self) -> bool {
        self.opening || self.loading.is_some()
    }

    pub fn is_cached(&self, dir: CatalogId) -> bool {
        self.cache.contains(dir)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub fn search_results(&self) -> Option<&[Entry]> {
        self.search_results.as_deref()
    }

    pub fn clear_search(&mut self) {
        self.search_results = None;
    }

    pub fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    pub fn pending_confirmation(&self) -> Option<&PendingConfirmation> {
        self.gate.pending()
    }

    /// Close whatever is open and start opening `path` in the background.
    pub fn open(&mut self, path: &str, options: OpenOptions) {
        self.close();
        self.opening = true;
        let backends = self.backends.clone();
        let path = path.to_string();
        self.spawn(move || Event::Opened(Volume::open(&path, &options, &backends)));
    }

    /// Close the volume and drop everything derived from it.
    pub fn close(&mut self) {
        self.epoch += 1;
        self.opening = false;
        // entries go first so their handles are released while the volume is open
        self.cache.clear();
        self.stack.clear();
        self.current = None;
        self.contents = Arc::from(Vec::new());
        self.loading = None;
        self.selection = None;
        self.search_results = None;
        self.preview = None;
        self.gate.clear();
        if let Some(volume) = self.volume.take() {
            volume.close();
        }
    }

    fn open_volume(&self) -> VolumeResult<&Volume> {
        self.volume.as_ref().ok_or(VolumeError::Closed)
    }

    fn check_entry(&self, entry: &Entry) -> VolumeResult<()> {
        let volume = self.open_volume()?;
        match entry.volume() {
            Ok(owner) if owner.same_session(volume) => Ok(()),
            Ok(_) => Err(VolumeError::ForeignEntry {
                name: entry.name().to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Visit `target`: select a file, or make a directory current.
    pub fn navigate(&mut self, target: &Entry) -> VolumeResult<NavigationOutcome> {
        self.check_entry(target)?;
        if !target.is_directory() {
            self.selection = Some(target.clone());
            return Ok(NavigationOutcome::Selected);
        }

        match self.stack.iter().position(|e| e.id() == target.id()) {
            Some(idx) => self.stack.truncate(idx + 1),
            None => self.stack.push(target.clone()),
        }
        self.current = Some(target.clone());
        self.selection = None;

        if let Some(children) = self.cache.get(target.id()) {
            self.contents = children;
            self.loading = None;
            return Ok(NavigationOutcome::Cached);
        }
        self.load(target.clone());
        Ok(NavigationOutcome::Loading)
    }

    /// Go to the entry below the current one on the stack.
    pub fn navigate_up(&mut self) -> VolumeResult<Option<NavigationOutcome>> {
        let Some(parent) = self.stack.iter().rev().nth(1).cloned() else {
            return Ok(None);
        };
        self.navigate(&parent).map(Some)
    }

    /// Drop the current directory's listing and read it again.
    pub fn refresh(&mut self) -> VolumeResult<()> {
        self.open_volume()?;
        let Some(current) = self.current.clone() else {
            return Ok(());
        };
        self.cache.invalidate(current.id());
        self.load(current);
        Ok(())
    }

    fn load(&mut self, dir: Entry) {
        self.contents = Arc::from(Vec::new());
        self.loading = Some(dir.id());
        let Some(volume) = self.volume.clone() else {
            return;
        };
        self.spawn(move || {
            let result = volume.list_children(&dir);
            Event::Listed { dir, result }
        });
    }

    /// Route a mutation through the write gate.
    pub fn request(&mut self, operation: WriteOperation) -> VolumeResult<RequestOutcome> {
        let volume = self.open_volume()?;
        volume.ensure_writable(operation.name())?;
        let (path, is_device) = (volume.path().to_string(), volume.is_device());
        match self.gate.submit(&path, is_device, operation) {
            GateDecision::Proceed(operation) => {
                self.execute(operation)?;
                Ok(RequestOutcome::Started)
            }
            GateDecision::NeedsConfirmation(id) => Ok(RequestOutcome::NeedsConfirmation(id)),
        }
    }

    /// Run a parked mutation. With `suppress_future` the device warning is
    /// turned off and the choice is saved.
    pub fn confirm(&mut self, id: u64, suppress_future: bool) -> VolumeResult<()> {
        let operation = self.gate.confirm(id, suppress_future)?;
        if suppress_future {
            let mut prefs = self.prefs.load();
            prefs.suppress_device_write_warnings = true;
            self.save_prefs(&prefs);
        }
        self.execute(operation)
    }

    /// Discard a parked mutation.
    pub fn cancel(&mut self, id: u64) -> bool {
        self.gate.cancel(id)
    }

    fn execute(&mut self, operation: WriteOperation) -> VolumeResult<()> {
        let volume = self.open_volume()?.clone();
        for entry in operation.entries() {
            self.check_entry(entry)?;
        }
        let name = operation.name();
        let mut affected = Vec::new();
        let mut removed = None;
        let mut relocated = None;
        match &operation {
            WriteOperation::CreateFolder { parent, .. } => affected.push(parent.id()),
            WriteOperation::Import { destination, .. } => affected.push(destination.id()),
            WriteOperation::Delete { entry } => {
                affected.push(entry.parent_id());
                removed = Some(entry.id());
            }
            WriteOperation::Rename { entry, .. } => {
                affected.push(entry.parent_id());
                relocated = entry.is_directory().then(|| entry.id());
            }
            WriteOperation::Duplicate { entry } => affected.push(entry.parent_id()),
            WriteOperation::Copy { destination, .. } => affected.push(destination.id()),
            WriteOperation::Move { entry, destination } => {
                affected.extend([entry.parent_id(), destination.id()]);
                relocated = entry.is_directory().then(|| entry.id());
            }
        }
        self.spawn(move || Event::Mutated {
            operation: name,
            affected,
            removed,
            relocated,
            result: operation.execute(&volume),
        });
        Ok(())
    }

    /// Copy entries to a host directory in the background.
    pub fn export(&mut self, entries: Vec<Entry>, destination: PathBuf) -> VolumeResult<()> {
        for entry in &entries {
            self.check_entry(entry)?;
        }
        let volume = self.open_volume()?.clone();
        self.spawn(move || {
            let result = entries
                .iter()
                .map(|entry| volume.export(entry, &destination))
                .collect();
            Event::Exported(result)
        });
        Ok(())
    }

    /// Search names below the current directory.
    pub fn search(&mut self, query: &str) -> VolumeResult<()> {
        let volume = self.open_volume()?.clone();
        let start = self.current.clone().unwrap_or_else(|| volume.root());
        let query = query.to_string();
        let limit = self.config.search_limit;
        self.spawn(move || {
            let result = search_tree(&volume, start, &query, limit);
            Event::Searched { query, result }
        });
        Ok(())
    }

    /// List the current directory's subdirectories ahead of time. Failures
    /// are logged and otherwise ignored.
    pub fn preload_children(&mut self) -> VolumeResult<()> {
        let volume = self.open_volume()?.clone();
        let pending: Vec<Entry> = self
            .contents
            .iter()
            .filter(|e| e.is_directory() && !self.cache.contains(e.id()))
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        self.spawn(move || {
            let listings = pending
                .into_iter()
                .filter_map(|dir| match volume.list_children(&dir) {
                    Ok(children) => Some((dir, children)),
                    Err(error) => {
                        warn!(dir = dir.id(), %error, "preload failed");
                        None
                    }
                })
                .collect();
            Event::Preloaded(listings)
        });
        Ok(())
    }

    /// Read the start of a file for display. Failures are not reported.
    pub fn load_preview(&mut self, entry: &Entry) -> VolumeResult<()> {
        self.check_entry(entry)?;
        let volume = self.open_volume()?.clone();
        let entry = entry.clone();
        let limit = self.config.read_limit;
        self.spawn(move || {
            let result = volume.read_data(&entry, limit);
            Event::Previewed { entry, result }
        });
        Ok(())
    }

    fn spawn<F>(&mut self, job: F)
    where
        F: FnOnce() -> Event + Send + 'static,
    {
        let tx = self.tx.clone();
        let epoch = self.epoch;
        self.in_flight += 1;
        self.runtime.spawn_blocking(move || {
            let event = job();
            // the navigator may be gone; dropping the event releases its resources
            tx.send(Envelope { epoch, event }).ok();
        });
    }

    /// Wait for and apply the next background result. `None` once nothing
    /// is in flight.
    pub async fn next_update(&mut self) -> Option<Update> {
        if self.in_flight == 0 {
            return None;
        }
        let envelope = self.rx.recv().await?;
        self.in_flight -= 1;
        Some(self.apply(envelope))
    }

    /// Apply results until nothing is in flight.
    pub async fn settle(&mut self) -> Vec<Update> {
        let mut updates = Vec::new();
        while let Some(update) = self.next_update().await {
            updates.push(update);
        }
        updates
    }

    fn apply(&mut self, Envelope { epoch, event }: Envelope) -> Update {
        if epoch != self.epoch {
            if let Event::Opened(Ok(volume)) = event {
                volume.close();
            }
            debug!(epoch, current = self.epoch, "stale result discarded");
            return Update::Discarded;
        }

        match event {
            Event::Opened(result) => self.apply_opened(result),
            Event::Listed { dir, result } => self.apply_listed(dir, result),
            Event::Mutated {
                operation,
                affected,
                removed,
                relocated,
                result,
            } => {
                let succeeded = result.is_ok();
                if let Some(id) = removed {
                    self.cache.invalidate(id);
                    if succeeded {
                        self.leave(id, false);
                    }
                }
                let relocated = relocated.filter(|_| succeeded);
                if let Some(id) = relocated {
                    // cached paths below a moved directory are stale
                    self.cache.clear();
                    // the stacked entry may be a different handle than the one moved
                    if let Ok(entries) = &result {
                        if let Some(moved) = entries.iter().find(|e| e.id() == id) {
                            for slot in self.stack.iter_mut().filter(|e| e.id() == id) {
                                *slot = moved.clone();
                            }
                        }
                    }
                    self.leave(id, true);
                }
                for id in &affected {
                    self.cache.invalidate(*id);
                }
                let reload = relocated.is_some()
                    || self
                        .current
                        .as_ref()
                        .is_some_and(|c| affected.contains(&c.id()));
                if reload {
                    if let Some(current) = self.current.clone() {
                        self.load(current);
                    }
                }
                match result {
                    Ok(entries) => Update::Mutated { operation, entries },
                    Err(error) => {
                        self.last_error = Some(error.to_string());
                        Update::MutationFailed { operation, error }
                    }
                }
            }
            Event::Exported(Ok(paths)) => Update::Exported(paths),
            Event::Exported(Err(error)) => {
                self.last_error = Some(error.to_string());
                Update::ExportFailed(error)
            }
            Event::Searched { query, result } => match result {
                Ok(matches) => {
                    let count = matches.len();
                    self.search_results = Some(matches);
                    Update::SearchFinished {
                        query,
                        matches: count,
                    }
                }
                Err(error) => {
                    self.last_error = Some(error.to_string());
                    Update::SearchFailed(error)
                }
            },
            Event::Preloaded(listings) => {
                let mut directories = 0;
                for (dir, children) in listings {
                    if !self.cache.contains(dir.id()) {
                        self.cache.insert(dir.id(), children);
                        directories += 1;
                    }
                }
                Update::Preloaded { directories }
            }
            Event::Previewed { entry, result } => match result {
                Ok(data) => {
                    let id = entry.id();
                    self.preview = Some(Preview { entry, data });
                    Update::PreviewReady(id)
                }
                Err(error) => {
                    debug!(entry = entry.id(), %error, "preview unavailable");
                    Update::PreviewUnavailable(entry.id())
                }
            },
        }
    }

    fn apply_opened(&mut self, result: VolumeResult<Volume>) -> Update {
        self.opening = false;
        match result {
            Ok(volume) => {
                if let Some(warning) = volume.open_warning() {
                    warn!(path = volume.path(), warning, "volume opened with restrictions");
                }
                let root = volume.root();
                self.volume = Some(volume.clone());
                self.last_error = None;
                self.stack = vec![root.clone()];
                self.current = Some(root.clone());
                self.load(root);
                Update::Opened(volume)
            }
            Err(error) => {
                self.last_error = Some(error.to_string());
                Update::OpenFailed(error)
            }
        }
    }

    fn apply_listed(&mut self, dir: Entry, result: VolumeResult<Vec<Entry>>) -> Update {
        let is_current = self.current.as_ref().is_some_and(|c| c.id() == dir.id());
        if self.loading == Some(dir.id()) {
            self.loading = None;
        }
        match result {
            Ok(children) => {
                let count = children.len();
                let children = self.cache.insert(dir.id(), children);
                if is_current {
                    self.contents = children;
                }
                Update::Listed {
                    dir: dir.id(),
                    count,
                }
            }
            Err(error) => {
                self.last_error = Some(error.to_string());
                Update::ListFailed {
                    dir: dir.id(),
                    error,
                }
            }
        }
    }

    /// Pop `id` off the stack. With `keep` the entry itself stays and only
    /// what is above it goes.
    fn leave(&mut self, id: CatalogId, keep: bool) {
        let Some(idx) = self.stack.iter().position(|e| e.id() == id) else {
            return;
        };
        self.stack.truncate(if keep { idx + 1 } else { idx });
        self.current = self.stack.last().cloned();
    }

    fn save_prefs(&mut self, prefs: &Preferences) {
        if let Err(error) = self.prefs.save(prefs) {
            warn!(%error, "failed to save preferences");
        }
    }
}

impl Drop for Navigator {
    fn drop(&mut self) {
        self.close();
    }
}

fn search_tree(
    volume: &Volume,
    start: Entry,
    query: &str,
    limit: usize,
) -> VolumeResult<Vec<Entry>> {
    let needle = query.to_lowercase();
    let start_id = start.id();
    let mut queue = VecDeque::from([start]);
    let mut matches = Vec::new();
    while let Some(dir) = queue.pop_front() {
        let children = match volume.list_children(&dir) {
            Ok(children) => children,
            Err(error) if dir.id() != start_id => {
                warn!(dir = dir.id(), %error, "search skipped a directory");
                continue;
            }
            Err(error) => return Err(error),
        };
        for child in children {
            if child.name().to_lowercase().contains(&needle) {
                matches.push(child.clone());
                if matches.len() >= limit {
                    return Ok(matches);
                }
            }
            if child.is_directory() {
                queue.push_back(child);
            }
        }
    }
    Ok(matches)
}
