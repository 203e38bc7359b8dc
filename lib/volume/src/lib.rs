//! Browse classic HFS and HFS+ disk images through one volume and entry model.
//!
//! [`Volume::open`] picks the backend from the on-disk signature and hands
//! back [`Entry`] values that look the same whichever library produced them.
//! [`Navigator`] adds the pieces a browser needs on top: a directory cache, a
//! navigation stack, background listing and a confirmation gate in front of
//! writes to raw devices.

pub mod backend;
pub mod cache;
pub mod entry;
pub mod error;
pub mod gate;
pub mod listing;
pub mod mem;
pub mod native;
pub mod navigator;
pub mod prefs;
pub mod volume;

pub use crate::cache::DirectoryCache;
pub use crate::entry::{CatalogId, Entry, EntryKind, ExtendedAttribute, FinderInfo};
pub use crate::error::{VolumeError, VolumeResult};
pub use crate::gate::{GateDecision, PendingConfirmation, WriteGate, WriteOperation};
pub use crate::listing::{ListingOptions, SortField, SortOrder, natural_compare, sorted_filtered};
pub use crate::navigator::{
    NavigationOutcome, Navigator, NavigatorConfig, Preview, RequestOutcome, Update,
};
pub use crate::prefs::{
    MemoryPreferences, PreferenceStore, Preferences, PreferencesError, TomlPreferences,
};
pub use crate::volume::{
    Backends, Capabilities, DEFAULT_READ_LIMIT, IMPORT_CHUNK_SIZE, OpenMode, OpenOptions, Volume,
    VolumeFormat, is_device_path,
};
