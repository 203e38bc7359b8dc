//! User preferences: the device write warning opt-out and listing defaults.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::listing::{ListingOptions, SortField, SortOrder};

const CONFIG_DIR_NAME: &str = "hfsview";
const CONFIG_FILE_NAME: &str = "preferences.toml";
const CONFIG_PATH_ENV_VAR: &str = "HFSVIEW_CONFIG_PATH";

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Preferences {
    pub version: u32,
    /// Skip the confirmation before writing to a raw device.
    #[serde(default)]
    pub suppress_device_write_warnings: bool,
    #[serde(default)]
    pub sort_field: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default)]
    pub show_hidden: bool,
}

impl Preferences {
    pub const VERSION: u32 = 1;

    pub fn from_toml(data: &str) -> Result<Self, PreferencesError> {
        let value: toml::Value = toml::from_str(data)?;
        let version = value
            .get("version")
            .and_then(|v| v.as_integer())
            .ok_or(PreferencesError::MissingVersion)?;
        if version != i64::from(Self::VERSION) {
            return Err(PreferencesError::UnknownVersion(version));
        }
        Ok(toml::from_str(data)?)
    }

    pub fn to_toml(&self) -> Result<String, PreferencesError> {
        Ok(toml::to_string(self)?)
    }

    /// Listing options seeded from the stored defaults.
    pub fn listing_options(&self) -> ListingOptions {
        ListingOptions {
            sort_field: self.sort_field,
            sort_order: self.sort_order,
            filter_text: String::new(),
            show_hidden: self.show_hidden,
        }
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            version: Self::VERSION,
            suppress_device_write_warnings: false,
            sort_field: SortField::default(),
            sort_order: SortOrder::default(),
            show_hidden: false,
        }
    }
}

#[derive(Error, Debug)]
pub enum PreferencesError {
    #[error("failed to parse preferences TOML")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize preferences")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid preferences: no 'version' key found")]
    MissingVersion,
    #[error("invalid preferences: unknown version '{0}'")]
    UnknownVersion(i64),
    #[error("no configuration directory could be determined")]
    NoConfigDir,
    #[error("failed to access preferences at '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where preferences are read from and written to.
pub trait PreferenceStore: Send {
    fn load(&self) -> Preferences;
    fn save(&mut self, prefs: &Preferences) -> Result<(), PreferencesError>;
}

/// Keeps preferences for the life of the process only. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferences {
    prefs: Arc<Mutex<Preferences>>,
}

impl MemoryPreferences {
    pub fn new(prefs: Preferences) -> Self {
        Self {
            prefs: Arc::new(Mutex::new(prefs)),
        }
    }
}

impl PreferenceStore for MemoryPreferences {
    fn load(&self) -> Preferences {
        self.prefs.lock().clone()
    }

    fn save(&mut self, prefs: &Preferences) -> Result<(), PreferencesError> {
        *self.prefs.lock() = prefs.clone();
        Ok(())
    }
}

/// A TOML file on disk.
#[derive(Debug, Clone)]
pub struct TomlPreferences {
    path: PathBuf,
}

impl TomlPreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HFSVIEW_CONFIG_PATH`, else `<config dir>/hfsview/preferences.toml`.
    pub fn default_path() -> Result<PathBuf, PreferencesError> {
        if let Some(var) = std::env::var_os(CONFIG_PATH_ENV_VAR) {
            return Ok(var.into());
        }
        let dir = dirs::config_dir().ok_or(PreferencesError::NoConfigDir)?;
        Ok(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn at_default_path() -> Result<Self, PreferencesError> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn try_load(&self) -> Result<Option<Preferences>, PreferencesError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PreferencesError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        Preferences::from_toml(&data).map(Some)
    }
}

impl PreferenceStore for TomlPreferences {
    fn load(&self) -> Preferences {
        match self.try_load() {
            Ok(prefs) => prefs.unwrap_or_default(),
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to load preferences, using defaults");
                Preferences::default()
            }
        }
    }

    fn save(&mut self, prefs: &Preferences) -> Result<(), PreferencesError> {
        let data = prefs.to_toml()?;
        let io_err = |source: io::Error| PreferencesError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(&self.path, data).map_err(io_err)
    }
}
