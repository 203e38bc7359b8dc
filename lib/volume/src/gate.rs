//! Confirmation step in front of mutations on raw devices.
//!
//! Writes to a disk image pass straight through. Writes to a `/dev/` path are
//! parked until the user confirms them, unless device warnings have been
//! suppressed. Only one operation can wait at a time; a newer request
//! replaces it.

use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::backend::classic::child_path;
use crate::entry::Entry;
use crate::error::{VolumeError, VolumeResult};
use crate::volume::Volume;

/// A mutation requested against the open volume.
#[derive(Clone, Debug)]
pub enum WriteOperation {
    CreateFolder { parent: Entry, name: String },
    Import { sources: Vec<PathBuf>, destination: Entry },
    Delete { entry: Entry },
    Rename { entry: Entry, new_name: String },
    Duplicate { entry: Entry },
    Move { entry: Entry, destination: Entry },
    Copy { entry: Entry, destination: Entry },
}

impl WriteOperation {
    pub fn name(&self) -> &'static str {
        match self {
            WriteOperation::CreateFolder { .. } => "create_folder",
            WriteOperation::Import { .. } => "import",
            WriteOperation::Delete { .. } => "delete",
            WriteOperation::Rename { .. } => "rename",
            WriteOperation::Duplicate { .. } => "duplicate",
            WriteOperation::Move { .. } => "move",
            WriteOperation::Copy { .. } => "copy",
        }
    }

    /// Entries the operation reads or changes.
    pub fn entries(&self) -> Vec<&Entry> {
        match self {
            WriteOperation::CreateFolder { parent, .. } => vec![parent],
            WriteOperation::Import { destination, .. } => vec![destination],
            WriteOperation::Delete { entry }
            | WriteOperation::Rename { entry, .. }
            | WriteOperation::Duplicate { entry } => vec![entry],
            WriteOperation::Move { entry, destination }
            | WriteOperation::Copy { entry, destination } => vec![entry, destination],
        }
    }

    /// Run the operation against `volume`. Returns the entries it created or
    /// renamed.
    pub fn execute(self, volume: &Volume) -> VolumeResult<Vec<Entry>> {
        let name = self.name();
        match self {
            WriteOperation::CreateFolder { parent, name: folder } => {
                let path = child_path(&directory_path(&parent, name)?, &folder);
                Ok(vec![volume.create_directory(&path)?])
            }
            WriteOperation::Import {
                sources,
                destination,
            } => {
                let dir = directory_path(&destination, name)?;
                sources
                    .iter()
                    .map(|source| {
                        let file_name = source
                            .file_name()
                            .map(|n| n.to_string_lossy().replace(':', "/"))
                            .ok_or_else(|| VolumeError::InvalidName {
                                name: source.display().to_string(),
                                reason: "source has no file name",
                            })?;
                        volume.import_file(source, &child_path(&dir, &file_name))
                    })
                    .collect()
            }
            WriteOperation::Delete { entry } => {
                volume.delete(&entry)?;
                Ok(Vec::new())
            }
            WriteOperation::Rename { entry, new_name } => {
                Ok(vec![volume.rename(&entry, &new_name)?])
            }
            WriteOperation::Duplicate { entry } => Ok(vec![volume.duplicate(&entry)?]),
            WriteOperation::Move { entry, destination } => {
                let path = child_path(&directory_path(&destination, name)?, entry.name());
                Ok(vec![volume.move_to(&entry, &path)?])
            }
            WriteOperation::Copy { entry, destination } => {
                let path = child_path(&directory_path(&destination, name)?, entry.name());
                Ok(vec![volume.copy_to(&entry, &path)?])
            }
        }
    }
}

fn directory_path(dir: &Entry, operation: &'static str) -> VolumeResult<String> {
    dir.classic_path().ok_or(VolumeError::Unsupported {
        operation,
        backend: "HFS+",
    })
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOperation::CreateFolder { name, .. } => write!(f, "create folder \"{name}\""),
            WriteOperation::Import { sources, .. } if sources.len() == 1 => {
                write!(f, "import \"{}\"", sources[0].display())
            }
            WriteOperation::Import { sources, .. } => write!(f, "import {} items", sources.len()),
            WriteOperation::Delete { entry } => write!(f, "delete \"{}\"", entry.name()),
            WriteOperation::Rename { entry, new_name } => {
                write!(f, "rename \"{}\" to \"{new_name}\"", entry.name())
            }
            WriteOperation::Duplicate { entry } => write!(f, "duplicate \"{}\"", entry.name()),
            WriteOperation::Move { entry, destination } => {
                write!(f, "move \"{}\" into \"{}\"", entry.name(), destination.name())
            }
            WriteOperation::Copy { entry, destination } => {
                write!(f, "copy \"{}\" into \"{}\"", entry.name(), destination.name())
            }
        }
    }
}

/// An operation parked until the user answers.
#[derive(Debug)]
pub struct PendingConfirmation {
    pub id: u64,
    pub volume_path: String,
    pub operation: WriteOperation,
}

impl PendingConfirmation {
    /// Text for the confirmation prompt.
    pub fn message(&self) -> String {
        format!(
            "\"{}\" is a physical device. Are you sure you want to {}?",
            self.volume_path, self.operation
        )
    }
}

#[derive(Debug)]
pub enum GateDecision {
    /// Run it now.
    Proceed(WriteOperation),
    /// Parked under this confirmation id.
    NeedsConfirmation(u64),
}

#[derive(Debug, Default)]
pub struct WriteGate {
    suppress_device_warnings: bool,
    next_id: u64,
    pending: Option<PendingConfirmation>,
}

impl WriteGate {
    pub fn new(suppress_device_warnings: bool) -> Self {
        Self {
            suppress_device_warnings,
            ..Self::default()
        }
    }

    pub fn suppresses_device_warnings(&self) -> bool {
        self.suppress_device_warnings
    }

    pub fn set_suppress_device_warnings(&mut self, suppress: bool) {
        self.suppress_device_warnings = suppress;
    }

    pub fn submit(
        &mut self,
        volume_path: &str,
        is_device: bool,
        operation: WriteOperation,
    ) -> GateDecision {
        if !is_device || self.suppress_device_warnings {
            return GateDecision::Proceed(operation);
        }
        self.next_id += 1;
        let id = self.next_id;
        if let Some(previous) = self.pending.take() {
            debug!(id = previous.id, operation = previous.operation.name(), "pending write superseded");
        }
        debug!(id, operation = operation.name(), volume_path, "write awaiting confirmation");
        self.pending = Some(PendingConfirmation {
            id,
            volume_path: volume_path.to_string(),
            operation,
        });
        GateDecision::NeedsConfirmation(id)
    }

    pub fn pending(&self) -> Option<&PendingConfirmation> {
        self.pending.as_ref()
    }

    /// Release the parked operation. `suppress_future` turns the warning off
    /// for the rest of this gate's life.
    pub fn confirm(&mut self, id: u64, suppress_future: bool) -> VolumeResult<WriteOperation> {
        match self.pending.take() {
            Some(pending) if pending.id == id => {
                if suppress_future {
                    self.suppress_device_warnings = true;
                }
                Ok(pending.operation)
            }
            other => {
                self.pending = other;
                Err(VolumeError::Cancelled)
            }
        }
    }

    /// Drop the parked operation. Returns whether `id` was pending.
    pub fn cancel(&mut self, id: u64) -> bool {
        match self.pending.take() {
            Some(pending) if pending.id == id => true,
            other => {
                self.pending = other;
                false
            }
        }
    }

    /// Forget anything parked, e.g. when the volume closes.
    pub fn clear(&mut self) {
        self.pending = None;
    }
}
