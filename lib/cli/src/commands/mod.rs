//! The commands available in the hfsview binary.
mod browse;
mod edit;
mod prefs;

pub use {browse::*, edit::*, prefs::*};

use std::io::Write;

use anyhow::{Context as _, Result, bail};
use clap::Parser;
use hfs_volume::{
    Backends, Entry, GateDecision, OpenOptions, PreferenceStore, Volume, VolumeError,
    VolumeFormat, WriteGate, WriteOperation,
};
use tracing::warn;

/// Everything a command needs from the outside world.
pub struct Context<'a> {
    pub backends: Backends,
    pub prefs: Box<dyn PreferenceStore>,
    pub out: &'a mut dyn Write,
}

#[derive(Debug, Clone, Parser)]
/// Which volume to operate on
pub struct VolumeOpts {
    /// Disk image or device, e.g. `disk.img` or `/dev/rdisk4`
    #[clap(name = "VOLUME")]
    pub volume: String,

    /// Partition to mount on a partitioned classic HFS disk
    #[clap(long, default_value_t = 0)]
    pub partition: u32,
}

impl VolumeOpts {
    pub(crate) fn open(&self, ctx: &Context<'_>, write: bool) -> Result<Volume> {
        let mut options = if write {
            OpenOptions::read_write()
        } else {
            OpenOptions::read_only()
        };
        options.partition = self.partition;
        let volume = Volume::open(&self.volume, &options, &ctx.backends)
            .with_context(|| format!("failed to open `{}`", self.volume))?;
        if let Some(warning) = volume.open_warning() {
            warn!(volume = %self.volume, warning, "volume opened with restrictions");
        }
        Ok(volume)
    }
}

/// Translate a slash path typed by the user into the volume's own syntax.
///
/// Classic HFS paths may also be given in native colon form (`:Docs:a.txt`).
pub fn native_path(format: VolumeFormat, path: &str) -> String {
    let trimmed = path.trim_matches('/');
    match format {
        VolumeFormat::Hfs if path.starts_with(':') => path.to_string(),
        VolumeFormat::Hfs if trimmed.is_empty() => ":".to_string(),
        VolumeFormat::Hfs => format!(":{}", trimmed.replace('/', ":")),
        VolumeFormat::HfsPlus => format!("/{trimmed}"),
    }
}

pub(crate) fn resolve(volume: &Volume, path: &str) -> Result<Entry> {
    let native = native_path(volume.format(), path);
    if native == ":" || native == "/" {
        return Ok(volume.root());
    }
    volume
        .lookup(&native)
        .with_context(|| format!("`{path}` was not found on \"{}\"", volume.name()))
}

pub(crate) fn resolve_dir(volume: &Volume, path: &str) -> Result<Entry> {
    let entry = resolve(volume, path)?;
    if !entry.is_directory() {
        bail!("`{path}` is not a directory");
    }
    Ok(entry)
}

/// Open the volume, build a mutation against it and run it, asking for
/// `--yes` first when the volume is a raw device.
///
/// An unconfirmed device write is refused from a read-only mount, so the
/// device is never opened for writing before the user agreed.
pub(crate) fn perform(
    ctx: &Context<'_>,
    opts: &VolumeOpts,
    confirmed: bool,
    build: impl FnOnce(&Volume) -> Result<WriteOperation>,
) -> Result<Vec<Entry>> {
    let prefs = ctx.prefs.load();
    let mut gate = WriteGate::new(prefs.suppress_device_write_warnings);
    let ask_first = !confirmed
        && !prefs.suppress_device_write_warnings
        && hfs_volume::is_device_path(&opts.volume);

    let volume = opts.open(ctx, !ask_first)?;
    let operation = build(&volume)?;
    match volume.ensure_writable(operation.name()) {
        Err(VolumeError::ReadOnly) if ask_first => {}
        other => other?,
    }
    let operation = match gate.submit(volume.path(), volume.is_device(), operation) {
        GateDecision::Proceed(operation) => operation,
        GateDecision::NeedsConfirmation(id) => {
            if !confirmed {
                let message = gate.pending().map(|p| p.message()).unwrap_or_default();
                bail!("{message} Pass --yes to go ahead.");
            }
            gate.confirm(id, false)?
        }
    };
    let description = operation.to_string();
    let entries = operation
        .execute(&volume)
        .with_context(|| format!("failed to {description}"))?;
    Ok(entries)
}

/// Human readable byte count: `512 B`, `1.5 KiB`, `20.0 MiB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
