use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use clap::Parser;
use hfs_volume::WriteOperation;

use super::{Context, VolumeOpts, perform, resolve, resolve_dir};

#[derive(Debug, Parser)]
/// The options for the `hfsview mkdir` subcommand
pub struct Mkdir {
    #[clap(flatten)]
    volume: VolumeOpts,

    /// Folder to create; its parent must exist
    #[clap(name = "PATH")]
    path: String,

    /// Go ahead without asking when the volume is a raw device
    #[clap(short, long)]
    yes: bool,
}

impl Mkdir {
    /// Execute `hfsview mkdir`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let trimmed = self.path.trim_end_matches('/');
        let (parent, name) = match trimmed.rsplit_once('/') {
            Some((parent, name)) => (if parent.is_empty() { "/" } else { parent }, name),
            None => ("/", trimmed),
        };
        if name.is_empty() {
            bail!("`{}` does not name a folder", self.path);
        }
        let created = perform(ctx, &self.volume, self.yes, |volume| {
            Ok(WriteOperation::CreateFolder {
                parent: resolve_dir(volume, parent)?,
                name: name.to_string(),
            })
        })?;
        for created in created {
            writeln!(ctx.out, "created {}", created.name())?;
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
/// The options for the `hfsview import` subcommand
pub struct Import {
    #[clap(flatten)]
    volume: VolumeOpts,

    /// Host files or folders to copy onto the volume
    #[clap(name = "SOURCE", required = true, num_args = 1..)]
    sources: Vec<PathBuf>,

    /// Folder on the volume to copy into
    #[clap(long = "to", default_value = "/")]
    destination: String,

    /// Go ahead without asking when the volume is a raw device
    #[clap(short, long)]
    yes: bool,
}

impl Import {
    /// Execute `hfsview import`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let imported = perform(ctx, &self.volume, self.yes, |volume| {
            Ok(WriteOperation::Import {
                sources: self.sources.clone(),
                destination: resolve_dir(volume, &self.destination)?,
            })
        })?;
        for imported in imported {
            writeln!(ctx.out, "imported {}", imported.name())?;
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
/// The options for the `hfsview export` subcommand
pub struct Export {
    #[clap(flatten)]
    volume: VolumeOpts,

    /// Entry on the volume to copy out
    #[clap(name = "PATH")]
    path: String,

    /// Host folder to write into
    #[clap(long = "to", default_value = ".")]
    destination: PathBuf,
}

impl Export {
    /// Execute `hfsview export`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let volume = self.volume.open(ctx, false)?;
        let entry = resolve(&volume, &self.path)?;
        let written = volume
            .export(&entry, &self.destination)
            .with_context(|| format!("failed to export `{}`", self.path))?;
        writeln!(ctx.out, "exported {}", written.display())?;
        Ok(())
    }
}

#[derive(Debug, Parser)]
/// The options for the `hfsview rm` subcommand
pub struct Rm {
    #[clap(flatten)]
    volume: VolumeOpts,

    /// Entry to delete; folders are removed with their contents
    #[clap(name = "PATH")]
    path: String,

    /// Go ahead without asking when the volume is a raw device
    #[clap(short, long)]
    yes: bool,
}

impl Rm {
    /// Execute `hfsview rm`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        perform(ctx, &self.volume, self.yes, |volume| {
            Ok(WriteOperation::Delete {
                entry: resolve(volume, &self.path)?,
            })
        })?;
        writeln!(ctx.out, "deleted {}", self.path)?;
        Ok(())
    }
}

#[derive(Debug, Parser)]
/// The options for the `hfsview mv` subcommand
pub struct Mv {
    #[clap(flatten)]
    volume: VolumeOpts,

    /// Entry to move
    #[clap(name = "PATH")]
    path: String,

    /// Folder to move it into
    #[clap(name = "DEST_DIR")]
    destination: String,

    /// Go ahead without asking when the volume is a raw device
    #[clap(short, long)]
    yes: bool,
}

impl Mv {
    /// Execute `hfsview mv`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let moved = perform(ctx, &self.volume, self.yes, |volume| {
            Ok(WriteOperation::Move {
                entry: resolve(volume, &self.path)?,
                destination: resolve_dir(volume, &self.destination)?,
            })
        })?;
        for moved in moved {
            writeln!(ctx.out, "moved {} into {}", moved.name(), self.destination)?;
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
/// The options for the `hfsview rename` subcommand
pub struct Rename {
    #[clap(flatten)]
    volume: VolumeOpts,

    /// Entry to rename
    #[clap(name = "PATH")]
    path: String,

    /// New name, without any folder part
    #[clap(name = "NEW_NAME")]
    new_name: String,

    /// Go ahead without asking when the volume is a raw device
    #[clap(short, long)]
    yes: bool,
}

impl Rename {
    /// Execute `hfsview rename`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let renamed = perform(ctx, &self.volume, self.yes, |volume| {
            Ok(WriteOperation::Rename {
                entry: resolve(volume, &self.path)?,
                new_name: self.new_name.clone(),
            })
        })?;
        for renamed in renamed {
            writeln!(ctx.out, "renamed to {}", renamed.name())?;
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
/// The options for the `hfsview cp` subcommand
pub struct Cp {
    #[clap(flatten)]
    volume: VolumeOpts,

    /// Entry to copy; folders are copied with their contents
    #[clap(name = "PATH")]
    path: String,

    /// Folder to copy it into
    #[clap(name = "DEST_DIR")]
    destination: String,

    /// Go ahead without asking when the volume is a raw device
    #[clap(short, long)]
    yes: bool,
}

impl Cp {
    /// Execute `hfsview cp`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let copied = perform(ctx, &self.volume, self.yes, |volume| {
            Ok(WriteOperation::Copy {
                entry: resolve(volume, &self.path)?,
                destination: resolve_dir(volume, &self.destination)?,
            })
        })?;
        for copied in copied {
            writeln!(ctx.out, "copied {} into {}", copied.name(), self.destination)?;
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
/// The options for the `hfsview dup` subcommand
pub struct Dup {
    #[clap(flatten)]
    volume: VolumeOpts,

    /// Entry to duplicate next to itself
    #[clap(name = "PATH")]
    path: String,

    /// Go ahead without asking when the volume is a raw device
    #[clap(short, long)]
    yes: bool,
}

impl Dup {
    /// Execute `hfsview dup`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let copies = perform(ctx, &self.volume, self.yes, |volume| {
            Ok(WriteOperation::Duplicate {
                entry: resolve(volume, &self.path)?,
            })
        })?;
        for copy in copies {
            writeln!(ctx.out, "created {}", copy.name())?;
        }
        Ok(())
    }
}
