use std::collections::VecDeque;
use std::io::Write;

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use hfs_volume::{Capabilities, Entry, EntryKind, ListingOptions, SortField, SortOrder, Volume};

use super::{Context, VolumeOpts, format_size, resolve, resolve_dir};

#[derive(Debug, Parser)]
/// The options for the `hfsview info` subcommand
pub struct Info {
    #[clap(flatten)]
    volume: VolumeOpts,
}

impl Info {
    /// Execute `hfsview info`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let volume = self.volume.open(ctx, false)?;
        let out = &mut *ctx.out;
        writeln!(out, "Name:         {}", volume.name())?;
        writeln!(out, "Path:         {}", volume.path())?;
        writeln!(out, "Format:       {:?}", volume.format())?;
        writeln!(
            out,
            "Access:       {}",
            if volume.is_read_only() {
                "read-only"
            } else {
                "read-write"
            }
        )?;
        writeln!(out, "Device:       {}", volume.is_device())?;
        writeln!(out, "Capabilities: {}", capability_names(volume.capabilities()))?;
        if let Some(usage) = volume.usage()? {
            writeln!(
                out,
                "Space:        {} free of {}",
                format_size(usage.free_bytes),
                format_size(usage.total_bytes)
            )?;
            writeln!(
                out,
                "Objects:      {} files, {} folders",
                usage.file_count, usage.directory_count
            )?;
        }
        if let Some(warning) = volume.open_warning() {
            writeln!(out, "Warning:      {warning}")?;
        }
        Ok(())
    }
}

fn capability_names(caps: Capabilities) -> String {
    let names = [
        (Capabilities::READ, "read"),
        (Capabilities::WRITE, "write"),
        (Capabilities::SYMLINKS, "symlinks"),
        (Capabilities::RESOURCE_FORKS, "resource-forks"),
        (Capabilities::EXTENDED_ATTRIBUTES, "xattrs"),
        (Capabilities::ACCESS_TIMES, "access-times"),
        (Capabilities::POSIX_PERMISSIONS, "permissions"),
    ];
    names
        .iter()
        .filter(|(flag, _)| caps.contains(*flag))
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum SortKey {
    Name,
    Size,
    Modified,
    Type,
}

impl From<SortKey> for SortField {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::Name => SortField::Name,
            SortKey::Size => SortField::Size,
            SortKey::Modified => SortField::Modified,
            SortKey::Type => SortField::Type,
        }
    }
}

#[derive(Debug, Parser)]
/// The options for the `hfsview ls` subcommand
pub struct Ls {
    #[clap(flatten)]
    volume: VolumeOpts,

    /// Directory to list
    #[clap(name = "PATH", default_value = "/")]
    path: String,

    /// Sort key, defaults to the stored preference
    #[clap(long, value_enum)]
    sort: Option<SortKey>,

    /// Reverse the sort order
    #[clap(short, long)]
    reverse: bool,

    /// Only show names containing this text
    #[clap(long)]
    filter: Option<String>,

    /// Include names starting with '.'
    #[clap(short, long)]
    all: bool,

    /// Show kind, size and type codes
    #[clap(short, long)]
    long: bool,
}

impl Ls {
    /// Execute `hfsview ls`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let volume = self.volume.open(ctx, false)?;
        let dir = resolve_dir(&volume, &self.path)?;
        let children = volume
            .list_children(&dir)
            .with_context(|| format!("failed to list `{}`", self.path))?;

        let mut options = ctx.prefs.load().listing_options();
        if let Some(sort) = self.sort {
            options.sort_field = sort.into();
        }
        if self.reverse {
            options.sort_order = SortOrder::Descending;
        }
        options.show_hidden |= self.all;
        options.filter_text = self.filter.clone().unwrap_or_default();

        for entry in hfs_volume::sorted_filtered(&children, &options) {
            if self.long {
                writeln!(ctx.out, "{}", long_line(&entry))?;
            } else {
                writeln!(ctx.out, "{}", display_name(&entry))?;
            }
        }
        Ok(())
    }
}

fn display_name(entry: &Entry) -> String {
    match entry.kind() {
        EntryKind::Directory => format!("{}/", entry.name()),
        _ => entry.name().to_string(),
    }
}

fn long_line(entry: &Entry) -> String {
    let kind = match entry.kind() {
        EntryKind::File => '-',
        EntryKind::Directory => 'd',
        EntryKind::Symlink => 'l',
        EntryKind::Unknown => '?',
    };
    let codes = match entry.finder_info() {
        Some(info) => format!("{}/{}", info.type_code(), info.creator_code()),
        None => format!("{:o}", entry.permissions()),
    };
    let mut line = format!(
        "{kind} {:>10} {:<9} {}",
        format_size(entry.size()),
        codes,
        entry.name()
    );
    if let Ok(Some(target)) = entry.symlink_target() {
        line.push_str(" -> ");
        line.push_str(&target);
    }
    line
}

#[derive(Debug, Parser)]
/// The options for the `hfsview tree` subcommand
pub struct Tree {
    #[clap(flatten)]
    volume: VolumeOpts,

    /// Directory to start from
    #[clap(name = "PATH", default_value = "/")]
    path: String,

    /// Stop descending after this many levels
    #[clap(long)]
    depth: Option<usize>,
}

impl Tree {
    /// Execute `hfsview tree`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let volume = self.volume.open(ctx, false)?;
        let dir = resolve_dir(&volume, &self.path)?;
        writeln!(ctx.out, "{}", self.path)?;
        self.print_level(&volume, &dir, 0, ctx.out)
    }

    fn print_level(
        &self,
        volume: &Volume,
        dir: &Entry,
        level: usize,
        out: &mut dyn Write,
    ) -> Result<()> {
        if self.depth.is_some_and(|max| level >= max) {
            return Ok(());
        }
        let options = ListingOptions::default();
        let children = hfs_volume::sorted_filtered(&volume.list_children(dir)?, &options);
        for child in &children {
            writeln!(out, "{}{}", "  ".repeat(level + 1), display_name(child))?;
            if child.is_directory() {
                self.print_level(volume, child, level + 1, out)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
/// The options for the `hfsview cat` subcommand
pub struct Cat {
    #[clap(flatten)]
    volume: VolumeOpts,

    /// File to print
    #[clap(name = "PATH")]
    path: String,

    /// Read at most this many bytes
    #[clap(long, default_value_t = hfs_volume::DEFAULT_READ_LIMIT)]
    limit: usize,
}

impl Cat {
    /// Execute `hfsview cat`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let volume = self.volume.open(ctx, false)?;
        let entry = resolve(&volume, &self.path)?;
        let data = volume
            .read_data(&entry, self.limit)
            .with_context(|| format!("failed to read `{}`", self.path))?;
        ctx.out.write_all(&data)?;
        Ok(())
    }
}

#[derive(Debug, Parser)]
/// The options for the `hfsview find` subcommand
pub struct Find {
    #[clap(flatten)]
    volume: VolumeOpts,

    /// Text the name must contain, case-insensitive
    #[clap(name = "QUERY")]
    query: String,

    /// Directory to search below
    #[clap(name = "PATH", default_value = "/")]
    path: String,

    /// Stop after this many matches
    #[clap(long, default_value_t = 500)]
    limit: usize,
}

impl Find {
    /// Execute `hfsview find`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let volume = self.volume.open(ctx, false)?;
        let start = resolve_dir(&volume, &self.path)?;
        let needle = self.query.to_lowercase();
        let base = self.path.trim_end_matches('/').to_string();

        let mut queue = VecDeque::from([(start, base)]);
        let mut found = 0;
        while let Some((dir, dir_path)) = queue.pop_front() {
            let children = match volume.list_children(&dir) {
                Ok(children) => children,
                Err(error) => {
                    tracing::warn!(path = %dir_path, %error, "skipping unreadable directory");
                    continue;
                }
            };
            for child in children {
                let child_path = format!("{dir_path}/{}", child.name());
                if child.name().to_lowercase().contains(&needle) {
                    writeln!(ctx.out, "{child_path}")?;
                    found += 1;
                    if found >= self.limit {
                        return Ok(());
                    }
                }
                if child.is_directory() {
                    queue.push_back((child, child_path));
                }
            }
        }
        Ok(())
    }
}
