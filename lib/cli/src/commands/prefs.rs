use std::io::Write;

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use hfs_volume::SortOrder;

use super::Context;
use super::browse::SortKey;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Parser)]
/// The options for the `hfsview prefs` subcommand
///
/// Without any flags the current preferences are printed.
pub struct Prefs {
    /// Stop asking before writes to raw devices
    #[clap(long)]
    suppress_device_warnings: Option<bool>,

    /// Default sort key for `ls`
    #[clap(long, value_enum)]
    sort: Option<SortKey>,

    /// Default sort direction for `ls`
    #[clap(long, value_enum)]
    order: Option<Direction>,

    /// Show names starting with '.' by default
    #[clap(long)]
    show_hidden: Option<bool>,
}

impl Prefs {
    /// Execute `hfsview prefs`
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        let mut prefs = ctx.prefs.load();
        let mut changed = false;
        if let Some(suppress) = self.suppress_device_warnings {
            prefs.suppress_device_write_warnings = suppress;
            changed = true;
        }
        if let Some(sort) = self.sort {
            prefs.sort_field = sort.into();
            changed = true;
        }
        if let Some(order) = self.order {
            prefs.sort_order = match order {
                Direction::Ascending => SortOrder::Ascending,
                Direction::Descending => SortOrder::Descending,
            };
            changed = true;
        }
        if let Some(show) = self.show_hidden {
            prefs.show_hidden = show;
            changed = true;
        }

        if changed {
            ctx.prefs
                .save(&prefs)
                .context("failed to save preferences")?;
            tracing::info!("preferences updated");
        }
        let rendered = prefs.to_toml().context("failed to render preferences")?;
        ctx.out.write_all(rendered.as_bytes())?;
        Ok(())
    }
}
