//! The logic for the hfsview command line tool.

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use crate::commands::{
    Cat, Context, Cp, Dup, Export, Find, Import, Info, Ls, Mkdir, Mv, Prefs, Rename, Rm, Tree,
};

#[derive(Debug, Parser)]
#[clap(
    name = "hfsview",
    about = "Browse and edit classic HFS and HFS+ disk images.",
    version
)]
/// The options for the hfsview Command Line Interface
pub struct HfsView {
    /// Log more; repeat for more detail
    #[clap(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[clap(subcommand)]
    pub cmd: Cmd,
}

#[derive(Debug, Subcommand)]
/// The hfsview subcommands
pub enum Cmd {
    /// Show the volume name, format, access mode and free space
    Info(Info),
    /// List a directory
    Ls(Ls),
    /// Print a directory hierarchy
    Tree(Tree),
    /// Write a file's data fork to stdout
    Cat(Cat),
    /// Find entries whose name contains some text
    Find(Find),
    /// Create a folder
    Mkdir(Mkdir),
    /// Copy host files and folders onto the volume
    Import(Import),
    /// Copy an entry off the volume onto the host
    Export(Export),
    /// Delete an entry
    Rm(Rm),
    /// Move an entry into another folder
    Mv(Mv),
    /// Rename an entry in place
    Rename(Rename),
    /// Copy an entry into another folder
    Cp(Cp),
    /// Make a copy of an entry next to itself
    Dup(Dup),
    /// Show or change stored preferences
    Prefs(Prefs),
}

impl HfsView {
    /// Run the selected subcommand.
    pub fn execute(&self, ctx: &mut Context<'_>) -> Result<()> {
        match &self.cmd {
            Cmd::Info(cmd) => cmd.execute(ctx),
            Cmd::Ls(cmd) => cmd.execute(ctx),
            Cmd::Tree(cmd) => cmd.execute(ctx),
            Cmd::Cat(cmd) => cmd.execute(ctx),
            Cmd::Find(cmd) => cmd.execute(ctx),
            Cmd::Mkdir(cmd) => cmd.execute(ctx),
            Cmd::Import(cmd) => cmd.execute(ctx),
            Cmd::Export(cmd) => cmd.execute(ctx),
            Cmd::Rm(cmd) => cmd.execute(ctx),
            Cmd::Mv(cmd) => cmd.execute(ctx),
            Cmd::Rename(cmd) => cmd.execute(ctx),
            Cmd::Cp(cmd) => cmd.execute(ctx),
            Cmd::Dup(cmd) => cmd.execute(ctx),
            Cmd::Prefs(cmd) => cmd.execute(ctx),
        }
    }
}

/// The main function for the hfsview CLI tool.
#[cfg(feature = "native")]
pub fn hfsview_main() {
    use std::io::Write;

    use hfs_volume::{Backends, MemoryPreferences, PreferenceStore, TomlPreferences};

    let options = HfsView::parse();
    crate::logging::set_up_logging(options.verbose);

    let prefs: Box<dyn PreferenceStore> = match TomlPreferences::at_default_path() {
        Ok(store) => Box::new(store),
        Err(error) => {
            tracing::warn!(%error, "preferences will not be saved");
            Box::new(MemoryPreferences::default())
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let result = {
        let mut ctx = Context {
            backends: Backends::native(),
            prefs,
            out: &mut out,
        };
        options.execute(&mut ctx)
    };
    let _ = out.flush();

    if let Err(e) = result {
        eprintln!("error: {e:?}");
        std::process::exit(1);
    }
}
