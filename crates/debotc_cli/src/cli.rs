use std::path::PathBuf;

use clap::{
    Parser, Subcommand,
    builder::{
        Styles,
        styling::{AnsiColor, Effects},
    },
    crate_description, crate_name, crate_version,
};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = crate_name!(),
    version = crate_version!(),
    about = crate_description!(),
    args_conflicts_with_subcommands = true,
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<TopLevel>,

    /// Print a raw disassembly listing instead of decompiled source
    #[arg(long)]
    pub disasm: bool,

    /// Path to the compiled bot script object file
    pub input: Option<PathBuf>,

    /// Output file (stdout when omitted)
    pub output: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}
