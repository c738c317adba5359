use clap::{CommandFactory, Parser};

use crate::cli::{Cli, TopLevel};

mod cli;

fn main() {
    let cli = Cli::parse();

    if let Some(TopLevel::Completion { shell }) = cli.command {
        let mut cmd = Cli::command();
        let bin_name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, bin_name, &mut std::io::stdout());
        return;
    }

    let Some(input) = cli.input else {
        Cli::command().print_help().unwrap();
        return;
    };

    let mode = if cli.disasm {
        debotc_lib::DecompileMode::Disasm
    } else {
        debotc_lib::DecompileMode::Script
    };
    let bytes = match std::fs::read(&input) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("failed to read {input:?}: {e}");
            std::process::exit(1);
        }
    };
    let out = match debotc_lib::decompile_with_mode(&bytes, mode) {
        Ok(out) => out,
        Err(e) => {
            eprintln!("decompile error: {e}");
            std::process::exit(1);
        }
    };
    match cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, out) {
                eprintln!("failed to write {path:?}: {e}");
                std::process::exit(1);
            }
        }
        None => {
            print!("{out}");
        }
    }
}
