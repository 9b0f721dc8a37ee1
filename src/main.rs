// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Command-line interface for cursor-export.
//!
//! This binary provides the `cursor-export export` command, which converts a
//! chat history dump or a workspace storage directory into Markdown, HTML and
//! JSON summaries.

use cursor_export::{driver, renderer::RenderOptions};
use lexopt::prelude::*;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Cli {
    input: PathBuf,
    output: PathBuf,
    show_timestamps: bool,
    heading_offset: u8,
    quiet: bool,
    verbose: bool,
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to parse arguments: {source}"))]
    ParseArgs { source: lexopt::Error },

    #[snafu(display("{source}"))]
    Export { source: driver::DriverError },

    #[snafu(display("no chat history found in {}", path.display()))]
    NoWorkspaces { path: PathBuf },

    #[snafu(display("all {count} workspaces failed to export"))]
    AllWorkspacesFailed { count: usize },
}

fn print_help() {
    println!(
        "\
{name} {version}
Export Cursor chat history to Markdown, HTML and JSON

Usage: {name} export [OPTIONS] <INPUT> <OUTPUT>

Arguments:
  <INPUT>   Chat history JSON file or workspace storage directory
  <OUTPUT>  Output directory (html/, markdown/ and json/ are created inside)

Options:
      --heading-offset <N>  Shift heading levels by N (0-5, default: 0)
      --show-timestamps     Include per-message timestamps (default: off)
      --hide-timestamps     Hide per-message timestamps
  -q, --quiet               Only report warnings and errors
  -v, --verbose             Report skipped directories and ignored fields
  -h, --help                Print help
  -V, --version             Print version",
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
    );
}

fn parse_args() -> Result<Cli, lexopt::Error> {
    // Show help if no arguments provided
    if std::env::args().len() == 1 {
        print_help();
        std::process::exit(0);
    }

    let mut command_seen = false;
    let mut paths = Vec::new();
    let mut show_timestamps = false;
    let mut heading_offset: u8 = 0;
    let mut quiet = false;
    let mut verbose = false;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            // Show/hide flags - last one wins
            Long("show-timestamps") => show_timestamps = true,
            Long("hide-timestamps") => show_timestamps = false,
            Long("heading-offset") => {
                let val: u8 = parser
                    .value()?
                    .parse()
                    .map_err(|_| "heading-offset must be a number 0-5")?;
                if val > 5 {
                    return Err("heading-offset must be 0-5".into());
                }
                heading_offset = val;
            }
            Short('q') | Long("quiet") => quiet = true,
            Short('v') | Long("verbose") => verbose = true,
            Short('h') | Long("help") => {
                print_help();
                std::process::exit(0);
            }
            Short('V') | Long("version") => {
                println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            Value(val) if !command_seen => {
                let command = val.string()?;
                if command != "export" {
                    return Err(format!("unknown command '{command}'").into());
                }
                command_seen = true;
            }
            Value(val) => paths.push(PathBuf::from(val)),
            _ => return Err(arg.unexpected()),
        }
    }

    if !command_seen {
        return Err("missing command: export".into());
    }
    let mut paths = paths.into_iter();
    let (Some(input), Some(output), None) = (paths.next(), paths.next(), paths.next()) else {
        return Err("expected exactly two paths: <INPUT> <OUTPUT>".into());
    };

    Ok(Cli {
        input,
        output,
        show_timestamps,
        heading_offset,
        quiet,
        verbose,
    })
}

fn setup_logging(cli: &Cli) {
    let default = if cli.quiet {
        "warn"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Error> {
    let cli = parse_args().context(ParseArgsSnafu)?;
    setup_logging(&cli);

    let opts = RenderOptions {
        workspace: None,
        show_timestamps: cli.show_timestamps,
        heading_offset: cli.heading_offset,
    };
    let report = driver::export_all(&cli.input, &cli.output, &opts).context(ExportSnafu)?;

    ensure!(
        report.succeeded() || !report.failures.is_empty(),
        NoWorkspacesSnafu { path: &cli.input }
    );
    ensure!(
        report.succeeded(),
        AllWorkspacesFailedSnafu {
            count: report.failures.len()
        }
    );

    info!(
        workspaces = report.summaries.len(),
        failed_workspaces = report.failures.len(),
        conversations = report.exported_conversations(),
        failed_conversations = report.failed_conversations(),
        "export complete, files saved to {}",
        cli.output.display()
    );
    Ok(())
}
