// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loadstar - command line front end for the loadstar module loader

mod repl;

use anyhow::Context;
use clap::{Parser, Subcommand};
use loadstar_loader::{ConfigOptions, FsBackend, ModuleLoader};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// loadstar - resolve and load AMD modules from disk
#[derive(Parser, Debug)]
#[command(name = "loadstar")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Loader configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Base path prepended to ids that are not relative or absolute
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Directory module URLs are read from
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Extension appended to ids without one
    #[arg(long, global = true)]
    extension: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the canonical id and URL of a module id
    Resolve {
        /// Module id
        id: String,

        /// Id of the module the lookup is relative to
        #[arg(long)]
        relative_to: Option<String>,
    },

    /// Load modules and print their exports as JSON
    Load {
        /// Module ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Start the interactive REPL (default)
    Repl,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "loadstar=debug,loadstar_loader=debug"
    } else {
        "loadstar=warn,loadstar_loader=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    let loader = build_loader(&cli)?;

    match cli.command.unwrap_or(Commands::Repl) {
        Commands::Resolve { id, relative_to } => {
            let resolved = loader.resolve(&id, relative_to.as_deref())?;
            println!("{}", resolved.canonical());
            println!("{}", loader.url_for(resolved.canonical()).dimmed());
            Ok(())
        }
        Commands::Load { ids } => {
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            let exports = runtime.block_on(loader.load(&ids))?;
            for (id, value) in ids.iter().zip(&exports) {
                let json = serde_json::to_string_pretty(&value.to_json())?;
                if ids.len() > 1 {
                    println!("{} {}", "//".dimmed(), id.cyan());
                }
                println!("{}", json);
            }
            Ok(())
        }
        Commands::Repl => {
            let mut repl = repl::Repl::new(loader, runtime)?;
            repl.run()?;
            Ok(())
        }
    }
}

/// Build a filesystem-backed loader from the command line options
fn build_loader(cli: &Cli) -> anyhow::Result<ModuleLoader> {
    let mut options = match &cli.config {
        Some(path) => ConfigOptions::from_file(path)?,
        None => ConfigOptions::new(),
    };
    if let Some(base_url) = &cli.base_url {
        options = options.base_url(base_url.clone());
    }
    if let Some(ext) = &cli.extension {
        options = options.default_extension(ext.clone());
    }

    debug!("serving modules from {}", cli.root.display());
    let backend = Rc::new(FsBackend::new(&cli.root));
    ModuleLoader::with_config(backend, options)
        .with_context(|| format!("invalid loader configuration for {}", cli.root.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_repl() {
        let cli = Cli::parse_from(["loadstar"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.root, PathBuf::from("."));
    }

    #[test]
    fn test_cli_parses_load() {
        let cli = Cli::parse_from(["loadstar", "--base-url", "lib", "load", "a.json", "b.json"]);
        assert_eq!(cli.base_url.as_deref(), Some("lib"));
        match cli.command {
            Some(Commands::Load { ids }) => assert_eq!(ids, vec!["a.json", "b.json"]),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_build_loader_applies_overrides() {
        let cli = Cli::parse_from(["loadstar", "--base-url", "lib", "--extension", ".json", "repl"]);
        let loader = build_loader(&cli).unwrap();
        assert_eq!(loader.base_url(), "lib");
        assert_eq!(loader.to_url("data").unwrap(), "lib/data.json");
    }
}
