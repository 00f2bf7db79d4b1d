//! Kiln - an incremental ES module compiler with content-addressed caching
//! and hot reload.

#![allow(dead_code)]

mod bundle;
mod cli;
mod config;
mod core;
mod engine;
mod graph;
mod hashing;
mod loader;
mod logger;
mod module;
mod reload;
mod resolve;
mod router;
mod server;
mod transpile;
mod utils;
mod watch;

use std::sync::Arc;

use anyhow::Result;
use clap::{ColorChoice, Parser};

use cli::{Cli, Commands};
use config::KilnConfig;

fn main() -> Result<()> {
    // Setup global Ctrl+C handler (before any blocking operations)
    core::setup_shutdown_handler()?;

    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }

    match &cli.command {
        Commands::Build { build_args } => {
            logger::set_verbose(build_args.verbose);
            let config = KilnConfig::load(&cli)?;
            cli::build::build_site(Arc::new(config), build_args.clean)
        }
        Commands::Dev {
            build_args,
            port,
            watch,
        } => {
            logger::set_verbose(build_args.verbose);
            let mut config = KilnConfig::load(&cli)?;
            if let Some(port) = port {
                config.serve.port = *port;
            }
            if let Some(watch) = watch {
                config.serve.watch = *watch;
            }
            cli::dev::run_dev(Arc::new(config), build_args.clean)
        }
        Commands::Clean => {
            let config = KilnConfig::load(&cli)?;
            cli::build::clear_cache(&config.cache_dir())?;
            log!("clean"; "removed {}", config.cache_dir().display());
            Ok(())
        }
    }
}
