mod aggregate;
mod ast;
mod cli;
mod commands;
mod constraints;
mod engine;
mod errors;
mod lang;
mod matcher;
mod patterns;
mod rules;
mod utils;
mod walk;

use crate::errors::{WiretapError, WiretapResult};
use crate::utils::Config;
use clap::Parser;
use cli::Cli;
use console::style;
use directories::ProjectDirs;
use std::fs;
use std::time::Instant;
use tracing_subscriber::fmt::time;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

fn init_tracing() {
    let fmt_layer = fmt::layer()
        .pretty()
        .with_writer(std::io::stderr)
        .with_thread_ids(true)
        .with_timer(time::UtcTime::rfc_3339());

    Registry::default()
        .with(EnvFilter::from_default_env())
        .with(fmt_layer)
        .init();
}

fn main() -> WiretapResult<()> {
    let now = Instant::now();
    init_tracing();

    tracing::debug!("CLI starting up");
    let cli = Cli::parse();

    let proj_dirs =
        ProjectDirs::from("dev", "wiretap", "wiretap").ok_or("Unable to determine project directories")?;

    let config_dir = proj_dirs.config_dir();
    fs::create_dir_all(config_dir)?;

    let mut config = Config::load(config_dir)?;

    let mut pool = rayon::ThreadPoolBuilder::new().stack_size(config.performance.rayon_thread_stack_size);
    if let Some(n) = config.performance.worker_threads {
        pool = pool.num_threads(n);
    }
    pool.build_global()
        .map_err(|e| WiretapError::Other(format!("cannot start worker pool: {e}")))?;

    commands::handle_command(cli.command, &mut config)?;

    if !config.output.quiet {
        eprintln!(
            "{} in {:.3}s.",
            style("Finished").green().bold(),
            now.elapsed().as_secs_f32()
        );
    }
    Ok(())
}
