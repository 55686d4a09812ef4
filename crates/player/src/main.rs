//! `player`: command-line host for the playback session layer.
//!
//! ## Commands
//! - `play`: load each file in turn on a fresh session and surface, optionally
//!   switching on a timer, and print every playback event as a JSON line.
//! - `probe`: print the media info the headless engine reads from a file.

mod cli;
mod config;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,playback_session=info,player=info")
        }))
        .with_writer(std::io::stderr)
        .init();

    let file = match &args.config {
        Some(path) => config::PlayerFileConfig::load(path)?,
        None => config::PlayerFileConfig::default(),
    };

    match args.cmd {
        cli::Command::Play {
            paths,
            switch_after,
            volume,
        } => {
            let play = config::resolve_play(file, args.engine, paths, switch_after, volume)?;
            runtime::run_play(play)
        }
        cli::Command::Probe { path } => runtime::run_probe(&path),
    }
}
