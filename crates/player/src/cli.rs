use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "player", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// TOML config file with `[session]` and `[player]` tables
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Engine backend (overrides the config file)
    #[arg(long, value_enum, global = true)]
    pub engine: Option<EngineKind>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play media files in order, each on a fresh session and surface
    Play {
        /// Media files to play
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Switch to the next file after this many seconds
        #[arg(long)]
        switch_after: Option<f64>,

        /// Volume percent (0-100)
        #[arg(long)]
        volume: Option<u8>,
    },

    /// Print parsed media info as JSON
    Probe {
        /// Media file to inspect
        path: PathBuf,
    },
}

/// Native engine used to run sessions.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Headless Symphonia-backed engine with a wall-clock player
    #[default]
    Probe,
    /// Scriptable in-process engine
    Sim,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_accepts_multiple_paths_and_global_flags() {
        let args = Args::try_parse_from([
            "player",
            "play",
            "a.flac",
            "b.mkv",
            "--switch-after",
            "2.5",
            "--engine",
            "sim",
        ])
        .unwrap();
        assert_eq!(args.engine, Some(EngineKind::Sim));
        match args.cmd {
            Command::Play {
                paths,
                switch_after,
                volume,
            } => {
                assert_eq!(paths, vec![PathBuf::from("a.flac"), PathBuf::from("b.mkv")]);
                assert_eq!(switch_after, Some(2.5));
                assert_eq!(volume, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn play_requires_a_path() {
        assert!(Args::try_parse_from(["player", "play"]).is_err());
    }

    #[test]
    fn probe_takes_one_path() {
        let args = Args::try_parse_from(["player", "--config", "p.toml", "probe", "x.wav"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("p.toml")));
        assert!(matches!(args.cmd, Command::Probe { path } if path == PathBuf::from("x.wav")));
    }
}
