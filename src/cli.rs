//! Command-line interface for pulsecast
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Narration delivery engine
#[derive(Parser, Debug)]
#[command(
    name = "pulsecast",
    version,
    about = "Multiplexed narration streams: text, speech and ambience"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a delay such as `20ms`, `1s`, or a bare number of milliseconds.
fn parse_delay(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify a narration text file as clean or garbage (exit status 1 for garbage)
    Classify {
        /// Text file to classify ("-" for stdin)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Player name that counts as story content (enables the story check)
        #[arg(long = "player", value_name = "NAME")]
        players: Vec<String>,

        /// Print the verdict as JSON
        #[arg(long)]
        json: bool,
    },

    /// Replay a text file through the narration engine with in-process collaborators
    Narrate {
        /// Text file replayed as the model's output ("-" for stdin)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Disable speech audio frames
        #[arg(long)]
        no_audio: bool,

        /// Characters per replayed token
        #[arg(long, value_name = "N", default_value_t = crate::defaults::SCRIPT_TOKEN_CHARS)]
        token_chars: usize,

        /// Pause between tokens (e.g. 20ms, 1s)
        #[arg(long, value_name = "DURATION", default_value = "0", value_parser = parse_delay)]
        token_delay: Duration,

        /// Collect, validate and retry, then print only the accepted text
        #[arg(long)]
        blocking: bool,
    },

    /// Consume a multiplexed stream (e.g. piped from `narrate`) and report the turn
    Listen {
        /// Stream to read ("-" for stdin)
        #[arg(value_name = "FILE", default_value = "-")]
        file: PathBuf,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file plus environment overrides)
    Show,
    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_classify_with_players() {
        let cli = Cli::try_parse_from([
            "pulsecast", "classify", "beat.txt", "--player", "Isolde", "--player", "Bram",
        ])
        .unwrap();
        match cli.command {
            Commands::Classify { file, players, json } => {
                assert_eq!(file, PathBuf::from("beat.txt"));
                assert_eq!(players, vec!["Isolde", "Bram"]);
                assert!(!json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_narrate_defaults() {
        let cli = Cli::try_parse_from(["pulsecast", "narrate", "story.txt"]).unwrap();
        match cli.command {
            Commands::Narrate {
                no_audio,
                token_chars,
                token_delay,
                blocking,
                ..
            } => {
                assert!(!no_audio);
                assert_eq!(token_chars, crate::defaults::SCRIPT_TOKEN_CHARS);
                assert_eq!(token_delay, Duration::ZERO);
                assert!(!blocking);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "pulsecast", "narrate", "s.txt", "--token-delay", "20ms", "-vv", "--config", "x.toml",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        match cli.command {
            Commands::Narrate { token_delay, .. } => {
                assert_eq!(token_delay, Duration::from_millis(20))
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_delay() {
        assert_eq!(parse_delay("15").unwrap(), Duration::from_millis(15));
        assert_eq!(parse_delay("1s").unwrap(), Duration::from_secs(1));
        assert!(parse_delay("soon").is_err());
    }

    #[test]
    fn test_listen_defaults_to_stdin() {
        let cli = Cli::try_parse_from(["pulsecast", "listen"]).unwrap();
        match cli.command {
            Commands::Listen { file } => assert_eq!(file, PathBuf::from("-")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_config_subcommands() {
        let cli = Cli::try_parse_from(["pulsecast", "config", "path"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Path
            }
        ));
    }
}
