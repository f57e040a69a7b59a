//! Command-line interface for leadline
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Voice assistant for real-estate sales calls
#[derive(Parser, Debug)]
#[command(
    name = "leadline",
    version,
    about = "Voice assistant for real-estate sales calls"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and the conversation
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a duration string into whole seconds.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`), and compound (`1m30s`).
fn parse_secs(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(secs);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_secs())
        .map_err(|e| e.to_string())
}

/// Call settings shared by live and simulated calls
#[derive(clap::Args, Debug, Clone, Default)]
pub struct CallArgs {
    /// Caller silence before the reminder (e.g. 12s)
    #[arg(long, value_name = "DURATION", value_parser = parse_secs)]
    pub reminder_after: Option<u64>,

    /// Caller silence that ends the call (e.g. 40s, 1m)
    #[arg(long, value_name = "DURATION", value_parser = parse_secs)]
    pub max_silence: Option<u64>,

    /// Directory for minutes and analytics files
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Take a live call on the microphone and speakers
    Call {
        /// Audio input device
        #[arg(long, value_name = "DEVICE")]
        device: Option<String>,

        /// Audio output device
        #[arg(long, value_name = "DEVICE")]
        output_device: Option<String>,

        /// Whisper model name or path
        #[arg(long, value_name = "MODEL")]
        model: Option<String>,

        #[command(flatten)]
        call: CallArgs,
    },

    /// Run a whole call offline from a recorded caller
    Simulate {
        /// WAV file with the caller's side of the call
        wav: PathBuf,

        /// JSON array of canned reasoning replies (default: live reasoning)
        #[arg(long, value_name = "FILE")]
        script: Option<PathBuf>,

        /// Text file with one canned transcript per utterance (default: Whisper)
        #[arg(long, value_name = "FILE")]
        transcripts: Option<PathBuf>,

        /// Silence appended after the recording (e.g. 45s)
        #[arg(long, value_name = "DURATION", default_value = "0", value_parser = parse_secs)]
        trailing_silence: u64,

        #[command(flatten)]
        call: CallArgs,
    },

    /// List available audio devices
    Devices,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file location
    Path,
}
