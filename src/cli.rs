// Command-line interface definitions for keyclack
//
// This module is separate so it can be used by both the binary (main.rs)
// and build.rs for generating man pages.

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "keyclack")]
#[command(author, version, about = "Profile-driven keyboard and mouse sounds")]
#[command(long_about = "
Keyclack plays a sound for every key press and mouse click, using sound
profiles: a profile.yaml plus audio assets (wav, mp3, or a video to cut
clips from).

SETUP:
  1. On Wayland, add yourself to the input group: sudo usermod -aG input $USER
  2. Log out and back in
  3. Install ffmpeg if your profiles use mp3 or video assets
  4. Add a profile: keyclack add-profile ./my-profile
  5. Run: keyclack start --profile my-profile

USAGE:
  keyclack start reconfigures an already running daemon in place.
  keyclack stop stops it, keyclack status shows what it is doing.
")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Settings shared by `daemon` and `start`
#[derive(Args, Debug, Clone, Default)]
pub struct SoundArgs {
    /// Volume from 0 to 100 (defaults to the configured volume)
    #[arg(long, value_name = "PERCENT", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: Option<u8>,

    /// Keyboard sound profile; an empty name disables keyboard sounds
    #[arg(short, long, value_name = "NAME")]
    pub profile: Option<String>,

    /// Mouse sound profile; an empty name disables mouse sounds
    #[arg(short, long, value_name = "NAME")]
    pub mouse_profile: Option<String>,

    /// Random pitch shift range in semitones, e.g. "-2,2"
    #[arg(long, value_name = "LO,HI", allow_hyphen_values = true)]
    pub pitch: Option<String>,

    /// Only pitch-shift sounds from this profile
    #[arg(long, value_name = "NAME")]
    pub pitch_profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon in the foreground
    Daemon {
        #[command(flatten)]
        sound: SoundArgs,
    },

    /// Start the daemon in the background, or reconfigure the running one
    Start {
        #[command(flatten)]
        sound: SoundArgs,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status {
        /// Include volume, profiles and pitch shift
        #[arg(long)]
        full: bool,

        /// Output format: "text" (default) or "json"
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// List installed sound profiles
    ListProfiles,

    /// Install a profile from a directory or .zip archive containing profile.yaml
    AddProfile {
        /// Profile directory or .zip archive
        path: std::path::PathBuf,
    },

    /// Export an installed profile to a .zip archive
    ExportProfile {
        /// Profile name
        name: String,

        /// Archive to write (defaults to <name>.zip)
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
    },

    /// Remove an installed profile
    RemoveProfile {
        /// Profile name
        name: String,
    },
}
