//! Keyclack: profile-driven keyboard and mouse sounds
//!
//! This library provides the core functionality for:
//! - Loading and validating sound profiles (`profile.yaml` plus assets)
//! - Extracting in-memory clips from wav, mp3 and video assets
//! - Capturing key and button events via evdev (Wayland) or rdev (X11, macOS)
//! - Resolving events to clips and playing them on a worker pool via rodio
//! - Managing a single background daemon and reconfiguring it over a
//!   loopback control channel
//!
//! # Architecture
//!
//! ```text
//!          ┌──────────────┐   spawn / stop    ┌─────────────────────────────┐
//!          │DaemonManager │ ────────────────▶ │           Daemon            │
//!          │  (CLI side)  │ ◀── daemon.json ──│  flock(daemon.lock) first   │
//!          └──────────────┘                   └─────────────────────────────┘
//!                 │ control frames                          │
//!                 ▼ base64(json)\n                          ▼
//!          ┌──────────────┐   mutate    ┌──────────────────────────────────┐
//!          │ControlServer │ ──────────▶ │          DaemonContext           │
//!          │ (127.0.0.1)  │             │ settings, resolvers, listeners   │
//!          └──────────────┘             └──────────────────────────────────┘
//!                                              │                  ▲
//!                                              ▼                  │ InputEvent
//!          ┌──────────────┐  Clip     ┌──────────────┐    ┌──────────────┐
//!          │   Playback   │ ◀──────── │   Resolver   │    │ InputSource  │
//!          │   workers    │           │ (per device) │    │ evdev / rdev │
//!          └──────────────┘           └──────────────┘    └──────────────┘
//!                 │
//!                 ▼
//!          ┌──────────────┐
//!          │ AudioOutput  │
//!          │   (rodio)    │
//!          └──────────────┘
//! ```

pub mod audio;
pub mod cli;
pub mod config;
pub mod context;
pub mod control;
pub mod daemon;
pub mod daemon_manager;
pub mod error;
pub mod input;
pub mod lock;
pub mod playback;
pub mod profile;
pub mod resolver;
pub mod state;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use context::DaemonContext;
pub use daemon::Daemon;
pub use daemon_manager::{DaemonManager, DaemonStatus};
pub use error::{KeyclackError, Result};
