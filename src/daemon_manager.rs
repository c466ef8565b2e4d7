//! Daemon lifecycle management
//!
//! Works from the outside of the daemon: reads the state record, decides
//! whether the recorded process is alive and really a keyclack daemon, and
//! starts, reconfigures or stops it.
//!
//! | record | process alive and ours | status  |
//! |--------|------------------------|---------|
//! | none   | -                      | free    |
//! | some   | yes                    | running |
//! | some   | no                     | stale   |

use crate::audio::pitch::{PitchRange, MAX_SEMITONES};
use crate::config::Config;
use crate::control::{Command, ControlClient};
use crate::error::{KeyclackError, ProfileError, Result};
use crate::profile::{DeviceClass, ProfileStore};
use crate::state::{self, DaemonState};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

/// How long `start` waits for a spawned daemon to write its record
const START_TIMEOUT: Duration = Duration::from_secs(3);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `stop` waits for a killed daemon to disappear
const KILL_TIMEOUT: Duration = Duration::from_secs(1);

/// What the state record says about the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Free,
    Running(DaemonState),
    /// Record left behind by a dead process; `None` when it is unreadable
    Stale(Option<DaemonState>),
}

impl DaemonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonStatus::Free => "free",
            DaemonStatus::Running(_) => "running",
            DaemonStatus::Stale(_) => "stale",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, DaemonStatus::Running(_))
    }
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for `start`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOptions {
    pub volume: u8,
    pub profile: Option<String>,
    pub mouse_profile: Option<String>,
    /// `"lo,hi"` semitone range
    pub pitch: Option<String>,
    pub pitch_profile: Option<String>,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            volume: 100,
            profile: None,
            mouse_profile: None,
            pitch: None,
            pitch_profile: None,
        }
    }
}

/// Result of a successful `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new daemon was spawned; `confirmed` once its record appeared
    Spawned { pid: u32, confirmed: bool },
    /// The running daemon took the new settings
    Reconfigured { pid: u32 },
}

/// Inspects and controls the daemon process for one storage root
pub struct DaemonManager {
    root: PathBuf,
    state_path: PathBuf,
    store: ProfileStore,
    executable: Option<PathBuf>,
    config_path: Option<PathBuf>,
}

impl DaemonManager {
    /// Manager for the standard layout under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            state_path: root.join("daemon.json"),
            store: ProfileStore::new(root.join("profiles")),
            root,
            executable: None,
            config_path: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.root_dir(),
            state_path: config.state_file(),
            store: ProfileStore::new(config.profiles_dir()),
            executable: None,
            config_path: None,
        }
    }

    /// Forward `--config` to spawned daemons
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Spawn this binary instead of the current executable
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// The state record, if one is present and readable
    pub fn record(&self) -> Option<DaemonState> {
        match state::read_state(&self.state_path) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!("Unreadable state record {:?}: {}", self.state_path, e);
                None
            }
        }
    }

    pub fn status(&self) -> DaemonStatus {
        let record = match state::read_state(&self.state_path) {
            Ok(None) => return DaemonStatus::Free,
            Ok(Some(record)) => record,
            Err(e) => {
                tracing::debug!("Unreadable state record {:?}: {}", self.state_path, e);
                return DaemonStatus::Stale(None);
            }
        };

        if process_alive(record.pid) && is_keyclack_process(record.pid) {
            DaemonStatus::Running(record)
        } else {
            DaemonStatus::Stale(Some(record))
        }
    }

    /// Stop the daemon
    ///
    /// Returns false when there was nothing to stop.
    pub fn stop(&self) -> Result<bool> {
        match self.status() {
            DaemonStatus::Free => Ok(false),
            DaemonStatus::Stale(_) => {
                tracing::info!("Removing stale state record {:?}", self.state_path);
                state::remove_state(&self.state_path)?;
                Ok(true)
            }
            DaemonStatus::Running(record) => {
                if record.pid == std::process::id() {
                    // The daemon's own SIGTERM handler shuts down gracefully
                    tracing::info!("Stopping this daemon");
                    kill(Pid::this(), Signal::SIGTERM)
                        .map_err(|e| KeyclackError::Daemon(format!("SIGTERM failed: {}", e)))?;
                    return Ok(true);
                }

                tracing::info!("Killing daemon (pid {})", record.pid);
                match kill(to_pid(record.pid)?, Signal::SIGKILL) {
                    Ok(()) | Err(Errno::ESRCH) => {}
                    Err(e) => {
                        return Err(KeyclackError::Daemon(format!(
                            "Failed to kill pid {}: {}",
                            record.pid, e
                        )))
                    }
                }
                wait_for_exit(record.pid, KILL_TIMEOUT);
                state::remove_state(&self.state_path)?;
                Ok(true)
            }
        }
    }

    /// Start the daemon, or reconfigure it if it is already running
    pub async fn start(&self, options: &StartOptions) -> Result<StartOutcome> {
        self.validate(options)?;

        match self.status() {
            DaemonStatus::Running(record) => {
                self.reconfigure(&record, options).await?;
                Ok(StartOutcome::Reconfigured { pid: record.pid })
            }
            DaemonStatus::Stale(_) => {
                tracing::debug!("Cleaning up stale state record");
                state::remove_state(&self.state_path)?;
                self.spawn(options).await
            }
            DaemonStatus::Free => self.spawn(options).await,
        }
    }

    /// Reject options the daemon would fail on before touching anything
    fn validate(&self, options: &StartOptions) -> Result<()> {
        if options.volume > 100 {
            return Err(KeyclackError::Config(format!(
                "volume must be between 0 and 100, got {}",
                options.volume
            )));
        }

        let requested = [
            (DeviceClass::Keyboard, options.profile.as_deref()),
            (DeviceClass::Mouse, options.mouse_profile.as_deref()),
        ];
        for (device, name) in requested {
            let Some(name) = name.filter(|n| !n.is_empty()) else {
                continue;
            };
            let profile = self.store.load(name)?;
            if profile.device() != device {
                return Err(ProfileError::invalid(
                    name,
                    format!(
                        "It is a {} profile and cannot be used for the {}.",
                        profile.device(),
                        device
                    ),
                )
                .into());
            }
        }

        if let Some(pitch) = options.pitch.as_deref().filter(|p| !p.trim().is_empty()) {
            if PitchRange::parse(pitch).is_none() {
                return Err(KeyclackError::Config(format!(
                    "pitch must look like \"lo,hi\" with both between -{max} and {max}, got \"{}\"",
                    pitch,
                    max = MAX_SEMITONES
                )));
            }
        }
        Ok(())
    }

    async fn reconfigure(&self, record: &DaemonState, options: &StartOptions) -> Result<()> {
        tracing::info!(
            "Daemon already running (pid {}), reconfiguring via port {}",
            record.pid,
            record.api_port
        );
        let mut client = ControlClient::connect(record.api_port).await?;

        client
            .request(&Command::SetVolume {
                volume: u32::from(options.volume),
            })
            .await?;
        if let Some(ref profile) = options.profile {
            client
                .request(&Command::SetProfile {
                    profile: profile.clone(),
                })
                .await?;
        }
        if let Some(ref profile) = options.mouse_profile {
            client
                .request(&Command::SetMouseProfile {
                    profile: profile.clone(),
                })
                .await?;
        }
        if let Some(ref semitones) = options.pitch {
            client
                .request(&Command::SetPitchShift {
                    semitones: semitones.clone(),
                    profile: options.pitch_profile.clone(),
                })
                .await?;
        }
        Ok(())
    }

    fn daemon_command(&self, options: &StartOptions) -> Result<std::process::Command> {
        let executable = match self.executable {
            Some(ref path) => path.clone(),
            None => std::env::current_exe()?,
        };

        let mut cmd = std::process::Command::new(executable);
        if let Some(ref config) = self.config_path {
            cmd.arg("--config").arg(config);
        }
        cmd.arg("daemon").arg(format!("--volume={}", options.volume));
        // `=` keeps values like "-2,2" from parsing as flags
        if let Some(ref profile) = options.profile {
            cmd.arg(format!("--profile={}", profile));
        }
        if let Some(ref profile) = options.mouse_profile {
            cmd.arg(format!("--mouse-profile={}", profile));
        }
        if let Some(ref pitch) = options.pitch {
            cmd.arg(format!("--pitch={}", pitch));
        }
        if let Some(ref profile) = options.pitch_profile {
            cmd.arg(format!("--pitch-profile={}", profile));
        }

        cmd.env("KEYCLACK_ROOT", &self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        Ok(cmd)
    }

    async fn spawn(&self, options: &StartOptions) -> Result<StartOutcome> {
        let mut child = self.daemon_command(options)?.spawn()?;
        let pid = child.id();
        tracing::info!("Spawned daemon (pid {})", pid);

        let deadline = Instant::now() + START_TIMEOUT;
        loop {
            if let DaemonStatus::Running(record) = self.status() {
                if record.pid == pid {
                    return Ok(StartOutcome::Spawned {
                        pid,
                        confirmed: true,
                    });
                }
            }

            if let Some(status) = child.try_wait()? {
                return Err(KeyclackError::Daemon(format!(
                    "daemon exited during startup ({})",
                    status
                )));
            }

            if Instant::now() >= deadline {
                tracing::warn!(
                    "Daemon (pid {}) has not written its state record after {:?}",
                    pid,
                    START_TIMEOUT
                );
                return Ok(StartOutcome::Spawned {
                    pid,
                    confirmed: false,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn to_pid(pid: u32) -> Result<Pid> {
    i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| KeyclackError::Daemon(format!("invalid pid {}", pid)))
}

/// Signal 0 probes for existence; EPERM still means the process exists
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = to_pid(pid) else {
        return false;
    };
    if pid.as_raw() <= 0 {
        return false;
    }
    match kill(pid, None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn wait_for_exit(pid: u32, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while process_alive(pid) && is_keyclack_process(pid) {
        if Instant::now() >= deadline {
            tracing::warn!("pid {} still present after SIGKILL", pid);
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Compare the process name with our own
///
/// A pid reused by an unrelated program makes the record stale.
#[cfg(target_os = "linux")]
fn is_keyclack_process(pid: u32) -> bool {
    let read_comm = |path: &str| {
        std::fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
    };
    match (
        read_comm(&format!("/proc/{}/comm", pid)),
        read_comm("/proc/self/comm"),
    ) {
        (Some(theirs), Some(ours)) => theirs == ours,
        // Without /proc we only know the process is alive
        _ => true,
    }
}

#[cfg(not(target_os = "linux"))]
fn is_keyclack_process(_pid: u32) -> bool {
    true
}
