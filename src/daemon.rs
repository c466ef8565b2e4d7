//! Daemon module - main event loop orchestration
//!
//! Takes the instance lock, opens the control server, loads the configured
//! profiles, starts capture and then waits for a shutdown request. Shutdown
//! stops capture and the control server, drains playback, releases the lock
//! and removes the state record if it is still ours.

use crate::audio::extract::ClipExtractor;
use crate::audio::output::{AudioOutput, NullOutput, RodioOutput};
use crate::config::Config;
use crate::context::{ContextParts, DaemonContext, DaemonWindow, SourceFactory};
use crate::control::ControlServer;
use crate::error::{KeyclackError, LockError, Result};
use crate::input;
use crate::lock::InstanceLock;
use crate::profile::{DeviceClass, ProfileStore};
use crate::state::StateFile;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

/// How long the control server gets to wind down
const SERVER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Startup settings, normally passed on the `daemon` command line
#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    pub volume: Option<u8>,
    pub profile: Option<String>,
    pub mouse_profile: Option<String>,
    /// `"lo,hi"` semitone range
    pub pitch: Option<String>,
    /// Restrict pitch shifting to this profile
    pub pitch_profile: Option<String>,
}

/// Handle that asks a running [`Daemon`] to shut down
#[derive(Clone)]
pub struct ShutdownTrigger(Arc<watch::Sender<bool>>);

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Main daemon that orchestrates all components
pub struct Daemon {
    config: Config,
    options: DaemonOptions,
    output: Option<Arc<dyn AudioOutput>>,
    source_factory: Option<SourceFactory>,
    window: Option<Arc<dyn DaemonWindow>>,
    stop_tx: Arc<watch::Sender<bool>>,
}

impl Daemon {
    /// Create a new daemon with the given configuration
    pub fn new(config: Config, options: DaemonOptions) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            options,
            output: None,
            source_factory: None,
            window: None,
            stop_tx: Arc::new(stop_tx),
        }
    }

    /// Play through `output` instead of the default audio device
    pub fn with_output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.output = Some(output);
        self
    }

    /// Capture through `factory` instead of the configured backend
    pub fn with_source_factory(mut self, factory: SourceFactory) -> Self {
        self.source_factory = Some(factory);
        self
    }

    pub fn with_window(mut self, window: Arc<dyn DaemonWindow>) -> Self {
        self.window = Some(window);
        self
    }

    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger(Arc::clone(&self.stop_tx))
    }

    fn open_output(&mut self) -> Arc<dyn AudioOutput> {
        if let Some(output) = self.output.take() {
            return output;
        }
        match RodioOutput::new() {
            Ok(output) => Arc::new(output),
            Err(e) => {
                tracing::warn!("Audio output unavailable, sounds are muted: {}", e);
                Arc::new(NullOutput)
            }
        }
    }

    /// Run the daemon main loop
    pub async fn run(mut self) -> Result<()> {
        // Nothing else may happen before the lock is ours
        let lock = match InstanceLock::acquire(&self.config.lock_file()) {
            Ok(lock) => lock,
            Err(LockError::AlreadyHeld) => {
                tracing::info!("Another keyclack daemon is already running, exiting");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!("Starting keyclack daemon (pid {})", std::process::id());

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| KeyclackError::Config(format!("Failed to set up SIGTERM handler: {}", e)))?;

        self.config.ensure_directories().map_err(|e| {
            KeyclackError::Config(format!("Failed to create directories: {}", e))
        })?;

        let backend = self.config.input.backend;
        let source_factory = self.source_factory.take().unwrap_or_else(|| {
            Arc::new(move |device: DeviceClass| input::create_source(backend, device))
        });

        let output = self.open_output();
        let ctx = DaemonContext::new(ContextParts {
            pid: std::process::id(),
            store: ProfileStore::new(self.config.profiles_dir()),
            extractor: ClipExtractor::new(),
            state_file: StateFile::new(self.config.state_file()),
            output,
            workers: self.config.playback.workers,
            volume: self
                .options
                .volume
                .unwrap_or(self.config.defaults.volume),
            source_factory,
            window: self.window.take(),
        })?;

        let server = ControlServer::bind(self.config.control.port, Arc::clone(&ctx)).await?;
        ctx.set_api_port(server.port()?);
        let server_task = tokio::spawn(server.run(ctx.shutdown_requested()));

        tracing::info!("State file: {:?}", ctx.state_file().path());
        ctx.persist();

        let startup = self.apply_options(&ctx).await;

        if let Err(ref e) = startup {
            tracing::error!("Startup failed: {}", e);
        } else {
            tracing::info!("Ready (control port {})", ctx.api_port());
            let mut stop_rx = self.stop_tx.subscribe();

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received SIGINT, shutting down...");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, shutting down...");
                }
                _ = stop_rx.wait_for(|stop| *stop) => {
                    tracing::info!("Shutdown requested, shutting down...");
                }
            }
        }

        // Cleanup
        ctx.request_shutdown();
        if tokio::time::timeout(SERVER_JOIN_TIMEOUT, server_task).await.is_err() {
            tracing::warn!("Control server did not stop in time");
        }
        ctx.shutdown().await;
        lock.release();

        match ctx.state_file().remove_if_owned(ctx.pid()) {
            Ok(true) => tracing::debug!("Removed state file"),
            Ok(false) => tracing::debug!("State file belongs to another process, leaving it"),
            Err(e) => tracing::warn!("Failed to remove state file: {}", e),
        }

        tracing::info!("Daemon stopped");
        startup
    }

    /// Apply startup options; a profile that fails to load aborts startup
    async fn apply_options(&self, ctx: &Arc<DaemonContext>) -> Result<()> {
        if let Some(ref pitch) = self.options.pitch {
            ctx.set_pitch_shift(pitch, self.options.pitch_profile.as_deref())
                .await?;
        }

        let profile = self
            .options
            .profile
            .clone()
            .or_else(|| self.config.defaults.profile.clone());
        if let Some(profile) = profile.filter(|p| !p.is_empty()) {
            ctx.set_profile(DeviceClass::Keyboard, &profile).await?;
        }

        let mouse_profile = self
            .options
            .mouse_profile
            .clone()
            .or_else(|| self.config.defaults.mouse_profile.clone());
        if let Some(profile) = mouse_profile.filter(|p| !p.is_empty()) {
            ctx.set_profile(DeviceClass::Mouse, &profile).await?;
        }

        Ok(())
    }
}
