//! Loopback control server
//!
//! Accepts connections on 127.0.0.1 and handles each on its own task. A bad
//! frame is logged (and answered, when it carried an id) without closing the
//! connection.

use super::protocol::{self, Command, Request};
use crate::context::DaemonContext;
use crate::error::Result;
use crate::profile::DeviceClass;
use serde_json::Value;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

/// A bound control listener
pub struct ControlServer {
    listener: TcpListener,
    ctx: Arc<DaemonContext>,
}

impl ControlServer {
    /// Bind to the loopback interface; port 0 picks a free port
    pub async fn bind(port: u16, ctx: Arc<DaemonContext>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await?;
        Ok(Self { listener, ctx })
    }

    pub fn port(&self) -> std::io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accept connections until `shutdown` flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut connections = JoinSet::new();
        tracing::info!(
            "Control server listening on {}",
            self.listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".to_string())
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!("({}) Connection opened", peer.port());
                            connections.spawn(handle_connection(stream, peer, Arc::clone(&self.ctx)));
                        }
                        Err(e) => tracing::warn!("Failed to accept control connection: {}", e),
                    }
                }
                // Reap finished connection tasks
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        connections.abort_all();
        tracing::debug!("Control server stopped");
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<DaemonContext>) {
    let port = peer.port();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("({}) Read error: {}", port, e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match protocol::parse_request(&line) {
            Err(e) => {
                tracing::warn!("({}) Dropping frame: {}", port, e);
                None
            }
            Ok(Err(rejected)) => {
                tracing::warn!("({}) Rejected command: {}", port, rejected.error);
                rejected
                    .id
                    .map(|id| protocol::error_response(&id, &rejected.error.to_string()))
            }
            Ok(Ok(Request { id, command })) => {
                tracing::debug!("({}) {}", port, command.name());
                let result = dispatch(&ctx, command).await;
                if let Err(ref e) = result {
                    tracing::warn!("({}) Command failed: {}", port, e);
                }
                id.map(|id| match result {
                    Ok(state) => protocol::ok_response(&id, state.as_ref()),
                    Err(e) => protocol::error_response(&id, &e.to_string()),
                })
            }
        };

        if let Some(response) = response {
            if let Err(e) = write_frame(&mut writer, &response).await {
                tracing::debug!("({}) Failed to send response: {}", port, e);
                break;
            }
        }
    }

    tracing::debug!("({}) Connection closed", port);
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, value: &Value) -> std::io::Result<()> {
    let mut frame = protocol::encode_frame(value);
    frame.push('\n');
    writer.write_all(frame.as_bytes()).await?;
    writer.flush().await
}

/// Apply one command to the daemon
///
/// Returns the state record for commands that report it.
pub async fn dispatch(
    ctx: &Arc<DaemonContext>,
    command: Command,
) -> Result<Option<crate::state::DaemonState>> {
    match command {
        Command::SetVolume { volume } => ctx.set_volume(volume).await?,
        Command::SetProfile { profile } => ctx.set_profile(DeviceClass::Keyboard, &profile).await?,
        Command::SetMouseProfile { profile } => {
            ctx.set_profile(DeviceClass::Mouse, &profile).await?
        }
        Command::SetPitchShift { semitones, profile } => {
            ctx.set_pitch_shift(&semitones, profile.as_deref()).await?
        }
        Command::ShowDaemonWindow => ctx.show_daemon_window()?,
        Command::GetStatus => return Ok(Some(ctx.state())),
        Command::SetEnabled { enabled } => ctx.set_enabled(enabled),
    }
    Ok(None)
}
