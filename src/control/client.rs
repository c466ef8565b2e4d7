//! Control client
//!
//! Used by `keyclack start` to reconfigure a running daemon in place.

use super::protocol::{self, Command};
use crate::error::ProtocolError;
use serde_json::Value;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Upper bound for one request; profile priming may transcode assets
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// A connection to a daemon's control server
pub struct ControlClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

impl ControlClient {
    /// Connect to the daemon on the loopback interface
    pub async fn connect(port: u16) -> Result<Self, ProtocolError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("timed out connecting to {}", addr),
                ))
            })??;

        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
            next_id: 1,
        })
    }

    async fn write_line(&mut self, line: String) -> Result<(), ProtocolError> {
        let mut frame = line;
        frame.push('\n');
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send a command without waiting for a response
    pub async fn send(&mut self, command: &Command) -> Result<(), ProtocolError> {
        let line = protocol::encode_request(command, None)?;
        self.write_line(line).await
    }

    /// Send a command and wait for its response
    ///
    /// A response carrying `error` becomes [`ProtocolError::Command`].
    pub async fn request(&mut self, command: &Command) -> Result<Value, ProtocolError> {
        let id = self.next_id;
        self.next_id += 1;

        let line = protocol::encode_request(command, Some(id))?;
        self.write_line(line).await?;

        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.read_response(id))
            .await
            .map_err(|_| {
                ProtocolError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no response to {} within {:?}", command.name(), REQUEST_TIMEOUT),
                ))
            })??;

        match response.get("error") {
            Some(error) => Err(ProtocolError::Command(
                error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string()),
            )),
            None => Ok(response),
        }
    }

    async fn read_response(&mut self, id: u64) -> Result<Value, ProtocolError> {
        loop {
            let line = self.lines.next_line().await?.ok_or(ProtocolError::Closed)?;
            if line.trim().is_empty() {
                continue;
            }
            let value = protocol::decode_frame(&line)?;
            if value.get("id").and_then(Value::as_u64) == Some(id) {
                return Ok(value);
            }
            tracing::debug!("Ignoring response for another request: {}", value);
        }
    }
}
