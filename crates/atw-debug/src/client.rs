//! Minimal async client for the debug protocol

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::protocol::{DebugCommand, DebugResponse};

/// Errors from the debug transport
#[derive(Debug, Error)]
pub enum DebugError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed by server")]
    Closed,
}

/// Line-oriented client, one request in flight at a time
pub struct DebugClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl DebugClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, DebugError> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    /// Send a command and wait for its response line
    pub async fn send(&mut self, cmd: &DebugCommand) -> Result<DebugResponse, DebugError> {
        let mut line = serde_json::to_string(cmd)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply).await? == 0 {
            return Err(DebugError::Closed);
        }
        Ok(serde_json::from_str(reply.trim())?)
    }
}
