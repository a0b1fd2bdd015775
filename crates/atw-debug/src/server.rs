//! TCP debug server

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::client::DebugError;
use crate::protocol::{DebugCommand, DebugResponse};

/// Trait that the application implements to handle debug commands
pub trait DebugHandler: Send + Sync + 'static {
    fn handle_command(&mut self, cmd: DebugCommand) -> DebugResponse;
}

/// Debug server handle - keep this alive to keep the server running.
/// Dropping the handle stops accepting new clients.
pub struct DebugServer {
    local_addr: Option<SocketAddr>,
    handle: tokio::task::JoinHandle<()>,
}

impl DebugServer {
    /// Start the debug server on the given localhost port.
    /// Returns immediately -- binding and serving happen in the background,
    /// bind failures are logged.
    pub fn start(handler: Arc<Mutex<dyn DebugHandler>>, port: u16) -> Self {
        let handle = tokio::spawn(async move {
            let addr = format!("127.0.0.1:{}", port);
            match TcpListener::bind(&addr).await {
                Ok(listener) => {
                    log::info!("Debug server listening on {}", addr);
                    serve(listener, handler).await;
                }
                Err(e) => log::error!("Failed to bind debug server on {}: {}", addr, e),
            }
        });

        Self {
            local_addr: None,
            handle,
        }
    }

    /// Bind first, then serve in the background. Port 0 picks a free port,
    /// see [`DebugServer::local_addr`].
    pub async fn bind(
        handler: Arc<Mutex<dyn DebugHandler>>,
        addr: &str,
    ) -> Result<Self, DebugError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        log::info!("Debug server listening on {}", local_addr);
        let handle = tokio::spawn(serve(listener, handler));
        Ok(Self {
            local_addr: Some(local_addr),
            handle,
        })
    }

    /// Address the server is bound to (only known for [`DebugServer::bind`])
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for DebugServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(listener: TcpListener, handler: Arc<Mutex<dyn DebugHandler>>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                log::info!("Debug client connected from {}", peer);
                let handler = handler.clone();
                tokio::spawn(async move {
                    handle_connection(stream, handler).await;
                    log::info!("Debug client disconnected: {}", peer);
                });
            }
            Err(e) => {
                log::error!("Debug server accept error: {}", e);
            }
        }
    }
}

/// Parse one request line and run it through the handler
async fn dispatch(line: &str, handler: &Arc<Mutex<dyn DebugHandler>>) -> DebugResponse {
    match serde_json::from_str::<DebugCommand>(line) {
        Ok(cmd) => {
            log::debug!("Debug command: {:?}", cmd);
            let mut h = handler.lock().await;
            h.handle_command(cmd)
        }
        Err(e) => DebugResponse::error(format!("Invalid command JSON: {}", e)),
    }
}

async fn handle_connection(stream: TcpStream, handler: Arc<Mutex<dyn DebugHandler>>) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = dispatch(trimmed, &handler).await;
                let mut resp_json = serde_json::to_string(&response).unwrap_or_else(|e| {
                    format!(
                        "{{\"status\":\"error\",\"message\":\"Serialize error: {}\"}}",
                        e
                    )
                });
                resp_json.push('\n');

                if let Err(e) = writer.write_all(resp_json.as_bytes()).await {
                    log::error!("Debug server write error: {}", e);
                    break;
                }
                if let Err(e) = writer.flush().await {
                    log::error!("Debug server flush error: {}", e);
                    break;
                }
            }
            Err(e) => {
                log::error!("Debug server read error: {}", e);
                break;
            }
        }
    }
}
