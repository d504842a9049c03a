//! # Rendezvous Transport Adapter
//!
//! [`PairingChannel`] implementation talking to the mesh transport
//! daemon over its local Unix socket. The daemon owns peer discovery
//! and the token-keyed rendezvous; the agent only submits the token
//! and waits for the configuration mapping the daemon relays back.
//!
//! Wire format is one JSON object per line in each direction. The
//! request carries the token; the response carries either the
//! configuration mapping or the daemon's error string.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use meshboot_common::PairingToken;

use crate::ledger::LedgerClient;
use crate::pairing::{ChannelError, PairingChannel};

/// Default rendezvous socket of the mesh transport daemon.
pub const DEFAULT_SOCKET_PATH: &str = "/run/meshboot/rendezvous.sock";

/// Default ledger socket of the mesh transport daemon.
pub const DEFAULT_LEDGER_SOCKET_PATH: &str = "/run/meshboot/ledger.sock";

#[derive(Debug, Serialize)]
struct RendezvousRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RendezvousResponse {
    #[serde(default)]
    config: HashMap<String, String>,
    #[serde(default)]
    error: Option<String>,
}

/// [`PairingChannel`] over the transport daemon's Unix socket.
///
/// Connects per session; the daemon keeps the connection open until a
/// peer responds, so the read blocks exactly as long as the
/// rendezvous does. Cancellation is the caller's concern (the pairing
/// engine races this future against its cancellation signal).
#[derive(Debug, Clone)]
pub struct SocketChannel {
    socket: PathBuf,
}

impl SocketChannel {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn system() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }
}

#[async_trait]
impl PairingChannel for SocketChannel {
    async fn receive(
        &self,
        token: &PairingToken,
    ) -> Result<HashMap<String, String>, ChannelError> {
        let wrap = |context: &str, err: std::io::Error| {
            ChannelError(format!("{context} {}: {err}", self.socket.display()))
        };

        let stream = UnixStream::connect(&self.socket)
            .await
            .map_err(|e| wrap("failed to connect to", e))?;
        let (reader, mut writer) = stream.into_split();

        let request = RendezvousRequest {
            token: token.as_str(),
        };
        let mut line = serde_json::to_string(&request)
            .map_err(|e| ChannelError(format!("failed to encode rendezvous request: {e}")))?;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| wrap("failed to write to", e))?;
        debug!("rendezvous session submitted, waiting");

        let mut response_line = String::new();
        let read = BufReader::new(reader)
            .read_line(&mut response_line)
            .await
            .map_err(|e| wrap("failed to read from", e))?;
        if read == 0 {
            return Err(ChannelError("rendezvous session closed by daemon".into()));
        }

        let response: RendezvousResponse = serde_json::from_str(response_line.trim_end())
            .map_err(|e| ChannelError(format!("malformed rendezvous response: {e}")))?;
        if let Some(error) = response.error {
            return Err(ChannelError(error));
        }
        Ok(response.config)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LEDGER CLIENT
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum LedgerOp<'a> {
    Set {
        namespace: &'a str,
        key: &'a str,
        value: &'a str,
    },
    Get {
        namespace: &'a str,
        key: &'a str,
    },
}

#[derive(Debug, Deserialize)]
struct LedgerReply {
    #[serde(default)]
    value: Option<String>,
}

/// [`LedgerClient`] over the transport daemon's ledger socket.
///
/// Writes are fire-and-forget end to end: the daemon queues them for
/// background propagation, so a `set` that reached the socket is as
/// acknowledged as it will ever be. Socket trouble is logged and
/// swallowed to match the contract; the caller republishes on its
/// next pass anyway.
#[derive(Debug, Clone)]
pub struct SocketLedger {
    socket: PathBuf,
}

impl SocketLedger {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    pub fn system() -> Self {
        Self::new(DEFAULT_LEDGER_SOCKET_PATH)
    }

    async fn exchange(&self, op: &LedgerOp<'_>, await_reply: bool) -> Option<String> {
        let line = match serde_json::to_string(op) {
            Ok(mut line) => {
                line.push('\n');
                line
            }
            Err(err) => {
                warn!(%err, "failed to encode ledger operation");
                return None;
            }
        };

        let stream = match UnixStream::connect(&self.socket).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%err, socket = %self.socket.display(), "ledger socket unavailable");
                return None;
            }
        };
        let (reader, mut writer) = stream.into_split();
        if let Err(err) = writer.write_all(line.as_bytes()).await {
            warn!(%err, "failed to submit ledger operation");
            return None;
        }
        if !await_reply {
            return None;
        }

        let mut reply_line = String::new();
        match BufReader::new(reader).read_line(&mut reply_line).await {
            Ok(0) | Err(_) => {
                warn!("ledger socket closed before replying");
                None
            }
            Ok(_) => serde_json::from_str::<LedgerReply>(reply_line.trim_end())
                .ok()
                .and_then(|reply| reply.value),
        }
    }
}

#[async_trait]
impl LedgerClient for SocketLedger {
    async fn set(&self, namespace: &str, key: &str, value: &str) {
        let op = LedgerOp::Set {
            namespace,
            key,
            value,
        };
        self.exchange(&op, false).await;
    }

    async fn get(&self, namespace: &str, key: &str) -> Option<String> {
        let op = LedgerOp::Get { namespace, key };
        self.exchange(&op, true).await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    use super::*;

    async fn serve_once(listener: UnixListener, reply: &str) -> String {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.expect("read request");
        let request = String::from_utf8_lossy(&buf[..n]).into_owned();
        stream
            .write_all(reply.as_bytes())
            .await
            .expect("write reply");
        request
    }

    #[tokio::test]
    async fn test_receive_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rendezvous.sock");
        let listener = UnixListener::bind(&path).expect("bind");
        let server =
            tokio::spawn(
                async move { serve_once(listener, "{\"config\":{\"device\":\"/dev/sda\"}}\n").await },
            );

        let channel = SocketChannel::new(&path);
        let token = PairingToken::from_existing("tok");
        let mapping = channel.receive(&token).await.expect("receive");

        assert_eq!(mapping.get("device").map(String::as_str), Some("/dev/sda"));
        let request = server.await.expect("server");
        assert!(request.contains("\"token\":\"tok\""));
    }

    #[tokio::test]
    async fn test_daemon_error_is_channel_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("rendezvous.sock");
        let listener = UnixListener::bind(&path).expect("bind");
        tokio::spawn(async move {
            serve_once(listener, "{\"error\":\"session torn down\"}\n").await
        });

        let channel = SocketChannel::new(&path);
        let err = channel
            .receive(&PairingToken::from_existing("tok"))
            .await
            .unwrap_err();
        assert_eq!(err.0, "session torn down");
    }

    #[tokio::test]
    async fn test_missing_socket_is_channel_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let channel = SocketChannel::new(dir.path().join("absent.sock"));
        let err = channel
            .receive(&PairingToken::from_existing("tok"))
            .await
            .unwrap_err();
        assert!(err.0.contains("failed to connect"));
    }

    // ──────────────────────────────────────────────────────────────────────
    // LEDGER CLIENT
    // ──────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_ledger_get_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.sock");
        let listener = UnixListener::bind(&path).expect("bind");
        let server = tokio::spawn(async move {
            serve_once(listener, "{\"value\":\"10.1.0.1\"}\n").await
        });

        let ledger = SocketLedger::new(&path);
        assert_eq!(
            ledger.get("master", "ip").await.as_deref(),
            Some("10.1.0.1")
        );
        let request = server.await.expect("server");
        assert!(request.contains("\"op\":\"get\""));
        assert!(request.contains("\"namespace\":\"master\""));
    }

    #[tokio::test]
    async fn test_ledger_set_is_fire_and_forget() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.sock");
        let listener = UnixListener::bind(&path).expect("bind");
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = vec![0u8; 4096];
            let n = stream.read(&mut buf).await.expect("read");
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });

        // Returns without any daemon reply.
        let ledger = SocketLedger::new(&path);
        ledger.set("role", "node-1", "master").await;

        let request = server.await.expect("server");
        assert!(request.contains("\"op\":\"set\""));
        assert!(request.contains("\"value\":\"master\""));
    }

    #[tokio::test]
    async fn test_ledger_survives_missing_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ledger = SocketLedger::new(dir.path().join("absent.sock"));
        ledger.set("role", "node-1", "master").await;
        assert_eq!(ledger.get("role", "node-1").await, None);
    }
}
