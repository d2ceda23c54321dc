/// mpv backend for [`PlaybackEngine`], driven over mpv's JSON IPC.
///
/// ```text
///   MpvEngine::start()
///         │
///         ├── spawn `mpv --idle=yes --input-ipc-server=…`
///         ├── writer_task   ← receives PendingRequest via mpsc, serialises → socket
///         ├── reader_task   ← reads JSON lines from socket
///         │                      ├── response (has request_id) → matched oneshot::Sender
///         │                      └── event                     → event_tx channel
///         └── event_log_task ← logs end-file / errors
/// ```
///
/// The writer task is the single owner of the socket's write half, so every
/// command reaches mpv in the order it was issued.
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use super::{EngineError, PlaybackEngine};

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

const IPC_TIMEOUT: tokio::time::Duration = tokio::time::Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, EngineError>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<Result<Value, EngineError>>,
}

/// An mpv event that arrived unsolicited (no request_id).
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

impl MpvEvent {
    /// e.g. "end-file", "start-file", "file-loaded".
    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to the writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> Result<Value, EngineError> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let name = command
            .get(0)
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string();
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = msg.to_string();
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::Disconnected("mpv writer task gone".into()))?;

        tokio::time::timeout(IPC_TIMEOUT, reply_rx)
            .await
            .map_err(|_| EngineError::Rejected {
                command: name.clone(),
                reason: format!("IPC timeout for req={}", req_id),
            })?
            .map_err(|_| EngineError::Disconnected(format!("reply channel dropped req={}", req_id)))?
    }

    async fn set_pause(&self, paused: bool) -> Result<(), EngineError> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }
}

// ── process ───────────────────────────────────────────────────────────────────

/// Owns the mpv child process.
struct MpvProcess {
    socket_name: String,
    child: Option<tokio::process::Child>,
}

impl MpvProcess {
    fn spawn(socket_name: String) -> Result<Self, EngineError> {
        let mpv_binary = rrply_proto::platform::find_mpv_binary()
            .ok_or_else(|| EngineError::Unavailable("mpv binary not found".into()))?;

        info!("mpv: spawning {:?}", mpv_binary);
        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(rrply_proto::platform::mpv_socket_arg(&socket_name))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        Ok(Self {
            socket_name,
            child: Some(child),
        })
    }

    async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            if child.try_wait().ok().flatten().is_none() {
                let _ = child.kill().await;
            }
        }
        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket_name).await;
    }

    #[cfg(unix)]
    async fn connect(&self, event_tx: mpsc::Sender<MpvEvent>) -> Result<MpvHandle, EngineError> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            return Err(EngineError::Unavailable(
                "mpv IPC socket did not appear".into(),
            ));
        }

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    async fn connect(&self, event_tx: mpsc::Sender<MpvEvent>) -> Result<MpvHandle, EngineError> {
        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                let (read_half, write_half) = tokio::io::split(client);
                return Ok(start_io_tasks(read_half, write_half, event_tx));
            }
        }
        Err(EngineError::Unavailable(
            "mpv named pipe did not appear".into(),
        ))
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    // req_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));

    MpvHandle { tx: cmd_tx }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    event_tx: mpsc::Sender<MpvEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            debug!("mpv reader: response req={} ok", req_id);
                            Ok(val)
                        } else {
                            let err = val["error"]
                                .as_str()
                                .unwrap_or("unknown error")
                                .to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(EngineError::Rejected {
                                command: format!("req={}", req_id),
                                reason: err,
                            })
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_pending(&pending, &format!("mpv IPC read error: {}", e)).await;
                break;
            }
        }
    }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(EngineError::Disconnected(reason.to_string())));
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always match the reply
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: send req={} payload={}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(EngineError::Disconnected(format!(
                    "mpv write error: {}",
                    e
                ))));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

async fn event_log_task(mut rx: mpsc::Receiver<MpvEvent>) {
    while let Some(evt) = rx.recv().await {
        match evt.event_name() {
            Some("end-file") => {
                let reason = evt
                    .raw
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                if reason == "error" || reason == "network" {
                    warn!("mpv: stream ended early, reason={}", reason);
                } else {
                    debug!("mpv: end-file reason={}", reason);
                }
            }
            Some(name) => debug!("mpv: event {}", name),
            None => debug!("mpv: unnamed event {}", evt.raw),
        }
    }
}

// ── engine ────────────────────────────────────────────────────────────────────

pub struct MpvEngine {
    handle: MpvHandle,
    process: Mutex<MpvProcess>,
}

impl MpvEngine {
    /// Spawn mpv in idle mode and connect to its IPC socket.
    pub async fn start() -> Result<Self, EngineError> {
        let mut process = MpvProcess::spawn(rrply_proto::platform::mpv_socket_name())?;
        let (event_tx, event_rx) = mpsc::channel(64);
        let handle = match process.connect(event_tx).await {
            Ok(handle) => handle,
            Err(e) => {
                process.kill().await;
                return Err(e);
            }
        };
        tokio::spawn(event_log_task(event_rx));

        Ok(Self {
            handle,
            process: Mutex::new(process),
        })
    }
}

#[async_trait]
impl PlaybackEngine for MpvEngine {
    async fn load(&self, url: &str) -> Result<(), EngineError> {
        // Paused before loadfile so nothing is heard until play()
        self.handle.set_pause(true).await?;
        self.handle.send(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    async fn play(&self) -> Result<(), EngineError> {
        self.handle.set_pause(false).await
    }

    async fn pause(&self) -> Result<(), EngineError> {
        self.handle.set_pause(true).await
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.handle.send(json!(["stop"])).await?;
        Ok(())
    }

    async fn release(&self) -> Result<(), EngineError> {
        // mpv closes the socket as it exits, so the reply may never arrive
        if let Err(e) = self.handle.send(json!(["quit"])).await {
            debug!("mpv: quit: {}", e);
        }
        self.process.lock().await.kill().await;
        info!("mpv: released");
        Ok(())
    }
}
