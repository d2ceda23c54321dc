//! Local control socket: lets another process (a desktop hotkey, a script)
//! toggle playback or query status.  One reply frame per command frame.

use rrply_proto::protocol::{Command, Message, Reply};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::hotkey::Bindings;
use crate::lifecycle::Lifecycle;
use crate::session::{Session, SessionError, SessionSnapshot};

#[derive(Clone)]
struct Shared {
    session: Arc<Session>,
    bindings: watch::Receiver<Bindings>,
    lifecycle: Lifecycle,
}

pub async fn bind(address: &str) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(address).await?;
    info!("Control socket listening at {}", listener.local_addr()?);
    Ok(listener)
}

/// Accept clients forever.  A failing engine command from any client is
/// reported to `lifecycle` as fatal.
pub async fn serve(
    listener: TcpListener,
    session: Arc<Session>,
    bindings: watch::Receiver<Bindings>,
    lifecycle: Lifecycle,
) {
    let shared = Shared {
        session,
        bindings,
        lifecycle,
    };
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                debug!("Control client {} connected from {}", id, peer);
                let shared = shared.clone();
                tokio::spawn(async move {
                    handle_client(stream, shared, id).await;
                    debug!("Control client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept control connection: {}", e);
            }
        }
    }
}

async fn handle_client(stream: TcpStream, shared: Shared, client_id: usize) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    loop {
        let n = match read_half.read(&mut tmp).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                warn!("Read error from control client {}: {}", client_id, e);
                return;
            }
        };
        read_buf.extend_from_slice(&tmp[..n]);

        while read_buf.len() >= 4 {
            let len = match Message::frame_len(&read_buf) {
                Ok(len) => len,
                Err(e) => {
                    // Length header is garbage; the stream can't be resynchronised
                    let _ = send(&mut write_half, error_reply(e)).await;
                    return;
                }
            };
            if read_buf.len() < 4 + len {
                break;
            }
            let frame: Vec<u8> = read_buf.drain(..4 + len).collect();

            let reply = match Message::decode(&frame) {
                Ok((Message::Command(cmd), _)) => {
                    debug!("Control client {} sent {:?}", client_id, cmd);
                    execute(&shared, cmd).await
                }
                Ok((Message::Reply(_), _)) => error_reply("expected a command"),
                Err(e) => error_reply(e),
            };
            if send(&mut write_half, reply).await.is_err() {
                return;
            }
        }
    }
}

async fn execute(shared: &Shared, cmd: Command) -> Reply {
    let session = &shared.session;
    let result = match cmd {
        Command::TogglePause => session.toggle().await.map(drop),
        Command::Pause => session.pause().await,
        Command::Resume => session.resume().await,
        Command::Key { key } => {
            let bound = shared.bindings.borrow().lookup(&key).is_some();
            if !bound {
                return error_reply(format!("no hotkey bound to {:?}", key));
            }
            session.toggle().await.map(drop)
        }
        Command::Status => Ok(()),
    };

    match result {
        Ok(()) => status_reply(session.snapshot().await),
        Err(SessionError::Released) => error_reply("player is shutting down"),
        Err(e) => {
            shared.lifecycle.fail(&e);
            error_reply(e)
        }
    }
}

fn status_reply(snapshot: SessionSnapshot) -> Reply {
    Reply::Status {
        status: snapshot.status,
        channel_id: Some(snapshot.channel_id),
        track: snapshot.track.map(|t| t.to_string()),
    }
}

fn error_reply(message: impl ToString) -> Reply {
    Reply::Error {
        message: message.to_string(),
    }
}

async fn send<W>(writer: &mut W, reply: Reply) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let encoded = Message::Reply(reply).encode()?;
    writer.write_all(&encoded).await?;
    Ok(())
}

/// Read exactly one frame.
async fn read_frame(stream: &mut TcpStream) -> anyhow::Result<Message> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let len = Message::frame_len(&header)?;
    let mut frame = header.to_vec();
    frame.resize(4 + len, 0);
    stream.read_exact(&mut frame[4..]).await?;
    let (msg, _) = Message::decode(&frame)?;
    Ok(msg)
}

/// Send one command to a running player and wait for its reply.
pub async fn request(address: &str, cmd: Command) -> anyhow::Result<Reply> {
    let mut stream = TcpStream::connect(address).await.map_err(|e| {
        anyhow::anyhow!("cannot reach a running rrply at {}: {}", address, e)
    })?;
    stream.write_all(&Message::Command(cmd).encode()?).await?;
    match read_frame(&mut stream).await? {
        Message::Reply(reply) => Ok(reply),
        Message::Command(cmd) => anyhow::bail!("unexpected command {:?} from player", cmd),
    }
}
