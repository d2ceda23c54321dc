//! Playback session: single owner of playback status, the track cursor and
//! the access token.
//!
//! Every transition takes the session mutex and issues its engine commands
//! while holding it, so engine commands never interleave and the published
//! status always matches what the engine was last told.  Status is published
//! through a `watch` channel so the countdown can sample it every tick
//! without contending for the mutex.
//!
//! ```text
//!            load_track                 pause / toggle
//!   STOPPED ────────────▶ PLAYING ◀──────────────────▶ PAUSED
//!      ▲                     │        resume / toggle     │
//!      └──────── stop ───────┴────────────────────────────┘
//! ```

use rrply_proto::chunk::{Chunk, ChunkError, Track};
use rrply_proto::protocol::PlaybackStatus;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::engine::{EngineError, PlaybackEngine};
use crate::gateway::{AccessToken, GatewayError, TrackSource};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("track {0} has no playable asset")]
    NoAsset(u64),
    #[error("session already shut down")]
    Released,
}

/// Read-only view for status queries.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub status: PlaybackStatus,
    pub channel_id: u64,
    pub track: Option<Track>,
}

#[derive(Default)]
struct Inner {
    /// Set by a pause; cleared by a resume.  Applied by the next
    /// `load_track`, so a pause survives the track boundary.
    pause_requested: bool,
    chunk: Option<Arc<Chunk>>,
    cursor: Option<usize>,
    /// Track currently loaded in the engine.
    loaded: Option<Track>,
    released: bool,
}

impl Inner {
    fn next_in_chunk(&self) -> Option<(Arc<Chunk>, usize)> {
        let chunk = self.chunk.as_ref()?;
        let next = self.cursor.map_or(0, |i| i + 1);
        (next < chunk.tracks.len()).then(|| (Arc::clone(chunk), next))
    }
}

pub struct Session {
    engine: Arc<dyn PlaybackEngine>,
    source: Arc<dyn TrackSource>,
    channel_id: u64,
    token: RwLock<AccessToken>,
    inner: Mutex<Inner>,
    status_tx: watch::Sender<PlaybackStatus>,
}

impl Session {
    pub fn new(
        engine: Arc<dyn PlaybackEngine>,
        source: Arc<dyn TrackSource>,
        channel_id: u64,
        token: AccessToken,
    ) -> Self {
        let (status_tx, _) = watch::channel(PlaybackStatus::Stopped);
        Self {
            engine,
            source,
            channel_id,
            token: RwLock::new(token),
            inner: Mutex::new(Inner::default()),
            status_tx,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackStatus> {
        self.status_tx.subscribe()
    }

    pub async fn token(&self) -> AccessToken {
        self.token.read().await.clone()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().await;
        SessionSnapshot {
            status: self.status(),
            channel_id: self.channel_id,
            track: inner.loaded.clone(),
        }
    }

    fn set_status(&self, status: PlaybackStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            debug!("session: {} → {}", previous, status);
        }
    }

    // ── transitions ───────────────────────────────────────────────────────────

    /// Replace whatever is playing with `track`.
    pub async fn load_track(&self, track: &Track) -> Result<(), SessionError> {
        let url = track.stream_url().ok_or(SessionError::NoAsset(track.id))?;
        let mut inner = self.inner.lock().await;
        if inner.released {
            return Err(SessionError::Released);
        }

        let result = self.start_engine(&url, inner.pause_requested).await;
        match result {
            Ok(status) => {
                inner.loaded = Some(track.clone());
                self.set_status(status);
                Ok(())
            }
            Err(e) => {
                inner.loaded = None;
                self.set_status(PlaybackStatus::Stopped);
                Err(e.into())
            }
        }
    }

    async fn start_engine(&self, url: &str, paused: bool) -> Result<PlaybackStatus, EngineError> {
        self.engine.stop().await?;
        self.engine.load(url).await?;
        if paused {
            self.engine.pause().await?;
            debug!("session: loaded {} paused (pause pending)", url);
            Ok(PlaybackStatus::Paused)
        } else {
            self.engine.play().await?;
            debug!("session: playing {}", url);
            Ok(PlaybackStatus::Playing)
        }
    }

    pub async fn pause(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        self.pause_locked(&mut inner).await
    }

    pub async fn resume(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        self.resume_locked(&mut inner).await
    }

    /// Pause when playing, resume otherwise; decided on the status at the
    /// moment the signal is handled.  Returns the resulting status.
    pub async fn toggle(&self) -> Result<PlaybackStatus, SessionError> {
        let mut inner = self.inner.lock().await;
        match self.status() {
            PlaybackStatus::Stopped | PlaybackStatus::Paused => {
                self.resume_locked(&mut inner).await?
            }
            PlaybackStatus::Playing => self.pause_locked(&mut inner).await?,
        }
        Ok(self.status())
    }

    async fn pause_locked(&self, inner: &mut Inner) -> Result<(), SessionError> {
        match self.status() {
            PlaybackStatus::Playing => {
                self.engine.pause().await?;
                inner.pause_requested = true;
                self.set_status(PlaybackStatus::Paused);
                info!("Paused");
            }
            PlaybackStatus::Stopped => {
                inner.pause_requested = true;
                debug!("session: pause requested while stopped, applies to next track");
            }
            PlaybackStatus::Paused => {}
        }
        Ok(())
    }

    async fn resume_locked(&self, inner: &mut Inner) -> Result<(), SessionError> {
        match self.status() {
            PlaybackStatus::Paused => {
                self.engine.play().await?;
                inner.pause_requested = false;
                self.set_status(PlaybackStatus::Playing);
                info!("Resumed");
            }
            PlaybackStatus::Stopped => {
                // Nothing loaded to resume; just drop a pending pause
                inner.pause_requested = false;
                debug!("session: resume while stopped clears pending pause");
            }
            PlaybackStatus::Playing => {}
        }
        Ok(())
    }

    /// Stop and unload.  The engine is told to stop even when the session
    /// already thinks it is stopped.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner).await
    }

    async fn stop_locked(&self, inner: &mut Inner) -> Result<(), SessionError> {
        let result = self.engine.stop().await;
        inner.loaded = None;
        self.set_status(PlaybackStatus::Stopped);
        result.map_err(Into::into)
    }

    /// Final stop followed by engine release.  Later transitions fail with
    /// [`SessionError::Released`].
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.released {
            return Ok(());
        }
        inner.released = true;
        if let Err(e) = self.stop_locked(&mut inner).await {
            warn!("session: final stop failed, retrying: {}", e);
            self.engine.stop().await?;
        }
        self.engine.release().await?;
        info!("Session shut down");
        Ok(())
    }

    // ── playlist ──────────────────────────────────────────────────────────────

    /// True once the cursor sits on the last track of the current chunk.
    pub async fn chunk_finished(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.chunk.is_some() && inner.next_in_chunk().is_none()
    }

    /// Move the cursor to the next track, fetching a new chunk with the
    /// current token when the present one is exhausted.
    pub async fn advance(&self) -> Result<Track, SessionError> {
        {
            let mut inner = self.inner.lock().await;
            if let Some((chunk, index)) = inner.next_in_chunk() {
                inner.cursor = Some(index);
                return Ok(chunk.tracks[index].clone());
            }
        }

        // Fetched without the session lock so signals keep flowing
        let token = self.token().await;
        let chunk = self.source.fetch_chunk(self.channel_id, &token).await?;
        let first = chunk
            .tracks
            .first()
            .cloned()
            .ok_or(GatewayError::Chunk(ChunkError::Empty(chunk.channel_id)))?;
        info!(
            "New chunk: {} tracks, next fetch after {:.0} seconds",
            chunk.tracks.len(),
            chunk.length
        );

        let mut inner = self.inner.lock().await;
        inner.chunk = Some(Arc::new(chunk));
        inner.cursor = Some(0);
        Ok(first)
    }

    /// Fetch a fresh token and swap it in whole.
    pub async fn refresh_token(&self) -> Result<(), SessionError> {
        let token = self.source.fetch_token().await?;
        debug!("session: token refreshed to {:?}", token);
        *self.token.write().await = token;
        Ok(())
    }
}
