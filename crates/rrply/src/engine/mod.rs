//! Playback engine capability.
//!
//! The session drives any engine through [`PlaybackEngine`]; nothing outside
//! this module knows which backend is in use.

pub mod mpv;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("playback engine unavailable: {0}")]
    Unavailable(String),
    #[error("playback engine rejected {command}: {reason}")]
    Rejected { command: String, reason: String },
    #[error("playback engine connection lost: {0}")]
    Disconnected(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Load/play/pause/stop/release over a single audio output.
///
/// Callers serialise commands; implementations need not guard against two
/// commands in flight at once.
#[async_trait]
pub trait PlaybackEngine: Send + Sync + 'static {
    /// Replace whatever is loaded with `url`, without starting output.
    async fn load(&self, url: &str) -> Result<(), EngineError>;
    /// Start or resume output of the loaded media.
    async fn play(&self) -> Result<(), EngineError>;
    async fn pause(&self) -> Result<(), EngineError>;
    /// Unload the current media.  Must succeed when nothing is loaded.
    async fn stop(&self) -> Result<(), EngineError>;
    /// Tear the engine down; no other command is valid afterwards.
    async fn release(&self) -> Result<(), EngineError>;
}
