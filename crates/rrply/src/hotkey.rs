//! Hotkey bindings and the stdin key source.
//!
//! Every bound key toggles playback.  The bindings file is polled for
//! modification; a broken edit is logged and the previous bindings stay
//! active.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::session::{Session, SessionError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotkey {
    pub key: String,
    #[serde(default)]
    pub desc: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read hotkey file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write hotkey file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse hotkey file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    hotkeys: Vec<Hotkey>,
}

impl Bindings {
    pub fn new(hotkeys: Vec<Hotkey>) -> Self {
        Self { hotkeys }
    }

    /// Case-insensitive match on the key name.
    pub fn lookup(&self, key: &str) -> Option<&Hotkey> {
        let key = key.trim();
        self.hotkeys.iter().find(|h| h.key.eq_ignore_ascii_case(key))
    }

    pub fn keys(&self) -> Vec<&str> {
        self.hotkeys.iter().map(|h| h.key.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.hotkeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hotkeys.is_empty()
    }
}

pub fn default_hotkeys() -> Vec<Hotkey> {
    vec![Hotkey {
        key: "Pause".into(),
        desc: "Play/pause.".into(),
    }]
}

/// Write the default bindings unless the file already exists.
pub fn ensure_file(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Ok(());
    }
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let contents = serde_json::to_string_pretty(&default_hotkeys()).map_err(|source| {
        ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }
    })?;
    std::fs::write(path, contents).map_err(write_err)?;
    info!("Created default hotkey file at {:?}", path);
    Ok(())
}

pub fn load(path: &Path) -> Result<Bindings, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let hotkeys: Vec<Hotkey> = serde_json::from_str(&contents).map_err(|source| {
        ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }
    })?;
    Ok(Bindings::new(hotkeys))
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Publishes the current bindings and reloads them when the file changes.
pub struct BindingsWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
    tx: watch::Sender<Bindings>,
}

impl BindingsWatcher {
    /// Create the file if needed and load it.  A malformed file here is an
    /// error; later reloads only warn.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        ensure_file(&path)?;
        let last_modified = modified(&path);
        let bindings = load(&path)?;
        info!("Loaded {} hotkey(s): {:?}", bindings.len(), bindings.keys());
        let (tx, _) = watch::channel(bindings);
        Ok(Self {
            path,
            last_modified,
            tx,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Bindings> {
        self.tx.subscribe()
    }

    /// Reload if the modification time moved.  Returns true when new
    /// bindings were published.
    pub fn poll(&mut self) -> bool {
        let current = modified(&self.path);
        if current == self.last_modified {
            return false;
        }
        self.last_modified = current;

        if current.is_none() {
            warn!("Hotkey file {:?} is gone, keeping previous bindings", self.path);
            return false;
        }
        match load(&self.path) {
            Ok(bindings) => {
                info!("Reloaded {} hotkey(s): {:?}", bindings.len(), bindings.keys());
                self.tx.send_replace(bindings);
                true
            }
            Err(e) => {
                warn!("{}; keeping previous bindings", e);
                false
            }
        }
    }

    pub async fn run(mut self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.poll();
        }
    }
}

/// Lines typed on standard input.  Read on a plain thread so a pending read
/// never holds up runtime shutdown.
pub fn stdin_lines() -> std::io::Result<mpsc::Receiver<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// Toggle playback for every input line naming a bound key.  Returns when
/// the input closes.
pub async fn listen(
    mut lines: mpsc::Receiver<String>,
    bindings: watch::Receiver<Bindings>,
    session: Arc<Session>,
) -> Result<(), SessionError> {
    while let Some(line) = lines.recv().await {
        let key = line.trim();
        if key.is_empty() {
            continue;
        }

        let bound = bindings.borrow().lookup(key).cloned();
        match bound {
            Some(hotkey) => {
                let status = session.toggle().await?;
                debug!("hotkey {:?} ({}) → {}", hotkey.key, hotkey.desc, status);
                println!("{}", status);
            }
            None => println!("No hotkey bound to {:?}", key),
        }
    }
    debug!("hotkey input reached end of stream");
    Ok(())
}
