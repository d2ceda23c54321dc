//! Channel directory and its on-disk JSON cache.
//!
//! The cache is a JSON object keyed by the numeric channel id rendered as a
//! string: `{"42": {"Id": 42, "Title": "Classic Metal"}}`.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(rename = "Id")]
    pub id: u64,
    #[serde(rename = "Title")]
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelDirectory {
    channels: BTreeMap<u64, Channel>,
}

/// What the cache file on disk is good for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFreshness {
    Missing,
    Stale,
    Fresh,
}

impl ChannelDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, channel: Channel) {
        self.channels.insert(channel.id, channel);
    }

    pub fn get(&self, id: u64) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// `id - title` lines for the channel prompt.
    ///
    /// Sorted as strings, so `10 - …` lands before `2 - …`.
    pub fn menu_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .channels
            .values()
            .map(|c| format!("{} - {}", c.id, c.title))
            .collect();
        lines.sort();
        lines
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("reading channel cache {}", path.display()))?;
        let directory = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing channel cache {}", path.display()))?;
        Ok(directory)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing channel cache {}", path.display()))?;
        debug!("Wrote channel directory to cache file {:?}", path);
        Ok(())
    }

    /// Load the cached directory when it is fresh, otherwise call `fetch`
    /// and rewrite the cache.  An unreadable cache is treated as stale.
    pub async fn load_or_refresh<F, Fut>(
        path: &Path,
        max_age: Duration,
        fetch: F,
    ) -> anyhow::Result<Self>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<Self>>,
    {
        match check_cache(path, max_age, SystemTime::now())? {
            CacheFreshness::Fresh => match Self::load(path) {
                Ok(directory) => {
                    debug!("Cache hit, reading file {:?}", path);
                    return Ok(directory);
                }
                Err(e) => warn!("Ignoring unreadable channel cache: {:#}", e),
            },
            CacheFreshness::Stale => debug!("Cache file {:?} is outdated, regenerating", path),
            CacheFreshness::Missing => debug!("Cache file {:?} doesn't exist, generating", path),
        }

        let directory = fetch().await?;
        directory.save(path)?;
        Ok(directory)
    }
}

impl FromIterator<Channel> for ChannelDirectory {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        let mut directory = Self::new();
        for channel in iter {
            directory.insert(channel);
        }
        directory
    }
}

/// Stale once strictly older than `max_age`.  A modification time in the
/// future counts as fresh.
pub fn is_stale(modified: SystemTime, now: SystemTime, max_age: Duration) -> bool {
    match now.duration_since(modified) {
        Ok(age) => age > max_age,
        Err(_) => false,
    }
}

pub fn check_cache(path: &Path, max_age: Duration, now: SystemTime) -> anyhow::Result<CacheFreshness> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CacheFreshness::Missing),
        Err(e) => {
            return Err(e).with_context(|| format!("reading cache file {}", path.display()))
        }
    };
    let modified = meta.modified()?;
    if is_stale(modified, now, max_age) {
        Ok(CacheFreshness::Stale)
    } else {
        Ok(CacheFreshness::Fresh)
    }
}

/// Numeric id from a `data-channel-id` attribute such as `/channel/42`.
pub fn parse_channel_id(attr: &str) -> Option<u64> {
    attr.trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse().ok())
}

/// The channel number typed at the prompt.
pub fn parse_channel_choice(input: &str) -> anyhow::Result<u64> {
    let trimmed = input.trim();
    trimmed
        .parse()
        .with_context(|| format!("invalid channel id {:?}", trimmed))
}
