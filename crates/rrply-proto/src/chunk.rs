//! Playlist chunks as returned by the station's channel routine endpoint.
//!
//! ```text
//! { channel_id, expires_on,
//!   tracks: [ { id, display_artist, display_title, release, release_date,
//!               content: { length, assets: [ { url } ] } } ] }
//! ```
//!
//! A chunk is decoded once, validated, and never mutated afterwards; the
//! session replaces it wholesale with the next fetch.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("malformed chunk json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("chunk for channel {0} contains no tracks")]
    Empty(u64),
    #[error("track {0} has no playable assets")]
    NoAssets(u64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub channel_id: u64,
    #[serde(default)]
    pub expires_on: String,
    pub tracks: Vec<Track>,
    /// Sum of all track lengths in seconds; filled in by [`Chunk::parse`].
    #[serde(skip)]
    pub length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    #[serde(rename = "display_artist", default)]
    pub artist: String,
    #[serde(rename = "display_title", default)]
    pub title: String,
    #[serde(rename = "release", default)]
    pub album: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    pub content: TrackContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackContent {
    /// Playable duration in seconds.
    pub length: f64,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub url: String,
}

impl Chunk {
    /// Decode a chunk response and compute its aggregate length.
    pub fn parse(body: &[u8]) -> Result<Self, ChunkError> {
        let chunk: Self = serde_json::from_slice(body)?;
        chunk.validated()
    }

    /// Reject chunks the playback loop cannot make progress on and fill in
    /// the aggregate length.
    pub fn validated(mut self) -> Result<Self, ChunkError> {
        if self.tracks.is_empty() {
            return Err(ChunkError::Empty(self.channel_id));
        }
        if let Some(track) = self.tracks.iter().find(|t| t.content.assets.is_empty()) {
            return Err(ChunkError::NoAssets(track.id));
        }
        self.length = self.tracks.iter().map(|t| t.content.length).sum();
        Ok(self)
    }

    pub fn expires_at(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.expires_on).ok()
    }
}

impl Track {
    pub fn duration_secs(&self) -> f64 {
        self.content.length
    }

    /// URL of the first asset, resolved to https.
    ///
    /// Alternate assets are ignored; only the first candidate is ever played.
    pub fn stream_url(&self) -> Option<String> {
        self.content
            .assets
            .first()
            .map(|asset| resolve_asset_url(&asset.url))
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} [{}] - {}",
            self.artist,
            self.title,
            self.album.as_deref().unwrap_or(""),
            format_time(self.content.length as u64)
        )
    }
}

/// Asset URLs come back protocol-relative (`//host/path`).
pub fn resolve_asset_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{}", url)
    } else {
        url.to_string()
    }
}

/// Seconds as `m:ss`.
pub fn format_time(secs: u64) -> String {
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "channel_id": 42,
        "expires_on": "2019-03-01T12:30:00-05:00",
        "tracks": [
            {
                "id": 1,
                "display_artist": "Motörhead",
                "display_title": "Ace of Spades",
                "release": "Ace of Spades",
                "release_date": "1980-11-08",
                "content": { "length": 169.5, "assets": [
                    { "url": "//prem1.rockradio.com/a.mp4" },
                    { "url": "//prem2.rockradio.com/a.mp4" }
                ] }
            },
            {
                "id": 2,
                "display_artist": "Judas Priest",
                "display_title": "Painkiller",
                "release": null,
                "release_date": null,
                "content": { "length": 366.0, "assets": [ { "url": "https://cdn.example/b.mp4" } ] }
            }
        ]
    }"#;

    #[test]
    fn test_parse_sums_track_lengths() {
        let chunk = Chunk::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(chunk.channel_id, 42);
        assert_eq!(chunk.tracks.len(), 2);
        assert!((chunk.length - 535.5).abs() < f64::EPSILON);
        assert_eq!(chunk.tracks[0].artist, "Motörhead");
        assert_eq!(chunk.tracks[1].album, None);
    }

    #[test]
    fn test_stream_url_uses_first_asset_only() {
        let chunk = Chunk::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            chunk.tracks[0].stream_url().as_deref(),
            Some("https://prem1.rockradio.com/a.mp4")
        );
        assert_eq!(
            chunk.tracks[1].stream_url().as_deref(),
            Some("https://cdn.example/b.mp4")
        );
    }

    #[test]
    fn test_expiry_parses_rfc3339() {
        let chunk = Chunk::parse(SAMPLE.as_bytes()).unwrap();
        let expiry = chunk.expires_at().unwrap();
        assert_eq!(expiry.to_rfc3339(), "2019-03-01T12:30:00-05:00");
    }

    #[test]
    fn test_empty_chunk_rejected() {
        let body = br#"{"channel_id": 7, "expires_on": "", "tracks": []}"#;
        assert!(matches!(Chunk::parse(body), Err(ChunkError::Empty(7))));
    }

    #[test]
    fn test_track_without_assets_rejected() {
        let body = br#"{"channel_id": 7, "tracks": [
            {"id": 9, "display_artist": "a", "display_title": "b",
             "content": {"length": 10, "assets": []}}
        ]}"#;
        assert!(matches!(Chunk::parse(body), Err(ChunkError::NoAssets(9))));
    }

    #[test]
    fn test_wrong_shape_is_json_error() {
        assert!(matches!(
            Chunk::parse(b"<html>maintenance</html>"),
            Err(ChunkError::Json(_))
        ));
    }

    #[test]
    fn test_display_line() {
        let chunk = Chunk::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            chunk.tracks[0].to_string(),
            "Motörhead - Ace of Spades [Ace of Spades] - 2:49"
        );
        assert_eq!(chunk.tracks[1].to_string(), "Judas Priest - Painkiller [] - 6:06");
    }
}
