//! Track source gateway: access tokens, playlist chunks and the channel
//! directory from the station's website.

use async_trait::async_trait;
use regex::Regex;
use rrply_proto::chunk::{Chunk, ChunkError};
use rrply_proto::config::StationConfig;
use rrply_proto::directory::{parse_channel_id, Channel, ChannelDirectory};
use scraper::{Html, Selector};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Short-lived credential required by every chunk fetch.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Enough to tell tokens apart in debug logs
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "AccessToken({}…)", prefix)
    }
}

/// Whether a failure came from the transport or from the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Parse,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("audio token not found in landing page")]
    TokenNotFound,
    #[error("channel list not found in landing page")]
    NoChannels,
    #[error(transparent)]
    Chunk(#[from] ChunkError),
}

impl GatewayError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GatewayError::Network { .. } | GatewayError::Status { .. } => FailureKind::Network,
            GatewayError::TokenNotFound | GatewayError::NoChannels | GatewayError::Chunk(_) => {
                FailureKind::Parse
            }
        }
    }
}

/// Where tokens and chunks come from.
///
/// Implementations hold no session state and may be called while an earlier
/// chunk is still playing.
#[async_trait]
pub trait TrackSource: Send + Sync + 'static {
    async fn fetch_token(&self) -> Result<AccessToken, GatewayError>;
    async fn fetch_chunk(&self, channel_id: u64, token: &AccessToken)
        -> Result<Chunk, GatewayError>;
}

// ── rockradio.com ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RockRadioClient {
    client: reqwest::Client,
    base_url: String,
    network: String,
}

impl RockRadioClient {
    pub fn new(station: &StationConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rrply/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| GatewayError::Network {
                url: station.base_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: station.base_url.trim_end_matches('/').to_string(),
            network: station.network.clone(),
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, GatewayError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| GatewayError::Network {
                url: url.to_string(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(GatewayError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        Ok(response)
    }

    async fn landing_page(&self) -> Result<String, GatewayError> {
        let url = format!("{}/", self.base_url);
        self.get(&url)
            .await?
            .text()
            .await
            .map_err(|source| GatewayError::Network { url, source })
    }

    /// Scrape the channel menu of the landing page.
    pub async fn fetch_channels(&self) -> Result<ChannelDirectory, GatewayError> {
        let html = self.landing_page().await?;
        let directory = parse_channel_list(&html);
        if directory.is_empty() {
            return Err(GatewayError::NoChannels);
        }
        debug!("Fetched {} channels", directory.len());
        Ok(directory)
    }
}

#[async_trait]
impl TrackSource for RockRadioClient {
    async fn fetch_token(&self) -> Result<AccessToken, GatewayError> {
        let html = self.landing_page().await?;
        let token = extract_audio_token(&html).ok_or(GatewayError::TokenNotFound)?;
        debug!("Fetched {:?}", token);
        Ok(token)
    }

    async fn fetch_chunk(
        &self,
        channel_id: u64,
        token: &AccessToken,
    ) -> Result<Chunk, GatewayError> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let url = chunk_url(&self.base_url, &self.network, channel_id, token, ts);

        let body = self
            .get(&url)
            .await?
            .bytes()
            .await
            .map_err(|source| GatewayError::Network {
                url: url.clone(),
                source,
            })?;
        let chunk = Chunk::parse(&body)?;
        debug!(
            "Fetched chunk for channel {}: {} tracks, {:.0}s, expires {:?}",
            chunk.channel_id,
            chunk.tracks.len(),
            chunk.length,
            chunk.expires_at()
        );
        Ok(chunk)
    }
}

pub fn chunk_url(
    base_url: &str,
    network: &str,
    channel_id: u64,
    token: &AccessToken,
    ts_millis: u128,
) -> String {
    format!(
        "{}/_papi/v1/{}/routines/channel/{}?audio_token={}&_={}",
        base_url,
        network,
        channel_id,
        token.as_str(),
        ts_millis
    )
}

/// The token is embedded in the page's JS bootstrap as `"audio_token":"…"`.
pub fn extract_audio_token(html: &str) -> Option<AccessToken> {
    let re = Regex::new(r#""audio_token":"([a-z0-9]+)""#).ok()?;
    re.captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| AccessToken::new(m.as_str()))
}

/// Channels from `div.submenu.channels li[data-channel-id]`, titled by the
/// text of their `a span`.
pub fn parse_channel_list(html: &str) -> ChannelDirectory {
    let document = Html::parse_document(html);
    let (Ok(item_sel), Ok(title_sel)) = (
        Selector::parse("div.submenu.channels li"),
        Selector::parse("a span"),
    ) else {
        return ChannelDirectory::new();
    };

    document
        .select(&item_sel)
        .filter_map(|li| {
            let id = parse_channel_id(li.value().attr("data-channel-id")?)?;
            let title: String = li
                .select(&title_sel)
                .flat_map(|span| span.text())
                .collect::<String>()
                .trim()
                .to_string();
            Some(Channel { id, title })
        })
        .collect()
}
