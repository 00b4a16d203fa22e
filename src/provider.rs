//! Hourly OHLCV market-data boundary and the Birdeye client behind it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const BIRDEYE_OHLCV_URL: &str = "https://public-api.birdeye.so/defi/ohlcv";

/// Hour-aligned fetch range in unix seconds. The provider treats
/// `time_to` as inclusive, so a fully elapsed window answers with its
/// last point exactly at `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchWindow {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvPoint {
    pub address: String,
    #[serde(rename = "unixTime")]
    pub unix_time: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for mint {mint}: {message}")]
    HttpRequest { mint: String, message: String },
    #[error("malformed provider payload for mint {mint}: {message}")]
    MalformedPayload { mint: String, message: String },
}

#[async_trait]
pub trait OhlcvProvider: Send + Sync {
    /// Fetches hourly points in `window`, ascending by time, possibly
    /// empty, possibly ending with same-hour zero-volume placeholders.
    async fn fetch_hourly(
        &self,
        mint: &str,
        window: FetchWindow,
    ) -> Result<Vec<OhlcvPoint>, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BirdeyeConfig {
    pub api_key: String,
    pub base_url: String,
    pub http_timeout_ms: u64,
}

impl BirdeyeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: BIRDEYE_OHLCV_URL.to_string(),
            http_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OhlcvResponse {
    data: OhlcvData,
}

#[derive(Debug, Deserialize)]
struct OhlcvData {
    #[serde(default)]
    items: Vec<OhlcvPoint>,
}

pub struct BirdeyeProvider {
    client: reqwest::Client,
    cfg: BirdeyeConfig,
}

impl BirdeyeProvider {
    pub fn new(cfg: BirdeyeConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.http_timeout_ms))
            .build()
            .map_err(|err| ProviderError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client, cfg })
    }
}

#[async_trait]
impl OhlcvProvider for BirdeyeProvider {
    async fn fetch_hourly(
        &self,
        mint: &str,
        window: FetchWindow,
    ) -> Result<Vec<OhlcvPoint>, ProviderError> {
        let time_from = window.start.to_string();
        let time_to = window.end.to_string();

        let response = self
            .client
            .get(&self.cfg.base_url)
            .header("x-api-key", &self.cfg.api_key)
            .query(&[
                ("address", mint),
                ("type", "1H"),
                ("time_from", time_from.as_str()),
                ("time_to", time_to.as_str()),
            ])
            .send()
            .await
            .map_err(|err| ProviderError::HttpRequest {
                mint: mint.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::HttpRequest {
                mint: mint.to_string(),
                message: format!("unexpected HTTP status {status}"),
            });
        }

        let payload: OhlcvResponse =
            response
                .json()
                .await
                .map_err(|err| ProviderError::MalformedPayload {
                    mint: mint.to_string(),
                    message: err.to_string(),
                })?;

        debug!(
            component = "provider",
            event = "ohlcv.provider.fetched",
            mint,
            window_start = window.start,
            window_end = window.end,
            points = payload.data.items.len()
        );

        Ok(payload.data.items)
    }
}
