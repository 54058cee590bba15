//! Voice catalog retrieval.
//!
//! The voice list is best-effort decoration around synthesis: any network or
//! parse failure degrades to the built-in fallback set rather than erroring,
//! and the result is reordered so mainland-Chinese voices come first.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::TRUSTED_CLIENT_TOKEN;
use crate::config::EdgeTtsConfig;
use crate::error::{TtsError, TtsResult};

/// Friendly-name substring identifying the priority voice market.
const PRIORITY_MARKET: &str = "Chinese (Mainland)";

/// One selectable voice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    /// Human-readable label.
    pub name: String,
    /// Full identifier used in SSML `<voice name>`.
    pub value: String,
}

#[derive(Debug, Deserialize)]
struct VoiceListEntry {
    #[serde(rename = "FriendlyName")]
    friendly_name: String,
    #[serde(rename = "Name")]
    name: String,
}

/// Fetches and orders the voice list.
pub struct VoiceCatalog {
    config: EdgeTtsConfig,
    client: reqwest::Client,
}

impl VoiceCatalog {
    /// Builds a catalog with its own HTTP client, honoring the configured
    /// proxy.
    pub fn new(config: EdgeTtsConfig) -> TtsResult<Self> {
        config.validate().map_err(TtsError::InvalidConfiguration)?;
        let mut builder = reqwest::Client::builder();
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        let client = builder.build()?;
        Ok(Self { config, client })
    }

    /// Builds a catalog around a preconfigured client, for callers that
    /// pool connections across services.
    pub fn with_client(config: EdgeTtsConfig, client: reqwest::Client) -> TtsResult<Self> {
        config.validate().map_err(TtsError::InvalidConfiguration)?;
        Ok(Self { config, client })
    }

    /// Returns the available voices, priority market first.
    ///
    /// Never fails: an unreachable endpoint, a non-2xx status, or an
    /// unparseable payload all degrade to [`fallback_voices`].
    pub async fn get_voice_list(&self) -> Vec<Voice> {
        let url = format!(
            "{}?trustedclienttoken={}",
            self.config.voice_list_url, TRUSTED_CLIENT_TOKEN
        );

        let voices = match self.fetch(&url).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "voice list fetch failed, using fallback voices");
                Vec::new()
            }
        };

        if voices.is_empty() {
            return fallback_voices();
        }
        debug!(count = voices.len(), "voice list fetched");
        order_by_market(voices)
    }

    async fn fetch(&self, url: &str) -> TtsResult<Vec<Voice>> {
        let entries: Vec<VoiceListEntry> = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(entries
            .into_iter()
            .map(|entry| Voice {
                name: entry.friendly_name,
                value: entry.name,
            })
            .collect())
    }
}

/// Stable partition: voices whose friendly name carries the priority market
/// come first, both groups keeping their relative order.
pub fn order_by_market(voices: Vec<Voice>) -> Vec<Voice> {
    let (mut priority, rest): (Vec<Voice>, Vec<Voice>) = voices
        .into_iter()
        .partition(|voice| voice.name.contains(PRIORITY_MARKET));
    priority.extend(rest);
    priority
}

/// Built-in zh-CN voice set used when the live list is unavailable.
pub fn fallback_voices() -> Vec<Voice> {
    [
        ("Xiaoxiao", "XiaoxiaoNeural"),
        ("Xiaoyi", "XiaoyiNeural"),
        ("Yunjian", "YunjianNeural"),
        ("Yunxi", "YunxiNeural"),
        ("Yunxia", "YunxiaNeural"),
        ("Yunyang", "YunyangNeural"),
    ]
    .into_iter()
    .map(|(label, id)| Voice {
        name: format!("Microsoft {label} Online (Natural) - Chinese (Mainland)"),
        value: format!("Microsoft Server Speech Text to Speech Voice (zh-CN, {id})"),
    })
    .collect()
}
