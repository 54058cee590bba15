//! Client configuration.
//!
//! The upstream protocol hard-codes its endpoints and client identity; this
//! struct makes those knobs explicit so sessions and catalogs can be pointed
//! at test servers and the impersonated browser version can track upstream
//! releases without a rebuild.

use crate::{DEFAULT_CLIENT_VERSION, SYNTHESIS_WS_URL, VOICE_LIST_URL};

/// Configuration shared by [`SynthesisSession`] and [`VoiceCatalog`].
///
/// [`SynthesisSession`]: crate::session::SynthesisSession
/// [`VoiceCatalog`]: crate::voices::VoiceCatalog
#[derive(Debug, Clone)]
pub struct EdgeTtsConfig {
    /// Browser build number embedded in the User-Agent (twice) and the
    /// `Sec-MS-GEC-Version` query parameter.
    pub client_version: String,

    /// Optional proxy URL for the voice list request.
    pub proxy: Option<String>,

    /// Synthesis WebSocket endpoint (`wss://…`).
    pub synthesis_url: String,

    /// Voice list HTTP endpoint (`https://…`).
    pub voice_list_url: String,
}

impl Default for EdgeTtsConfig {
    fn default() -> Self {
        Self {
            client_version: DEFAULT_CLIENT_VERSION.to_string(),
            proxy: None,
            synthesis_url: SYNTHESIS_WS_URL.to_string(),
            voice_list_url: VOICE_LIST_URL.to_string(),
        }
    }
}

impl EdgeTtsConfig {
    /// Sets the impersonated browser build number.
    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = version.into();
        self
    }

    /// Sets a proxy URL for the voice list request.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Overrides the synthesis WebSocket endpoint.
    pub fn with_synthesis_url(mut self, url: impl Into<String>) -> Self {
        self.synthesis_url = url.into();
        self
    }

    /// Overrides the voice list endpoint.
    pub fn with_voice_list_url(mut self, url: impl Into<String>) -> Self {
        self.voice_list_url = url.into();
        self
    }

    /// Validates the configuration.
    ///
    /// # Returns
    /// * `Ok(())` - Configuration is valid
    /// * `Err(String)` - Description of the first problem found
    pub fn validate(&self) -> Result<(), String> {
        if self.client_version.trim().is_empty() {
            return Err("client_version must not be empty".to_string());
        }
        if !self.synthesis_url.starts_with("ws://") && !self.synthesis_url.starts_with("wss://") {
            return Err(format!(
                "synthesis_url must be a ws:// or wss:// URL (got {})",
                self.synthesis_url
            ));
        }
        if !self.voice_list_url.starts_with("http://")
            && !self.voice_list_url.starts_with("https://")
        {
            return Err(format!(
                "voice_list_url must be an http:// or https:// URL (got {})",
                self.voice_list_url
            ));
        }
        Ok(())
    }

    /// User-Agent impersonating the browser build, with the version in both
    /// the Chrome and Edg markers.
    pub fn user_agent(&self) -> String {
        format!(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/{v} Safari/537.36 Edg/{v}",
            v = self.client_version
        )
    }

    /// `Sec-MS-GEC-Version` query parameter value: the signature scheme tag
    /// concatenated with the client version.
    pub fn sec_ms_gec_version(&self) -> String {
        format!("1-{}", self.client_version)
    }
}
