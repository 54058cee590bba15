//! Streaming client for the Edge Read Aloud text-to-speech service.
//!
//! This crate speaks the line-oriented text/binary wire protocol used by the
//! consumer Read Aloud synthesis endpoint: one persistent, full-duplex
//! WebSocket carries `Field: value` header blocks with text or SSML bodies
//! outbound, and interleaved control messages plus binary audio frames
//! inbound. The protocol has no correlation ids; requests are strictly
//! sequential and answered in arrival order.
//!
//! # Features
//!
//! - **Streaming synthesis**: ordered lines in, per-chunk MP3 audio out,
//!   delivered through a callback as soon as each chunk's turn ends
//! - **Signed handshake**: time-bucketed `Sec-MS-GEC` request signature
//!   derived locally, no token round trip
//! - **Chunked pacing**: lines are split into bounded, codepoint-aligned
//!   chunks; chunks with nothing to synthesize never touch the network
//! - **Cancellation and resume**: a [`CancellationToken`] hard-closes the
//!   socket, the in-flight chunk settles with partial audio, and the caller
//!   can resume from any line index
//! - **Voice catalog**: voice list fetch with a built-in fallback set and
//!   market-priority ordering
//!
//! # Example
//!
//! ```rust,ignore
//! use readaloud_tts::{EdgeTtsConfig, SynthesisOptions, SynthesisSession};
//!
//! let mut session = SynthesisSession::new(EdgeTtsConfig::default())?;
//! let lines = vec!["Hello world".to_string()];
//! session
//!     .transform(
//!         &lines,
//!         SynthesisOptions::default(),
//!         |chunk| play(chunk.bytes),
//!         || println!("done"),
//!     )
//!     .await?;
//! ```
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod auth;
pub mod chunk;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod session;
pub mod ssml;
pub mod voices;

pub use chunk::{MIN_CHUNK_LEN, is_skippable, split_line};
pub use config::EdgeTtsConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use error::{TtsError, TtsResult};
pub use session::{AudioChunkResult, SynthesisOptions, SynthesisSession};
pub use ssml::max_message_size;
pub use voices::{Voice, VoiceCatalog};

// =============================================================================
// API Constants
// =============================================================================

/// Read Aloud synthesis WebSocket endpoint.
pub const SYNTHESIS_WS_URL: &str =
    "wss://speech.platform.bing.com/consumer/speech/synthesize/readaloud/edge/v1";

/// Read Aloud voice list endpoint.
pub const VOICE_LIST_URL: &str =
    "https://speech.platform.bing.com/consumer/speech/synthesize/readaloud/voices/list";

/// Shared trusted-client token, sent both as a query parameter and as the
/// secret half of the `Sec-MS-GEC` signature input.
pub const TRUSTED_CLIENT_TOKEN: &str = "6A5AA1D4EAFF4E9FB37E23D68491D6F4";

/// Origin header value expected by the endpoint (the Read Aloud browser
/// extension).
pub const EXTENSION_ORIGIN: &str = "chrome-extension://jdiccldimpdaibmpdkjnbmckianbfold";

/// Default browser build number embedded in the User-Agent and the
/// `Sec-MS-GEC-Version` query parameter.
pub const DEFAULT_CLIENT_VERSION: &str = "130.0.0.0";

/// Voice used when the caller does not pick one.
pub const DEFAULT_VOICE: &str =
    "Microsoft Server Speech Text to Speech Voice (zh-CN, XiaoxiaoNeural)";

/// Audio output format declared in the `speech.config` handshake frame.
pub const OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";

/// MIME designation carried on every delivered chunk, including zero-length
/// skipped ones.
pub const OUTPUT_CONTENT_TYPE: &str = "audio/mp3";

/// Wire-frame capacity assumed by [`max_message_size`].
pub const WEBSOCKET_MAX_SIZE: usize = 1 << 16;

/// Safety margin subtracted by [`max_message_size`].
pub const MESSAGE_SIZE_MARGIN: usize = 50;
