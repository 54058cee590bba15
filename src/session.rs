//! Synthesis session loop.
//!
//! A [`SynthesisSession`] drives the request/response cycle over one
//! persistent connection: lines are split into chunks, each chunk becomes
//! one SSML request, and the audio streamed back before the matching
//! turn-end is delivered through a per-chunk callback. The protocol has no
//! correlation ids, so exactly one request is in flight at a time and
//! inbound audio is attributed to it by arrival order alone.
//!
//! # Cancellation
//!
//! Cancellation is not an error. When the token fires, the socket is
//! hard-closed, the in-flight chunk settles with whatever audio already
//! arrived, that partial result is delivered, and iteration stops. The
//! caller can resume from any line index on a later call.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EdgeTtsConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{TtsError, TtsResult};
use crate::protocol::ServerMessage;
use crate::{DEFAULT_VOICE, OUTPUT_CONTENT_TYPE, chunk, protocol, ssml};

/// Per-call synthesis options.
#[derive(Debug, Clone, Default)]
pub struct SynthesisOptions {
    /// Full voice identifier; defaults to [`DEFAULT_VOICE`].
    pub voice: Option<String>,
    /// Speaking rate as a fraction; `0.25` becomes `+25%`-style `25%`.
    /// Defaults to `0%`.
    pub rate: Option<f64>,
    /// Output volume as a fraction; defaults to `100%`.
    pub volume: Option<f64>,
    /// Prosody pitch offset; defaults to the `0Hz` baseline.
    pub pitch: Option<String>,
    /// First line to synthesize, for resuming an interrupted run.
    pub start_line_index: usize,
    /// Maximum chunk length in codepoints, clamped up to
    /// [`chunk::MIN_CHUNK_LEN`].
    pub max_chunk_len: Option<usize>,
    /// Optional per-chunk deadline. The wire protocol has no timeout of its
    /// own; a stalled server otherwise blocks forever.
    pub chunk_timeout: Option<Duration>,
    /// Cooperative stop signal shared with the caller.
    pub cancellation: CancellationToken,
}

impl SynthesisOptions {
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_start_line_index(mut self, index: usize) -> Self {
        self.start_line_index = index;
        self
    }

    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// One delivered chunk of synthesized audio.
///
/// `bytes` is empty for chunks with nothing to synthesize; those are
/// delivered without any network traffic so the caller's chunk accounting
/// stays aligned with the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunkResult {
    pub bytes: Bytes,
    /// Position of this chunk within its line, starting at zero per line.
    pub chunk_index: usize,
    /// Index of the input line this chunk came from.
    pub line_index: usize,
    pub content_type: &'static str,
}

/// Drives synthesis requests over one owned connection.
pub struct SynthesisSession {
    connection: ConnectionManager,
}

impl SynthesisSession {
    /// Validates the configuration and creates a session. No I/O happens
    /// until [`transform`](Self::transform).
    pub fn new(config: EdgeTtsConfig) -> TtsResult<Self> {
        config.validate().map_err(TtsError::InvalidConfiguration)?;
        Ok(Self {
            connection: ConnectionManager::new(config),
        })
    }

    /// Current state of the underlying connection.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Synthesizes `lines` in order, delivering one [`AudioChunkResult`]
    /// per chunk through `on_chunk`.
    ///
    /// Results arrive strictly in chunk order. `on_complete` fires exactly
    /// once on every non-error exit, including cancellation; it does not
    /// fire when an error is returned. There are no internal retries: after
    /// an error the caller resumes with `start_line_index`.
    pub async fn transform<F, C>(
        &mut self,
        lines: &[String],
        options: SynthesisOptions,
        mut on_chunk: F,
        on_complete: C,
    ) -> TtsResult<()>
    where
        F: FnMut(AudioChunkResult),
        C: FnOnce(),
    {
        let voice = options.voice.as_deref().unwrap_or(DEFAULT_VOICE);
        let rate = percent(options.rate.unwrap_or(0.0));
        let volume = percent(options.volume.unwrap_or(1.0));
        let pitch = options.pitch.as_deref().unwrap_or("0Hz");
        let max_chunk_len = chunk::effective_chunk_len(options.max_chunk_len);

        self.connection.connect().await?;
        info!(
            voice,
            rate,
            volume,
            start_line = options.start_line_index,
            total_lines = lines.len(),
            "starting synthesis run"
        );

        'lines: for (line_index, line) in lines.iter().enumerate().skip(options.start_line_index) {
            if options.cancellation.is_cancelled() {
                break;
            }

            for (chunk_index, piece) in chunk::split_line(line, max_chunk_len).into_iter().enumerate()
            {
                if options.cancellation.is_cancelled() {
                    break 'lines;
                }

                let bytes = if chunk::is_skippable(&piece) {
                    debug!(line_index, chunk_index, "skipping chunk with no synthesizable content");
                    Bytes::new()
                } else {
                    self.synthesize_chunk(&piece, voice, &rate, &volume, pitch, &options)
                        .await?
                };

                debug!(line_index, chunk_index, bytes = bytes.len(), "chunk delivered");
                on_chunk(AudioChunkResult {
                    bytes,
                    chunk_index,
                    line_index,
                    content_type: OUTPUT_CONTENT_TYPE,
                });

                if options.cancellation.is_cancelled() {
                    break 'lines;
                }
            }
        }

        // A triggered token must leave the socket hard-closed even when it
        // fired between receives, not just mid-turn.
        if options.cancellation.is_cancelled() {
            self.connection.abort();
        }

        on_complete();
        Ok(())
    }

    /// Sends one SSML request and collects its audio up to the turn-end.
    async fn synthesize_chunk(
        &mut self,
        text: &str,
        voice: &str,
        rate: &str,
        volume: &str,
        pitch: &str,
        options: &SynthesisOptions,
    ) -> TtsResult<Bytes> {
        // A close between chunks is benign; reopen before sending.
        self.connection.connect().await?;

        // Anything still buffered belongs to an earlier turn and must not
        // leak into this chunk's audio.
        self.connection.drain_ready();

        let ssml = ssml::build_ssml(text, voice, rate, volume, pitch);
        let frame = protocol::ssml_frame(&protocol::fresh_request_id(), &protocol::x_timestamp(), &ssml);
        self.connection.send_frame(frame).await?;

        match options.chunk_timeout {
            Some(deadline) => {
                match tokio::time::timeout(
                    deadline,
                    receive_turn(&mut self.connection, &options.cancellation),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(timeout_ms = deadline.as_millis() as u64, "chunk timed out");
                        self.connection.abort();
                        Err(TtsError::Timeout)
                    }
                }
            }
            None => receive_turn(&mut self.connection, &options.cancellation).await,
        }
    }

    /// Hard-closes the connection immediately.
    pub fn abort(&mut self) {
        self.connection.abort();
    }

    /// Gracefully closes the connection.
    pub async fn close(&mut self) -> TtsResult<()> {
        self.connection.close().await
    }
}

/// Reads inbound messages until the turn ends, accumulating audio.
///
/// Resolution rules, in order:
/// - cancellation: abort the socket, resolve with the partial buffer;
/// - turn-end: resolve with the full buffer;
/// - close with a non-empty reason: remote failure for this chunk;
/// - close or stream end without a reason: resolve with the partial buffer.
async fn receive_turn(
    connection: &mut ConnectionManager,
    cancellation: &CancellationToken,
) -> TtsResult<Bytes> {
    let mut buffer = BytesMut::new();
    loop {
        let received = tokio::select! {
            biased;
            _ = cancellation.cancelled() => None,
            message = connection.next_message() => Some(message),
        };

        let Some(message) = received else {
            debug!(bytes = buffer.len(), "cancelled mid-turn, settling with partial audio");
            connection.abort();
            return Ok(buffer.freeze());
        };

        let Some(message) = message else {
            debug!(bytes = buffer.len(), "stream ended mid-turn, settling with partial audio");
            return Ok(buffer.freeze());
        };

        let message = match message {
            Ok(message) => message,
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                connection.mark_closed();
                return Ok(buffer.freeze());
            }
            Err(e) => {
                connection.mark_closed();
                return Err(e.into());
            }
        };

        match protocol::parse_message(message)? {
            ServerMessage::Audio(data) => buffer.extend_from_slice(&data),
            ServerMessage::TurnEnd => return Ok(buffer.freeze()),
            ServerMessage::Closed { reason: Some(reason) } => {
                warn!(%reason, "remote closed the connection with an error");
                connection.mark_closed();
                return Err(TtsError::RemoteClosed(reason));
            }
            ServerMessage::Closed { reason: None } => {
                connection.mark_closed();
                return Ok(buffer.freeze());
            }
            ServerMessage::TurnStart | ServerMessage::Other => {}
        }
    }
}

/// Formats a fractional value as the floor-percentage string the prosody
/// attributes use.
fn percent(value: f64) -> String {
    format!("{}%", (value * 100.0).floor() as i64)
}
