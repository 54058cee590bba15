//! Wire protocol framing.
//!
//! Outbound messages are text frames: an ordered block of `Field: value`
//! lines, a blank line, then the body. Inbound messages are either text
//! control frames (`Path:turn.start`, `Path:turn.end`, metadata) or binary
//! frames in which a `Path:audio` header marker precedes the raw audio
//! payload at a fixed offset. The protocol carries no correlation ids;
//! arrival order on the single socket is the only correlation mechanism.
//!
//! The byte-offset demultiplexing is fragile by nature, so it is isolated
//! here behind [`parse_message`] where it can be exercised with crafted byte
//! sequences.

use bytes::Bytes;
use serde_json::json;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::error::{TtsError, TtsResult};

// =============================================================================
// Wire Constants
// =============================================================================

/// Header marker that precedes binary audio payloads.
pub const AUDIO_MARKER: &[u8] = b"Path:audio";

/// Offset from the first byte of [`AUDIO_MARKER`] to the start of the audio
/// payload (marker plus its CRLF terminator).
pub const AUDIO_PAYLOAD_OFFSET: usize = 12;

/// Substring marking the end of one synthesis turn in inbound text frames.
pub const TURN_END_MARKER: &str = "turn.end";

/// Substring marking the start of one synthesis turn.
pub const TURN_START_MARKER: &str = "turn.start";

/// Millisecond-precision UTC timestamp, matching the fixed-width shape the
/// endpoint is used to seeing.
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

// =============================================================================
// Outbound Frames
// =============================================================================

/// Current `X-Timestamp` header value.
pub fn x_timestamp() -> String {
    OffsetDateTime::now_utc()
        .format(&TIMESTAMP_FORMAT)
        .unwrap_or_default()
}

/// Fresh random id for `ConnectionId` / `X-RequestId`.
pub fn fresh_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Builds the configuration frame sent once per connection, before any
/// synthesis request: output format plus metadata options (sentence
/// boundaries off, word boundaries on).
pub fn speech_config_frame(timestamp: &str) -> String {
    let body = json!({
        "context": {
            "synthesis": {
                "audio": {
                    "metadataoptions": {
                        "sentenceBoundaryEnabled": false,
                        "wordBoundaryEnabled": true,
                    },
                    "outputFormat": crate::OUTPUT_FORMAT,
                }
            }
        }
    });
    format!(
        "Path: speech.config\r\n\
         X-Timestamp: {timestamp}\r\n\
         Content-Type: application/json; charset=utf-8\r\n\
         \r\n\
         {body}\r\n"
    )
}

/// Builds a synthesis request frame around an SSML document.
pub fn ssml_frame(request_id: &str, timestamp: &str, ssml: &str) -> String {
    format!(
        "Path: ssml\r\n\
         X-RequestId: {request_id}\r\n\
         X-Timestamp: {timestamp}\r\n\
         Content-Type: application/ssml+xml\r\n\
         \r\n\
         {ssml}"
    )
}

// =============================================================================
// Inbound Frames
// =============================================================================

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Binary audio payload for the chunk currently in flight.
    Audio(Bytes),
    /// The server began streaming audio for the last request.
    TurnStart,
    /// The server finished streaming audio for the last request.
    TurnEnd,
    /// The socket closed; `reason` is non-empty only for remote failures.
    Closed { reason: Option<String> },
    /// Metadata or other control traffic with no effect on the stream.
    Other,
}

/// Decodes one WebSocket message into a [`ServerMessage`].
///
/// Binary frames without the `Path:audio` marker are a protocol violation
/// and surface as [`TtsError::Protocol`] rather than being swallowed.
pub fn parse_message(message: Message) -> TtsResult<ServerMessage> {
    match message {
        Message::Text(text) => {
            if text.contains(TURN_END_MARKER) {
                Ok(ServerMessage::TurnEnd)
            } else if text.contains(TURN_START_MARKER) {
                Ok(ServerMessage::TurnStart)
            } else {
                Ok(ServerMessage::Other)
            }
        }
        Message::Binary(data) => audio_payload(&data).map(ServerMessage::Audio),
        Message::Close(frame) => {
            let reason = frame
                .map(|f| f.reason.to_string())
                .filter(|r| !r.is_empty());
            Ok(ServerMessage::Closed { reason })
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(ServerMessage::Other),
    }
}

/// Extracts the audio payload from a binary frame: everything starting
/// [`AUDIO_PAYLOAD_OFFSET`] bytes past the first byte of [`AUDIO_MARKER`].
fn audio_payload(data: &Bytes) -> TtsResult<Bytes> {
    let index = data
        .windows(AUDIO_MARKER.len())
        .position(|window| window == AUDIO_MARKER)
        .ok_or_else(|| {
            TtsError::Protocol("binary frame is missing the Path:audio marker".to_string())
        })?;
    let start = (index + AUDIO_PAYLOAD_OFFSET).min(data.len());
    Ok(data.slice(start..))
}
