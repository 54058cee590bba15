//! SSML document construction.
//!
//! Every synthesis request carries one `<speak>` document with a single
//! `<voice>`/`<prosody>` pair. Text is trimmed and XML-escaped before it is
//! embedded.

use crate::protocol;
use crate::{MESSAGE_SIZE_MARGIN, WEBSOCKET_MAX_SIZE};

/// SSML namespace required by the endpoint.
pub const SSML_NAMESPACE: &str = "http://www.w3.org/2001/10/synthesis";

/// Escapes the five XML special characters.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Builds the SSML document for one chunk of text.
///
/// `rate` and `volume` are percentage strings (for example `"0%"`,
/// `"100%"`); `pitch` is a frequency offset string (for example `"0Hz"`).
pub fn build_ssml(text: &str, voice: &str, rate: &str, volume: &str, pitch: &str) -> String {
    format!(
        "<speak version=\"1.0\" xmlns=\"{SSML_NAMESPACE}\" xml:lang=\"en-US\">\
         <voice name=\"{voice}\">\
         <prosody pitch=\"{pitch}\" rate=\"{rate}\" volume=\"{volume}\">{}</prosody>\
         </voice></speak>",
        escape_xml(text.trim())
    )
}

/// Computes the notional maximum safe body size for a chunk: the wire-frame
/// capacity minus the bytes of the header-plus-SSML wrapper generated for an
/// empty body, minus a fixed margin.
///
/// Advisory only. Chunk boundaries are decided by [`crate::chunk::split_line`]
/// on a codepoint count; nothing enforces this byte budget.
pub fn max_message_size(voice: &str, rate: &str, volume: &str, pitch: &str) -> usize {
    let wrapper = protocol::ssml_frame(
        &protocol::fresh_request_id(),
        &protocol::x_timestamp(),
        &build_ssml("", voice, rate, volume, pitch),
    );
    WEBSOCKET_MAX_SIZE.saturating_sub(wrapper.len() + MESSAGE_SIZE_MARGIN)
}
