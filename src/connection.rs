//! Persistent socket lifecycle.
//!
//! One [`ConnectionManager`] owns exactly one WebSocket to the synthesis
//! endpoint. `connect()` is idempotent: an already-open socket is reused
//! across synthesis calls until the caller aborts it or the remote side
//! closes it. The initial `speech.config` frame is part of the handshake; a
//! connection only counts as open once that frame has been accepted for
//! send.

use std::time::SystemTime;

use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::config::EdgeTtsConfig;
use crate::error::{TtsError, TtsResult};
use crate::{EXTENSION_ORIGIN, TRUSTED_CLIENT_TOKEN, auth, protocol};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle state of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Closing,
}

/// Owns the persistent synthesis socket.
pub struct ConnectionManager {
    config: EdgeTtsConfig,
    state: ConnectionState,
    stream: Option<WsStream>,
}

impl ConnectionManager {
    /// Creates a manager in the `Closed` state; no I/O happens until
    /// [`connect`](Self::connect).
    pub fn new(config: EdgeTtsConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Closed,
            stream: None,
        }
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Opens the socket and performs the configuration handshake.
    ///
    /// A no-op when the connection is already open. The request carries a
    /// fresh connection id and a freshly derived signature; both are
    /// recomputed on every attempt.
    pub async fn connect(&mut self) -> TtsResult<()> {
        if self.state == ConnectionState::Open && self.stream.is_some() {
            debug!("reusing open synthesis connection");
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        let url = self.signed_url();
        let host = host_header(&url)?;

        let request = http::Request::builder()
            .uri(url.as_str())
            .header("Host", host)
            .header("Origin", EXTENSION_ORIGIN)
            .header("User-Agent", self.config.user_agent())
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .body(())
            .map_err(|e| {
                self.state = ConnectionState::Closed;
                TtsError::ConnectionFailed(e.to_string())
            })?;

        let (mut stream, _response) = match connect_async(request).await {
            Ok(pair) => pair,
            Err(e) => {
                self.state = ConnectionState::Closed;
                return Err(TtsError::ConnectionFailed(e.to_string()));
            }
        };

        let config_frame = protocol::speech_config_frame(&protocol::x_timestamp());
        if let Err(e) = stream.send(Message::Text(config_frame.into())).await {
            self.state = ConnectionState::Closed;
            return Err(TtsError::ConnectionFailed(format!(
                "handshake send failed: {e}"
            )));
        }

        self.stream = Some(stream);
        self.state = ConnectionState::Open;
        info!(url = %self.config.synthesis_url, "synthesis connection established");
        Ok(())
    }

    /// Sends one outbound text frame.
    pub async fn send_frame(&mut self, frame: String) -> TtsResult<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(TtsError::ConnectionFailed(
                "socket is not open".to_string(),
            ));
        };
        match stream.send(Message::Text(frame.into())).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_closed();
                Err(e.into())
            }
        }
    }

    /// Waits for the next inbound message. Returns `None` once the socket
    /// is gone, marking the connection closed.
    pub async fn next_message(&mut self) -> Option<Result<Message, WsError>> {
        let stream = self.stream.as_mut()?;
        let message = stream.next().await;
        if message.is_none() {
            self.mark_closed();
        }
        message
    }

    /// Discards messages that are already buffered without waiting for new
    /// ones. Frames straggling in after a turn-end must not be attributed to
    /// the next request.
    pub fn drain_ready(&mut self) {
        while let Some(stream) = self.stream.as_mut() {
            match stream.next().now_or_never() {
                Some(Some(Ok(message))) => {
                    debug!(binary = message.is_binary(), "discarding stale frame");
                }
                Some(Some(Err(e))) => {
                    warn!(error = %e, "socket error while draining stale frames");
                    self.mark_closed();
                }
                Some(None) => self.mark_closed(),
                None => break,
            }
        }
    }

    /// Hard, non-graceful close: drops the socket immediately. A pending
    /// read settles as if the socket closed without a reason.
    pub fn abort(&mut self) {
        if self.stream.take().is_some() {
            debug!("aborting synthesis connection");
        }
        self.state = ConnectionState::Closed;
    }

    /// Graceful close with a proper close frame exchange.
    pub async fn close(&mut self) -> TtsResult<()> {
        if let Some(mut stream) = self.stream.take() {
            self.state = ConnectionState::Closing;
            if let Err(e) = stream.close(None).await {
                debug!(error = %e, "close handshake failed");
            }
        }
        self.state = ConnectionState::Closed;
        Ok(())
    }

    /// Records that the remote side ended the connection.
    pub fn mark_closed(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Closed;
    }

    /// Builds the endpoint URL with the trusted-client token, a fresh
    /// connection id, and the current time-bucketed signature.
    fn signed_url(&self) -> String {
        format!(
            "{}?TrustedClientToken={}&ConnectionId={}&Sec-MS-GEC={}&Sec-MS-GEC-Version={}",
            self.config.synthesis_url,
            TRUSTED_CLIENT_TOKEN,
            protocol::fresh_request_id(),
            auth::sec_ms_gec(SystemTime::now()),
            self.config.sec_ms_gec_version(),
        )
    }
}

fn host_header(raw_url: &str) -> TtsResult<String> {
    let parsed = url::Url::parse(raw_url)
        .map_err(|e| TtsError::ConnectionFailed(format!("invalid synthesis URL: {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| TtsError::ConnectionFailed("synthesis URL has no host".to_string()))?;
    Ok(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}
