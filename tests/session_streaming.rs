//! End-to-end session tests against an in-process mock Read Aloud server.
//!
//! The mock speaks the real wire shapes: `Path:turn.start` / `Path:turn.end`
//! text frames and binary frames with the `Path:audio` header marker, so the
//! full send/demux/accumulate path is exercised over a real WebSocket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{accept_async, accept_hdr_async};
use tokio_util::sync::CancellationToken;

use readaloud_tts::{
    ConnectionState, EdgeTtsConfig, OUTPUT_CONTENT_TYPE, OUTPUT_FORMAT, SynthesisOptions,
    SynthesisSession, TRUSTED_CLIENT_TOKEN, TtsError,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Scripted server behavior for one synthesis request.
#[derive(Debug, Clone, Copy)]
enum ServerScript {
    /// turn.start, audio split over two frames, metadata, turn.end.
    Standard,
    /// First request standard, second closed with an error reason.
    ErrorCloseOnSecondRequest,
    /// turn.start, one audio frame, then a reasonless close.
    PartialThenClose,
    /// turn.start, one audio frame, then silence.
    AudioThenStall,
    /// Standard turn, then a stale audio frame after the turn.end.
    StragglerAfterTurnEnd,
    /// Reads requests but never answers.
    NeverRespond,
}

fn audio_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = b"X-RequestId:0\r\nContent-Type:audio/mpeg\r\nPath:audio\r\n".to_vec();
    frame.extend_from_slice(payload);
    frame
}

fn turn_start() -> Message {
    Message::Text("X-RequestId:0\r\nPath:turn.start\r\n\r\n{}".into())
}

fn turn_end() -> Message {
    Message::Text("X-RequestId:0\r\nPath:turn.end\r\n\r\n{}".into())
}

fn metadata() -> Message {
    Message::Text("X-RequestId:0\r\nPath:audio.metadata\r\n\r\n{}".into())
}

fn payload(request_number: usize) -> Vec<u8> {
    format!("mp3-data-{request_number}").into_bytes()
}

async fn send_standard_turn(
    ws: &mut tokio_tungstenite::WebSocketStream<TcpStream>,
    request_number: usize,
) -> Result<(), BoxError> {
    let bytes = payload(request_number);
    let mid = bytes.len() / 2;
    ws.send(turn_start()).await?;
    ws.send(Message::Binary(audio_frame(&bytes[..mid]).into())).await?;
    ws.send(Message::Binary(audio_frame(&bytes[mid..]).into())).await?;
    ws.send(metadata()).await?;
    ws.send(turn_end()).await?;
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    script: ServerScript,
    requests: Arc<AtomicUsize>,
) -> Result<(), BoxError> {
    let mut ws = accept_async(stream).await?;

    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) if text.contains("Path: ssml") => {
                let n = requests.fetch_add(1, Ordering::SeqCst);
                match script {
                    ServerScript::Standard => send_standard_turn(&mut ws, n).await?,
                    ServerScript::ErrorCloseOnSecondRequest => {
                        if n == 0 {
                            send_standard_turn(&mut ws, n).await?;
                        } else {
                            ws.close(Some(CloseFrame {
                                code: CloseCode::Error,
                                reason: "server busy".into(),
                            }))
                            .await?;
                            return Ok(());
                        }
                    }
                    ServerScript::PartialThenClose => {
                        ws.send(turn_start()).await?;
                        ws.send(Message::Binary(audio_frame(b"partial").into())).await?;
                        ws.close(None).await?;
                        return Ok(());
                    }
                    ServerScript::AudioThenStall => {
                        ws.send(turn_start()).await?;
                        ws.send(Message::Binary(audio_frame(b"partial").into())).await?;
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                    ServerScript::StragglerAfterTurnEnd => {
                        send_standard_turn(&mut ws, n).await?;
                        ws.send(Message::Binary(audio_frame(b"stale-frame").into())).await?;
                    }
                    ServerScript::NeverRespond => {}
                }
            }
            Message::Text(_) => {} // speech.config
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

/// Starts a scripted mock server, returning its ws:// URL and a counter of
/// synthesis requests it has seen.
async fn start_mock(script: ServerScript) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));

    let counter = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let counter = counter.clone();
            tokio::spawn(async move {
                let _ = handle_connection(stream, script, counter).await;
            });
        }
    });

    (format!("ws://{addr}/tts"), requests)
}

fn session_for(url: &str) -> SynthesisSession {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    SynthesisSession::new(EdgeTtsConfig::default().with_synthesis_url(url)).unwrap()
}

fn lines(texts: &[&str]) -> Vec<String> {
    texts.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_streams_one_chunk_per_line_in_order() {
    let (url, requests) = start_mock(ServerScript::Standard).await;
    let mut session = session_for(&url);

    let mut results = Vec::new();
    let mut completions = 0;
    session
        .transform(
            &lines(&["hello world", "second line"]),
            SynthesisOptions::default(),
            |chunk| results.push(chunk),
            || completions += 1,
        )
        .await
        .unwrap();

    assert_eq!(requests.load(Ordering::SeqCst), 2);
    assert_eq!(completions, 1);
    assert_eq!(results.len(), 2);
    for (i, chunk) in results.iter().enumerate() {
        assert_eq!(chunk.line_index, i);
        assert_eq!(chunk.chunk_index, 0);
        assert_eq!(chunk.bytes.as_ref(), payload(i).as_slice());
        assert_eq!(chunk.content_type, OUTPUT_CONTENT_TYPE);
    }
}

#[tokio::test]
async fn test_long_line_splits_into_ordered_chunks() {
    let (url, requests) = start_mock(ServerScript::Standard).await;
    let mut session = session_for(&url);

    let long_line = "a".repeat(250);
    let mut results = Vec::new();
    session
        .transform(
            &lines(&[&long_line]),
            SynthesisOptions::default().with_voice("test-voice"),
            |chunk| results.push(chunk),
            || {},
        )
        .await
        .unwrap();

    // 250 codepoints at the 100-codepoint floor is three chunks.
    assert_eq!(requests.load(Ordering::SeqCst), 3);
    assert_eq!(results.len(), 3);
    for (i, chunk) in results.iter().enumerate() {
        assert_eq!(chunk.line_index, 0);
        assert_eq!(chunk.chunk_index, i);
        assert_eq!(chunk.bytes.as_ref(), payload(i).as_slice());
    }
}

#[tokio::test]
async fn test_skippable_lines_never_touch_the_network() {
    let (url, requests) = start_mock(ServerScript::Standard).await;
    let mut session = session_for(&url);

    let mut results = Vec::new();
    session
        .transform(
            &lines(&["…——!?、。", "hello"]),
            SynthesisOptions::default(),
            |chunk| results.push(chunk),
            || {},
        )
        .await
        .unwrap();

    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert_eq!(results.len(), 2);
    assert!(results[0].bytes.is_empty());
    assert_eq!(results[0].line_index, 0);
    assert_eq!(results[0].content_type, OUTPUT_CONTENT_TYPE);
    assert_eq!(results[1].bytes.as_ref(), payload(0).as_slice());
}

#[tokio::test]
async fn test_resume_from_start_line_index() {
    let (url, requests) = start_mock(ServerScript::Standard).await;
    let mut session = session_for(&url);

    let mut results = Vec::new();
    session
        .transform(
            &lines(&["line zero", "line one", "line two"]),
            SynthesisOptions::default().with_start_line_index(2),
            |chunk| results.push(chunk),
            || {},
        )
        .await
        .unwrap();

    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].line_index, 2);
}

#[tokio::test]
async fn test_remote_error_close_fails_only_the_inflight_chunk() {
    let (url, _requests) = start_mock(ServerScript::ErrorCloseOnSecondRequest).await;
    let mut session = session_for(&url);

    let mut results = Vec::new();
    let mut completions = 0;
    let outcome = session
        .transform(
            &lines(&["first line", "second line"]),
            SynthesisOptions::default(),
            |chunk| results.push(chunk),
            || completions += 1,
        )
        .await;

    match outcome {
        Err(TtsError::RemoteClosed(reason)) => assert_eq!(reason, "server busy"),
        other => panic!("expected RemoteClosed, got {other:?}"),
    }
    // The first chunk was already delivered and stands.
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].bytes.as_ref(), payload(0).as_slice());
    assert_eq!(completions, 0);
}

#[tokio::test]
async fn test_reasonless_close_settles_with_partial_audio() {
    let (url, _requests) = start_mock(ServerScript::PartialThenClose).await;
    let mut session = session_for(&url);

    let mut results = Vec::new();
    let mut completions = 0;
    session
        .transform(
            &lines(&["only line"]),
            SynthesisOptions::default(),
            |chunk| results.push(chunk),
            || completions += 1,
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].bytes.as_ref(), b"partial");
    assert_eq!(completions, 1);
}

#[tokio::test]
async fn test_cancellation_delivers_partial_audio_without_error() {
    let (url, requests) = start_mock(ServerScript::AudioThenStall).await;
    let mut session = session_for(&url);

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let mut results = Vec::new();
    let mut completions = 0;
    session
        .transform(
            &lines(&["first line", "never reached"]),
            SynthesisOptions::default().with_cancellation(token),
            |chunk| results.push(chunk),
            || completions += 1,
        )
        .await
        .unwrap();

    // The stalled chunk settled with the audio that had already arrived,
    // the remaining line was never requested, and completion still fired.
    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].bytes.as_ref(), b"partial");
    assert_eq!(completions, 1);
    assert_eq!(session.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_cancellation_between_chunks_hard_closes_the_socket() {
    let (url, requests) = start_mock(ServerScript::Standard).await;
    let mut session = session_for(&url);

    // Cancel from inside the first delivery, with nothing in flight: the
    // first line is skippable, so no request has gone out when the token
    // fires. The socket must still end up hard-closed.
    let token = CancellationToken::new();
    let trigger = token.clone();

    let mut results = Vec::new();
    let mut completions = 0;
    session
        .transform(
            &lines(&["…——!?、。", "never requested"]),
            SynthesisOptions::default().with_cancellation(token),
            |chunk| {
                trigger.cancel();
                results.push(chunk);
            },
            || completions += 1,
        )
        .await
        .unwrap();

    assert_eq!(requests.load(Ordering::SeqCst), 0);
    assert_eq!(results.len(), 1);
    assert!(results[0].bytes.is_empty());
    assert_eq!(completions, 1);
    assert_eq!(session.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_chunk_timeout_aborts_the_run() {
    let (url, _requests) = start_mock(ServerScript::NeverRespond).await;
    let mut session = session_for(&url);

    let mut completions = 0;
    let outcome = session
        .transform(
            &lines(&["stuck line"]),
            SynthesisOptions::default().with_chunk_timeout(Duration::from_millis(200)),
            |_| {},
            || completions += 1,
        )
        .await;

    assert!(matches!(outcome, Err(TtsError::Timeout)));
    assert_eq!(completions, 0);
}

#[tokio::test]
async fn test_stale_frames_do_not_leak_into_the_next_run() {
    let (url, _requests) = start_mock(ServerScript::StragglerAfterTurnEnd).await;
    let mut session = session_for(&url);

    let mut first = Vec::new();
    session
        .transform(
            &lines(&["first run"]),
            SynthesisOptions::default(),
            |chunk| first.push(chunk),
            || {},
        )
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].bytes.as_ref(), payload(0).as_slice());

    // Let the straggler sent after the first turn.end land in the socket
    // buffer before the next request goes out on the same connection.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut second = Vec::new();
    session
        .transform(
            &lines(&["second run"]),
            SynthesisOptions::default(),
            |chunk| second.push(chunk),
            || {},
        )
        .await
        .unwrap();

    assert_eq!(second.len(), 1);
    assert_eq!(second[0].bytes.as_ref(), payload(1).as_slice());
}

#[derive(Debug, Default, Clone)]
struct CapturedHandshake {
    uri: String,
    origin: String,
    user_agent: String,
    first_frame: String,
}

/// Mock that records the upgrade request and the first text frame, then
/// serves one standard turn.
async fn start_capturing_mock() -> (String, Arc<Mutex<CapturedHandshake>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Arc::new(Mutex::new(CapturedHandshake::default()));

    let sink = captured.clone();
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let header_sink = sink.clone();
        let callback = move |request: &tokio_tungstenite::tungstenite::handshake::server::Request,
                             response: tokio_tungstenite::tungstenite::handshake::server::Response| {
            let mut captured = header_sink.lock().unwrap();
            captured.uri = request.uri().to_string();
            captured.origin = header_value(request, "Origin");
            captured.user_agent = header_value(request, "User-Agent");
            Ok(response)
        };
        let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
            return;
        };

        while let Some(Ok(msg)) = ws.next().await {
            match msg {
                Message::Text(text) if text.contains("Path: ssml") => {
                    let _ = send_standard_turn(&mut ws, 0).await;
                }
                Message::Text(text) => {
                    let mut captured = sink.lock().unwrap();
                    if captured.first_frame.is_empty() {
                        captured.first_frame = text.to_string();
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    (format!("ws://{addr}/tts"), captured)
}

fn header_value(
    request: &tokio_tungstenite::tungstenite::handshake::server::Request,
    name: &str,
) -> String {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_handshake_carries_signature_and_speech_config() {
    let (url, captured) = start_capturing_mock().await;
    let mut session = session_for(&url);

    session
        .transform(&lines(&["hello"]), SynthesisOptions::default(), |_| {}, || {})
        .await
        .unwrap();

    let captured = captured.lock().unwrap().clone();

    assert!(captured.uri.contains(&format!("TrustedClientToken={TRUSTED_CLIENT_TOKEN}")));
    assert!(captured.uri.contains("ConnectionId="));
    assert!(captured.uri.contains("Sec-MS-GEC="));
    assert!(captured.uri.contains("Sec-MS-GEC-Version=1-130.0.0.0"));
    assert!(captured.origin.starts_with("chrome-extension://"));
    assert!(captured.user_agent.contains("Chrome/130.0.0.0"));
    assert!(captured.user_agent.contains("Edg/130.0.0.0"));

    // The very first frame on the socket is the output-format declaration.
    assert!(captured.first_frame.contains("Path: speech.config"));
    assert!(captured.first_frame.contains(OUTPUT_FORMAT));
}
