// End-to-end session tests against an in-process websocket peer.

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use callstream::audio::{CaptureSource, NullSink, PlaybackSink, SampleBlock, SyntheticSource};
use callstream::reconnect::ReconnectPolicy;
use callstream::session::{SessionConfig, SessionEvent, SessionState, VoiceSession};
use callstream::transport::TransportConfig;
use callstream::{codec, StreamError};

type ServerWs = WebSocketStream<TcpStream>;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept_ws(listener: &TcpListener) -> ServerWs {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Read the next JSON event from the client, skipping non-text frames.
async fn next_json(ws: &mut ServerWs) -> Option<serde_json::Value> {
    while let Some(message) = ws.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

fn fast_config(url: &str) -> SessionConfig {
    SessionConfig {
        transport: TransportConfig {
            url: url.to_string(),
            connect_timeout: Duration::from_secs(2),
            bearer_token: None,
        },
        reconnect: ReconnectPolicy {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            max_attempts: 5,
        },
        ..Default::default()
    }
}

fn tone_source() -> SyntheticSource {
    SyntheticSource::new(8_000, 440.0, Duration::from_secs(30))
}

fn make_session(url: &str) -> VoiceSession {
    VoiceSession::new(fast_config(url), Box::new(tone_source()), Arc::new(NullSink))
}

async fn wait_for_state(session: &VoiceSession, target: SessionState) {
    let mut rx = session.subscribe_state();
    timeout(Duration::from_secs(5), async {
        loop {
            if *rx.borrow() == target {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached {:?}, stuck at {:?}", target, session.state()));
}

#[tokio::test]
async fn test_start_is_sent_first_and_server_sid_is_adopted() {
    let (listener, url) = bind().await;
    let session = make_session(&url);

    // The handshake needs both ends; accept concurrently with start
    let (started, mut ws) = tokio::join!(session.start(), accept_ws(&listener));
    started.unwrap();

    // First event on the wire must be `start`, carrying the client-chosen id
    let first = next_json(&mut ws).await.unwrap();
    assert_eq!(first["event"], "start");
    let client_sid = first["streamSid"].as_str().unwrap().to_string();
    assert_eq!(first["start"]["streamSid"].as_str().unwrap(), client_sid);
    assert!(first["start"]["extraData"].is_string());

    // Server confirms with its own id before any media flows
    ws.send(Message::Text(
        r#"{"event":"start","streamSid":"SRVXYZ"}"#.to_string(),
    ))
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.stream_sid().await, "SRVXYZ");

    session.arm_streaming();
    wait_for_state(&session, SessionState::Streaming).await;

    let media = timeout(Duration::from_secs(5), next_json(&mut ws))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(media["event"], "media");
    assert_eq!(media["streamSid"], "SRVXYZ");

    // Payload is one whole frame
    let payload = media["media"]["payload"].as_str().unwrap();
    assert_eq!(codec::decode(payload).unwrap().len(), codec::FRAME_SAMPLES);

    session.stop().await.unwrap();
}

struct CollectingSink {
    chunks: Mutex<Vec<Vec<f32>>>,
}

impl PlaybackSink for CollectingSink {
    fn play(&self, samples: Vec<f32>, _at: tokio::time::Instant) {
        self.chunks.lock().unwrap().push(samples);
    }
}

#[tokio::test]
async fn test_inbound_media_plays_and_malformed_frames_drop() {
    let (listener, url) = bind().await;
    let sink = Arc::new(CollectingSink {
        chunks: Mutex::new(Vec::new()),
    });
    let session = VoiceSession::new(fast_config(&url), Box::new(tone_source()), sink.clone());

    let (started, mut ws) = tokio::join!(session.start(), accept_ws(&listener));
    started.unwrap();
    next_json(&mut ws).await.unwrap(); // start

    // One valid frame and one with an odd byte count
    let samples: Vec<i16> = (0..160).map(|i| (i * 7) as i16).collect();
    let valid = serde_json::json!({
        "event": "media",
        "media": {"payload": codec::encode(&samples)}
    });
    ws.send(Message::Text(valid.to_string())).await.unwrap();
    ws.send(Message::Text(
        r#"{"event":"media","media":{"payload":"AQ=="}}"#.to_string(),
    ))
    .await
    .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;

    let chunks = sink.chunks.lock().unwrap().clone();
    assert_eq!(chunks.len(), 1, "only the valid frame reaches the sink");
    assert_eq!(chunks[0].len(), 160);
    assert!((chunks[0][1] - 7.0 / 32768.0).abs() < f32::EPSILON);

    let stats = session.stats().await;
    assert_eq!(stats.malformed_frames, 1);
    // A malformed frame never terminates the session
    assert_eq!(session.state(), SessionState::Connected);

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent_and_never_reconnects() {
    let (listener, url) = bind().await;
    let session = make_session(&url);
    let mut events = session.subscribe_events();

    let (started, mut ws) = tokio::join!(session.start(), accept_ws(&listener));
    started.unwrap();
    next_json(&mut ws).await.unwrap(); // start
    session.arm_streaming();

    tokio::time::sleep(Duration::from_millis(100)).await;
    session.stop().await.unwrap();
    session.stop().await.unwrap(); // second stop must be a no-op

    // Drain everything the server saw; exactly one stop, then close
    let mut stops = 0;
    while let Some(event) = next_json(&mut ws).await {
        if event["event"] == "stop" {
            stops += 1;
        }
    }
    assert_eq!(stops, 1);
    assert_eq!(session.state(), SessionState::Idle);

    // A deliberate stop never schedules a reconnect attempt
    tokio::time::sleep(Duration::from_millis(300)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, SessionEvent::ReconnectScheduled { .. }),
            "deliberate stop scheduled a reconnect"
        );
    }
    assert!(
        timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err(),
        "no new connection may be attempted after a deliberate stop"
    );
}

#[tokio::test]
async fn test_remote_stop_tears_down_without_reconnecting() {
    let (listener, url) = bind().await;
    let session = make_session(&url);

    let (started, mut ws) = tokio::join!(session.start(), accept_ws(&listener));
    started.unwrap();
    next_json(&mut ws).await.unwrap(); // start

    ws.send(Message::Text(r#"{"event":"stop"}"#.to_string()))
        .await
        .unwrap();

    wait_for_state(&session, SessionState::Disconnected).await;

    assert!(
        timeout(Duration::from_millis(400), listener.accept())
            .await
            .is_err(),
        "server-initiated stop must not trigger reconnection"
    );

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_abnormal_close_reconnects_and_resets_backoff() {
    let (listener, url) = bind().await;
    let session = make_session(&url);
    let mut events = session.subscribe_events();

    let (started, ws) = tokio::join!(session.start(), accept_ws(&listener));
    started.unwrap();
    // Drop the socket without a close handshake
    drop(ws);

    // First attempt is announced with the base delay
    let scheduled = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(SessionEvent::ReconnectScheduled { attempt, delay }) = events.recv().await {
                return (attempt, delay);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(scheduled.0, 1);
    assert_eq!(scheduled.1, Duration::from_millis(50));

    // The retry lands on the same listener and re-sends `start`
    let mut ws2 = timeout(Duration::from_secs(5), accept_ws(&listener))
        .await
        .unwrap();
    let start = next_json(&mut ws2).await.unwrap();
    assert_eq!(start["event"], "start");

    wait_for_state(&session, SessionState::Connected).await;
    assert_eq!(session.stats().await.reconnect_attempts, 0);

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_reconnects_require_manual_retry() {
    // Bind to learn a free port, then refuse connections on it
    let (listener, url) = bind().await;
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = fast_config(&url);
    config.reconnect = ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_attempts: 2,
    };
    let session = VoiceSession::new(config, Box::new(tone_source()), Arc::new(NullSink));
    let mut events = session.subscribe_events();

    session.start().await.unwrap();
    wait_for_state(&session, SessionState::Failed).await;

    let mut saw_terminal = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Terminal(reason) = event {
            assert!(reason.contains("exhausted"));
            saw_terminal = true;
        }
    }
    assert!(saw_terminal, "exhaustion must surface a terminal event");

    // Manual reconnect resets the counter and attempts immediately
    let listener = TcpListener::bind(addr).await.unwrap();
    let (reconnected, mut ws) = tokio::join!(session.reconnect_now(), accept_ws(&listener));
    reconnected.unwrap();
    assert_eq!(next_json(&mut ws).await.unwrap()["event"], "start");
    wait_for_state(&session, SessionState::Connected).await;

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_frames_drop_while_transport_is_down() {
    // No listener at all: capture keeps running, frames are counted+dropped
    let (listener, url) = bind().await;
    drop(listener);

    let session = make_session(&url);
    session.start().await.unwrap();
    session.arm_streaming();

    tokio::time::sleep(Duration::from_millis(400)).await;
    let stats = session.stats().await;
    assert!(stats.frames_dropped > 0, "dropped frames must be counted");
    assert_eq!(stats.frames_sent, 0);

    session.stop().await.unwrap();
}

struct DeniedSource;

#[async_trait::async_trait]
impl CaptureSource for DeniedSource {
    async fn start(&mut self) -> Result<mpsc::Receiver<SampleBlock>> {
        Err(StreamError::PermissionDenied("user refused the microphone".into()).into())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        false
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn name(&self) -> &str {
        "denied"
    }
}

#[tokio::test]
async fn test_permission_denied_is_terminal_and_fails_start() {
    let (listener, url) = bind().await;
    let session = VoiceSession::new(fast_config(&url), Box::new(DeniedSource), Arc::new(NullSink));
    let mut events = session.subscribe_events();

    assert!(session.start().await.is_err());
    assert_eq!(session.state(), SessionState::Idle);

    let mut saw_terminal = false;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Terminal(reason) = event {
            assert!(reason.contains("permission denied"));
            saw_terminal = true;
        }
    }
    assert!(saw_terminal);
    drop(listener);
}

#[tokio::test]
async fn test_restart_tears_down_the_previous_run() {
    let (listener, url) = bind().await;
    let session = make_session(&url);

    let (started, mut ws) = tokio::join!(session.start(), accept_ws(&listener));
    started.unwrap();
    next_json(&mut ws).await.unwrap(); // first run's start
    let first_sid = session.stream_sid().await;

    // Exactly-one-active: starting again ends the first run first
    let (restarted, mut ws2) = tokio::join!(session.start(), accept_ws(&listener));
    restarted.unwrap();
    let start2 = next_json(&mut ws2).await.unwrap();
    assert_eq!(start2["event"], "start");
    assert_ne!(start2["streamSid"].as_str().unwrap(), first_sid);

    // The first connection saw a stop and then closed
    let mut stops = 0;
    while let Some(event) = next_json(&mut ws).await {
        if event["event"] == "stop" {
            stops += 1;
        }
    }
    assert_eq!(stops, 1);

    session.stop().await.unwrap();
}
