use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::state::{SessionEvent, SessionState};
use super::stats::SessionStats;
use crate::audio::{
    CapturePipeline, CaptureSource, FrameTap, PlaybackScheduler, PlaybackSink, SampleBlock,
};
use crate::codec;
use crate::error::StreamError;
use crate::reconnect::ReconnectState;
use crate::transport::{
    send_termination, CallTermination, ClientEvent, MediaPayload, ServerEvent, StreamTransport,
    TransportSender, TransportUpdate,
};
use crate::turn::{TurnState, TurnTracker};

/// A voice streaming session: one logical conversation over one persistent
/// socket, with concurrently running capture and playback pipelines.
///
/// The session object is the single authority over [`SessionState`]; the UI
/// shell observes it through `watch`/`broadcast` subscriptions and drives it
/// through the public methods. At most one connection is live at a time, and
/// starting a session tears down any run already in progress.
pub struct VoiceSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,

    state_tx: watch::Sender<SessionState>,
    events_tx: broadcast::Sender<SessionEvent>,
    level_tx: watch::Sender<f32>,

    /// Active stream id; replaced when the server confirms its own
    stream_sid: RwLock<String>,

    /// Emit surface of the current connection, if any
    sender_tx: watch::Sender<Option<TransportSender>>,
    transport: Mutex<Option<StreamTransport>>,

    reconnect: Mutex<ReconnectState>,
    pending_reconnect: Mutex<Option<JoinHandle<()>>>,

    source: Mutex<Box<dyn CaptureSource>>,
    playback: PlaybackScheduler,

    /// Whether the capture path is armed to emit frames
    streaming: AtomicBool,
    /// Whether a run is in progress (between start and stop)
    active: AtomicBool,
    /// Bumped on every start/stop so stale reconnect attempts and loops
    /// from a previous run fall through
    generation: AtomicU64,

    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    malformed_frames: AtomicU64,
    started_at: Mutex<Option<chrono::DateTime<Utc>>>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        source: Box<dyn CaptureSource>,
        sink: Arc<dyn PlaybackSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (events_tx, _) = broadcast::channel(64);
        let (level_tx, _) = watch::channel(0.0);
        let (sender_tx, _) = watch::channel(None);
        let playback = PlaybackScheduler::new(config.playback.clone(), sink);

        Self {
            inner: Arc::new(SessionInner {
                config,
                state_tx,
                events_tx,
                level_tx,
                stream_sid: RwLock::new(String::new()),
                sender_tx,
                transport: Mutex::new(None),
                reconnect: Mutex::new(ReconnectState::default()),
                pending_reconnect: Mutex::new(None),
                source: Mutex::new(source),
                playback,
                streaming: AtomicBool::new(false),
                active: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                frames_sent: AtomicU64::new(0),
                frames_dropped: AtomicU64::new(0),
                malformed_frames: AtomicU64::new(0),
                started_at: Mutex::new(None),
            }),
        }
    }

    /// Start the session: acquire the capture source, open the socket, and
    /// send `start`. An already-active session is torn down first.
    ///
    /// Connection failures do not fail the call; they feed the reconnection
    /// controller. Only capture acquisition errors (notably permission
    /// denial) are returned.
    pub async fn start(&self) -> Result<()> {
        if self.inner.active.load(Ordering::SeqCst) {
            info!("Session already active, tearing down before restart");
            self.stop().await?;
        }

        let inner = &self.inner;
        inner.active.store(true, Ordering::SeqCst);
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        inner.frames_sent.store(0, Ordering::Relaxed);
        inner.frames_dropped.store(0, Ordering::Relaxed);
        inner.malformed_frames.store(0, Ordering::Relaxed);
        inner.playback.reset_counters();
        *inner.started_at.lock().await = Some(Utc::now());

        let sid = format!("CS{}", uuid::Uuid::new_v4().simple());
        *inner.stream_sid.write().await = sid.clone();
        info!("Starting session {}", sid);

        set_state(inner, SessionState::Connecting);

        // Capture starts first and runs regardless of network state; frames
        // produced before the socket is ready are counted and dropped.
        let capture_rx = match inner.source.lock().await.start().await {
            Ok(rx) => rx,
            Err(e) => {
                inner.active.store(false, Ordering::SeqCst);
                set_state(inner, SessionState::Idle);
                if let Some(StreamError::PermissionDenied(reason)) =
                    e.downcast_ref::<StreamError>()
                {
                    emit(inner, SessionEvent::Terminal(format!(
                        "microphone permission denied: {}",
                        reason
                    )));
                }
                return Err(e).context("Failed to start capture source");
            }
        };

        inner.playback.spawn().await;
        tokio::spawn(run_capture(Arc::clone(inner), capture_rx, generation));
        tokio::spawn(run_turn(Arc::clone(inner), generation));

        if let Err(e) = establish(inner, generation).await {
            connection_lost(Arc::clone(inner), e.to_string(), generation).await;
        }

        Ok(())
    }

    /// Arm the capture path. Connection alone is not streaming; frames only
    /// leave the machine once this is called.
    pub fn arm_streaming(&self) {
        self.inner.streaming.store(true, Ordering::SeqCst);
        if *self.inner.state_tx.borrow() == SessionState::Connected {
            set_state(&self.inner, SessionState::Streaming);
        }
    }

    pub fn disarm_streaming(&self) {
        self.inner.streaming.store(false, Ordering::SeqCst);
        if *self.inner.state_tx.borrow() == SessionState::Streaming {
            set_state(&self.inner, SessionState::Connected);
        }
    }

    /// Stop the session. Idempotent: every step tolerates being repeated
    /// and a second call returns immediately without sending a duplicate
    /// `stop`.
    pub async fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.active.swap(false, Ordering::SeqCst) {
            debug!("Stop requested on inactive session");
            return Ok(());
        }

        info!("Stopping session {}", inner.stream_sid.read().await);
        inner.generation.fetch_add(1, Ordering::SeqCst);

        // No retry may survive a deliberate stop
        if let Some(pending) = inner.pending_reconnect.lock().await.take() {
            pending.abort();
        }
        inner.reconnect.lock().await.reset();

        // (a) stop producing frames, (c) release the device
        inner.streaming.store(false, Ordering::SeqCst);
        if let Err(e) = inner.source.lock().await.stop().await {
            warn!("Failed to stop capture source: {}", e);
        }

        // (b) stop scheduling playback and clear the queue
        inner.playback.clear().await;

        // (d) send `stop` if the socket is still open, then close it with
        // the deliberate close code
        if let Some(transport) = inner.transport.lock().await.take() {
            if transport.is_open() {
                let sid = inner.stream_sid.read().await.clone();
                if let Err(e) = transport.sender().send(ClientEvent::Stop { stream_sid: sid }) {
                    debug!("Stop message not delivered: {}", e);
                }
            }
            transport.close();
        }
        inner.sender_tx.send_replace(None);

        // (e) clear remaining counters
        inner.level_tx.send_replace(0.0);
        set_state(inner, SessionState::Idle);

        Ok(())
    }

    /// Manually retry after `Failed`, or force an immediate reconnect.
    /// Cancels any pending automatic attempt and resets the backoff.
    pub async fn reconnect_now(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.active.load(Ordering::SeqCst) {
            anyhow::bail!("session is not active");
        }

        info!("Manual reconnect requested");
        if let Some(pending) = inner.pending_reconnect.lock().await.take() {
            pending.abort();
        }
        inner.reconnect.lock().await.reset();

        let generation = inner.generation.load(Ordering::SeqCst);
        if let Err(e) = establish(inner, generation).await {
            connection_lost(Arc::clone(inner), e.to_string(), generation).await;
        }
        Ok(())
    }

    /// Terminate a telephony call linked to this stream, on request only.
    pub async fn terminate_linked_call(&self, endpoint: &str, call_sid: &str) -> Result<()> {
        let message = CallTermination::new(
            self.inner.config.peer.account_sid.clone(),
            call_sid.to_string(),
            self.inner.stream_sid.read().await.clone(),
        );
        send_termination(endpoint, &message)
            .await
            .context("Failed to send call termination")
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Capture level meter in [0, 1], for UI meters.
    pub fn subscribe_level(&self) -> watch::Receiver<f32> {
        self.inner.level_tx.subscribe()
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.streaming.load(Ordering::SeqCst)
    }

    pub async fn stream_sid(&self) -> String {
        self.inner.stream_sid.read().await.clone()
    }

    pub async fn stats(&self) -> SessionStats {
        let inner = &self.inner;
        let started_at = *inner.started_at.lock().await;
        SessionStats {
            state: self.state(),
            started_at,
            duration_secs: started_at
                .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0),
            frames_sent: inner.frames_sent.load(Ordering::Relaxed),
            frames_dropped: inner.frames_dropped.load(Ordering::Relaxed),
            chunks_played: inner.playback.chunks_played(),
            chunks_dropped: inner.playback.chunks_dropped(),
            malformed_frames: inner.malformed_frames.load(Ordering::Relaxed),
            reconnect_attempts: inner.reconnect.lock().await.attempts(),
        }
    }
}

fn set_state(inner: &SessionInner, state: SessionState) {
    let changed = inner.state_tx.send_if_modified(|current| {
        if *current != state {
            *current = state;
            true
        } else {
            false
        }
    });
    if changed {
        info!("Session state -> {:?}", state);
        emit(inner, SessionEvent::State(state));
    }
}

fn emit(inner: &SessionInner, event: SessionEvent) {
    let _ = inner.events_tx.send(event);
}

/// Open a connection and send `start` as its first outbound event. The
/// capture path only sees the sender after `start` is queued, so the FIFO
/// writer guarantees `start` hits the wire before any `media`.
async fn establish(inner: &Arc<SessionInner>, generation: u64) -> Result<(), StreamError> {
    set_state(inner, SessionState::Connecting);

    let (updates_tx, updates_rx) = mpsc::channel(64);
    let transport = StreamTransport::connect(&inner.config.transport, updates_tx).await?;

    // The session may have been stopped while the socket was opening
    if !inner.active.load(Ordering::SeqCst)
        || inner.generation.load(Ordering::SeqCst) != generation
    {
        transport.close();
        return Ok(());
    }

    let sid = inner.stream_sid.read().await.clone();
    let payload = inner
        .config
        .peer
        .start_payload(&sid)
        .map_err(|e| StreamError::ConnectionError(e.to_string()))?;
    transport.sender().send(ClientEvent::Start {
        stream_sid: sid,
        start: payload,
    })?;

    inner.sender_tx.send_replace(Some(transport.sender()));
    *inner.transport.lock().await = Some(transport);
    inner.reconnect.lock().await.record_success();

    if inner.streaming.load(Ordering::SeqCst) {
        set_state(inner, SessionState::Streaming);
    } else {
        set_state(inner, SessionState::Connected);
    }

    tokio::spawn(dispatch(Arc::clone(inner), updates_rx, generation));
    Ok(())
}

/// Per-connection inbound loop.
async fn dispatch(
    inner: Arc<SessionInner>,
    mut updates: mpsc::Receiver<TransportUpdate>,
    generation: u64,
) {
    while let Some(update) = updates.recv().await {
        match update {
            TransportUpdate::Event(event) => handle_server_event(&inner, event).await,
            TransportUpdate::Closed { deliberate, reason } => {
                inner.sender_tx.send_replace(None);
                let stale = !inner.active.load(Ordering::SeqCst)
                    || inner.generation.load(Ordering::SeqCst) != generation;
                if deliberate || stale {
                    debug!("Connection closed ({}), no reconnect", reason);
                } else {
                    let reason = StreamError::AbnormalClose(reason).to_string();
                    connection_lost(Arc::clone(&inner), reason, generation).await;
                }
                break;
            }
        }
    }
}

async fn handle_server_event(inner: &Arc<SessionInner>, event: ServerEvent) {
    match event {
        ServerEvent::Connected => debug!("Peer acknowledged connection"),

        ServerEvent::Start { stream_sid } => {
            // The server may override the client-chosen id; all further
            // media (both directions) runs under the confirmed id.
            if let Some(sid) = stream_sid {
                let mut current = inner.stream_sid.write().await;
                if *current != sid {
                    info!("Server assigned stream id {}", sid);
                    *current = sid;
                }
            }
        }

        ServerEvent::Media { media } => match codec::decode(&media.payload) {
            Ok(samples) => {
                let overflowed = inner.playback.enqueue(codec::to_f32(&samples)).await;
                if overflowed {
                    emit(
                        inner,
                        SessionEvent::Degraded("playback queue overflow, dropped oldest".into()),
                    );
                }
            }
            Err(e) => {
                // Drop the single frame and carry on; never terminates the
                // session.
                inner.malformed_frames.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping inbound frame: {}", e);
            }
        },

        ServerEvent::Stop => {
            info!("Peer ended the stream");
            inner.streaming.store(false, Ordering::SeqCst);
            if let Err(e) = inner.source.lock().await.stop().await {
                warn!("Failed to stop capture source: {}", e);
            }
            if let Some(transport) = inner.transport.lock().await.take() {
                transport.close();
            }
            set_state(inner, SessionState::Disconnected);
        }

        ServerEvent::Error { message } => {
            warn!("Peer error: {}", message);
            emit(inner, SessionEvent::ProtocolError(message));
        }

        ServerEvent::Unknown => debug!("Ignoring unrecognized inbound event"),
    }
}

/// Feed an unexpected disconnect into the backoff policy and schedule the
/// next attempt, or surface terminal failure once attempts are exhausted.
fn connection_lost(
    inner: Arc<SessionInner>,
    reason: String,
    generation: u64,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        *inner.transport.lock().await = None;
        set_state(&inner, SessionState::Disconnected);

        let next = {
            let mut reconnect = inner.reconnect.lock().await;
            let next = reconnect.next_attempt(&inner.config.reconnect, reason.clone());
            next.map(|delay| (reconnect.attempts(), delay))
        };

        let Some((attempt, delay)) = next else {
            warn!("Reconnect attempts exhausted: {}", reason);
            set_state(&inner, SessionState::Failed);
            emit(
                &inner,
                SessionEvent::Terminal(
                    StreamError::ReconnectExhausted(inner.config.reconnect.max_attempts)
                        .to_string(),
                ),
            );
            return;
        };

        info!(
            "Connection lost ({}), reconnect attempt {} in {:?}",
            reason, attempt, delay
        );
        set_state(&inner, SessionState::Reconnecting);
        emit(&inner, SessionEvent::ReconnectScheduled { attempt, delay });

        let retry_inner = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !retry_inner.active.load(Ordering::SeqCst)
                || retry_inner.generation.load(Ordering::SeqCst) != generation
            {
                return;
            }
            if let Err(e) = establish(&retry_inner, generation).await {
                connection_lost(retry_inner, e.to_string(), generation).await;
            }
        });
        *inner.pending_reconnect.lock().await = Some(handle);
    })
}

/// Capture loop: native blocks in, fixed frames out. Owns the pipeline and
/// the optional diagnostic tap; only ever touches the socket through the
/// emit surface.
async fn run_capture(
    inner: Arc<SessionInner>,
    mut blocks: mpsc::Receiver<SampleBlock>,
    generation: u64,
) {
    let mut pipeline = CapturePipeline::new(inner.config.capture.clone());
    let sender_rx = inner.sender_tx.subscribe();

    let mut tap = match &inner.config.recording_dir {
        Some(dir) => {
            let sid = inner.stream_sid.read().await.clone();
            match FrameTap::create(dir, &sid) {
                Ok(tap) => Some(tap),
                Err(e) => {
                    warn!("Recording tap disabled: {}", e);
                    None
                }
            }
        }
        None => None,
    };

    while let Some(block) = blocks.recv().await {
        if !inner.active.load(Ordering::SeqCst)
            || inner.generation.load(Ordering::SeqCst) != generation
        {
            break;
        }

        let frames = pipeline.submit(&block);
        inner.level_tx.send_replace(pipeline.level());

        for frame in frames {
            if !inner.streaming.load(Ordering::SeqCst) {
                inner.frames_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let Some(sender) = sender_rx.borrow().clone() else {
                inner.frames_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            };

            let stream_sid = inner.stream_sid.read().await.clone();
            let payload = codec::encode(&frame.samples);
            match sender.send(ClientEvent::Media {
                stream_sid,
                media: MediaPayload { payload },
            }) {
                Ok(()) => {
                    inner.frames_sent.fetch_add(1, Ordering::Relaxed);
                    let tap_failed = match tap.as_mut() {
                        Some(tap) => match tap.write_frame(&frame.samples) {
                            Ok(()) => false,
                            Err(e) => {
                                warn!("Recording tap failed, disabling: {}", e);
                                true
                            }
                        },
                        None => false,
                    };
                    if tap_failed {
                        tap = None;
                    }
                }
                Err(_) => {
                    inner.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    if let Some(tap) = tap.take() {
        match tap.finish() {
            Ok(path) => info!("Recording tap written to {:?}", path),
            Err(e) => warn!("Failed to finalize recording tap: {}", e),
        }
    }
    debug!("Capture loop ended");
}

/// Turn heuristic loop: observes the level meter and playback activity,
/// broadcasts turn transitions, and never touches the audio path.
async fn run_turn(inner: Arc<SessionInner>, generation: u64) {
    let mut tracker = TurnTracker::new(inner.config.turn.clone());
    let mut level_rx = inner.level_tx.subscribe();
    let mut active_rx = inner.playback.subscribe_active();
    let mut ticker = tokio::time::interval(Duration::from_millis(50));

    loop {
        if !inner.active.load(Ordering::SeqCst)
            || inner.generation.load(Ordering::SeqCst) != generation
        {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                if let Some(turn) = tracker.on_tick(Instant::now()) {
                    emit(&inner, SessionEvent::Turn(turn));
                }
            }
            changed = level_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let level = *level_rx.borrow_and_update();
                if let Some(turn) = tracker.on_level(level, Instant::now()) {
                    emit(&inner, SessionEvent::Turn(turn));
                }
            }
            changed = active_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let active = *active_rx.borrow_and_update();
                if let Some(turn) = tracker.on_playback(active, Instant::now()) {
                    emit(&inner, SessionEvent::Turn(turn));
                    if turn == TurnState::Thinking {
                        tokio::time::sleep(tracker.thinking_pulse()).await;
                        if let Some(turn) = tracker.after_thinking_pulse() {
                            emit(&inner, SessionEvent::Turn(turn));
                        }
                    }
                }
            }
        }
    }
    debug!("Turn loop ended");
}
