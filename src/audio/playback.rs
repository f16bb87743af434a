use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::codec::STREAM_SAMPLE_RATE;

/// Output device abstraction.
///
/// `play` hands the sink one chunk and the absolute instant it must begin;
/// chunks are always handed over in playback order with back-to-back start
/// times, so a real device implementation only needs to honor the schedule.
pub trait PlaybackSink: Send + Sync {
    fn play(&self, samples: Vec<f32>, at: Instant);
}

/// Sink that discards audio; useful for headless runs.
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn play(&self, _samples: Vec<f32>, _at: Instant) {}
}

/// A decoded inbound frame awaiting playback.
#[derive(Debug, Clone)]
pub struct PlaybackChunk {
    pub samples: Vec<f32>,
    pub enqueued_at: Instant,
}

/// Playback scheduler configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Sample rate of decoded chunks, in Hz
    pub sample_rate: u32,
    /// Queue cap; oldest chunks are dropped first beyond this
    pub max_queued: usize,
    /// Scheduling lookahead to absorb jitter when playback starts
    pub lead_time: Duration,
    /// Maximum chunks scheduled per wakeup
    pub batch_max: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: STREAM_SAMPLE_RATE,
            max_queued: 256,
            lead_time: Duration::from_millis(100),
            batch_max: 5,
        }
    }
}

/// Playback duration of a chunk at the given rate.
pub fn chunk_duration(samples: usize, sample_rate: u32) -> Duration {
    Duration::from_micros(samples as u64 * 1_000_000 / sample_rate as u64)
}

struct QueueState {
    queue: VecDeque<PlaybackChunk>,
    playing: bool,
    /// End of the last scheduled chunk. Advanced additively, never
    /// recomputed from the current time once playback has started.
    cursor: Option<Instant>,
}

struct PlaybackShared {
    config: PlaybackConfig,
    sink: Arc<dyn PlaybackSink>,
    state: Mutex<QueueState>,
    notify: Notify,
    active_tx: watch::Sender<bool>,
    played: AtomicU64,
    dropped: AtomicU64,
    shutdown: AtomicBool,
}

/// Schedules decoded chunks for gapless, strictly ordered playback.
///
/// State machine is Idle/Playing: the first chunk to arrive while Idle fixes
/// a start cursor slightly in the future, and every subsequent chunk is
/// placed exactly where the previous one ends. The schedule loop re-arms
/// itself shortly before the scheduled audio is consumed.
pub struct PlaybackScheduler {
    shared: Arc<PlaybackShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackScheduler {
    pub fn new(config: PlaybackConfig, sink: Arc<dyn PlaybackSink>) -> Self {
        let (active_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(PlaybackShared {
                config,
                sink,
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    playing: false,
                    cursor: None,
                }),
                notify: Notify::new(),
                active_tx,
                played: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                shutdown: AtomicBool::new(false),
            }),
            task: Mutex::new(None),
        }
    }

    /// Spawn the schedule loop. Must be called from within a runtime.
    pub async fn spawn(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(run_loop(shared)));
    }

    /// Append a decoded chunk in arrival order.
    ///
    /// Returns `true` if the queue overflowed and the oldest chunk was
    /// dropped to make room — a recoverable degradation, not an error.
    pub async fn enqueue(&self, samples: Vec<f32>) -> bool {
        let mut state = self.shared.state.lock().await;
        let mut overflowed = false;
        while state.queue.len() >= self.shared.config.max_queued {
            state.queue.pop_front();
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            overflowed = true;
        }
        state.queue.push_back(PlaybackChunk {
            samples,
            enqueued_at: Instant::now(),
        });
        drop(state);

        if overflowed {
            warn!("playback queue full, dropped oldest chunk");
        }
        self.shared.notify.notify_one();
        overflowed
    }

    /// Whether any audio is queued or scheduled.
    pub fn is_active(&self) -> bool {
        *self.shared.active_tx.borrow()
    }

    pub fn subscribe_active(&self) -> watch::Receiver<bool> {
        self.shared.active_tx.subscribe()
    }

    pub fn chunks_played(&self) -> u64 {
        self.shared.played.load(Ordering::Relaxed)
    }

    pub fn chunks_dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Drop all queued chunks and return to Idle.
    pub async fn clear(&self) {
        let mut state = self.shared.state.lock().await;
        state.queue.clear();
        state.playing = false;
        state.cursor = None;
        drop(state);
        self.shared.active_tx.send_replace(false);
        self.shared.notify.notify_one();
    }

    /// Zero the played/dropped counters (a new session run starts fresh).
    pub fn reset_counters(&self) {
        self.shared.played.store(0, Ordering::Relaxed);
        self.shared.dropped.store(0, Ordering::Relaxed);
    }

    /// Stop the schedule loop and clear the queue.
    pub async fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.clear().await;
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.notify.notify_one();
    }
}

enum Step {
    /// Sleep until the given instant (or a new chunk arrives)
    Sleep(Instant),
    /// Nothing queued or scheduled; wait for work
    Idle,
}

async fn run_loop(shared: Arc<PlaybackShared>) {
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let mut batch: Vec<(PlaybackChunk, Instant)> = Vec::new();
        let step = {
            let mut state = shared.state.lock().await;

            if state.queue.is_empty() {
                match state.cursor {
                    Some(end) if state.playing => {
                        if Instant::now() >= end {
                            // All scheduled audio consumed; back to Idle
                            state.playing = false;
                            state.cursor = None;
                            shared.active_tx.send_replace(false);
                            debug!("playback drained, returning to idle");
                            Step::Idle
                        } else {
                            Step::Sleep(end)
                        }
                    }
                    _ => Step::Idle,
                }
            } else {
                let mut cursor = match state.cursor {
                    Some(cursor) => cursor,
                    None => {
                        state.playing = true;
                        shared.active_tx.send_replace(true);
                        Instant::now() + shared.config.lead_time
                    }
                };
                for _ in 0..shared.config.batch_max {
                    let Some(chunk) = state.queue.pop_front() else {
                        break;
                    };
                    let duration =
                        chunk_duration(chunk.samples.len(), shared.config.sample_rate);
                    batch.push((chunk, cursor));
                    cursor += duration;
                }
                state.cursor = Some(cursor);

                Step::Sleep(cursor.checked_sub(shared.config.lead_time).unwrap_or(cursor))
            }
        };

        for (chunk, at) in batch {
            shared.sink.play(chunk.samples, at);
            shared.played.fetch_add(1, Ordering::Relaxed);
        }

        match step {
            Step::Sleep(at) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(at) => {}
                    _ = shared.notify.notified() => {}
                }
            }
            Step::Idle => shared.notify.notified().await,
        }
    }
}
