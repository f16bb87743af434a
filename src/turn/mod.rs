//! Turn/activity heuristic
//!
//! Classifies the conversational state for UI consumption from two signals
//! it only observes: the capture level meter and the playback busy flag. It
//! never touches the audio path.

use std::time::{Duration, Instant};

/// UI-facing conversational state. Advisory, not authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    /// The near end is talking
    Listening,
    /// The near end finished and playback is about to answer
    Thinking,
    /// The far end is talking
    Speaking,
}

/// Heuristic thresholds
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Capture level above which the near end counts as talking
    pub voice_threshold: f32,
    /// Continuous silence after speech before the turn is considered over
    pub hang_time: Duration,
    /// Length of the Thinking pulse shown before Speaking
    pub thinking_pulse: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            voice_threshold: 0.02,
            hang_time: Duration::from_millis(1_200),
            thinking_pulse: Duration::from_millis(300),
        }
    }
}

/// Pure state machine; callers feed it levels, playback edges and ticks
/// with explicit timestamps and broadcast whatever transitions it returns.
pub struct TurnTracker {
    config: TurnConfig,
    state: TurnState,
    playing: bool,
    speech_ended: bool,
    last_voice: Option<Instant>,
}

impl TurnTracker {
    pub fn new(config: TurnConfig) -> Self {
        Self {
            config,
            state: TurnState::Idle,
            playing: false,
            speech_ended: false,
            last_voice: None,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn thinking_pulse(&self) -> Duration {
        self.config.thinking_pulse
    }

    /// Observe a capture level sample.
    pub fn on_level(&mut self, level: f32, now: Instant) -> Option<TurnState> {
        if self.playing {
            // Far end holds the floor; the level meter may be picking up
            // the speaker, so near-end detection is suspended.
            return None;
        }

        if level >= self.config.voice_threshold {
            self.last_voice = Some(now);
            self.speech_ended = false;
            return self.transition(TurnState::Listening);
        }

        self.check_hang(now)
    }

    /// Observe the passage of time with no level change.
    pub fn on_tick(&mut self, now: Instant) -> Option<TurnState> {
        if self.playing {
            return None;
        }
        self.check_hang(now)
    }

    /// Observe the playback pipeline becoming busy or draining.
    pub fn on_playback(&mut self, active: bool, _now: Instant) -> Option<TurnState> {
        if active && !self.playing {
            self.playing = true;
            return if self.speech_ended {
                self.transition(TurnState::Thinking)
            } else {
                self.transition(TurnState::Speaking)
            };
        }

        if !active && self.playing {
            self.playing = false;
            self.speech_ended = false;
            self.last_voice = None;
            return self.transition(TurnState::Idle);
        }

        None
    }

    /// Promote Thinking to Speaking once the pulse has been shown.
    pub fn after_thinking_pulse(&mut self) -> Option<TurnState> {
        if self.playing && self.state == TurnState::Thinking {
            return self.transition(TurnState::Speaking);
        }
        None
    }

    fn check_hang(&mut self, now: Instant) -> Option<TurnState> {
        if self.state != TurnState::Listening {
            return None;
        }
        let last = self.last_voice?;
        if now.duration_since(last) >= self.config.hang_time {
            self.speech_ended = true;
            return self.transition(TurnState::Idle);
        }
        None
    }

    fn transition(&mut self, next: TurnState) -> Option<TurnState> {
        if self.state == next {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> TurnTracker {
        TurnTracker::new(TurnConfig::default())
    }

    #[test]
    fn loud_input_enters_listening() {
        let mut t = tracker();
        let now = Instant::now();
        assert_eq!(t.on_level(0.5, now), Some(TurnState::Listening));
        assert_eq!(t.on_level(0.5, now), None); // no duplicate transitions
    }

    #[test]
    fn silence_past_hang_time_ends_the_turn() {
        let mut t = tracker();
        let start = Instant::now();
        t.on_level(0.5, start);
        assert_eq!(t.on_level(0.0, start + Duration::from_millis(600)), None);
        assert_eq!(
            t.on_level(0.0, start + Duration::from_millis(1_300)),
            Some(TurnState::Idle)
        );
    }

    #[test]
    fn playback_after_speech_end_pulses_thinking_then_speaking() {
        let mut t = tracker();
        let start = Instant::now();
        t.on_level(0.5, start);
        t.on_tick(start + Duration::from_millis(1_300));

        let now = start + Duration::from_millis(1_400);
        assert_eq!(t.on_playback(true, now), Some(TurnState::Thinking));
        assert_eq!(t.after_thinking_pulse(), Some(TurnState::Speaking));
        assert_eq!(t.on_playback(false, now), Some(TurnState::Idle));
    }

    #[test]
    fn playback_without_prior_speech_goes_straight_to_speaking() {
        let mut t = tracker();
        let now = Instant::now();
        assert_eq!(t.on_playback(true, now), Some(TurnState::Speaking));
    }

    #[test]
    fn drain_clears_the_speech_ended_mark() {
        let mut t = tracker();
        let start = Instant::now();
        t.on_level(0.5, start);
        t.on_tick(start + Duration::from_millis(1_300));
        t.on_playback(true, start + Duration::from_millis(1_400));
        t.on_playback(false, start + Duration::from_millis(2_000));

        // Next playback burst has no speech-ended mark, so no Thinking pulse
        assert_eq!(
            t.on_playback(true, start + Duration::from_millis(2_100)),
            Some(TurnState::Speaking)
        );
    }
}
