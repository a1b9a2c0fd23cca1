//! Playback position bookkeeping for the current song.

use crate::entry::EntryId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockState {
    #[default]
    Stopped,
    Running,
    Paused,
    Finished,
}

/// What a tick did to the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not running; nothing changed
    Idle,
    Advanced,
    /// `current_time` reached `duration` on this tick
    Finished,
}

/// Authoritative `(song_id, current_time, duration, is_playing)` tuple.
///
/// Pure state machine; the queue manager owns it and drives it from a
/// fixed-interval ticker with the measured elapsed time.
#[derive(Debug, Clone, Default)]
pub struct PlaybackClock {
    song_id: Option<EntryId>,
    current: Duration,
    duration: Duration,
    state: ClockState,
}

impl PlaybackClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to zero for a new song and start running
    pub fn start(&mut self, song_id: EntryId, duration: Duration) {
        self.song_id = Some(song_id);
        self.current = Duration::ZERO;
        self.duration = duration;
        self.state = ClockState::Running;
    }

    pub fn stop(&mut self) {
        *self = Self::default();
    }

    /// Pause or resume. Returns whether the state changed.
    pub fn set_playing(&mut self, playing: bool) -> bool {
        match (self.state, playing) {
            (ClockState::Running, false) => {
                self.state = ClockState::Paused;
                true
            }
            (ClockState::Paused, true) => {
                self.state = ClockState::Running;
                true
            }
            _ => false,
        }
    }

    pub fn tick(&mut self, elapsed: Duration) -> TickOutcome {
        if self.state != ClockState::Running {
            return TickOutcome::Idle;
        }
        self.current = (self.current + elapsed).min(self.duration);
        if self.current >= self.duration {
            self.state = ClockState::Finished;
            return TickOutcome::Finished;
        }
        TickOutcome::Advanced
    }

    #[must_use]
    pub const fn state(&self) -> ClockState {
        self.state
    }

    #[must_use]
    pub const fn song_id(&self) -> Option<EntryId> {
        self.song_id
    }

    #[must_use]
    pub const fn current_time(&self) -> Duration {
        self.current
    }

    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.state == ClockState::Running
    }

    /// Wire snapshot, `None` when no song is loaded
    #[must_use]
    pub fn time(&self) -> Option<PlaybackTime> {
        self.song_id.map(|song_id| PlaybackTime {
            song_id,
            current_time: self.current.as_secs_f64(),
            duration: self.duration.as_secs_f64(),
            is_playing: self.is_playing(),
        })
    }
}

/// Position update sent to sessions, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackTime {
    pub song_id: EntryId,
    pub current_time: f64,
    pub duration: f64,
    pub is_playing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(250);

    #[test]
    fn test_runs_to_finished() {
        let mut clock = PlaybackClock::new();
        assert_eq!(clock.tick(TICK), TickOutcome::Idle);
        clock.start(EntryId::from(1), Duration::from_secs(1));
        assert_eq!(clock.tick(TICK), TickOutcome::Advanced);
        assert_eq!(clock.tick(TICK), TickOutcome::Advanced);
        assert_eq!(clock.tick(TICK), TickOutcome::Advanced);
        assert_eq!(clock.tick(TICK), TickOutcome::Finished);
        assert_eq!(clock.state(), ClockState::Finished);
        assert_eq!(clock.current_time(), Duration::from_secs(1));
        assert_eq!(clock.tick(TICK), TickOutcome::Idle);
    }

    #[test]
    fn test_pause_freezes_time() {
        let mut clock = PlaybackClock::new();
        clock.start(EntryId::from(1), Duration::from_secs(10));
        clock.tick(TICK);
        assert!(clock.set_playing(false));
        assert!(!clock.set_playing(false));
        assert_eq!(clock.tick(TICK), TickOutcome::Idle);
        assert_eq!(clock.current_time(), TICK);
        assert!(clock.set_playing(true));
        clock.tick(TICK);
        assert_eq!(clock.current_time(), TICK * 2);
    }

    #[test]
    fn test_toggle_without_song_is_noop() {
        let mut clock = PlaybackClock::new();
        assert!(!clock.set_playing(true));
        assert!(!clock.set_playing(false));
        assert!(clock.time().is_none());
    }

    #[test]
    fn test_start_resets() {
        let mut clock = PlaybackClock::new();
        clock.start(EntryId::from(1), Duration::from_secs(10));
        clock.tick(TICK);
        clock.start(EntryId::from(2), Duration::from_secs(5));
        let time = clock.time().unwrap();
        assert_eq!(time.song_id, EntryId::from(2));
        assert!(time.current_time.abs() < f64::EPSILON);
        assert!(time.is_playing);
    }
}
