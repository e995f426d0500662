//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! The per-camera event state machine (spec 4.5). Modelled after
//! `secluso-motion-ai`'s FSM registry pattern in `logic/pipeline.rs`: a
//! `tick()` call consumes the current inputs and returns the (possibly
//! unchanged) new state plus a list of decoupled `Intent`s for the caller to
//! execute (start/seal a recording, toggle a detector's scan flag) rather
//! than performing those side effects inline.
//!
//! Semantics are grounded on `viseron/nvr.py`'s `FFMPEGNVR.event_over` /
//! `start_recording` / `stop_recording`: `motion_max_timeout` is measured
//! from the moment `trigger` last went false (not from the start of the
//! whole event), and firing that timeout is a one-shot latch per event
//! (`_motion_max_timeout_reached`), matching testable property 5's
//! idempotency requirement. `process_motion_event` (~line 452-474) enables
//! the object decoder as soon as motion is detected, not only once already
//! recording, so `Idle -> MotionOnly` emits `EnableObjectDetector` too —
//! the object detector must already be running for `trigger` to ever have
//! a chance to become true in `trigger_detector` mode.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventState {
    Idle,
    MotionOnly,
    Recording,
    CoolingDown,
}

/// Side effects a caller must perform in response to a transition, kept out
/// of the state machine itself so it stays a pure function of its inputs.
#[derive(Debug, Clone, PartialEq)]
pub enum EventIntent {
    StartRecording,
    ContinueRecording,
    SealRecording,
    EnableObjectDetector,
    DisableObjectDetector,
}

pub struct EventMachine {
    state: EventState,
    trigger_detector_mode: bool,
    post_event_timeout: Duration,
    motion_max_timeout: Duration,
    no_trigger_since: Option<Instant>,
    motion_max_timeout_reached: bool,
    cooling_down_since: Option<Instant>,
}

impl EventMachine {
    pub fn new(trigger_detector_mode: bool, post_event_timeout: Duration, motion_max_timeout: Duration) -> Self {
        EventMachine {
            state: EventState::Idle,
            trigger_detector_mode,
            post_event_timeout,
            motion_max_timeout,
            no_trigger_since: None,
            motion_max_timeout_reached: false,
            cooling_down_since: None,
        }
    }

    pub fn state(&self) -> EventState {
        self.state
    }

    fn enter_recording(&mut self, intents: &mut Vec<EventIntent>, continuing: bool) {
        self.no_trigger_since = None;
        self.motion_max_timeout_reached = false;
        self.cooling_down_since = None;
        intents.push(EventIntent::EnableObjectDetector);
        intents.push(if continuing {
            EventIntent::ContinueRecording
        } else {
            EventIntent::StartRecording
        });
        self.state = EventState::Recording;
    }

    /// Advance the state machine by one evaluation (spec 4.5). `motion` and
    /// `trigger` are the already-debounced booleans; `now` lets tests drive
    /// the clock deterministically.
    pub fn tick(&mut self, motion: bool, trigger: bool, now: Instant) -> Vec<EventIntent> {
        let mut intents = Vec::new();
        match self.state {
            EventState::Idle => {
                if trigger {
                    self.enter_recording(&mut intents, false);
                } else if motion && self.trigger_detector_mode {
                    intents.push(EventIntent::EnableObjectDetector);
                    self.state = EventState::MotionOnly;
                }
            }
            EventState::MotionOnly => {
                if trigger {
                    self.enter_recording(&mut intents, false);
                } else if !motion {
                    self.state = EventState::Idle;
                }
            }
            EventState::Recording => {
                if trigger {
                    self.no_trigger_since = None;
                    self.motion_max_timeout_reached = false;
                } else {
                    let since = *self.no_trigger_since.get_or_insert(now);
                    let elapsed = now.saturating_duration_since(since);
                    let post_event_elapsed = !motion && elapsed >= self.post_event_timeout;
                    let motion_stalled = motion
                        && elapsed >= self.motion_max_timeout
                        && !self.motion_max_timeout_reached;
                    if motion_stalled {
                        self.motion_max_timeout_reached = true;
                    }
                    if post_event_elapsed || motion_stalled {
                        self.cooling_down_since = Some(now);
                        self.state = EventState::CoolingDown;
                    }
                }
            }
            EventState::CoolingDown => {
                if trigger {
                    self.enter_recording(&mut intents, true);
                } else {
                    let since = *self.cooling_down_since.get_or_insert(now);
                    if now.saturating_duration_since(since) >= self.post_event_timeout {
                        intents.push(EventIntent::DisableObjectDetector);
                        intents.push(EventIntent::SealRecording);
                        self.state = EventState::Idle;
                        self.no_trigger_since = None;
                        self.motion_max_timeout_reached = false;
                        self.cooling_down_since = None;
                    }
                }
            }
        }
        intents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> EventMachine {
        EventMachine::new(true, Duration::from_secs(10), Duration::from_secs(30))
    }

    #[test]
    fn idle_to_recording_on_trigger() {
        let mut m = machine();
        let intents = m.tick(false, true, Instant::now());
        assert_eq!(m.state(), EventState::Recording);
        assert!(intents.contains(&EventIntent::StartRecording));
    }

    #[test]
    fn idle_to_motion_only_requires_trigger_detector_mode() {
        let mut m = machine();
        let intents = m.tick(true, false, Instant::now());
        assert_eq!(m.state(), EventState::MotionOnly);
        assert!(intents.contains(&EventIntent::EnableObjectDetector));
    }

    #[test]
    fn motion_only_to_idle_when_motion_stops() {
        let mut m = machine();
        let now = Instant::now();
        m.tick(true, false, now);
        m.tick(false, false, now);
        assert_eq!(m.state(), EventState::Idle);
    }

    #[test]
    fn testable_property_5_post_event_timeout_without_motion() {
        let mut m = machine();
        let t0 = Instant::now();
        m.tick(false, true, t0);
        assert_eq!(m.state(), EventState::Recording);
        m.tick(false, false, t0 + Duration::from_secs(11));
        assert_eq!(m.state(), EventState::CoolingDown);
        m.tick(false, false, t0 + Duration::from_secs(22));
        assert_eq!(m.state(), EventState::Idle);
    }

    #[test]
    fn testable_property_5_motion_max_timeout_is_idempotent() {
        let mut m = machine();
        let t0 = Instant::now();
        m.tick(false, true, t0);
        // motion continues but no new trigger: motion_max_timeout fires once
        // at t0+30s, moving to CoolingDown; a second evaluation far past that
        // point must not "re-fire" anything distinguishable from the first.
        let intents_before = m.tick(true, false, t0 + Duration::from_secs(29));
        assert_eq!(m.state(), EventState::Recording);
        assert!(intents_before.is_empty());
        m.tick(true, false, t0 + Duration::from_secs(31));
        assert_eq!(m.state(), EventState::CoolingDown);
        // Even if motion is somehow still reported while cooling down, the
        // transition already happened exactly once.
        m.tick(true, false, t0 + Duration::from_secs(32));
        assert_eq!(m.state(), EventState::CoolingDown);
    }

    #[test]
    fn cooling_down_trigger_continues_recording() {
        let mut m = machine();
        let t0 = Instant::now();
        m.tick(false, true, t0);
        m.tick(false, false, t0 + Duration::from_secs(11));
        assert_eq!(m.state(), EventState::CoolingDown);
        let intents = m.tick(false, true, t0 + Duration::from_secs(12));
        assert_eq!(m.state(), EventState::Recording);
        assert!(intents.contains(&EventIntent::ContinueRecording));
    }
}
