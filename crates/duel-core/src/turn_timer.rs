//! Turn timer classification.
//!
//! Maps the current server-synchronized time against a [`TurnWindow`] to a
//! discrete [`Urgency`]. Classification is a pure function of its inputs and
//! is meant to be re-run from absolute time on every tick, so a drifting or
//! suspended client corrects itself on the next reading instead of
//! accumulating error.

use crate::Millis;
use serde::{Deserialize, Serialize};

/// Opacity of the timer widget while a turn is running
pub const ACTIVE_OPACITY: f32 = 1.0;

/// Opacity of the timer widget when no turn is running
pub const DIMMED_OPACITY: f32 = 0.5;

/// A turn's timing as issued by the server.
///
/// All fields are absolute server-clock milliseconds except `turn_duration`.
/// A value of `0` means "not set".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnWindow {
    pub turn_start_time: Millis,
    pub turn_duration: Millis,
    pub yellow_at: Millis,
    pub red_at: Millis,
}

impl TurnWindow {
    pub fn new(turn_start_time: Millis, turn_duration: Millis) -> Self {
        Self {
            turn_start_time,
            turn_duration,
            yellow_at: 0,
            red_at: 0,
        }
    }

    pub fn with_thresholds(mut self, yellow_at: Millis, red_at: Millis) -> Self {
        self.yellow_at = yellow_at;
        self.red_at = red_at;
        self
    }

    /// Whether the start and duration are both set
    pub fn is_set(&self) -> bool {
        self.turn_start_time > 0 && self.turn_duration > 0
    }

    pub fn ends_at(&self) -> Millis {
        self.turn_start_time.saturating_add(self.turn_duration)
    }

    /// Milliseconds left in the turn, never negative
    pub fn remaining(&self, now: Millis) -> Millis {
        (self.ends_at() - now).max(0)
    }

    /// A threshold is only honoured when set and inside the window
    fn threshold(&self, at: Millis) -> Option<Millis> {
        (at > 0 && at >= self.turn_start_time && at <= self.ends_at()).then_some(at)
    }
}

/// Everything the match session hands to the classifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnTimerInputs {
    pub is_active: bool,
    #[serde(flatten)]
    pub window: TurnWindow,
    /// Server clock minus local clock, in milliseconds
    pub server_time_offset: Millis,
}

impl TurnTimerInputs {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn active(window: TurnWindow) -> Self {
        Self {
            is_active: true,
            window,
            server_time_offset: 0,
        }
    }

    pub fn with_offset(mut self, server_time_offset: Millis) -> Self {
        self.server_time_offset = server_time_offset;
        self
    }

    /// Translate a local clock reading to server time
    pub fn synchronized_now(&self, local_now: Millis) -> Millis {
        local_now.saturating_add(self.server_time_offset)
    }
}

/// Discrete urgency of the current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Urgency {
    Inactive,
    Green,
    Yellow,
    Red,
    Expired,
}

impl Urgency {
    /// Opacity the timer widget should render at
    pub fn opacity(&self) -> f32 {
        match self {
            Urgency::Inactive => DIMMED_OPACITY,
            _ => ACTIVE_OPACITY,
        }
    }

    /// Whether the turn clock is still counting down
    pub fn is_running(&self) -> bool {
        matches!(self, Urgency::Green | Urgency::Yellow | Urgency::Red)
    }
}

/// Classify the turn at server time `now`.
///
/// Expiry takes precedence over the colour thresholds. Misconfigured inputs
/// (unset or non-positive duration, thresholds outside the window) degrade to
/// `Inactive` or `Green` instead of failing.
pub fn classify(now: Millis, inputs: &TurnTimerInputs) -> Urgency {
    let window = &inputs.window;
    if !inputs.is_active || !window.is_set() {
        return Urgency::Inactive;
    }

    if now.saturating_sub(window.turn_start_time) >= window.turn_duration {
        return Urgency::Expired;
    }

    if window.threshold(window.red_at).is_some_and(|red| now >= red) {
        return Urgency::Red;
    }

    if window.threshold(window.yellow_at).is_some_and(|yellow| now >= yellow) {
        return Urgency::Yellow;
    }

    Urgency::Green
}

/// Classify using a local clock reading, applying the server offset
pub fn classify_local(local_now: Millis, inputs: &TurnTimerInputs) -> Urgency {
    classify(inputs.synchronized_now(local_now), inputs)
}
