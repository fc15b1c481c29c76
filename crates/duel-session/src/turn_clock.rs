//! Time sources and the polling turn timer.
//!
//! [`TurnTimer`] is a task bound to one turn's inputs. Every tick reads the
//! clock afresh and classifies from absolute time; nothing is accumulated
//! between ticks. Dropping the timer aborts the task.

use duel_core::turn_timer::{classify, TurnTimerInputs, Urgency};
use duel_core::Millis;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Supplies the local clock reading in milliseconds
pub trait TimeSource: Send + Sync {
    fn now_millis(&self) -> Millis;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_millis(&self) -> Millis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Millis)
            .unwrap_or_default()
    }
}

/// Follows tokio's clock, so paused test time drives it
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: Instant,
    base: Millis,
}

impl TokioClock {
    /// Reads `base` right now
    pub fn starting_at(base: Millis) -> Self {
        Self {
            origin: Instant::now(),
            base,
        }
    }
}

impl TimeSource for TokioClock {
    fn now_millis(&self) -> Millis {
        self.base + self.origin.elapsed().as_millis() as Millis
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Millis) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Millis) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_millis(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

/// One classification of the running turn
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnReading {
    pub urgency: Urgency,
    pub opacity: f32,
    /// Server time the reading was taken at
    pub now: Millis,
}

impl TurnReading {
    pub fn take(clock: &dyn TimeSource, inputs: &TurnTimerInputs) -> Self {
        let now = inputs.synchronized_now(clock.now_millis());
        let urgency = classify(now, inputs);
        Self {
            urgency,
            opacity: urgency.opacity(),
            now,
        }
    }
}

/// Polls the classifier for one turn
pub struct TurnTimer {
    handle: JoinHandle<()>,
    readings: watch::Receiver<TurnReading>,
}

impl TurnTimer {
    /// Start polling. The first reading is available immediately.
    ///
    /// The task stops by itself once the turn is expired or inactive, since
    /// neither can change without new inputs.
    pub fn start(clock: Arc<dyn TimeSource>, inputs: TurnTimerInputs, poll: Duration) -> Self {
        let first = TurnReading::take(clock.as_ref(), &inputs);
        let (tx, readings) = watch::channel(first);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let reading = TurnReading::take(clock.as_ref(), &inputs);
                let previous = tx.send_replace(reading);
                if previous.urgency != reading.urgency {
                    debug!("Turn urgency {:?} -> {:?}", previous.urgency, reading.urgency);
                }

                if matches!(reading.urgency, Urgency::Expired | Urgency::Inactive) {
                    break;
                }
            }
        });

        Self { handle, readings }
    }

    pub fn current(&self) -> TurnReading {
        *self.readings.borrow()
    }

    pub fn readings(&self) -> watch::Receiver<TurnReading> {
        self.readings.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for TurnTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
