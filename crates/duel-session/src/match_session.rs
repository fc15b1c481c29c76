//! A started match: deals rounds and keeps the turn timer running.

use crate::animator::PieceAnimator;
use crate::config::SessionConfig;
use crate::orchestrator::{DealError, DealOrchestrator, DealPlan, DealReport, DealTimings};
use crate::turn_clock::{TimeSource, TurnReading, TurnTimer};
use duel_core::{DealtRound, MatchStart, TurnTimerInputs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

pub struct MatchSession {
    start: MatchStart,
    orchestrator: Arc<DealOrchestrator>,
    clock: Arc<dyn TimeSource>,
    poll: Duration,
    turn_timer: Mutex<Option<TurnTimer>>,
}

impl MatchSession {
    pub fn new(
        start: MatchStart,
        animator: Arc<dyn PieceAnimator>,
        config: &SessionConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let orchestrator = DealOrchestrator::new(
            animator,
            config.layout.clone(),
            DealTimings::from_config(config),
        );
        info!(
            "Match {} between {} and {} for {} coins",
            start.challenge_id, start.challenger, start.target, start.stake
        );
        Self {
            start,
            orchestrator: Arc::new(orchestrator),
            clock,
            poll: config.turn_poll_interval(),
            turn_timer: Mutex::new(None),
        }
    }

    pub fn start(&self) -> MatchStart {
        self.start
    }

    pub fn orchestrator(&self) -> &Arc<DealOrchestrator> {
        &self.orchestrator
    }

    /// Deal `round`. `generation` identifies the round; each one deals once.
    pub async fn deal(&self, generation: u64, round: &DealtRound) -> Result<DealReport, DealError> {
        self.orchestrator
            .run_deal(&DealPlan::from_round(generation, round))
            .await
    }

    /// New turn inputs arrived; the previous timer stops
    pub fn update_turn(&self, inputs: TurnTimerInputs) -> watch::Receiver<TurnReading> {
        let timer = TurnTimer::start(Arc::clone(&self.clock), inputs, self.poll);
        let readings = timer.readings();
        *self.timer() = Some(timer);
        readings
    }

    pub fn turn_reading(&self) -> Option<TurnReading> {
        self.timer().as_ref().map(TurnTimer::current)
    }

    pub fn end_turn(&self) {
        self.timer().take();
    }

    /// Stop dealing and timing. Idempotent.
    pub fn teardown(&self) {
        self.orchestrator.shutdown();
        self.end_turn();
    }

    fn timer(&self) -> MutexGuard<'_, Option<TurnTimer>> {
        self.turn_timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for MatchSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
