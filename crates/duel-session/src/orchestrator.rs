//! Deal and reveal choreography.
//!
//! A deal runs in two phases. Dealing moves every hand card to its slot one
//! at a time, player before opponent at each index, then opens the pile.
//! After a settle delay, Revealing flips the player's cards and the pile card
//! together and waits for every flip that was actually issued.
//!
//! Each run is keyed by a generation id. A generation is started at most
//! once, so a caller that re-triggers a deal for the same hands is refused
//! instead of replaying the animation.
//!
//! Every wait on a completion is bounded by the command's duration plus a
//! stall grace. A piece whose renderer never reports back is recorded as
//! stalled and the deal carries on.

use crate::animator::{AnimatorError, PieceAnimator};
use crate::config::SessionConfig;
use duel_core::{DealtRound, Hand, Piece, PieceId, Position, Seat, TableLayout};
use futures_util::future::join_all;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DealError {
    #[error("Deal generation {0} was already started")]
    DuplicateGeneration(u64),

    #[error("Deal generation {running} is still in progress")]
    Busy { running: u64 },

    #[error("Orchestrator has been torn down")]
    TornDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealPhase {
    Idle,
    Dealing,
    Settling,
    Revealing,
    Done,
    TornDown,
}

/// Why a slot produced no completed animation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The hand has no card at this index
    EmptySlot { seat: Seat, index: usize },
    /// The animator has no piece with this id
    UnknownPiece(PieceId),
    /// The command was issued but never settled
    Interrupted(PieceId),
    /// The piece was already flipped in this batch
    DuplicateFlip(PieceId),
    /// No completion arrived within the stall grace
    Stalled(PieceId),
}

impl From<AnimatorError> for SkipReason {
    fn from(err: AnimatorError) -> Self {
        match err {
            AnimatorError::UnknownPiece(id) => SkipReason::UnknownPiece(id),
            AnimatorError::Interrupted(id) => SkipReason::Interrupted(id),
        }
    }
}

/// The cards to deal, borrowed from the game logic that produced them
#[derive(Debug, Clone, Copy)]
pub struct DealPlan<'a> {
    pub generation: u64,
    pub player_hand: &'a Hand,
    pub opponent_hand: &'a Hand,
    pub pile_card: Option<&'a Piece>,
}

impl<'a> DealPlan<'a> {
    pub fn from_round(generation: u64, round: &'a DealtRound) -> Self {
        Self {
            generation,
            player_hand: &round.player_hand,
            opponent_hand: &round.opponent_hand,
            pile_card: round.pile_card.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DealTimings {
    pub move_duration: Duration,
    pub flip_duration: Duration,
    pub settle_delay: Duration,
    /// Extra time a command may overrun before it is given up on
    pub stall_grace: Duration,
}

impl DealTimings {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            move_duration: config.move_duration(),
            flip_duration: config.flip_duration(),
            settle_delay: config.settle_delay(),
            stall_grace: config.stall_grace(),
        }
    }
}

impl Default for DealTimings {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// What a finished deal did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DealReport {
    pub generation: u64,
    pub moves_issued: usize,
    pub moves_completed: usize,
    pub flips_issued: usize,
    pub flips_completed: usize,
    pub skipped: Vec<SkipReason>,
}

#[derive(Debug, Default)]
struct GenerationGuard {
    running: Option<u64>,
    last_started: Option<u64>,
}

/// Clears the running generation however the run ends.
///
/// A run dropped before it finished (its task aborted, or a caller's
/// timeout firing) leaves the phase back at `Idle`.
struct RunningDeal<'a> {
    orchestrator: &'a DealOrchestrator,
}

impl Drop for RunningDeal<'_> {
    fn drop(&mut self) {
        let generation = self
            .orchestrator
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
            .take();

        self.orchestrator.phase.send_if_modified(|phase| match *phase {
            DealPhase::Dealing | DealPhase::Settling | DealPhase::Revealing => {
                debug!("Deal generation {:?} abandoned during {:?}", generation, phase);
                *phase = DealPhase::Idle;
                true
            }
            _ => false,
        });
    }
}

pub struct DealOrchestrator {
    animator: Arc<dyn PieceAnimator>,
    layout: TableLayout,
    timings: DealTimings,
    guard: Mutex<GenerationGuard>,
    phase: watch::Sender<DealPhase>,
    shutdown: watch::Sender<bool>,
}

impl DealOrchestrator {
    pub fn new(animator: Arc<dyn PieceAnimator>, layout: TableLayout, timings: DealTimings) -> Self {
        Self {
            animator,
            layout,
            timings,
            guard: Mutex::new(GenerationGuard::default()),
            phase: watch::Sender::new(DealPhase::Idle),
            shutdown: watch::Sender::new(false),
        }
    }

    pub fn phase(&self) -> DealPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DealPhase> {
        self.phase.subscribe()
    }

    pub fn is_torn_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop the running deal, if any, and refuse all future ones.
    ///
    /// Completions still in flight are dropped unobserved and no further
    /// commands are issued.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Deal orchestrator torn down");
        }
        self.phase.send_replace(DealPhase::TornDown);
    }

    /// Deal and reveal one round
    pub async fn run_deal(&self, plan: &DealPlan<'_>) -> Result<DealReport, DealError> {
        let _running = self.begin(plan.generation)?;
        let mut report = DealReport {
            generation: plan.generation,
            ..DealReport::default()
        };

        info!(
            "Dealing generation {} ({} + {} cards)",
            plan.generation,
            plan.player_hand.len(),
            plan.opponent_hand.len()
        );

        // Phase 1: one card in flight at a time, in hand order
        self.set_phase(DealPhase::Dealing);
        let rounds = plan.player_hand.len().max(plan.opponent_hand.len());
        for index in 0..rounds {
            for hand in [plan.player_hand, plan.opponent_hand] {
                match hand.get(index) {
                    Some(piece) => {
                        let slot = self.layout.hand_slot(hand.seat, index);
                        self.move_piece(piece.id, slot, &mut report).await?;
                    }
                    None => {
                        debug!("No {:?} card at slot {}", hand.seat, index);
                        report.skipped.push(SkipReason::EmptySlot {
                            seat: hand.seat,
                            index,
                        });
                    }
                }
            }
        }
        if let Some(pile) = plan.pile_card {
            self.move_piece(pile.id, self.layout.pile_position(), &mut report)
                .await?;
        }

        self.set_phase(DealPhase::Settling);
        self.until_torn_down(tokio::time::sleep(self.timings.settle_delay))
            .await?;

        // Phase 2: all flips at once, finish when the last one settles
        self.set_phase(DealPhase::Revealing);
        self.reveal(plan, &mut report).await?;

        self.set_phase(DealPhase::Done);
        info!(
            "Generation {} dealt: {}/{} moves, {}/{} flips, {} skipped",
            report.generation,
            report.moves_completed,
            report.moves_issued,
            report.flips_completed,
            report.flips_issued,
            report.skipped.len()
        );
        Ok(report)
    }

    fn begin(&self, generation: u64) -> Result<RunningDeal<'_>, DealError> {
        if self.is_torn_down() {
            return Err(DealError::TornDown);
        }

        let mut guard = self.guard.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = guard.running {
            return Err(if running == generation {
                DealError::DuplicateGeneration(generation)
            } else {
                DealError::Busy { running }
            });
        }
        if guard.last_started.is_some_and(|last| generation <= last) {
            return Err(DealError::DuplicateGeneration(generation));
        }

        guard.running = Some(generation);
        guard.last_started = Some(generation);
        Ok(RunningDeal { orchestrator: self })
    }

    async fn move_piece(
        &self,
        id: PieceId,
        to: Position,
        report: &mut DealReport,
    ) -> Result<(), DealError> {
        if self.is_torn_down() {
            return Err(DealError::TornDown);
        }

        let completion = match self.animator.move_to(id, to, self.timings.move_duration) {
            Ok(completion) => completion,
            Err(err) => {
                warn!("Skipping move: {}", err);
                report.skipped.push(err.into());
                return Ok(());
            }
        };
        report.moves_issued += 1;

        let limit = self.timings.move_duration + self.timings.stall_grace;
        match self
            .until_torn_down(tokio::time::timeout(limit, completion.wait()))
            .await?
        {
            Ok(Ok(_)) => report.moves_completed += 1,
            Ok(Err(err)) => {
                warn!("{}", err);
                report.skipped.push(err.into());
            }
            Err(_) => {
                warn!("Move of piece {} stalled after {:?}", id, limit);
                report.skipped.push(SkipReason::Stalled(id));
            }
        }
        Ok(())
    }

    async fn reveal(&self, plan: &DealPlan<'_>, report: &mut DealReport) -> Result<(), DealError> {
        if self.is_torn_down() {
            return Err(DealError::TornDown);
        }

        let limit = self.timings.flip_duration + self.timings.stall_grace;
        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for piece in plan.player_hand.iter().chain(plan.pile_card) {
            if !seen.insert(piece.id) {
                report.skipped.push(SkipReason::DuplicateFlip(piece.id));
                continue;
            }
            match self
                .animator
                .flip_to(piece.id, true, self.timings.flip_duration)
            {
                Ok(completion) => {
                    let id = piece.id;
                    pending.push(async move {
                        (id, tokio::time::timeout(limit, completion.wait()).await)
                    });
                }
                Err(err) => {
                    warn!("Skipping flip: {}", err);
                    report.skipped.push(err.into());
                }
            }
        }
        report.flips_issued = pending.len();

        for (id, result) in self.until_torn_down(join_all(pending)).await? {
            match result {
                Ok(Ok(_)) => report.flips_completed += 1,
                Ok(Err(err)) => {
                    warn!("{}", err);
                    report.skipped.push(err.into());
                }
                Err(_) => {
                    warn!("Flip of piece {} stalled after {:?}", id, limit);
                    report.skipped.push(SkipReason::Stalled(id));
                }
            }
        }
        Ok(())
    }

    /// Run `fut` unless the orchestrator is torn down first
    async fn until_torn_down<F: Future>(&self, fut: F) -> Result<F::Output, DealError> {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow_and_update() {
            return Err(DealError::TornDown);
        }

        tokio::select! {
            biased;
            _ = torn_down(&mut shutdown) => Err(DealError::TornDown),
            output = fut => Ok(output),
        }
    }

    fn set_phase(&self, next: DealPhase) {
        self.phase.send_if_modified(|phase| {
            if *phase == DealPhase::TornDown || *phase == next {
                return false;
            }
            debug!("Deal phase {:?} -> {:?}", phase, next);
            *phase = next;
            true
        });
    }
}

async fn torn_down(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if shutdown.changed().await.is_err() {
            // Sender gone with the orchestrator; nothing left to wait for
            std::future::pending::<()>().await;
        }
        if *shutdown.borrow_and_update() {
            return;
        }
    }
}
