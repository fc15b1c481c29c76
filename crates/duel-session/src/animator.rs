//! Piece animator contract.
//!
//! The renderer owns card positions; the session only issues commands and
//! observes completions. Every command hands back a [`Completion`] that fires
//! once when the card settles. Dropping a `Completion` stops observing it; a
//! renderer that abandons a command without settling reports `Interrupted`.

use dashmap::DashMap;
use duel_core::{Piece, PieceId, Position};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AnimatorError {
    #[error("No rendered piece with id {0}")]
    UnknownPiece(PieceId),

    #[error("Animation of {0} was interrupted")]
    Interrupted(PieceId),
}

/// A command as issued to the animator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnimationCommand {
    Move {
        id: PieceId,
        to: Position,
        duration: Duration,
    },
    Flip {
        id: PieceId,
        face_up: bool,
        duration: Duration,
    },
}

impl AnimationCommand {
    pub fn piece(&self) -> PieceId {
        match self {
            AnimationCommand::Move { id, .. } | AnimationCommand::Flip { id, .. } => *id,
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self, AnimationCommand::Move { .. })
    }

    fn duration(&self) -> Duration {
        match self {
            AnimationCommand::Move { duration, .. } | AnimationCommand::Flip { duration, .. } => {
                *duration
            }
        }
    }
}

/// Renderer half of a completion
pub struct Settle {
    tx: oneshot::Sender<()>,
}

impl Settle {
    /// Signal that the piece reached its target
    pub fn settle(self) {
        // Nobody listening any more is fine
        let _ = self.tx.send(());
    }
}

/// Orchestrator half of a completion
#[must_use = "a completion does nothing unless awaited"]
pub struct Completion {
    id: PieceId,
    rx: oneshot::Receiver<()>,
}

impl Completion {
    pub fn channel(id: PieceId) -> (Settle, Completion) {
        let (tx, rx) = oneshot::channel();
        (Settle { tx }, Completion { id, rx })
    }

    pub fn piece(&self) -> PieceId {
        self.id
    }

    /// Wait for the piece to settle
    pub async fn wait(self) -> Result<PieceId, AnimatorError> {
        let Completion { id, rx } = self;
        rx.await.map(|_| id).map_err(|_| AnimatorError::Interrupted(id))
    }
}

/// Anything that can move and flip rendered cards
pub trait PieceAnimator: Send + Sync {
    fn move_to(&self, id: PieceId, to: Position, duration: Duration) -> Result<Completion, AnimatorError>;

    fn flip_to(&self, id: PieceId, face_up: bool, duration: Duration) -> Result<Completion, AnimatorError>;
}

/// Render-side state of one card
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedPiece {
    pub position: Position,
    pub face_up: bool,
}

#[derive(Default)]
struct InFlight {
    moving: HashSet<PieceId>,
    flipping: HashSet<PieceId>,
}

struct SimulatedInner {
    pieces: DashMap<PieceId, RenderedPiece>,
    latency: DashMap<PieceId, Duration>,
    interrupted: DashMap<PieceId, ()>,
    log: Mutex<Vec<AnimationCommand>>,
    in_flight: Mutex<InFlight>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    conflicts: AtomicUsize,
}

/// In-process animator that settles each command after a timer.
///
/// Latency defaults to the command's duration and can be overridden per
/// piece. It keeps a command log and counts every command that arrived
/// while another command of the same kind was still running on that piece.
#[derive(Clone)]
pub struct SimulatedAnimator {
    inner: Arc<SimulatedInner>,
}

impl SimulatedAnimator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SimulatedInner {
                pieces: DashMap::new(),
                latency: DashMap::new(),
                interrupted: DashMap::new(),
                log: Mutex::new(Vec::new()),
                in_flight: Mutex::new(InFlight::default()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                conflicts: AtomicUsize::new(0),
            }),
        }
    }

    /// Put a card on the table
    pub fn register(&self, piece: &Piece) {
        self.inner.pieces.insert(
            piece.id,
            RenderedPiece {
                position: piece.position,
                face_up: piece.face_up,
            },
        );
    }

    pub fn register_all<'a>(&self, pieces: impl IntoIterator<Item = &'a Piece>) {
        for piece in pieces {
            self.register(piece);
        }
    }

    pub fn unregister(&self, id: PieceId) {
        self.inner.pieces.remove(&id);
    }

    /// Override how long commands on `id` take to settle
    pub fn set_latency(&self, id: PieceId, latency: Duration) {
        self.inner.latency.insert(id, latency);
    }

    /// Make every command on `id` end without settling
    pub fn interrupt(&self, id: PieceId) {
        self.inner.interrupted.insert(id, ());
    }

    pub fn piece(&self, id: PieceId) -> Option<RenderedPiece> {
        self.inner.pieces.get(&id).map(|p| *p)
    }

    /// Every command accepted so far, in issue order
    pub fn commands(&self) -> Vec<AnimationCommand> {
        self.inner
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Highest number of commands running at once
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_active.load(Ordering::SeqCst)
    }

    /// Commands issued against a piece already running one of the same kind
    pub fn conflicts(&self) -> usize {
        self.inner.conflicts.load(Ordering::SeqCst)
    }

    fn issue(&self, command: AnimationCommand) -> Result<Completion, AnimatorError> {
        let id = command.piece();
        if !self.inner.pieces.contains_key(&id) {
            return Err(AnimatorError::UnknownPiece(id));
        }

        self.inner
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);

        {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let set = if command.is_move() {
                &mut in_flight.moving
            } else {
                &mut in_flight.flipping
            };
            if !set.insert(id) {
                self.inner.conflicts.fetch_add(1, Ordering::SeqCst);
            }
        }

        let active = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_active.fetch_max(active, Ordering::SeqCst);

        let latency = self
            .inner
            .latency
            .get(&id)
            .map(|l| *l)
            .unwrap_or_else(|| command.duration());
        let interrupted = self.inner.interrupted.contains_key(&id);

        let (settle, completion) = Completion::channel(id);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            inner.finish(command, !interrupted);
            if interrupted {
                drop(settle);
            } else {
                settle.settle();
            }
        });

        Ok(completion)
    }
}

impl SimulatedInner {
    fn finish(&self, command: AnimationCommand, settled: bool) {
        let id = command.piece();
        if settled {
            if let Some(mut piece) = self.pieces.get_mut(&id) {
                match command {
                    AnimationCommand::Move { to, .. } => piece.position = to,
                    AnimationCommand::Flip { face_up, .. } => piece.face_up = face_up,
                }
            }
        }

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if command.is_move() {
            in_flight.moving.remove(&id);
        } else {
            in_flight.flipping.remove(&id);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for SimulatedAnimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PieceAnimator for SimulatedAnimator {
    fn move_to(&self, id: PieceId, to: Position, duration: Duration) -> Result<Completion, AnimatorError> {
        self.issue(AnimationCommand::Move { id, to, duration })
    }

    fn flip_to(&self, id: PieceId, face_up: bool, duration: Duration) -> Result<Completion, AnimatorError> {
        self.issue(AnimationCommand::Flip { id, face_up, duration })
    }
}
