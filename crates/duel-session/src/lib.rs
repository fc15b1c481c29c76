//! Whot Duel - session host
//!
//! Runs the `duel-core` state machines on tokio:
//! - [`session`]: one player's challenge negotiation, with its timers as tasks
//! - [`hub`]: routes messages between sessions by recipient
//! - [`orchestrator`]: deals a round card by card, then reveals it
//! - [`turn_clock`]: polls the turn classifier against a time source
//! - [`match_session`]: ties dealing and turn timing to a started match
//! - [`animator`]: the contract the renderer implements, plus a simulated one
//!
//! Transport and rendering live outside this crate. Messages cross the
//! boundary as [`protocol::SessionMessage`], animations through
//! [`animator::PieceAnimator`].

pub mod animator;
pub mod config;
pub mod hub;
pub mod match_session;
pub mod orchestrator;
pub mod protocol;
pub mod session;
pub mod turn_clock;

pub use animator::{AnimatorError, Completion, PieceAnimator, Settle, SimulatedAnimator};
pub use config::{ConfigError, SessionConfig};
pub use hub::SessionHub;
pub use match_session::MatchSession;
pub use orchestrator::{DealError, DealOrchestrator, DealPhase, DealPlan, DealReport, DealTimings, SkipReason};
pub use protocol::{SessionEvent, SessionMessage};
pub use session::ChallengeSession;
pub use turn_clock::{ManualClock, SystemClock, TimeSource, TokioClock, TurnReading, TurnTimer};
