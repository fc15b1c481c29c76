//! Whot Duel - session choreography core
//!
//! This crate provides the platform-agnostic pieces of a Whot duel session:
//! - Challenge negotiation between two players (invite, accept/decline, stake, match start)
//! - Turn timer classification against a server-synchronized clock
//! - Cards, hands, the standard Whot deck and table slot layout
//! - A simple computer opponent for answering challenges
//!
//! # Architecture
//!
//! Everything here is synchronous and free of I/O. State machines return the
//! side effects they want performed as values; a host (the `duel-session`
//! crate, or JavaScript through the `wasm` feature) executes them. The crate
//! can be compiled to:
//! - Native Rust for the tokio session host
//! - WebAssembly for the mobile client's JS layer
//!
//! # Modules
//!
//! - [`challenge`]: Challenge records and the negotiation state machine
//! - [`effects`]: Side effects and wire payloads emitted by the machine
//! - [`turn_timer`]: Pure urgency classification for a turn window
//! - [`piece`]: Cards, hands and deck handling
//! - [`layout`]: Target positions for hand slots, pile and market
//! - [`bot`]: Computer opponent policies

pub mod bot;
pub mod challenge;
pub mod effects;
pub mod layout;
pub mod piece;
pub mod turn_timer;
#[cfg(feature = "wasm")]
pub mod wasm;

/// Player identifier as issued by the lobby service
pub type PlayerId = u64;

/// Milliseconds on the server's clock
pub type Millis = i64;

// Re-export commonly used types
pub use bot::{BotDecision, BotPolicy, ChallengeBot};
pub use challenge::{
    Challenge, ChallengeId, ChallengeMachine, ChallengeStatus, Negotiation, NegotiationError,
    NegotiationPhase, Presentation, Role, Stake, StakeOptions, StakeSelection,
};
pub use effects::{ChallengeReply, MatchStart, NegotiationEffect, Notice, Reply, TimerKind};
pub use layout::TableLayout;
pub use piece::{deal_round, standard_deck, DealtRound, Face, Hand, Piece, PieceId, Position, Seat, Suit, Zone};
pub use turn_timer::{classify, TurnTimerInputs, TurnWindow, Urgency};
