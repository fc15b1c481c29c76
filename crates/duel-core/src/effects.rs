//! Side effects emitted by the negotiation machine.
//!
//! The machine never performs I/O. Each operation returns the effects the
//! host must carry out: outbound messages, chat notices, prompts to show,
//! timers to arm or cancel, and the hand-off to the match layer.

use crate::challenge::{Challenge, ChallengeId, Stake};
use crate::PlayerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The receiving player's answer to a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Accepted { stake: Stake },
    Declined,
}

/// A reply travelling back to the challenger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeReply {
    pub challenge_id: ChallengeId,
    /// The player who answered
    pub from: PlayerId,
    /// The original challenger
    pub to: PlayerId,
    pub reply: Reply,
}

/// Hand-off to the match layer once a stake is agreed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStart {
    pub challenge_id: ChallengeId,
    pub challenger: PlayerId,
    pub target: PlayerId,
    pub stake: Stake,
}

/// Informational chat lines posted to the conversation between the two players
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    ChallengeSent { opponent: PlayerId },
    ChallengeReceived { challenger: PlayerId },
    Declined { challenger: PlayerId, by: PlayerId },
    StakeChosen { challenger: PlayerId, target: PlayerId, stake: Stake },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::ChallengeSent { opponent } => {
                write!(f, "You challenged player {} to a game of Whot", opponent)
            }
            Notice::ChallengeReceived { challenger } => {
                write!(f, "Player {} challenged you to a game of Whot", challenger)
            }
            Notice::Declined { challenger, by } => {
                write!(f, "Player {} declined the challenge from player {}", by, challenger)
            }
            Notice::StakeChosen { stake, .. } => {
                write!(f, "Challenge accepted! Playing for {} coins", stake)
            }
        }
    }
}

/// Timers the host keeps per challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// Hides an unanswered incoming challenge behind a blinking badge
    Visibility,
    /// Expires an outgoing challenge nobody answered (only if configured)
    Response,
}

/// Everything the host may be asked to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationEffect {
    // ==================== Outbound ====================
    /// Deliver a challenge to its target
    SendChallenge(Challenge),
    /// Deliver a reply to the challenger
    SendReply(ChallengeReply),
    /// Post a chat notice
    Chat(Notice),

    // ==================== Presentation ====================
    /// Show the incoming challenge bubble
    ShowChallenge(ChallengeId),
    /// Collapse the bubble into the unread badge
    ChallengeBlinking(ChallengeId),
    /// Prompt for one of the offered stakes
    ShowStakeOptions {
        challenge_id: ChallengeId,
        options: Vec<Stake>,
    },
    /// Our outgoing challenge was turned down
    ChallengeDeclined(ChallengeId),
    /// A challenge ran out of time
    ChallengeExpired(ChallengeId),

    // ==================== Timers ====================
    ArmTimer(TimerKind, ChallengeId),
    CancelTimer(TimerKind, ChallengeId),

    // ==================== Match ====================
    /// Begin play
    StartMatch(MatchStart),

    /// Two players challenged each other at once and one challenge was dropped
    CollisionResolved {
        prevailing: ChallengeId,
        withdrawn: ChallengeId,
    },
}

impl NegotiationEffect {
    /// Whether this effect asks for a timer to be cancelled
    pub fn cancels(&self, kind: TimerKind, id: ChallengeId) -> bool {
        matches!(self, NegotiationEffect::CancelTimer(k, i) if *k == kind && *i == id)
    }
}
