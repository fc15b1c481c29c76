//! Messages crossing the session boundary.

use duel_core::{Challenge, ChallengeId, ChallengeReply, MatchStart, Notice, PlayerId, Stake};
use serde::{Deserialize, Serialize};

/// Messages exchanged between two players' sessions through the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SessionMessage {
    /// A challenge for its target
    Challenge { challenge: Challenge },

    /// An answer for the challenger
    Reply { reply: ChallengeReply },
}

impl SessionMessage {
    /// The player this message must be delivered to
    pub fn recipient(&self) -> PlayerId {
        match self {
            SessionMessage::Challenge { challenge } => challenge.target_id,
            SessionMessage::Reply { reply } => reply.to,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Events for the local UI, chat and match layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SessionEvent {
    /// Fire-and-forget chat line
    Chat { text: String, notice: Notice },

    /// Incoming challenge bubble shown
    ChallengeShown { challenge_id: ChallengeId },

    /// Bubble collapsed into the unread badge
    ChallengeBlinking { challenge_id: ChallengeId },

    /// Stake picker shown
    StakeOptions {
        challenge_id: ChallengeId,
        options: Vec<Stake>,
    },

    /// Our challenge was declined
    ChallengeDeclined { challenge_id: ChallengeId },

    /// A challenge ran out of time
    ChallengeExpired { challenge_id: ChallengeId },

    /// Stake agreed, hand over to the match layer
    MatchStarted { start: MatchStart },
}
