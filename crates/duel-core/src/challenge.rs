//! Challenge negotiation state machine.
//!
//! A [`ChallengeMachine`] belongs to one local player and tracks at most one
//! [`Negotiation`] per opponent, whichever side issued it. The lifecycle is:
//!
//! ```text
//! Idle -> PendingSend -> AwaitingResponse -> StakeSelection -> MatchStarted
//!                                        \-> Declined
//!                                        \-> Expired
//! ```
//!
//! Presentation (visible bubble vs. blinking badge) is tracked next to the
//! phase and never changes it: a blinking challenge can still be answered.

use crate::effects::{ChallengeReply, MatchStart, NegotiationEffect, Notice, Reply, TimerKind};
use crate::{Millis, PlayerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Coins wagered on a match
pub type Stake = u32;

/// Stakes offered when a challenge is accepted
pub const DEFAULT_STAKES: [Stake; 4] = [50, 100, 200, 500];

/// Unique challenge identity.
///
/// `seq` comes from the challenger's own counter, so ids are unique without
/// any shared state between clients. A machine that replaces an earlier one
/// for the same player must start its counter elsewhere, see
/// [`ChallengeMachine::with_seq_base`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChallengeId {
    pub challenger: PlayerId,
    pub target: PlayerId,
    pub seq: u64,
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}#{}", self.challenger, self.target, self.seq)
    }
}

/// Protocol status of a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

/// A request from one player to play another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub challenger_id: PlayerId,
    pub target_id: PlayerId,
    pub status: ChallengeStatus,
    pub created_at: Millis,
}

impl Challenge {
    pub fn new(id: ChallengeId, created_at: Millis) -> Self {
        Self {
            id,
            challenger_id: id.challenger,
            target_id: id.target,
            status: ChallengeStatus::Pending,
            created_at,
        }
    }
}

/// The stake picked by the accepting player. Consumed straight into a [`MatchStart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeSelection {
    pub challenge_id: ChallengeId,
    pub amount: Stake,
}

impl StakeSelection {
    pub fn into_match_start(self, challenge: &Challenge) -> MatchStart {
        MatchStart {
            challenge_id: self.challenge_id,
            challenger: challenge.challenger_id,
            target: challenge.target_id,
            stake: self.amount,
        }
    }
}

/// The fixed set of stakes a player may choose from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeOptions(Vec<Stake>);

impl StakeOptions {
    /// Sorted and deduplicated
    pub fn new(mut stakes: Vec<Stake>) -> Self {
        stakes.sort_unstable();
        stakes.dedup();
        Self(stakes)
    }

    pub fn contains(&self, stake: Stake) -> bool {
        self.0.contains(&stake)
    }

    pub fn as_slice(&self) -> &[Stake] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for StakeOptions {
    fn default() -> Self {
        Self::new(DEFAULT_STAKES.to_vec())
    }
}

/// Which side of a negotiation the local player is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// We issued the challenge
    Outgoing,
    /// We were challenged
    Incoming,
}

/// Where a negotiation stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationPhase {
    /// Composed locally, waiting for the player to confirm
    PendingSend,
    AwaitingResponse,
    StakeSelection,
    MatchStarted,
    Declined,
    Expired,
}

impl NegotiationPhase {
    /// Blocks any new challenge between the same two players
    pub fn is_outstanding(&self) -> bool {
        matches!(
            self,
            NegotiationPhase::PendingSend
                | NegotiationPhase::AwaitingResponse
                | NegotiationPhase::StakeSelection
        )
    }
}

/// How an incoming challenge is currently shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presentation {
    Hidden,
    Visible,
    /// Unread badge after the visibility timeout
    Blinking,
}

/// One negotiation with one opponent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Negotiation {
    pub challenge: Challenge,
    pub role: Role,
    pub phase: NegotiationPhase,
    pub presentation: Presentation,
}

impl Negotiation {
    pub fn id(&self) -> ChallengeId {
        self.challenge.id
    }

    fn is(&self, role: Role, phase: NegotiationPhase) -> bool {
        self.role == role && self.phase == phase
    }
}

/// Errors that can occur when driving a negotiation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum NegotiationError {
    #[error("Player {0} is not the local player")]
    NotLocalPlayer(PlayerId),

    #[error("Cannot challenge yourself")]
    SelfChallenge,

    #[error("A challenge with player {0} is already outstanding")]
    AlreadyOutstanding(PlayerId),

    #[error("No challenge with player {0}")]
    NoChallenge(PlayerId),

    #[error("Invalid action for current negotiation phase")]
    InvalidPhase,

    #[error("Challenge {0} is not addressed to this player")]
    Misrouted(ChallengeId),

    #[error("Stake {0} is not offered")]
    InvalidStake(Stake),
}

type Effects = Result<Vec<NegotiationEffect>, NegotiationError>;

/// Negotiation state for one local player
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeMachine {
    local: PlayerId,
    stakes: StakeOptions,
    next_seq: u64,
    /// Keyed by opponent
    records: BTreeMap<PlayerId, Negotiation>,
}

impl ChallengeMachine {
    pub fn new(local: PlayerId, stakes: StakeOptions) -> Self {
        Self {
            local,
            stakes,
            next_seq: 0,
            records: BTreeMap::new(),
        }
    }

    /// Start numbering challenges at `base` instead of zero
    pub fn with_seq_base(mut self, base: u64) -> Self {
        self.next_seq = base;
        self
    }

    pub fn local_player(&self) -> PlayerId {
        self.local
    }

    pub fn stake_options(&self) -> &StakeOptions {
        &self.stakes
    }

    /// The negotiation with `opponent`, including finished ones still on record
    pub fn negotiation(&self, opponent: PlayerId) -> Option<&Negotiation> {
        self.records.get(&opponent)
    }

    pub fn negotiations(&self) -> impl Iterator<Item = &Negotiation> {
        self.records.values()
    }

    /// Look a negotiation up by challenge id
    pub fn find(&self, id: ChallengeId) -> Option<&Negotiation> {
        self.records.values().find(|r| r.id() == id)
    }

    /// Any incoming challenge collapsed into the unread badge
    pub fn has_unread(&self) -> bool {
        self.records
            .values()
            .any(|r| r.presentation == Presentation::Blinking)
    }

    fn record_mut(&mut self, opponent: PlayerId) -> Result<&mut Negotiation, NegotiationError> {
        self.records
            .get_mut(&opponent)
            .ok_or(NegotiationError::NoChallenge(opponent))
    }

    fn opponent_of(&self, id: ChallengeId) -> PlayerId {
        if id.challenger == self.local {
            id.target
        } else {
            id.challenger
        }
    }

    // ==================== Challenger side ====================

    /// Compose a challenge. Nothing is sent until [`Self::confirm_send`].
    pub fn request_challenge(
        &mut self,
        challenger: PlayerId,
        opponent: PlayerId,
        now: Millis,
    ) -> Effects {
        if challenger != self.local {
            return Err(NegotiationError::NotLocalPlayer(challenger));
        }
        if opponent == self.local {
            return Err(NegotiationError::SelfChallenge);
        }
        if self
            .records
            .get(&opponent)
            .is_some_and(|r| r.phase.is_outstanding())
        {
            return Err(NegotiationError::AlreadyOutstanding(opponent));
        }

        let id = ChallengeId {
            challenger,
            target: opponent,
            seq: self.next_seq,
        };
        self.next_seq = self.next_seq.wrapping_add(1);

        self.records.insert(
            opponent,
            Negotiation {
                challenge: Challenge::new(id, now),
                role: Role::Outgoing,
                phase: NegotiationPhase::PendingSend,
                presentation: Presentation::Hidden,
            },
        );

        Ok(Vec::new())
    }

    /// Send the composed challenge
    pub fn confirm_send(&mut self, opponent: PlayerId) -> Effects {
        let record = self.record_mut(opponent)?;
        if !record.is(Role::Outgoing, NegotiationPhase::PendingSend) {
            return Err(NegotiationError::InvalidPhase);
        }

        record.phase = NegotiationPhase::AwaitingResponse;
        let id = record.id();

        Ok(vec![
            NegotiationEffect::SendChallenge(record.challenge.clone()),
            NegotiationEffect::Chat(Notice::ChallengeSent { opponent }),
            NegotiationEffect::ArmTimer(TimerKind::Response, id),
        ])
    }

    /// Back out of a challenge that was composed but never sent
    pub fn cancel_pending(&mut self, opponent: PlayerId) -> Effects {
        let record = self.record_mut(opponent)?;
        if !record.is(Role::Outgoing, NegotiationPhase::PendingSend) {
            return Err(NegotiationError::InvalidPhase);
        }

        self.records.remove(&opponent);
        Ok(Vec::new())
    }

    /// The target answered one of our challenges
    pub fn reply_received(&mut self, reply: ChallengeReply) -> Effects {
        if reply.to != self.local {
            return Err(NegotiationError::Misrouted(reply.challenge_id));
        }

        // Replies to withdrawn or finished challenges are stale
        let Some(record) = self.records.get_mut(&reply.from) else {
            return Ok(Vec::new());
        };
        if record.id() != reply.challenge_id
            || !record.is(Role::Outgoing, NegotiationPhase::AwaitingResponse)
        {
            return Ok(Vec::new());
        }

        let id = record.id();
        let mut effects = vec![NegotiationEffect::CancelTimer(TimerKind::Response, id)];

        match reply.reply {
            Reply::Accepted { stake } => {
                record.challenge.status = ChallengeStatus::Accepted;
                record.phase = NegotiationPhase::MatchStarted;
                let selection = StakeSelection {
                    challenge_id: id,
                    amount: stake,
                };
                effects.push(NegotiationEffect::StartMatch(
                    selection.into_match_start(&record.challenge),
                ));
            }
            Reply::Declined => {
                record.challenge.status = ChallengeStatus::Declined;
                record.phase = NegotiationPhase::Declined;
                effects.push(NegotiationEffect::ChallengeDeclined(id));
            }
        }

        Ok(effects)
    }

    // ==================== Target side ====================

    /// A challenge addressed to us arrived.
    ///
    /// If we already sent a challenge to the same player, the one issued by
    /// the lower player id prevails on both clients.
    pub fn challenge_received(&mut self, challenge: Challenge) -> Effects {
        let challenger = challenge.challenger_id;
        if challenge.target_id != self.local || challenger == self.local {
            return Err(NegotiationError::Misrouted(challenge.id));
        }

        let mut effects = Vec::new();

        if let Some(existing) = self.records.get(&challenger) {
            if existing.id() == challenge.id {
                return Ok(Vec::new());
            }

            if existing.phase.is_outstanding() {
                match (existing.role, existing.phase) {
                    // Never left this device, the incoming one takes its place
                    (Role::Outgoing, NegotiationPhase::PendingSend) => {}
                    (Role::Outgoing, NegotiationPhase::AwaitingResponse) => {
                        let ours = existing.id();
                        if self.local < challenger {
                            return Ok(vec![NegotiationEffect::CollisionResolved {
                                prevailing: ours,
                                withdrawn: challenge.id,
                            }]);
                        }
                        effects.push(NegotiationEffect::CancelTimer(TimerKind::Response, ours));
                        effects.push(NegotiationEffect::CollisionResolved {
                            prevailing: challenge.id,
                            withdrawn: ours,
                        });
                    }
                    _ => return Err(NegotiationError::AlreadyOutstanding(challenger)),
                }
            }
        }

        let id = challenge.id;
        self.records.insert(
            challenger,
            Negotiation {
                challenge: Challenge {
                    status: ChallengeStatus::Pending,
                    ..challenge
                },
                role: Role::Incoming,
                phase: NegotiationPhase::AwaitingResponse,
                presentation: Presentation::Visible,
            },
        );

        effects.push(NegotiationEffect::Chat(Notice::ChallengeReceived { challenger }));
        effects.push(NegotiationEffect::ShowChallenge(id));
        effects.push(NegotiationEffect::ArmTimer(TimerKind::Visibility, id));
        Ok(effects)
    }

    /// The visibility timer for `id` fired. Stale timers are ignored.
    pub fn blink(&mut self, id: ChallengeId) -> Effects {
        let Some(record) = self.records.get_mut(&id.challenger) else {
            return Ok(Vec::new());
        };
        if record.id() != id
            || !record.is(Role::Incoming, NegotiationPhase::AwaitingResponse)
            || record.presentation != Presentation::Visible
        {
            return Ok(Vec::new());
        }

        record.presentation = Presentation::Blinking;
        Ok(vec![NegotiationEffect::ChallengeBlinking(id)])
    }

    /// Bring a blinking challenge back on screen
    pub fn reopen(&mut self, opponent: PlayerId) -> Effects {
        let record = self.record_mut(opponent)?;
        if !record.is(Role::Incoming, NegotiationPhase::AwaitingResponse)
            || record.presentation != Presentation::Blinking
        {
            return Err(NegotiationError::InvalidPhase);
        }

        record.presentation = Presentation::Visible;
        let id = record.id();
        Ok(vec![
            NegotiationEffect::ShowChallenge(id),
            NegotiationEffect::ArmTimer(TimerKind::Visibility, id),
        ])
    }

    pub fn accept(&mut self, opponent: PlayerId) -> Effects {
        let options = self.stakes.as_slice().to_vec();
        let record = self.record_mut(opponent)?;
        if !record.is(Role::Incoming, NegotiationPhase::AwaitingResponse) {
            return Err(NegotiationError::InvalidPhase);
        }

        record.challenge.status = ChallengeStatus::Accepted;
        record.phase = NegotiationPhase::StakeSelection;
        record.presentation = Presentation::Hidden;
        let id = record.id();

        Ok(vec![
            NegotiationEffect::CancelTimer(TimerKind::Visibility, id),
            NegotiationEffect::ShowStakeOptions {
                challenge_id: id,
                options,
            },
        ])
    }

    pub fn decline(&mut self, opponent: PlayerId) -> Effects {
        let local = self.local;
        let record = self.record_mut(opponent)?;
        if !record.is(Role::Incoming, NegotiationPhase::AwaitingResponse) {
            return Err(NegotiationError::InvalidPhase);
        }

        record.challenge.status = ChallengeStatus::Declined;
        record.phase = NegotiationPhase::Declined;
        record.presentation = Presentation::Hidden;
        let id = record.id();

        Ok(vec![
            NegotiationEffect::CancelTimer(TimerKind::Visibility, id),
            NegotiationEffect::SendReply(ChallengeReply {
                challenge_id: id,
                from: local,
                to: opponent,
                reply: Reply::Declined,
            }),
            NegotiationEffect::Chat(Notice::Declined {
                challenger: opponent,
                by: local,
            }),
        ])
    }

    pub fn choose_stake(&mut self, opponent: PlayerId, amount: Stake) -> Effects {
        let local = self.local;
        let offered = self.stakes.contains(amount);
        let record = self.record_mut(opponent)?;
        if !record.is(Role::Incoming, NegotiationPhase::StakeSelection) {
            return Err(NegotiationError::InvalidPhase);
        }
        if !offered {
            return Err(NegotiationError::InvalidStake(amount));
        }

        let selection = StakeSelection {
            challenge_id: record.id(),
            amount,
        };
        let start = selection.into_match_start(&record.challenge);
        record.phase = NegotiationPhase::MatchStarted;

        Ok(vec![
            NegotiationEffect::Chat(Notice::StakeChosen {
                challenger: start.challenger,
                target: start.target,
                stake: amount,
            }),
            NegotiationEffect::SendReply(ChallengeReply {
                challenge_id: start.challenge_id,
                from: local,
                to: opponent,
                reply: Reply::Accepted { stake: amount },
            }),
            NegotiationEffect::StartMatch(start),
        ])
    }

    // ==================== Either side ====================

    /// Give up on an unanswered challenge. Stale ids are ignored.
    pub fn expire(&mut self, id: ChallengeId) -> Effects {
        let opponent = self.opponent_of(id);
        let Some(record) = self.records.get_mut(&opponent) else {
            return Ok(Vec::new());
        };
        if record.id() != id || record.phase != NegotiationPhase::AwaitingResponse {
            return Ok(Vec::new());
        }

        record.challenge.status = ChallengeStatus::Expired;
        record.phase = NegotiationPhase::Expired;
        record.presentation = Presentation::Hidden;

        let kind = match record.role {
            Role::Outgoing => TimerKind::Response,
            Role::Incoming => TimerKind::Visibility,
        };
        Ok(vec![
            NegotiationEffect::CancelTimer(kind, id),
            NegotiationEffect::ChallengeExpired(id),
        ])
    }

    /// Tear everything down, cancelling every timer still armed
    pub fn dispose(&mut self) -> Vec<NegotiationEffect> {
        let effects = self
            .records
            .values()
            .filter(|r| r.phase == NegotiationPhase::AwaitingResponse)
            .map(|r| {
                let kind = match r.role {
                    Role::Outgoing => TimerKind::Response,
                    Role::Incoming => TimerKind::Visibility,
                };
                NegotiationEffect::CancelTimer(kind, r.id())
            })
            .collect();

        self.records.clear();
        effects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ALICE: PlayerId = 1;
    const BOB: PlayerId = 2;

    fn sent_challenge(effects: &[NegotiationEffect]) -> Challenge {
        effects
            .iter()
            .find_map(|e| match e {
                NegotiationEffect::SendChallenge(c) => Some(c.clone()),
                _ => None,
            })
            .expect("no challenge sent")
    }

    #[test]
    fn test_seq_base_separates_machine_instances() {
        let mut first = ChallengeMachine::new(ALICE, StakeOptions::default());
        let mut second =
            ChallengeMachine::new(ALICE, StakeOptions::default()).with_seq_base(1 << 32);

        first.request_challenge(ALICE, BOB, 0).unwrap();
        second.request_challenge(ALICE, BOB, 0).unwrap();
        let a = sent_challenge(&first.confirm_send(BOB).unwrap());
        let b = sent_challenge(&second.confirm_send(BOB).unwrap());

        assert_eq!(a.id.seq, 0);
        assert_eq!(b.id.seq, 1 << 32);
        assert!(a.id != b.id);

        // The receiver finished the first one and still takes the second
        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        bob.challenge_received(a).unwrap();
        bob.decline(ALICE).unwrap();
        let effects = bob.challenge_received(b.clone()).unwrap();
        assert!(effects.contains(&NegotiationEffect::ShowChallenge(b.id)));
        assert_eq!(bob.negotiation(ALICE).unwrap().phase, NegotiationPhase::AwaitingResponse);
    }

    fn incoming(from: PlayerId, to: PlayerId) -> Challenge {
        Challenge::new(
            ChallengeId {
                challenger: from,
                target: to,
                seq: 0,
            },
            1_000,
        )
    }

    #[test]
    fn test_request_has_no_effects_until_confirmed() {
        let mut alice = ChallengeMachine::new(ALICE, StakeOptions::default());
        let effects = alice.request_challenge(ALICE, BOB, 1_000).unwrap();

        assert!(effects.is_empty());
        let record = alice.negotiation(BOB).unwrap();
        assert_eq!(record.phase, NegotiationPhase::PendingSend);
        assert_eq!(record.challenge.created_at, 1_000);
    }

    #[test]
    fn test_confirm_sends_and_notifies() {
        let mut alice = ChallengeMachine::new(ALICE, StakeOptions::default());
        alice.request_challenge(ALICE, BOB, 1_000).unwrap();
        let effects = alice.confirm_send(BOB).unwrap();

        let challenge = sent_challenge(&effects);
        assert_eq!(challenge.challenger_id, ALICE);
        assert_eq!(challenge.target_id, BOB);
        assert!(effects.contains(&NegotiationEffect::Chat(Notice::ChallengeSent { opponent: BOB })));
        assert_eq!(
            alice.negotiation(BOB).unwrap().phase,
            NegotiationPhase::AwaitingResponse
        );
    }

    #[test]
    fn test_duplicate_request_rejected_both_directions() {
        let mut alice = ChallengeMachine::new(ALICE, StakeOptions::default());
        alice.request_challenge(ALICE, BOB, 0).unwrap();
        assert_eq!(
            alice.request_challenge(ALICE, BOB, 0),
            Err(NegotiationError::AlreadyOutstanding(BOB))
        );

        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        bob.challenge_received(incoming(ALICE, BOB)).unwrap();
        assert_eq!(
            bob.request_challenge(BOB, ALICE, 0),
            Err(NegotiationError::AlreadyOutstanding(ALICE))
        );
    }

    #[test]
    fn test_request_guards() {
        let mut alice = ChallengeMachine::new(ALICE, StakeOptions::default());
        assert_eq!(
            alice.request_challenge(BOB, 3, 0),
            Err(NegotiationError::NotLocalPlayer(BOB))
        );
        assert_eq!(
            alice.request_challenge(ALICE, ALICE, 0),
            Err(NegotiationError::SelfChallenge)
        );
    }

    #[test]
    fn test_cancel_pending_returns_to_idle() {
        let mut alice = ChallengeMachine::new(ALICE, StakeOptions::default());
        alice.request_challenge(ALICE, BOB, 0).unwrap();
        alice.cancel_pending(BOB).unwrap();

        assert!(alice.negotiation(BOB).is_none());
        alice.request_challenge(ALICE, BOB, 0).unwrap();
    }

    #[test]
    fn test_received_challenge_is_visible_with_timer() {
        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        let challenge = incoming(ALICE, BOB);
        let effects = bob.challenge_received(challenge.clone()).unwrap();

        assert_eq!(
            effects,
            vec![
                NegotiationEffect::Chat(Notice::ChallengeReceived { challenger: ALICE }),
                NegotiationEffect::ShowChallenge(challenge.id),
                NegotiationEffect::ArmTimer(TimerKind::Visibility, challenge.id),
            ]
        );
        assert_eq!(
            bob.negotiation(ALICE).unwrap().presentation,
            Presentation::Visible
        );
    }

    #[test]
    fn test_misrouted_challenge_rejected() {
        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        let challenge = incoming(ALICE, 3);
        assert_eq!(
            bob.challenge_received(challenge.clone()),
            Err(NegotiationError::Misrouted(challenge.id))
        );
    }

    #[test]
    fn test_duplicate_delivery_is_noop() {
        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        bob.challenge_received(incoming(ALICE, BOB)).unwrap();
        assert!(bob.challenge_received(incoming(ALICE, BOB)).unwrap().is_empty());
    }

    #[test]
    fn test_blink_keeps_status_and_allows_accept() {
        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        let challenge = incoming(ALICE, BOB);
        bob.challenge_received(challenge.clone()).unwrap();

        let effects = bob.blink(challenge.id).unwrap();
        assert_eq!(effects, vec![NegotiationEffect::ChallengeBlinking(challenge.id)]);

        let record = bob.negotiation(ALICE).unwrap();
        assert_eq!(record.presentation, Presentation::Blinking);
        assert_eq!(record.phase, NegotiationPhase::AwaitingResponse);
        assert_eq!(record.challenge.status, ChallengeStatus::Pending);
        assert!(bob.has_unread());

        bob.accept(ALICE).unwrap();
        assert_eq!(
            bob.negotiation(ALICE).unwrap().phase,
            NegotiationPhase::StakeSelection
        );
    }

    #[test]
    fn test_stale_blink_ignored() {
        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        let challenge = incoming(ALICE, BOB);
        bob.challenge_received(challenge.clone()).unwrap();
        bob.decline(ALICE).unwrap();

        assert!(bob.blink(challenge.id).unwrap().is_empty());
        assert!(!bob.has_unread());
    }

    #[test]
    fn test_reopen_rearms_timer() {
        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        let challenge = incoming(ALICE, BOB);
        bob.challenge_received(challenge.clone()).unwrap();

        assert_eq!(bob.reopen(ALICE), Err(NegotiationError::InvalidPhase));

        bob.blink(challenge.id).unwrap();
        let effects = bob.reopen(ALICE).unwrap();
        assert!(effects.contains(&NegotiationEffect::ArmTimer(TimerKind::Visibility, challenge.id)));
        assert_eq!(
            bob.negotiation(ALICE).unwrap().presentation,
            Presentation::Visible
        );
    }

    #[test]
    fn test_accept_then_stake_starts_match() {
        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        let challenge = incoming(ALICE, BOB);
        bob.challenge_received(challenge.clone()).unwrap();

        let effects = bob.accept(ALICE).unwrap();
        assert!(effects[0].cancels(TimerKind::Visibility, challenge.id));
        assert!(matches!(
            &effects[1],
            NegotiationEffect::ShowStakeOptions { options, .. } if options == &vec![50, 100, 200, 500]
        ));

        assert_eq!(bob.choose_stake(ALICE, 75), Err(NegotiationError::InvalidStake(75)));

        let effects = bob.choose_stake(ALICE, 100).unwrap();
        assert!(effects.contains(&NegotiationEffect::StartMatch(MatchStart {
            challenge_id: challenge.id,
            challenger: ALICE,
            target: BOB,
            stake: 100,
        })));
        assert_eq!(
            bob.negotiation(ALICE).unwrap().phase,
            NegotiationPhase::MatchStarted
        );
    }

    #[test]
    fn test_stake_requires_accept_first() {
        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        bob.challenge_received(incoming(ALICE, BOB)).unwrap();
        assert_eq!(bob.choose_stake(ALICE, 100), Err(NegotiationError::InvalidPhase));
    }

    #[test]
    fn test_decline_is_terminal() {
        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        let challenge = incoming(ALICE, BOB);
        bob.challenge_received(challenge.clone()).unwrap();

        let effects = bob.decline(ALICE).unwrap();
        assert!(effects[0].cancels(TimerKind::Visibility, challenge.id));
        assert_eq!(bob.accept(ALICE), Err(NegotiationError::InvalidPhase));
        assert_eq!(
            bob.negotiation(ALICE).unwrap().challenge.status,
            ChallengeStatus::Declined
        );

        // A finished negotiation does not block a fresh one
        bob.request_challenge(BOB, ALICE, 0).unwrap();
    }

    #[test]
    fn test_collision_lower_id_prevails() {
        // Alice (1) and Bob (2) challenge each other at the same time
        let mut alice = ChallengeMachine::new(ALICE, StakeOptions::default());
        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        alice.request_challenge(ALICE, BOB, 0).unwrap();
        bob.request_challenge(BOB, ALICE, 0).unwrap();
        let from_alice = sent_challenge(&alice.confirm_send(BOB).unwrap());
        let from_bob = sent_challenge(&bob.confirm_send(ALICE).unwrap());

        let at_alice = alice.challenge_received(from_bob.clone()).unwrap();
        assert_eq!(
            at_alice,
            vec![NegotiationEffect::CollisionResolved {
                prevailing: from_alice.id,
                withdrawn: from_bob.id,
            }]
        );
        assert_eq!(alice.negotiation(BOB).unwrap().role, Role::Outgoing);

        let at_bob = bob.challenge_received(from_alice.clone()).unwrap();
        assert!(at_bob.contains(&NegotiationEffect::CollisionResolved {
            prevailing: from_alice.id,
            withdrawn: from_bob.id,
        }));
        assert!(at_bob.iter().any(|e| e.cancels(TimerKind::Response, from_bob.id)));
        let record = bob.negotiation(ALICE).unwrap();
        assert_eq!(record.role, Role::Incoming);
        assert_eq!(record.id(), from_alice.id);
    }

    #[test]
    fn test_incoming_replaces_unsent_request() {
        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        bob.request_challenge(BOB, ALICE, 0).unwrap();
        bob.challenge_received(incoming(ALICE, BOB)).unwrap();

        let record = bob.negotiation(ALICE).unwrap();
        assert_eq!(record.role, Role::Incoming);
        assert_eq!(record.phase, NegotiationPhase::AwaitingResponse);
    }

    #[test]
    fn test_reply_accept_starts_match_for_challenger() {
        let mut alice = ChallengeMachine::new(ALICE, StakeOptions::default());
        alice.request_challenge(ALICE, BOB, 0).unwrap();
        let challenge = sent_challenge(&alice.confirm_send(BOB).unwrap());

        let effects = alice
            .reply_received(ChallengeReply {
                challenge_id: challenge.id,
                from: BOB,
                to: ALICE,
                reply: Reply::Accepted { stake: 200 },
            })
            .unwrap();

        assert!(effects[0].cancels(TimerKind::Response, challenge.id));
        assert!(matches!(
            effects[1],
            NegotiationEffect::StartMatch(MatchStart { stake: 200, .. })
        ));
        assert_eq!(
            alice.negotiation(BOB).unwrap().phase,
            NegotiationPhase::MatchStarted
        );
    }

    #[test]
    fn test_stale_reply_ignored() {
        let mut alice = ChallengeMachine::new(ALICE, StakeOptions::default());
        alice.request_challenge(ALICE, BOB, 0).unwrap();
        let challenge = sent_challenge(&alice.confirm_send(BOB).unwrap());

        let stale = ChallengeReply {
            challenge_id: ChallengeId {
                seq: challenge.id.seq + 5,
                ..challenge.id
            },
            from: BOB,
            to: ALICE,
            reply: Reply::Declined,
        };
        assert!(alice.reply_received(stale).unwrap().is_empty());
        assert_eq!(
            alice.negotiation(BOB).unwrap().phase,
            NegotiationPhase::AwaitingResponse
        );
    }

    #[test]
    fn test_expire_outgoing() {
        let mut alice = ChallengeMachine::new(ALICE, StakeOptions::default());
        alice.request_challenge(ALICE, BOB, 0).unwrap();
        let challenge = sent_challenge(&alice.confirm_send(BOB).unwrap());

        let effects = alice.expire(challenge.id).unwrap();
        assert_eq!(
            effects,
            vec![
                NegotiationEffect::CancelTimer(TimerKind::Response, challenge.id),
                NegotiationEffect::ChallengeExpired(challenge.id),
            ]
        );
        assert_eq!(
            alice.negotiation(BOB).unwrap().challenge.status,
            ChallengeStatus::Expired
        );
        assert!(alice.expire(challenge.id).unwrap().is_empty());
    }

    #[test]
    fn test_dispose_cancels_armed_timers() {
        let mut bob = ChallengeMachine::new(BOB, StakeOptions::default());
        let challenge = incoming(ALICE, BOB);
        bob.challenge_received(challenge.clone()).unwrap();
        bob.request_challenge(BOB, 3, 0).unwrap();
        let outgoing = sent_challenge(&bob.confirm_send(3).unwrap());

        let effects = bob.dispose();
        assert_eq!(effects.len(), 2);
        assert!(effects.iter().any(|e| e.cancels(TimerKind::Visibility, challenge.id)));
        assert!(effects.iter().any(|e| e.cancels(TimerKind::Response, outgoing.id)));
        assert_eq!(bob.negotiations().count(), 0);
    }

    #[test]
    fn test_stake_options_normalised() {
        let options = StakeOptions::new(vec![200, 50, 200, 100]);
        assert_eq!(options.as_slice(), &[50, 100, 200]);
        assert!(!options.contains(500));
    }
}
