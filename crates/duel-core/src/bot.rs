//! Computer opponent for answering challenges.
//!
//! Policies:
//! - AlwaysAccept: accept and play for the smallest stake
//! - AlwaysDecline: turn every challenge down
//! - Random: accept most challenges, at a random offered stake

use crate::challenge::{ChallengeMachine, NegotiationError, Stake, StakeOptions};
use crate::effects::NegotiationEffect;
use crate::PlayerId;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Chance that a random bot accepts
const RANDOM_ACCEPT_PROBABILITY: f64 = 0.7;

/// How a bot answers challenges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotPolicy {
    AlwaysAccept,
    AlwaysDecline,
    Random,
}

/// What the bot decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotDecision {
    Accept { stake: Stake },
    Decline,
}

/// A bot answering challenges on behalf of a player
pub struct ChallengeBot {
    pub player_id: PlayerId,
    pub policy: BotPolicy,
    rng: StdRng,
}

impl ChallengeBot {
    pub fn new(player_id: PlayerId, policy: BotPolicy) -> Self {
        Self {
            player_id,
            policy,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(player_id: PlayerId, policy: BotPolicy, seed: u64) -> Self {
        Self {
            player_id,
            policy,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Decide how to answer, given the stakes on offer
    pub fn decide(&mut self, options: &StakeOptions) -> BotDecision {
        let stakes = options.as_slice();
        let Some(&lowest) = stakes.first() else {
            return BotDecision::Decline;
        };

        match self.policy {
            BotPolicy::AlwaysAccept => BotDecision::Accept { stake: lowest },
            BotPolicy::AlwaysDecline => BotDecision::Decline,
            BotPolicy::Random => {
                if self.rng.gen_bool(RANDOM_ACCEPT_PROBABILITY) {
                    let stake = stakes.choose(&mut self.rng).copied().unwrap_or(lowest);
                    BotDecision::Accept { stake }
                } else {
                    BotDecision::Decline
                }
            }
        }
    }

    /// Answer the pending challenge from `challenger`, returning every effect produced
    pub fn respond(
        &mut self,
        machine: &mut ChallengeMachine,
        challenger: PlayerId,
    ) -> Result<Vec<NegotiationEffect>, NegotiationError> {
        let decision = self.decide(machine.stake_options());
        Self::carry_out(machine, challenger, decision)
    }

    /// Apply `decision` to the challenge from `challenger`.
    ///
    /// The stake is checked before anything changes. Once `accept` went
    /// through its effects are always returned, so the host can still show
    /// the stake picker if choosing fails.
    pub fn carry_out(
        machine: &mut ChallengeMachine,
        challenger: PlayerId,
        decision: BotDecision,
    ) -> Result<Vec<NegotiationEffect>, NegotiationError> {
        match decision {
            BotDecision::Accept { stake } => {
                if !machine.stake_options().contains(stake) {
                    return Err(NegotiationError::InvalidStake(stake));
                }
                let mut effects = machine.accept(challenger)?;
                if let Ok(chosen) = machine.choose_stake(challenger, stake) {
                    effects.extend(chosen);
                }
                Ok(effects)
            }
            BotDecision::Decline => machine.decline(challenger),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::{Challenge, ChallengeId, NegotiationPhase};

    fn machine_with_incoming(bot: PlayerId, challenger: PlayerId) -> ChallengeMachine {
        let mut machine = ChallengeMachine::new(bot, StakeOptions::default());
        machine
            .challenge_received(Challenge::new(
                ChallengeId {
                    challenger,
                    target: bot,
                    seq: 0,
                },
                0,
            ))
            .unwrap();
        machine
    }

    #[test]
    fn test_always_accept_picks_lowest_stake() {
        let mut bot = ChallengeBot::with_seed(9, BotPolicy::AlwaysAccept, 1);
        assert_eq!(
            bot.decide(&StakeOptions::default()),
            BotDecision::Accept { stake: 50 }
        );
    }

    #[test]
    fn test_empty_options_decline() {
        let mut bot = ChallengeBot::with_seed(9, BotPolicy::AlwaysAccept, 1);
        assert_eq!(bot.decide(&StakeOptions::new(vec![])), BotDecision::Decline);
    }

    #[test]
    fn test_random_bot_only_offers_listed_stakes() {
        let mut bot = ChallengeBot::with_seed(9, BotPolicy::Random, 1234);
        let options = StakeOptions::default();
        for _ in 0..100 {
            if let BotDecision::Accept { stake } = bot.decide(&options) {
                assert!(options.contains(stake));
            }
        }
    }

    #[test]
    fn test_respond_drives_machine_to_match() {
        let mut machine = machine_with_incoming(9, 1);
        let mut bot = ChallengeBot::with_seed(9, BotPolicy::AlwaysAccept, 1);

        let effects = bot.respond(&mut machine, 1).unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, NegotiationEffect::StartMatch(_))));
        assert_eq!(
            machine.negotiation(1).unwrap().phase,
            NegotiationPhase::MatchStarted
        );
    }

    #[test]
    fn test_unoffered_stake_leaves_challenge_untouched() {
        let mut machine = machine_with_incoming(9, 1);

        let result = ChallengeBot::carry_out(&mut machine, 1, BotDecision::Accept { stake: 75 });
        assert_eq!(result, Err(NegotiationError::InvalidStake(75)));
        assert_eq!(
            machine.negotiation(1).unwrap().phase,
            NegotiationPhase::AwaitingResponse
        );

        // Still answerable afterwards
        let effects =
            ChallengeBot::carry_out(&mut machine, 1, BotDecision::Accept { stake: 100 }).unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, NegotiationEffect::CancelTimer(..))));
        assert!(effects
            .iter()
            .any(|e| matches!(e, NegotiationEffect::StartMatch(start) if start.stake == 100)));
    }

    #[test]
    fn test_respond_decline() {
        let mut machine = machine_with_incoming(9, 1);
        let mut bot = ChallengeBot::with_seed(9, BotPolicy::AlwaysDecline, 1);

        bot.respond(&mut machine, 1).unwrap();
        assert_eq!(
            machine.negotiation(1).unwrap().phase,
            NegotiationPhase::Declined
        );
    }
}
