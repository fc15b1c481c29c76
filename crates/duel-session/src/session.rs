//! One player's challenge session.
//!
//! Wraps a [`ChallengeMachine`] and carries out the effects it returns:
//! outbound messages go to the outbox, UI and chat notices go to the event
//! channel, and timers become tokio tasks. A timer only holds a weak
//! reference to the session, so dropping the last handle aborts everything.

use crate::config::SessionConfig;
use crate::protocol::{SessionEvent, SessionMessage};
use crate::turn_clock::TimeSource;
use duel_core::{
    ChallengeId, ChallengeMachine, Negotiation, NegotiationEffect, NegotiationError, PlayerId,
    Stake, TimerKind,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type NegotiationResult = Result<Vec<NegotiationEffect>, NegotiationError>;

/// Random high bits for challenge numbering, so a session that replaces an
/// earlier one for the same player never reissues one of its ids
fn seq_base() -> u64 {
    u64::from(rand::random::<u32>()) << 32
}

struct ArmedTimer {
    token: u64,
    handle: JoinHandle<()>,
}

struct SessionInner {
    local: PlayerId,
    machine: Mutex<ChallengeMachine>,
    timers: Mutex<HashMap<(TimerKind, ChallengeId), ArmedTimer>>,
    next_token: AtomicU64,
    visibility_timeout: Duration,
    response_timeout: Option<Duration>,
    clock: Arc<dyn TimeSource>,
    outbox: mpsc::UnboundedSender<SessionMessage>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

/// Handle to a player's negotiation state. Clones share the session.
#[derive(Clone)]
pub struct ChallengeSession {
    inner: Arc<SessionInner>,
}

impl ChallengeSession {
    /// Create a session for `local`. Messages for other players are written
    /// to `outbox`; local events come out of the returned receiver.
    pub fn new(
        local: PlayerId,
        config: &SessionConfig,
        clock: Arc<dyn TimeSource>,
        outbox: mpsc::UnboundedSender<SessionMessage>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let inner = SessionInner {
            local,
            machine: Mutex::new(
                ChallengeMachine::new(local, config.stake_options()).with_seq_base(seq_base()),
            ),
            timers: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(0),
            visibility_timeout: config.visibility_timeout(),
            response_timeout: config.response_timeout(),
            clock,
            outbox,
            events,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    pub fn local_player(&self) -> PlayerId {
        self.inner.local
    }

    /// Compose a challenge to `opponent`.
    ///
    /// Returns false when one is already outstanding with that player; the
    /// second request is simply ignored.
    pub fn request_challenge(&self, opponent: PlayerId) -> bool {
        let local = self.inner.local;
        let now = self.inner.clock.now_millis();
        self.inner
            .run("request_challenge", |m| m.request_challenge(local, opponent, now))
            .is_ok()
    }

    pub fn confirm_send(&self, opponent: PlayerId) -> Result<(), NegotiationError> {
        self.inner.run("confirm_send", |m| m.confirm_send(opponent))
    }

    pub fn cancel_pending(&self, opponent: PlayerId) -> Result<(), NegotiationError> {
        self.inner.run("cancel_pending", |m| m.cancel_pending(opponent))
    }

    /// Tap on a blinking challenge badge
    pub fn reopen(&self, opponent: PlayerId) -> Result<(), NegotiationError> {
        self.inner.run("reopen", |m| m.reopen(opponent))
    }

    pub fn accept(&self, opponent: PlayerId) -> Result<(), NegotiationError> {
        self.inner.run("accept", |m| m.accept(opponent))
    }

    pub fn decline(&self, opponent: PlayerId) -> Result<(), NegotiationError> {
        self.inner.run("decline", |m| m.decline(opponent))
    }

    pub fn choose_stake(&self, opponent: PlayerId, stake: Stake) -> Result<(), NegotiationError> {
        self.inner
            .run("choose_stake", |m| m.choose_stake(opponent, stake))
    }

    /// Hand an inbound message from the transport to the machine
    pub fn deliver(&self, message: SessionMessage) -> Result<(), NegotiationError> {
        match message {
            SessionMessage::Challenge { challenge } => self
                .inner
                .run("challenge_received", |m| m.challenge_received(challenge)),
            SessionMessage::Reply { reply } => {
                self.inner.run("reply_received", |m| m.reply_received(reply))
            }
        }
    }

    /// Run `f` against the machine, e.g. to let a bot answer
    pub fn drive<F>(&self, f: F) -> Result<(), NegotiationError>
    where
        F: FnOnce(&mut ChallengeMachine) -> Result<Vec<NegotiationEffect>, NegotiationError>,
    {
        self.inner.run("drive", f)
    }

    /// Drop every negotiation and cancel every timer
    pub fn teardown(&self) {
        let mut machine = self.inner.machine();
        let effects = machine.dispose();
        self.inner.apply(effects);
        self.inner.abort_timers();
        drop(machine);
        info!("Challenge session for player {} torn down", self.inner.local);
    }

    pub fn snapshot(&self, opponent: PlayerId) -> Option<Negotiation> {
        self.inner.machine().negotiation(opponent).cloned()
    }

    /// Whether a blinking challenge is waiting
    pub fn has_unread(&self) -> bool {
        self.inner.machine().has_unread()
    }

    pub fn armed_timers(&self) -> usize {
        self.inner.timers().len()
    }

    pub fn is_armed(&self, kind: TimerKind, id: ChallengeId) -> bool {
        self.inner.timers().contains_key(&(kind, id))
    }
}

impl SessionInner {
    fn machine(&self) -> MutexGuard<'_, ChallengeMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<(TimerKind, ChallengeId), ArmedTimer>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run<F>(self: &Arc<Self>, op: &'static str, f: F) -> Result<(), NegotiationError>
    where
        F: FnOnce(&mut ChallengeMachine) -> NegotiationResult,
    {
        // Effects are applied under the machine lock so timer arms and
        // cancels land in the same order as the transitions that caused them
        let mut machine = self.machine();
        match f(&mut *machine) {
            Ok(effects) => {
                self.apply(effects);
                Ok(())
            }
            Err(err) => {
                debug!("Player {}: {} ignored: {}", self.local, op, err);
                Err(err)
            }
        }
    }

    fn apply(self: &Arc<Self>, effects: Vec<NegotiationEffect>) {
        for effect in effects {
            match effect {
                NegotiationEffect::SendChallenge(challenge) => {
                    self.send(SessionMessage::Challenge { challenge })
                }
                NegotiationEffect::SendReply(reply) => self.send(SessionMessage::Reply { reply }),
                NegotiationEffect::Chat(notice) => {
                    let text = notice.to_string();
                    info!("[chat] {}", text);
                    self.emit(SessionEvent::Chat { text, notice });
                }
                NegotiationEffect::ShowChallenge(challenge_id) => {
                    self.emit(SessionEvent::ChallengeShown { challenge_id })
                }
                NegotiationEffect::ChallengeBlinking(challenge_id) => {
                    self.emit(SessionEvent::ChallengeBlinking { challenge_id })
                }
                NegotiationEffect::ShowStakeOptions {
                    challenge_id,
                    options,
                } => self.emit(SessionEvent::StakeOptions {
                    challenge_id,
                    options,
                }),
                NegotiationEffect::ChallengeDeclined(challenge_id) => {
                    self.emit(SessionEvent::ChallengeDeclined { challenge_id })
                }
                NegotiationEffect::ChallengeExpired(challenge_id) => {
                    self.emit(SessionEvent::ChallengeExpired { challenge_id })
                }
                NegotiationEffect::ArmTimer(kind, id) => self.arm(kind, id),
                NegotiationEffect::CancelTimer(kind, id) => self.cancel(kind, id),
                NegotiationEffect::StartMatch(start) => {
                    info!(
                        "Match {} starting for {} coins",
                        start.challenge_id, start.stake
                    );
                    self.emit(SessionEvent::MatchStarted { start });
                }
                NegotiationEffect::CollisionResolved {
                    prevailing,
                    withdrawn,
                } => {
                    debug!(
                        "Player {}: challenges crossed, {} kept over {}",
                        self.local, prevailing, withdrawn
                    );
                }
            }
        }
    }

    fn send(&self, message: SessionMessage) {
        if self.outbox.send(message).is_err() {
            warn!("Outbox closed, dropping message from player {}", self.local);
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn arm(self: &Arc<Self>, kind: TimerKind, id: ChallengeId) {
        let delay = match kind {
            TimerKind::Visibility => self.visibility_timeout,
            TimerKind::Response => match self.response_timeout {
                Some(delay) => delay,
                None => return,
            },
        };

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let session: Weak<Self> = Arc::downgrade(self);

        // Held across the spawn so the task cannot fire before it is recorded
        let mut timers = self.timers();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(session) = session.upgrade() {
                session.fire(kind, id, token);
            }
        });
        if let Some(previous) = timers.insert((kind, id), ArmedTimer { token, handle }) {
            previous.handle.abort();
        }
        debug!("Armed {:?} timer for {} ({:?})", kind, id, delay);
    }

    fn cancel(&self, kind: TimerKind, id: ChallengeId) {
        if let Some(timer) = self.timers().remove(&(kind, id)) {
            timer.handle.abort();
            debug!("Cancelled {:?} timer for {}", kind, id);
        }
    }

    fn fire(self: &Arc<Self>, kind: TimerKind, id: ChallengeId, token: u64) {
        let mut machine = self.machine();
        {
            let mut timers = self.timers();
            match timers.get(&(kind, id)) {
                Some(timer) if timer.token == token => {
                    timers.remove(&(kind, id));
                }
                // Cancelled or re-armed meanwhile
                _ => return,
            }
        }

        let result = match kind {
            TimerKind::Visibility => machine.blink(id),
            TimerKind::Response => machine.expire(id),
        };
        match result {
            Ok(effects) => self.apply(effects),
            Err(err) => debug!("Player {}: {:?} timer for {} ignored: {}", self.local, kind, id, err),
        }
    }

    fn abort_timers(&self) {
        for (_, timer) in self.timers().drain() {
            timer.handle.abort();
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.abort_timers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn_clock::TokioClock;
    use duel_core::{NegotiationPhase, Presentation};

    const ALICE: PlayerId = 1;
    const BOB: PlayerId = 2;

    struct Player {
        session: ChallengeSession,
        outbox: mpsc::UnboundedReceiver<SessionMessage>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    impl Player {
        fn new(id: PlayerId, config: &SessionConfig) -> Self {
            let (tx, outbox) = mpsc::unbounded_channel();
            let (session, events) =
                ChallengeSession::new(id, config, Arc::new(TokioClock::starting_at(0)), tx);
            Self {
                session,
                outbox,
                events,
            }
        }

        fn drain(&mut self) -> Vec<SessionEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        /// Carry everything in our outbox over to `peer`
        fn flush_to(&mut self, peer: &Player) {
            while let Ok(message) = self.outbox.try_recv() {
                peer.session.deliver(message).unwrap();
            }
        }
    }

    fn challenged_pair(config: &SessionConfig) -> (Player, Player) {
        let mut alice = Player::new(ALICE, config);
        let bob = Player::new(BOB, config);
        assert!(alice.session.request_challenge(BOB));
        alice.session.confirm_send(BOB).unwrap();
        alice.flush_to(&bob);
        (alice, bob)
    }

    /// Alice has sent a challenge that is still sitting in her outbox
    fn challenged_pair_unsent(config: &SessionConfig) -> (Player, Player) {
        let alice = Player::new(ALICE, config);
        let bob = Player::new(BOB, config);
        assert!(alice.session.request_challenge(BOB));
        alice.session.confirm_send(BOB).unwrap();
        (alice, bob)
    }

    fn blinked(events: &[SessionEvent]) -> bool {
        events
            .iter()
            .any(|e| matches!(e, SessionEvent::ChallengeBlinking { .. }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_challenge_blinks_and_stays_open() {
        let (_alice, mut bob) = challenged_pair(&SessionConfig::default());
        let shown = bob.drain();
        assert!(matches!(shown[0], SessionEvent::Chat { .. }));
        assert!(matches!(shown[1], SessionEvent::ChallengeShown { .. }));
        assert_eq!(bob.session.armed_timers(), 1);

        tokio::time::sleep(Duration::from_millis(59_000)).await;
        assert!(!blinked(&bob.drain()));

        tokio::time::sleep(Duration::from_millis(1_001)).await;
        assert!(blinked(&bob.drain()));
        assert!(bob.session.has_unread());

        let record = bob.session.snapshot(ALICE).unwrap();
        assert_eq!(record.phase, NegotiationPhase::AwaitingResponse);
        assert_eq!(record.presentation, Presentation::Blinking);

        bob.session.accept(ALICE).unwrap();
        bob.session.choose_stake(ALICE, 100).unwrap();
        let events = bob.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::MatchStarted { start } if start.stake == 100)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_cancels_visibility_timer() {
        let (_alice, mut bob) = challenged_pair(&SessionConfig::default());
        tokio::time::sleep(Duration::from_secs(10)).await;

        bob.session.accept(ALICE).unwrap();
        assert_eq!(bob.session.armed_timers(), 0);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!blinked(&bob.drain()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reopen_rearms() {
        let (_alice, mut bob) = challenged_pair(&SessionConfig::default());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(blinked(&bob.drain()));

        bob.session.reopen(ALICE).unwrap();
        assert!(!bob.session.has_unread());
        assert_eq!(bob.session.armed_timers(), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(blinked(&bob.drain()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decline_reaches_challenger() {
        let (mut alice, mut bob) = challenged_pair(&SessionConfig::default());
        bob.session.decline(ALICE).unwrap();
        bob.flush_to(&alice);

        assert!(bob
            .drain()
            .iter()
            .any(|e| matches!(e, SessionEvent::Chat { text, .. } if text.contains("declined"))));
        assert!(alice
            .drain()
            .iter()
            .any(|e| matches!(e, SessionEvent::ChallengeDeclined { .. })));
        assert_eq!(
            alice.session.snapshot(BOB).unwrap().phase,
            NegotiationPhase::Declined
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_request_is_ignored() {
        let alice = Player::new(ALICE, &SessionConfig::default());
        assert!(alice.session.request_challenge(BOB));
        assert!(!alice.session.request_challenge(BOB));
        assert!(!alice.session.request_challenge(ALICE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_timeout_expires_challenge() {
        let config = SessionConfig {
            response_timeout_ms: Some(5_000),
            ..SessionConfig::default()
        };
        let (mut alice, _bob) = challenged_pair(&config);
        let id = alice.session.snapshot(BOB).unwrap().id();
        assert!(alice.session.is_armed(TimerKind::Response, id));

        tokio::time::sleep(Duration::from_millis(5_001)).await;
        assert!(alice
            .drain()
            .iter()
            .any(|e| matches!(e, SessionEvent::ChallengeExpired { challenge_id } if *challenge_id == id)));
        assert_eq!(
            alice.session.snapshot(BOB).unwrap().phase,
            NegotiationPhase::Expired
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_response_timer_by_default() {
        let (alice, _bob) = challenged_pair(&SessionConfig::default());
        assert_eq!(alice.session.armed_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_timers() {
        let (_alice, mut bob) = challenged_pair(&SessionConfig::default());
        assert_eq!(bob.session.armed_timers(), 1);

        bob.session.teardown();
        assert_eq!(bob.session.armed_timers(), 0);
        assert!(bob.session.snapshot(ALICE).is_none());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!blinked(&bob.drain()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_closes_session() {
        let (_alice, mut bob) = challenged_pair(&SessionConfig::default());
        drop(bob.session);

        tokio::time::sleep(Duration::from_secs(120)).await;
        let mut blinks = 0;
        while let Some(event) = bob.events.recv().await {
            if matches!(event, SessionEvent::ChallengeBlinking { .. }) {
                blinks += 1;
            }
        }
        assert_eq!(blinks, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_accept_racing_delivery_leaves_no_timer() {
        let config = SessionConfig::default();
        let runtime = tokio::runtime::Handle::current();

        for _ in 0..200 {
            let (mut alice, bob) = challenged_pair_unsent(&config);
            let message = alice.outbox.try_recv().unwrap();

            std::thread::scope(|scope| {
                scope.spawn(|| {
                    let _guard = runtime.enter();
                    bob.session.deliver(message).unwrap();
                });
                scope.spawn(|| {
                    let _guard = runtime.enter();
                    while bob.session.accept(ALICE).is_err() {
                        std::thread::yield_now();
                    }
                });
            });

            assert_eq!(bob.session.armed_timers(), 0);
            assert_eq!(
                bob.session.snapshot(ALICE).unwrap().phase,
                NegotiationPhase::StakeSelection
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_misrouted_message_rejected() {
        let (mut alice, _bob) = challenged_pair(&SessionConfig::default());
        let carol = Player::new(3, &SessionConfig::default());

        assert!(alice.session.request_challenge(4));
        alice.session.confirm_send(4).unwrap();
        let message = alice.outbox.try_recv().unwrap();
        assert!(matches!(
            carol.session.deliver(message),
            Err(NegotiationError::Misrouted(_))
        ));
    }
}
