//! In-process routing between player sessions.

use crate::config::SessionConfig;
use crate::protocol::{SessionEvent, SessionMessage};
use crate::session::ChallengeSession;
use crate::turn_clock::TimeSource;
use dashmap::DashMap;
use duel_core::PlayerId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Registry of live sessions sharing one outbox.
///
/// Every session writes to the hub's outbox; the hub delivers each message
/// to the session of its recipient and nobody else.
pub struct SessionHub {
    /// Sessions by local player id
    sessions: DashMap<PlayerId, ChallengeSession>,
    outbox: mpsc::UnboundedSender<SessionMessage>,
}

impl SessionHub {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionMessage>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        (
            Self {
                sessions: DashMap::new(),
                outbox,
            },
            rx,
        )
    }

    /// Sender for sessions created outside the hub
    pub fn outbox(&self) -> mpsc::UnboundedSender<SessionMessage> {
        self.outbox.clone()
    }

    /// Create and register a session for `local`
    pub fn open(
        &self,
        local: PlayerId,
        config: &SessionConfig,
        clock: Arc<dyn TimeSource>,
    ) -> (ChallengeSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let (session, events) = ChallengeSession::new(local, config, clock, self.outbox());
        self.register(session.clone());
        (session, events)
    }

    /// Register a session, tearing down any previous one for the same player
    pub fn register(&self, session: ChallengeSession) {
        let local = session.local_player();
        if let Some(previous) = self.sessions.insert(local, session) {
            warn!("Replacing session for player {}", local);
            previous.teardown();
        }
        info!("Player {} joined the hub", local);
    }

    pub fn unregister(&self, player: PlayerId) -> bool {
        match self.sessions.remove(&player) {
            Some((_, session)) => {
                session.teardown();
                info!("Player {} left the hub", player);
                true
            }
            None => false,
        }
    }

    pub fn session(&self, player: PlayerId) -> Option<ChallengeSession> {
        self.sessions.get(&player).map(|s| s.clone())
    }

    /// Deliver `message` to its recipient. Returns false if nobody took it.
    pub fn route(&self, message: SessionMessage) -> bool {
        let recipient = message.recipient();
        // Clone out so the map shard is not held while the session runs
        let Some(session) = self.session(recipient) else {
            debug!("No session for player {}, dropping message", recipient);
            return false;
        };

        match session.deliver(message) {
            Ok(()) => true,
            Err(err) => {
                warn!("Player {} rejected message: {}", recipient, err);
                false
            }
        }
    }

    /// Route whatever is queued right now
    pub fn flush(&self, rx: &mut mpsc::UnboundedReceiver<SessionMessage>) -> usize {
        let mut routed = 0;
        while let Ok(message) = rx.try_recv() {
            if self.route(message) {
                routed += 1;
            }
        }
        routed
    }

    /// Route messages until every sender is gone
    pub async fn pump(&self, mut rx: mpsc::UnboundedReceiver<SessionMessage>) {
        while let Some(message) = rx.recv().await {
            self.route(message);
        }
        debug!("Hub outbox closed");
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
