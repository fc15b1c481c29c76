//! Headless Whot Duel session: a player challenges a bot, the match is dealt
//! and one turn is timed.

use anyhow::{bail, Context};
use duel_core::{deal_round, BotPolicy, ChallengeBot, MatchStart, TurnTimerInputs, TurnWindow, Urgency};
use duel_session::{
    MatchSession, SessionConfig, SessionEvent, SessionHub, SimulatedAnimator, SystemClock,
    TimeSource,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PLAYER: u64 = 1;
const BOT: u64 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SessionConfig::load().context("loading session config")?;
    let clock: Arc<dyn TimeSource> = Arc::new(SystemClock);

    let (hub, outbox) = SessionHub::new();
    let hub = Arc::new(hub);
    let pump = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move { hub.pump(outbox).await })
    };

    let (player, mut player_events) = hub.open(PLAYER, &config, Arc::clone(&clock));
    let (bot_session, bot_events) = hub.open(BOT, &config, Arc::clone(&clock));
    let bot_task = tokio::spawn(run_bot(
        bot_session,
        bot_events,
        ChallengeBot::new(BOT, BotPolicy::AlwaysAccept),
    ));

    info!("Challenging player {}", BOT);
    player.request_challenge(BOT);
    player.confirm_send(BOT)?;

    let start = tokio::time::timeout(Duration::from_secs(5), wait_for_match(&mut player_events))
        .await
        .context("no answer to the challenge")??;

    let round = deal_round(config.hand_size, &mut rand::thread_rng());
    let animator = SimulatedAnimator::new();
    animator.register_all(round.player_hand.iter());
    animator.register_all(round.opponent_hand.iter());
    animator.register_all(round.pile_card.iter());

    let game = MatchSession::new(start, Arc::new(animator.clone()), &config, Arc::clone(&clock));
    let report = game.deal(1, &round).await?;
    info!(
        "Dealt {} cards, revealed {}, {} conflicting commands",
        report.moves_completed,
        report.flips_completed,
        animator.conflicts()
    );

    let now = clock.now_millis();
    let inputs = TurnTimerInputs::active(
        TurnWindow::new(now, 3_000).with_thresholds(now + 1_500, now + 2_500),
    );
    let mut readings = game.update_turn(inputs);
    let mut last = readings.borrow().urgency;
    info!("Turn started: {:?}", last);
    while readings.changed().await.is_ok() {
        let reading = *readings.borrow_and_update();
        if reading.urgency != last {
            info!("Turn {:?} (opacity {})", reading.urgency, reading.opacity);
            last = reading.urgency;
        }
        if reading.urgency == Urgency::Expired {
            break;
        }
    }

    game.teardown();
    hub.unregister(PLAYER);
    hub.unregister(BOT);
    bot_task.abort();
    pump.abort();
    info!("Session finished");
    Ok(())
}

async fn wait_for_match(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> anyhow::Result<MatchStart> {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::MatchStarted { start } => return Ok(start),
            SessionEvent::ChallengeDeclined { .. } => bail!("challenge declined"),
            SessionEvent::ChallengeExpired { .. } => bail!("challenge expired"),
            _ => {}
        }
    }
    bail!("session closed")
}

/// Answer every challenge shown to the bot
async fn run_bot(
    session: duel_session::ChallengeSession,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut bot: ChallengeBot,
) {
    while let Some(event) = events.recv().await {
        if let SessionEvent::ChallengeShown { challenge_id } = event {
            let challenger = challenge_id.challenger;
            if let Err(err) = session.drive(|machine| bot.respond(machine, challenger)) {
                warn!("Bot could not answer {}: {}", challenge_id, err);
            }
        }
    }
}
