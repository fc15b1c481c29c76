//! WebAssembly bindings for the duel core.
//!
//! This module exposes the negotiation machine and turn classifier to the
//! mobile client's JavaScript layer through wasm-bindgen. Effects cross the
//! boundary as JSON arrays.

#[cfg(feature = "wasm")]
use wasm_bindgen::prelude::*;

#[cfg(feature = "wasm")]
use crate::challenge::{Challenge, ChallengeId, ChallengeMachine, NegotiationError, StakeOptions};
#[cfg(feature = "wasm")]
use crate::effects::{ChallengeReply, NegotiationEffect};
#[cfg(feature = "wasm")]
use crate::turn_timer::{classify, TurnTimerInputs};

/// Initialize panic hook for better error messages in the JS console
#[cfg(feature = "wasm")]
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

#[cfg(feature = "wasm")]
fn effects_json(result: Result<Vec<NegotiationEffect>, NegotiationError>) -> Result<String, JsValue> {
    match result {
        Ok(effects) => Ok(serde_json::to_string(&effects).unwrap_or_else(|_| "[]".to_string())),
        Err(e) => Err(JsValue::from_str(&e.to_string())),
    }
}

#[cfg(feature = "wasm")]
fn parse<T: serde::de::DeserializeOwned>(json: &str, what: &str) -> Result<T, JsValue> {
    serde_json::from_str(json).map_err(|e| JsValue::from_str(&format!("Invalid {}: {}", what, e)))
}

/// Classify a turn. `inputs_json` is a `TurnTimerInputs` object; returns the urgency name.
#[cfg(feature = "wasm")]
#[wasm_bindgen(js_name = classifyTurn)]
pub fn classify_turn(local_now: f64, inputs_json: &str) -> Result<String, JsValue> {
    let inputs: TurnTimerInputs = parse(inputs_json, "turn timer inputs")?;
    let urgency = classify(inputs.synchronized_now(local_now as i64), &inputs);
    Ok(format!("{:?}", urgency))
}

/// WASM-exposed negotiation machine
#[cfg(feature = "wasm")]
#[wasm_bindgen]
pub struct WasmChallengeMachine {
    machine: ChallengeMachine,
}

#[cfg(feature = "wasm")]
#[wasm_bindgen]
impl WasmChallengeMachine {
    /// `stakes_json` is an array of stake amounts, or empty for the defaults
    #[wasm_bindgen(constructor)]
    pub fn new(local_player: f64, stakes_json: &str) -> Result<WasmChallengeMachine, JsValue> {
        let stakes = if stakes_json.trim().is_empty() {
            StakeOptions::default()
        } else {
            StakeOptions::new(parse(stakes_json, "stakes")?)
        };

        Ok(WasmChallengeMachine {
            machine: ChallengeMachine::new(local_player as u64, stakes),
        })
    }

    /// Get every negotiation as JSON
    #[wasm_bindgen(js_name = getNegotiations)]
    pub fn get_negotiations(&self) -> String {
        let records: Vec<_> = self.machine.negotiations().collect();
        serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_string())
    }

    #[wasm_bindgen(js_name = hasUnread)]
    pub fn has_unread(&self) -> bool {
        self.machine.has_unread()
    }

    #[wasm_bindgen(js_name = requestChallenge)]
    pub fn request_challenge(&mut self, challenger: f64, opponent: f64, now: f64) -> Result<String, JsValue> {
        effects_json(
            self.machine
                .request_challenge(challenger as u64, opponent as u64, now as i64),
        )
    }

    #[wasm_bindgen(js_name = confirmSend)]
    pub fn confirm_send(&mut self, opponent: f64) -> Result<String, JsValue> {
        effects_json(self.machine.confirm_send(opponent as u64))
    }

    #[wasm_bindgen(js_name = cancelPending)]
    pub fn cancel_pending(&mut self, opponent: f64) -> Result<String, JsValue> {
        effects_json(self.machine.cancel_pending(opponent as u64))
    }

    #[wasm_bindgen(js_name = challengeReceived)]
    pub fn challenge_received(&mut self, challenge_json: &str) -> Result<String, JsValue> {
        let challenge: Challenge = parse(challenge_json, "challenge")?;
        effects_json(self.machine.challenge_received(challenge))
    }

    #[wasm_bindgen(js_name = replyReceived)]
    pub fn reply_received(&mut self, reply_json: &str) -> Result<String, JsValue> {
        let reply: ChallengeReply = parse(reply_json, "reply")?;
        effects_json(self.machine.reply_received(reply))
    }

    /// Called by the JS visibility timer; `id_json` is the armed challenge id
    pub fn blink(&mut self, id_json: &str) -> Result<String, JsValue> {
        let id: ChallengeId = parse(id_json, "challenge id")?;
        effects_json(self.machine.blink(id))
    }

    pub fn reopen(&mut self, opponent: f64) -> Result<String, JsValue> {
        effects_json(self.machine.reopen(opponent as u64))
    }

    pub fn accept(&mut self, opponent: f64) -> Result<String, JsValue> {
        effects_json(self.machine.accept(opponent as u64))
    }

    pub fn decline(&mut self, opponent: f64) -> Result<String, JsValue> {
        effects_json(self.machine.decline(opponent as u64))
    }

    #[wasm_bindgen(js_name = chooseStake)]
    pub fn choose_stake(&mut self, opponent: f64, amount: u32) -> Result<String, JsValue> {
        effects_json(self.machine.choose_stake(opponent as u64, amount))
    }

    pub fn expire(&mut self, id_json: &str) -> Result<String, JsValue> {
        let id: ChallengeId = parse(id_json, "challenge id")?;
        effects_json(self.machine.expire(id))
    }

    /// Tear down; returns the timer cancellations the JS side must perform
    pub fn dispose(&mut self) -> String {
        let effects = self.machine.dispose();
        serde_json::to_string(&effects).unwrap_or_else(|_| "[]".to_string())
    }
}
