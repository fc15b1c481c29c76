//! Table layout: where cards go when they are dealt.

use crate::piece::{Position, Seat};
use serde::{Deserialize, Serialize};

/// Fixed anchor points of the duel table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableLayout {
    /// Left-most slot of the local player's hand
    pub player_hand_origin: Position,
    /// Left-most slot of the opponent's hand
    pub opponent_hand_origin: Position,
    /// Horizontal distance between neighbouring hand slots
    pub card_spacing: f32,
    pub pile: Position,
    pub market: Position,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            player_hand_origin: Position::new(40.0, 560.0),
            opponent_hand_origin: Position::new(40.0, 80.0),
            card_spacing: 56.0,
            pile: Position::new(200.0, 320.0),
            market: Position::new(80.0, 320.0),
        }
    }
}

impl TableLayout {
    /// Target position of the `index`-th card dealt to `seat`
    pub fn hand_slot(&self, seat: Seat, index: usize) -> Position {
        let origin = match seat {
            Seat::Player => self.player_hand_origin,
            Seat::Opponent => self.opponent_hand_origin,
        };
        Position::new(origin.x + self.card_spacing * index as f32, origin.y)
    }

    pub fn pile_position(&self) -> Position {
        self.pile
    }

    pub fn market_position(&self) -> Position {
        self.market
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_step_by_spacing() {
        let layout = TableLayout::default();

        assert_eq!(layout.hand_slot(Seat::Player, 0), Position::new(40.0, 560.0));
        assert_eq!(layout.hand_slot(Seat::Player, 2), Position::new(152.0, 560.0));
        assert_eq!(layout.hand_slot(Seat::Opponent, 1), Position::new(96.0, 80.0));
    }

    #[test]
    fn test_partial_layout_fills_defaults() {
        let layout: TableLayout = serde_json::from_str(r#"{"card_spacing": 10.0}"#).unwrap();
        assert_eq!(layout.card_spacing, 10.0);
        assert_eq!(layout.pile, TableLayout::default().pile);
    }
}
