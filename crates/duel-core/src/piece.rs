//! Cards, hands and the Whot deck.
//!
//! This module contains:
//! - Piece identity and face data
//! - Zones a card can sit in (market, a seat's hand, the pile)
//! - Ordered hands
//! - The standard 54-card deck and a round dealer

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a card for the lifetime of a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PieceId(pub u32);

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "card#{}", self.0)
    }
}

/// Whot suits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Suit {
    Circle,
    Triangle,
    Cross,
    Square,
    Star,
    /// The wild "Whot" card, always numbered 20
    Whot,
}

impl Suit {
    pub const ALL: [Suit; 6] = [
        Suit::Circle,
        Suit::Triangle,
        Suit::Cross,
        Suit::Square,
        Suit::Star,
        Suit::Whot,
    ];

    /// Numbers printed on this suit in a standard deck (one card per entry)
    pub fn numbers(&self) -> &'static [u8] {
        match self {
            Suit::Circle | Suit::Triangle => &[1, 2, 3, 4, 5, 7, 8, 10, 11, 12, 13, 14],
            Suit::Cross | Suit::Square => &[1, 2, 3, 5, 7, 10, 11, 13, 14],
            Suit::Star => &[1, 2, 3, 4, 5, 7, 8],
            Suit::Whot => &[20, 20, 20, 20, 20],
        }
    }
}

/// What is printed on the face of a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Face {
    pub suit: Suit,
    pub number: u8,
}

impl Face {
    pub fn new(suit: Suit, number: u8) -> Self {
        Self { suit, number }
    }
}

/// Which side of the table a hand belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Seat {
    /// The local player (bottom of the screen)
    Player,
    /// The remote or computer opponent (top of the screen)
    Opponent,
}

/// Where a card currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Zone {
    Market,
    Hand(Seat),
    Pile,
}

/// Screen position in layout units
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// One animatable card.
///
/// `position` and `orientation` belong to the renderer; `zone` and `face`
/// belong to game logic. The orchestrator only ever looks at `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub id: PieceId,
    pub face: Face,
    pub zone: Zone,
    pub face_up: bool,
    pub position: Position,
    /// Rotation in degrees
    pub orientation: f32,
}

impl Piece {
    /// A face-down card sitting in the market
    pub fn new(id: PieceId, face: Face) -> Self {
        Self {
            id,
            face,
            zone: Zone::Market,
            face_up: false,
            position: Position::default(),
            orientation: 0.0,
        }
    }
}

/// Ordered cards held by one seat. Order is deal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hand {
    pub seat: Seat,
    pieces: Vec<Piece>,
}

impl Hand {
    pub fn new(seat: Seat) -> Self {
        Self {
            seat,
            pieces: Vec::new(),
        }
    }

    /// Build a hand from cards in deal order
    pub fn from_pieces(seat: Seat, pieces: Vec<Piece>) -> Self {
        let mut hand = Self::new(seat);
        for piece in pieces {
            hand.push(piece);
        }
        hand
    }

    /// Append a card; it moves into this seat's zone
    pub fn push(&mut self, mut piece: Piece) {
        piece.zone = Zone::Hand(self.seat);
        self.pieces.push(piece);
    }

    pub fn get(&self, index: usize) -> Option<&Piece> {
        self.pieces.get(index)
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    pub fn iter(&self) -> impl Iterator<Item = &Piece> {
        self.pieces.iter()
    }

    /// Remove a card by id, keeping the order of the rest
    pub fn remove(&mut self, id: PieceId) -> Option<Piece> {
        let index = self.pieces.iter().position(|p| p.id == id)?;
        Some(self.pieces.remove(index))
    }
}

/// Create the standard Whot deck (54 cards), ids assigned in suit order
pub fn standard_deck() -> Vec<Piece> {
    let mut deck = Vec::with_capacity(54);
    let mut next_id = 0;

    for suit in Suit::ALL {
        for &number in suit.numbers() {
            deck.push(Piece::new(PieceId(next_id), Face::new(suit, number)));
            next_id += 1;
        }
    }

    deck
}

/// Shuffle a deck
pub fn shuffle_deck<R: Rng>(deck: &mut [Piece], rng: &mut R) {
    deck.shuffle(rng);
}

/// The outcome of dealing a round
#[derive(Debug, Clone, PartialEq)]
pub struct DealtRound {
    pub player_hand: Hand,
    pub opponent_hand: Hand,
    /// The card turned over to open the pile
    pub pile_card: Option<Piece>,
    /// Remaining draw pile
    pub market: Vec<Piece>,
}

/// Shuffle a fresh deck and deal `hand_size` cards to each seat, alternating
/// player then opponent, then open the pile.
pub fn deal_round<R: Rng>(hand_size: usize, rng: &mut R) -> DealtRound {
    let mut market = standard_deck();
    shuffle_deck(&mut market, rng);
    // Deal from the top of the deck, which is the end of the vec
    market.reverse();

    let mut player_hand = Hand::new(Seat::Player);
    let mut opponent_hand = Hand::new(Seat::Opponent);

    for _ in 0..hand_size {
        if let Some(card) = market.pop() {
            player_hand.push(card);
        }
        if let Some(card) = market.pop() {
            opponent_hand.push(card);
        }
    }

    let pile_card = market.pop().map(|mut card| {
        card.zone = Zone::Pile;
        card
    });

    market.reverse();

    DealtRound {
        player_hand,
        opponent_hand,
        pile_card,
        market,
    }
}
