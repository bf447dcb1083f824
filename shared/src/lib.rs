//! # Shared Ludo Library
//!
//! This crate contains everything the server and its clients must agree on:
//! the board constants, the wire protocol, the serializable session model,
//! and the pure rule engine.
//!
//! ## Board Model
//!
//! The board is a shared loop of 52 squares numbered 1..=52 with square 1
//! following square 52. Each color has its own entry square, a pre-home
//! square (the last loop square before its private home stretch), and a
//! 6-square home stretch encoded as positions `FINISH_START + k` for
//! k in 0..=5. A piece still in its starting pen has `position = -1`.
//!
//! ## Rule Engine
//!
//! `advance`, `movable_pieces` and `resolve_captures` are pure functions:
//! no I/O, no hidden state. An illegal move is signalled by returning the
//! input unchanged, which callers treat as "not movable".
//!
//! ## Wire Protocol
//!
//! Every frame is one UTF-8 JSON object shaped `{"type": ..., "payload": ...}`.
//! `ClientMessage` and `ServerMessage` model the two directions; the session
//! snapshot keeps the original flat field encoding (camelCase names, the
//! `-1` / `>= 100` position regions) for client compatibility.

use serde::{Deserialize, Serialize};

/// Number of squares on the shared loop.
pub const LOOP_LEN: i32 = 52;

/// First position of every color's private home stretch.
///
/// Positions at or above this value are home-stretch indices encoded as
/// `FINISH_START + k`; the wire format relies on this flat encoding.
pub const FINISH_START: i32 = 100;

/// Length of the home stretch; index `HOME_STRETCH_LEN - 1` is the finish square.
pub const HOME_STRETCH_LEN: i32 = 6;

/// Position of a piece that is still in its starting pen.
pub const HOME_POSITION: i32 = -1;

/// Loop squares on which capture is disallowed.
pub const SAFE_SQUARES: [i32; 8] = [1, 9, 14, 22, 27, 35, 40, 48];

/// Maximum number of seated players per game.
pub const MAX_PLAYERS: usize = 4;

/// Pieces per player.
pub const PIECES_PER_PLAYER: u8 = 4;

/// Colors in seat order: seat 0 is red, seat 1 green, and so on.
pub const COLOR_ORDER: [Color; 4] = [Color::Red, Color::Green, Color::Yellow, Color::Blue];

/// Returns true if capture is disallowed on the given loop square.
pub fn is_safe_square(square: i32) -> bool {
    SAFE_SQUARES.contains(&square)
}

/// Player colors, one per seat.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Red,
    Green,
    Yellow,
    Blue,
}

impl Color {
    /// The loop square a piece of this color enters on when leaving home.
    pub fn start_square(self) -> i32 {
        match self {
            Color::Green => 1,
            Color::Red => 14,
            Color::Blue => 27,
            Color::Yellow => 40,
        }
    }

    /// The last loop square of this color before its home stretch.
    pub fn pre_home_square(self) -> i32 {
        match self {
            Color::Green => 51,
            Color::Red => 12,
            Color::Blue => 25,
            Color::Yellow => 38,
        }
    }
}

/// Lifecycle state of a single piece.
///
/// `Home -> Active` requires a 6; `Finished` is terminal.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PieceState {
    Home,
    Active,
    Finished,
}

/// One of a player's four pieces.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Piece {
    /// Unique per room: `seat_index * 4 + k` for k in 0..4.
    pub id: u8,
    pub color: Color,
    pub state: PieceState,
    /// `-1` in home, 1..=52 on the loop, `FINISH_START + k` in the stretch.
    pub position: i32,
}

impl Piece {
    pub fn new(id: u8, color: Color) -> Self {
        Self {
            id,
            color,
            state: PieceState::Home,
            position: HOME_POSITION,
        }
    }
}

/// Overall lifecycle of a game session.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Setup,
    Playing,
    Finished,
}

/// A seated player.
///
/// Players are never spliced out of the roster: leaving or disconnecting
/// only sets `is_removed`, so `seat_index` always equals insertion order.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Opaque client-supplied identity, trusted within the room.
    pub player_id: String,
    pub name: String,
    pub color: Color,
    pub seat_index: u8,
    pub pieces: Vec<Piece>,
    pub has_finished: bool,
    /// Turns forfeited to the inactivity watchdog since the last roll.
    pub inactive_turns: u32,
    pub is_removed: bool,
    pub is_host: bool,
}

impl Player {
    /// Creates a player for the given seat, with the canonical color for
    /// that seat and four pieces in the home pen.
    pub fn new(player_id: String, name: String, seat_index: u8) -> Self {
        let color = COLOR_ORDER[seat_index as usize % COLOR_ORDER.len()];
        let pieces = (0..PIECES_PER_PLAYER)
            .map(|k| Piece::new(seat_index * PIECES_PER_PLAYER + k, color))
            .collect();
        Self {
            player_id,
            name,
            color,
            seat_index,
            pieces,
            has_finished: false,
            inactive_turns: 0,
            is_removed: false,
            is_host: false,
        }
    }
}

/// A chat entry, append-only within its session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: u64,
    pub player_id: String,
    pub name: String,
    pub color: Color,
    pub text: String,
    /// Server clock, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// The full serializable session record.
///
/// This is the snapshot broadcast to every connection in the room after
/// each mutation; clients are view-only with respect to its contents.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    /// 6-character uppercase base36 room identifier.
    pub game_id: String,
    pub host_id: String,
    pub players: Vec<Player>,
    /// Colors in seat order, one entry per seated player.
    pub player_order: Vec<Color>,
    pub current_player_index: usize,
    pub current_turn_player_id: Option<String>,
    /// Set only between roll completion and move resolution (or auto-pass).
    pub dice_value: Option<u8>,
    pub game_status: GameStatus,
    pub winner: Option<Player>,
    /// Human-readable status line; advisory, never rule-bearing.
    pub message: String,
    /// Piece ids the current player may move; empty unless a dice is showing.
    pub movable_pieces: Vec<u8>,
    /// True only during the dice animation window.
    pub is_rolling: bool,
    /// Advisory flag for client-side move animation; carries no rule weight.
    pub is_animating: bool,
    /// Advisory seconds remaining in the current turn.
    pub turn_time_left: u32,
    pub chat_messages: Vec<ChatMessage>,
}

impl Game {
    /// Creates a fresh session in `Setup` with the host in seat 0.
    pub fn new(game_id: String, host_id: String, host_name: String) -> Self {
        let mut host = Player::new(host_id.clone(), host_name, 0);
        host.is_host = true;
        let host_color = host.color;
        Self {
            game_id,
            host_id: host_id.clone(),
            players: vec![host],
            player_order: vec![host_color],
            current_player_index: 0,
            current_turn_player_id: Some(host_id),
            dice_value: None,
            game_status: GameStatus::Setup,
            winner: None,
            message: "Waiting for players.".to_string(),
            movable_pieces: Vec::new(),
            is_rolling: false,
            is_animating: false,
            turn_time_left: 30,
            chat_messages: Vec::new(),
        }
    }
}

/// Client intents, decoded from `{"type": ..., "payload": ...}` frames.
///
/// A frame whose `type` is unknown or whose payload does not match fails to
/// decode; the dispatcher logs and drops it without replying.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    CreateGame {
        player_id: String,
        player_name: String,
    },
    JoinGame {
        game_id: String,
        player_id: String,
        player_name: String,
    },
    StartGame {
        game_id: String,
        player_id: String,
    },
    RollDice {
        game_id: String,
        player_id: String,
    },
    MovePiece {
        game_id: String,
        player_id: String,
        piece_id: u8,
    },
    ChatMessage {
        game_id: String,
        player_id: String,
        text: String,
    },
    LeaveGame {
        game_id: String,
        player_id: String,
    },
    ResetGame {
        game_id: String,
        player_id: String,
    },
    ForceSync {
        game_id: String,
        player_id: String,
    },
}

/// Server-to-client frames.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Full post-mutation snapshot, sent to every connection in the room.
    GameStateUpdate(Game),
    /// Precondition failure, sent only to the offending caller.
    Error { message: String },
}

/// Advances a piece by a dice value.
///
/// Returns the new `(position, state)`. An illegal move (home pen without a
/// 6, overshooting the finish square) returns the input unchanged.
pub fn advance(piece: &Piece, dice: u8) -> (i32, PieceState) {
    let unchanged = (piece.position, piece.state);
    match piece.state {
        PieceState::Finished => unchanged,
        PieceState::Home => {
            if dice == 6 {
                (piece.color.start_square(), PieceState::Active)
            } else {
                unchanged
            }
        }
        PieceState::Active => {
            let dice = i32::from(dice);
            if piece.position >= FINISH_START {
                // Already in the home stretch: exact landing only.
                let index = piece.position - FINISH_START + dice;
                if index < HOME_STRETCH_LEN {
                    (FINISH_START + index, stretch_state(index))
                } else {
                    unchanged
                }
            } else {
                let dist_to_pre_home =
                    (piece.color.pre_home_square() - piece.position + LOOP_LEN) % LOOP_LEN;
                if dice > dist_to_pre_home {
                    let index = dice - dist_to_pre_home - 1;
                    if index < HOME_STRETCH_LEN {
                        (FINISH_START + index, stretch_state(index))
                    } else {
                        unchanged
                    }
                } else {
                    // Squares are 1-based; square 1 follows square 52.
                    (((piece.position - 1 + dice) % LOOP_LEN) + 1, PieceState::Active)
                }
            }
        }
    }
}

fn stretch_state(index: i32) -> PieceState {
    if index == HOME_STRETCH_LEN - 1 {
        PieceState::Finished
    } else {
        PieceState::Active
    }
}

/// Computes the ids of the player's pieces that may legally move with `dice`.
///
/// Skips finished pieces and pieces `advance` leaves unchanged, then applies
/// the blockade rule: a loop square already holding two or more of the
/// player's own active pieces admits no third arrival.
pub fn movable_pieces(player: &Player, dice: u8) -> Vec<u8> {
    let mut movable = Vec::new();
    for piece in &player.pieces {
        if piece.state == PieceState::Finished {
            continue;
        }
        let (position, state) = advance(piece, dice);
        if (position, state) == (piece.position, piece.state) {
            continue;
        }
        if position < FINISH_START {
            let occupants = player
                .pieces
                .iter()
                .filter(|p| p.state == PieceState::Active && p.position == position)
                .count();
            if occupants >= 2 {
                continue;
            }
        }
        movable.push(piece.id);
    }
    movable
}

/// Sends home every opposing piece on `destination` and returns the count.
///
/// Captures only happen on non-safe shared-loop squares; a destination in
/// the home stretch or on a safe square captures nothing.
pub fn resolve_captures(players: &mut [Player], mover: Color, destination: i32) -> usize {
    if destination >= FINISH_START || is_safe_square(destination) {
        return 0;
    }
    let mut captured = 0;
    for player in players.iter_mut().filter(|p| p.color != mover) {
        for piece in &mut player.pieces {
            if piece.state == PieceState::Active && piece.position == destination {
                piece.state = PieceState::Home;
                piece.position = HOME_POSITION;
                captured += 1;
            }
        }
    }
    captured
}
