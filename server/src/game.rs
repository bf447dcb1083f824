//! Per-room session state and the turn state machine
//!
//! A `GameSession` owns the canonical state of one room and every transition
//! over it: joining and starting, the roll phases, move resolution with
//! capture and win detection, and turn advancement. All methods are
//! synchronous; the network layer serializes access through the session lock
//! and drives the timed transitions (roll resolution, auto-pass, the turn
//! watchdog).
//!
//! Stale timers are suppressed with an epoch counter: every phase transition
//! bumps the session epoch, timers capture the epoch when they are enqueued,
//! and a timer whose epoch no longer matches does nothing. No timer ever
//! fires a transition on behalf of a turn that has already ended.

use log::info;
use ludo_shared::{
    advance, movable_pieces, resolve_captures, ChatMessage, Game, GameStatus, PieceState, Player,
    MAX_PLAYERS,
};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;

/// Dice animation window before the roll resolves.
pub const ROLL_RESOLVE_DELAY: Duration = Duration::from_millis(1000);

/// Grace period shown to clients after a roll with no legal move.
pub const AUTO_PASS_DELAY: Duration = Duration::from_millis(1500);

/// Watchdog deadline for an idle current player.
pub const TURN_TIMEOUT: Duration = Duration::from_secs(30);

/// Advisory seconds published in `turnTimeLeft` at turn start.
pub const TURN_TIME_SECS: u32 = 30;

/// Precondition failures with a user-visible message.
///
/// Exactly these produce an `error` frame to the caller; every other invalid
/// request (duplicate rolls, moves on non-movable pieces) is ignored without
/// a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    NotFound(String),
    Full,
    NotHost,
    NotYourTurn,
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameError::NotFound(game_id) => write!(f, "Game {game_id} not found."),
            GameError::Full => write!(f, "This game is full."),
            GameError::NotHost => write!(f, "Only the host can start."),
            GameError::NotYourTurn => write!(f, "It's not your turn!"),
        }
    }
}

impl std::error::Error for GameError {}

/// Result of accepting a `rollDice` intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollStart {
    /// The dice animation started; a roll-resolution timer is due.
    Started,
    /// Duplicate or racing attempt; no state change, no reply.
    Ignored,
}

/// Result of resolving a roll to a dice value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollOutcome {
    /// The current player has at least one legal move.
    AwaitingMove,
    /// No legal move; an auto-pass timer is due.
    NoMoves,
    /// The session was not in the rolling phase; nothing happened.
    Stale,
}

/// Result of applying a `movePiece` intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The mover finished all four pieces; the session is terminal.
    Win,
    /// Rolled a 6 or captured: the same player rolls again.
    Bonus,
    /// Normal move; the turn advanced to the next player.
    Advanced,
    /// Precondition not met (no dice showing, piece not movable); ignored.
    Ignored,
}

/// The authoritative state of one room plus its live connections.
pub struct GameSession {
    /// The serializable session record broadcast to clients.
    pub game: Game,
    /// Outbound frame queue per live connection in this room.
    pub connections: HashMap<SocketAddr, UnboundedSender<Message>>,
    epoch: u64,
    next_chat_id: u64,
}

impl GameSession {
    pub fn new(game_id: String, host_id: String, host_name: String) -> Self {
        info!("Game {} created by {}", game_id, host_id);
        Self {
            game: Game::new(game_id, host_id, host_name),
            connections: HashMap::new(),
            epoch: 0,
            next_chat_id: 1,
        }
    }

    /// Monotonic phase counter; timers capture it at enqueue and must no-op
    /// once it has moved on.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn bump_epoch(&mut self) {
        self.epoch += 1;
    }

    pub fn is_seated(&self, player_id: &str) -> bool {
        self.game.players.iter().any(|p| p.player_id == player_id)
    }

    fn is_current(&self, player_id: &str) -> bool {
        self.game
            .current_turn_player_id
            .as_deref()
            .is_some_and(|current| current == player_id)
    }

    fn current_player(&self) -> &Player {
        &self.game.players[self.game.current_player_index]
    }

    /// Seats a new player on the next seat in canonical color order.
    pub fn add_player(&mut self, player_id: String, name: String) -> Result<(), GameError> {
        if self.game.players.len() >= MAX_PLAYERS {
            return Err(GameError::Full);
        }
        let seat = self.game.players.len() as u8;
        let player = Player::new(player_id, name.clone(), seat);
        self.game.player_order.push(player.color);
        self.game.message = format!("{} joined the game.", name);
        info!("Game {}: {} took seat {}", self.game.game_id, name, seat);
        self.game.players.push(player);
        Ok(())
    }

    /// Host-only transition from `Setup` to `Playing`; seat 0 acts first.
    ///
    /// Returns `Ok(false)` when the game is already running, which callers
    /// treat as a racing duplicate and ignore.
    pub fn start(&mut self, player_id: &str) -> Result<bool, GameError> {
        if player_id != self.game.host_id {
            return Err(GameError::NotHost);
        }
        if self.game.game_status != GameStatus::Setup {
            return Ok(false);
        }
        self.game.game_status = GameStatus::Playing;
        self.game.current_player_index = 0;
        self.game.current_turn_player_id = Some(self.game.players[0].player_id.clone());
        self.game.turn_time_left = TURN_TIME_SECS;
        self.game.message = format!("{}'s turn.", self.game.players[0].name);
        info!("Game {} started", self.game.game_id);
        self.bump_epoch();
        Ok(true)
    }

    /// Accepts a `rollDice` intent from the current player and enters the
    /// dice animation window.
    pub fn begin_roll(&mut self, player_id: &str) -> Result<RollStart, GameError> {
        if self.game.game_status != GameStatus::Playing {
            return Ok(RollStart::Ignored);
        }
        if !self.is_current(player_id) {
            return Err(GameError::NotYourTurn);
        }
        if self.game.is_rolling || self.game.dice_value.is_some() {
            return Ok(RollStart::Ignored);
        }
        self.game.is_rolling = true;
        self.game.message = format!("{} is rolling the dice.", self.current_player().name);
        self.bump_epoch();
        Ok(RollStart::Started)
    }

    /// Lands the dice on `value` and computes the current player's options.
    ///
    /// Called by the roll-resolution timer with a uniform value in 1..=6;
    /// tests call it directly to pin the dice.
    pub fn resolve_roll(&mut self, value: u8) -> RollOutcome {
        if !self.game.is_rolling {
            return RollOutcome::Stale;
        }
        self.game.is_rolling = false;
        self.game.dice_value = Some(value);
        let index = self.game.current_player_index;
        self.game.players[index].inactive_turns = 0;
        self.game.movable_pieces = movable_pieces(&self.game.players[index], value);
        let name = self.game.players[index].name.clone();
        self.bump_epoch();
        if self.game.movable_pieces.is_empty() {
            self.game.message = format!("{} rolled a {}. No moves available.", name, value);
            RollOutcome::NoMoves
        } else {
            self.game.message = format!("{} rolled a {}. Move a piece.", name, value);
            RollOutcome::AwaitingMove
        }
    }

    /// Applies a `movePiece` intent: advancement, capture, win detection,
    /// then either a bonus roll or turn advancement.
    pub fn apply_move(&mut self, player_id: &str, piece_id: u8) -> Result<MoveOutcome, GameError> {
        if self.game.game_status != GameStatus::Playing {
            return Ok(MoveOutcome::Ignored);
        }
        if !self.is_current(player_id) {
            return Err(GameError::NotYourTurn);
        }
        let Some(dice) = self.game.dice_value else {
            return Ok(MoveOutcome::Ignored);
        };
        if !self.game.movable_pieces.contains(&piece_id) {
            return Ok(MoveOutcome::Ignored);
        }

        let index = self.game.current_player_index;
        let player = &mut self.game.players[index];
        let name = player.name.clone();
        let color = player.color;
        let Some(piece) = player.pieces.iter_mut().find(|p| p.id == piece_id) else {
            return Ok(MoveOutcome::Ignored);
        };
        let (position, state) = advance(piece, dice);
        piece.position = position;
        piece.state = state;
        let finished_all = player.pieces.iter().all(|p| p.state == PieceState::Finished);

        let captured = if state == PieceState::Active {
            resolve_captures(&mut self.game.players, color, position)
        } else {
            0
        };

        if finished_all {
            self.game.players[index].has_finished = true;
            self.game.winner = Some(self.game.players[index].clone());
            self.game.game_status = GameStatus::Finished;
            self.game.dice_value = None;
            self.game.movable_pieces.clear();
            self.game.message = format!("{} wins!", name);
            info!("Game {} won by {}", self.game.game_id, name);
            self.bump_epoch();
            return Ok(MoveOutcome::Win);
        }

        if dice == 6 || captured > 0 {
            self.game.dice_value = None;
            self.game.movable_pieces.clear();
            self.game.turn_time_left = TURN_TIME_SECS;
            self.game.message = if captured > 0 {
                format!("{} captured a piece. Roll again.", name)
            } else {
                format!("{} rolled a 6. Roll again.", name)
            };
            self.bump_epoch();
            return Ok(MoveOutcome::Bonus);
        }

        self.advance_turn();
        Ok(MoveOutcome::Advanced)
    }

    /// Advances to the next non-removed seat; a no-op when every player is
    /// removed. Clears the dice state and rearms the advisory turn clock.
    pub fn advance_turn(&mut self) {
        let count = self.game.players.len();
        if count == 0 || self.game.players.iter().all(|p| p.is_removed) {
            return;
        }
        let mut index = self.game.current_player_index;
        loop {
            index = (index + 1) % count;
            if !self.game.players[index].is_removed {
                break;
            }
        }
        self.game.current_player_index = index;
        self.game.current_turn_player_id = Some(self.game.players[index].player_id.clone());
        self.game.dice_value = None;
        self.game.is_rolling = false;
        self.game.movable_pieces.clear();
        self.game.turn_time_left = TURN_TIME_SECS;
        self.game.message = format!("{}'s turn.", self.game.players[index].name);
        self.bump_epoch();
    }

    /// Auto-pass after a roll with no legal move.
    pub fn auto_pass(&mut self) {
        if self.game.game_status != GameStatus::Playing {
            return;
        }
        self.advance_turn();
    }

    /// Watchdog pass for an idle current player; counts against them.
    pub fn forfeit_turn(&mut self) {
        if self.game.game_status != GameStatus::Playing {
            return;
        }
        let index = self.game.current_player_index;
        self.game.players[index].inactive_turns += 1;
        info!(
            "Game {}: {} timed out ({} inactive turns)",
            self.game.game_id, self.game.players[index].name, self.game.players[index].inactive_turns
        );
        self.advance_turn();
    }

    /// Marks a player as removed; advances the turn if it was theirs.
    ///
    /// Idempotent: leave and connection close both funnel here.
    pub fn mark_left(&mut self, player_id: &str) {
        let Some(index) = self
            .game
            .players
            .iter()
            .position(|p| p.player_id == player_id)
        else {
            return;
        };
        if self.game.players[index].is_removed {
            return;
        }
        self.game.players[index].is_removed = true;
        self.game.message = format!("{} left the game.", self.game.players[index].name);
        info!(
            "Game {}: {} removed",
            self.game.game_id, self.game.players[index].name
        );
        if self.game.game_status == GameStatus::Playing && self.game.current_player_index == index {
            // Kill this turn's timers even if nobody is left to take over.
            self.bump_epoch();
            self.game.is_rolling = false;
            self.game.dice_value = None;
            self.game.movable_pieces.clear();
            self.advance_turn();
        }
    }

    /// Appends a chat entry with a server timestamp. Returns false when the
    /// sender is not seated in this room.
    pub fn add_chat(&mut self, player_id: &str, text: String) -> bool {
        let Some(player) = self
            .game
            .players
            .iter()
            .find(|p| p.player_id == player_id)
        else {
            return false;
        };
        let entry = ChatMessage {
            id: self.next_chat_id,
            player_id: player.player_id.clone(),
            name: player.name.clone(),
            color: player.color,
            text,
            timestamp: now_millis(),
        };
        self.next_chat_id += 1;
        self.game.chat_messages.push(entry);
        true
    }
}

/// Server clock in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
