//! # Ludo Game Server Library
//!
//! Authoritative server for a four-player cross-and-circle race game.
//! Clients connect over WebSocket, send `{type, payload}` JSON intents, and
//! receive full session snapshots; all rules are decided here and clients
//! are view-only.
//!
//! ## Architecture
//!
//! ### Serialized per-room handling
//! Every room is a `GameSession` behind its own async mutex. Message
//! handling and timed events for a room serialize on that lock, so each
//! connection in a room observes snapshots in one common sequence. No
//! ordering is guaranteed across rooms, and no two room locks are ever held
//! at once.
//!
//! ### Timed transitions with epochs
//! Dice resolution, auto-pass and the turn watchdog run as spawned sleeps
//! that capture the session epoch when enqueued. Any turn transition bumps
//! the epoch, so a timer belonging to an ended turn wakes up, sees a
//! different epoch and does nothing.
//!
//! ### Snapshot broadcasting
//! After each mutation the full session snapshot is serialized once and
//! queued on every live connection in the room. At four players per room
//! there is no need to diff.
//!
//! ## Module Organization
//!
//! - [`room_manager`]: game-id allocation, room lookup, and the binding
//!   from connection address to (playerId, gameId).
//! - [`game`]: per-room session state and the turn state machine, including
//!   move application, capture, win detection and bonus turns.
//! - [`network`]: WebSocket accept loop, intent dispatch, broadcast fan-out,
//!   timer scheduling, and the liveness endpoint.

pub mod game;
pub mod network;
pub mod room_manager;
