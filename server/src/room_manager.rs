//! Room registry and connection binding for the game server
//!
//! This module tracks every active room and which room each connection is
//! bound to:
//! - Room lifecycle (create with a fresh game id, lookup by id)
//! - Connection bindings: peer address to (playerId, gameId)
//!
//! The registry itself is a plain map guarded by one lock; per-room
//! serialization comes from each session's own lock, and the registry lock
//! is never held across a session lock acquisition.

use crate::game::GameSession;
use log::info;
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Game id alphabet: uppercase base36.
const GAME_ID_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Game id length in characters.
pub const GAME_ID_LEN: usize = 6;

/// What a live connection is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionBinding {
    pub player_id: String,
    pub game_id: String,
}

/// Process-wide registry of rooms and connection bindings.
///
/// Rooms are retained for the lifetime of the process; a restart loses
/// everything, which is an accepted non-goal.
#[derive(Default)]
pub struct RoomManager {
    rooms: HashMap<String, Arc<Mutex<GameSession>>>,
    bindings: HashMap<SocketAddr, ConnectionBinding>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a room with a freshly allocated game id and the caller as
    /// host. Returns the id and a handle to the new session.
    pub fn create_room(
        &mut self,
        host_id: String,
        host_name: String,
    ) -> (String, Arc<Mutex<GameSession>>) {
        let game_id = self.generate_game_id();
        let session = Arc::new(Mutex::new(GameSession::new(
            game_id.clone(),
            host_id,
            host_name,
        )));
        self.rooms.insert(game_id.clone(), Arc::clone(&session));
        (game_id, session)
    }

    /// Looks up a room by game id.
    pub fn get(&self, game_id: &str) -> Option<Arc<Mutex<GameSession>>> {
        self.rooms.get(game_id).map(Arc::clone)
    }

    /// Binds a connection to a seat in a room, replacing any previous
    /// binding for that connection (reconnects rebind in place).
    pub fn bind(&mut self, addr: SocketAddr, player_id: String, game_id: String) {
        info!("Connection {} bound to game {} as {}", addr, game_id, player_id);
        self.bindings
            .insert(addr, ConnectionBinding { player_id, game_id });
    }

    /// Removes a connection's binding, returning it for cleanup.
    pub fn unbind(&mut self, addr: &SocketAddr) -> Option<ConnectionBinding> {
        let binding = self.bindings.remove(addr);
        if let Some(binding) = &binding {
            info!("Connection {} unbound from game {}", addr, binding.game_id);
        }
        binding
    }

    /// Returns the binding for a connection, if any.
    pub fn lookup(&self, addr: &SocketAddr) -> Option<&ConnectionBinding> {
        self.bindings.get(addr)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Allocates a game id not currently in use; collisions are retried.
    fn generate_game_id(&self) -> String {
        let mut rng = rand::rng();
        loop {
            let id: String = (0..GAME_ID_LEN)
                .map(|_| GAME_ID_ALPHABET[rng.random_range(0..GAME_ID_ALPHABET.len())] as char)
                .collect();
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }
}
