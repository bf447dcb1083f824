//! WebSocket network layer: message dispatch, broadcasting, timed transitions
//!
//! Each connection gets a reader loop plus a writer task fed by an unbounded
//! channel, so handlers never block on a slow client. Incoming frames are
//! decoded into `ClientMessage` intents and dispatched under the owning
//! room's lock; the post-mutation snapshot is serialized once under that
//! lock and fanned out through the per-connection senders.
//!
//! Timed transitions (roll resolution, auto-pass, the turn watchdog) are
//! spawned with the session epoch captured at enqueue and do nothing if the
//! epoch has moved on by the time they fire.

use crate::game::{
    GameError, GameSession, MoveOutcome, RollStart, AUTO_PASS_DELAY, ROLL_RESOLVE_DELAY,
    TURN_TIMEOUT,
};
use crate::room_manager::RoomManager;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use ludo_shared::{ClientMessage, GameStatus, ServerMessage};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Process-wide registry handle shared by every connection task.
pub type SharedRooms = Arc<Mutex<RoomManager>>;

/// The WebSocket game server.
pub struct Server {
    listener: TcpListener,
    rooms: SharedRooms,
}

impl Server {
    pub async fn bind(addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("WebSocket server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            rooms: Arc::new(Mutex::new(RoomManager::new())),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept loop; one task per connection.
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let rooms = Arc::clone(&self.rooms);
                    tokio::spawn(async move {
                        handle_connection(stream, addr, rooms).await;
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }
}

/// Drives one client connection from handshake to cleanup.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, rooms: SharedRooms) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    info!("WebSocket connection established: {}", addr);

    let (mut ws_sink, mut ws_source) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Writer task: drains the outbound queue so broadcasts never block on
    // this client's socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_source.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!("WebSocket error from {}: {}", addr, e);
                break;
            }
        };
        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(intent) => dispatch(intent, addr, &rooms, &tx).await,
                Err(e) => warn!("Dropping malformed frame from {}: {}", addr, e),
            },
            Message::Close(_) => {
                debug!("WebSocket closed by client: {}", addr);
                break;
            }
            // Ignore binary and ping/pong frames.
            _ => {}
        }
    }

    handle_disconnect(addr, &rooms).await;
    writer.abort();
    info!("Connection {} closed", addr);
}

/// Routes a decoded intent to its handler.
async fn dispatch(
    intent: ClientMessage,
    addr: SocketAddr,
    rooms: &SharedRooms,
    tx: &UnboundedSender<Message>,
) {
    debug!("{} -> {:?}", addr, intent);
    match intent {
        ClientMessage::CreateGame {
            player_id,
            player_name,
        } => handle_create(addr, rooms, tx, player_id, player_name).await,
        ClientMessage::JoinGame {
            game_id,
            player_id,
            player_name,
        } => handle_join(addr, rooms, tx, game_id, player_id, player_name).await,
        ClientMessage::StartGame { game_id, player_id } => {
            handle_start(rooms, tx, game_id, player_id).await
        }
        ClientMessage::RollDice { game_id, player_id } => {
            handle_roll(rooms, tx, game_id, player_id).await
        }
        ClientMessage::MovePiece {
            game_id,
            player_id,
            piece_id,
        } => handle_move(rooms, tx, game_id, player_id, piece_id).await,
        ClientMessage::ChatMessage {
            game_id,
            player_id,
            text,
        } => handle_chat(rooms, tx, game_id, player_id, text).await,
        ClientMessage::LeaveGame { game_id, player_id } => {
            handle_leave(addr, rooms, tx, game_id, player_id).await
        }
        ClientMessage::ResetGame { game_id, player_id }
        | ClientMessage::ForceSync { game_id, player_id } => {
            handle_skip_turn(rooms, tx, game_id, player_id).await
        }
    }
}

async fn handle_create(
    addr: SocketAddr,
    rooms: &SharedRooms,
    tx: &UnboundedSender<Message>,
    player_id: String,
    player_name: String,
) {
    let session = {
        let mut registry = rooms.lock().await;
        let (game_id, session) = registry.create_room(player_id.clone(), player_name);
        registry.bind(addr, player_id, game_id);
        session
    };
    let mut session = session.lock().await;
    session.connections.insert(addr, tx.clone());
    // Reply to the caller only; nobody else is in the room yet.
    send_to(tx, &ServerMessage::GameStateUpdate(session.game.clone()));
}

async fn handle_join(
    addr: SocketAddr,
    rooms: &SharedRooms,
    tx: &UnboundedSender<Message>,
    game_id: String,
    player_id: String,
    player_name: String,
) {
    let Some(room) = lookup_room(rooms, &game_id, tx).await else {
        return;
    };
    let mut session = room.lock().await;
    if session.is_seated(&player_id) {
        // Reconnect: rebind the connection, leave the roster untouched.
        session.connections.insert(addr, tx.clone());
        rooms.lock().await.bind(addr, player_id, game_id);
        broadcast(&session);
        return;
    }
    match session.add_player(player_id.clone(), player_name) {
        Ok(()) => {
            session.connections.insert(addr, tx.clone());
            rooms.lock().await.bind(addr, player_id, game_id);
            broadcast(&session);
        }
        Err(err) => send_error(tx, &err),
    }
}

async fn handle_start(
    rooms: &SharedRooms,
    tx: &UnboundedSender<Message>,
    game_id: String,
    player_id: String,
) {
    let Some(room) = lookup_room(rooms, &game_id, tx).await else {
        return;
    };
    let mut session = room.lock().await;
    let before = session.epoch();
    match session.start(&player_id) {
        Ok(true) => {
            broadcast(&session);
            schedule_timers(&room, &session, before);
        }
        Ok(false) => {}
        Err(err) => send_error(tx, &err),
    }
}

async fn handle_roll(
    rooms: &SharedRooms,
    tx: &UnboundedSender<Message>,
    game_id: String,
    player_id: String,
) {
    let Some(room) = lookup_room(rooms, &game_id, tx).await else {
        return;
    };
    let mut session = room.lock().await;
    let before = session.epoch();
    match session.begin_roll(&player_id) {
        Ok(RollStart::Started) => {
            broadcast(&session);
            schedule_timers(&room, &session, before);
        }
        Ok(RollStart::Ignored) => {}
        Err(err) => send_error(tx, &err),
    }
}

async fn handle_move(
    rooms: &SharedRooms,
    tx: &UnboundedSender<Message>,
    game_id: String,
    player_id: String,
    piece_id: u8,
) {
    let Some(room) = lookup_room(rooms, &game_id, tx).await else {
        return;
    };
    let mut session = room.lock().await;
    let before = session.epoch();
    match session.apply_move(&player_id, piece_id) {
        Ok(MoveOutcome::Ignored) => {}
        Ok(_) => {
            broadcast(&session);
            schedule_timers(&room, &session, before);
        }
        Err(err) => send_error(tx, &err),
    }
}

async fn handle_chat(
    rooms: &SharedRooms,
    tx: &UnboundedSender<Message>,
    game_id: String,
    player_id: String,
    text: String,
) {
    let Some(room) = lookup_room(rooms, &game_id, tx).await else {
        return;
    };
    let mut session = room.lock().await;
    if session.add_chat(&player_id, text) {
        broadcast(&session);
    }
}

async fn handle_leave(
    addr: SocketAddr,
    rooms: &SharedRooms,
    tx: &UnboundedSender<Message>,
    game_id: String,
    player_id: String,
) {
    let Some(room) = lookup_room(rooms, &game_id, tx).await else {
        return;
    };
    {
        let mut session = room.lock().await;
        let before = session.epoch();
        session.connections.remove(&addr);
        session.mark_left(&player_id);
        broadcast(&session);
        schedule_timers(&room, &session, before);
    }
    rooms.lock().await.unbind(&addr);
}

/// `resetGame` and `forceSync`: a host-only best-effort unstick that skips
/// the current turn. Non-host callers are ignored without a reply.
async fn handle_skip_turn(
    rooms: &SharedRooms,
    tx: &UnboundedSender<Message>,
    game_id: String,
    player_id: String,
) {
    let Some(room) = lookup_room(rooms, &game_id, tx).await else {
        return;
    };
    let mut session = room.lock().await;
    if session.game.host_id != player_id || session.game.game_status != GameStatus::Playing {
        return;
    }
    let before = session.epoch();
    session.advance_turn();
    broadcast(&session);
    schedule_timers(&room, &session, before);
}

/// Connection close: idempotent removal of the bound player.
async fn handle_disconnect(addr: SocketAddr, rooms: &SharedRooms) {
    let (binding, room) = {
        let mut registry = rooms.lock().await;
        let Some(binding) = registry.unbind(&addr) else {
            return;
        };
        let room = registry.get(&binding.game_id);
        (binding, room)
    };
    let Some(room) = room else {
        return;
    };
    let mut session = room.lock().await;
    let before = session.epoch();
    session.connections.remove(&addr);
    session.mark_left(&binding.player_id);
    broadcast(&session);
    schedule_timers(&room, &session, before);
}

/// Resolves a game id to its room, or sends "not found" to the caller.
async fn lookup_room(
    rooms: &SharedRooms,
    game_id: &str,
    tx: &UnboundedSender<Message>,
) -> Option<Arc<Mutex<GameSession>>> {
    let room = rooms.lock().await.get(game_id);
    if room.is_none() {
        send_error(tx, &GameError::NotFound(game_id.to_string()));
    }
    room
}

/// Serializes the snapshot once and queues it on every live connection.
///
/// Sends are non-blocking and best-effort: a closed connection's failure is
/// logged and the broadcast continues; its close path does the cleanup.
pub fn broadcast(session: &GameSession) {
    let update = ServerMessage::GameStateUpdate(session.game.clone());
    let frame = match serde_json::to_string(&update) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to serialize snapshot: {}", e);
            return;
        }
    };
    for (addr, sender) in &session.connections {
        if sender.send(Message::Text(frame.clone())).is_err() {
            debug!("Dropping broadcast to closed connection {}", addr);
        }
    }
}

fn send_to(tx: &UnboundedSender<Message>, message: &ServerMessage) {
    match serde_json::to_string(message) {
        Ok(text) => {
            let _ = tx.send(Message::Text(text));
        }
        Err(e) => error!("Failed to serialize message: {}", e),
    }
}

fn send_error(tx: &UnboundedSender<Message>, err: &GameError) {
    send_to(
        tx,
        &ServerMessage::Error {
            message: err.to_string(),
        },
    );
}

/// Arms whichever timed transition the session's new phase needs.
///
/// Called after every mutation with the pre-mutation epoch. Does nothing
/// unless the mutation actually moved the state machine, so racing
/// duplicates and chat traffic never double-arm a timer.
fn schedule_timers(room: &Arc<Mutex<GameSession>>, session: &GameSession, before: u64) {
    if session.epoch() == before || session.game.game_status != GameStatus::Playing {
        return;
    }
    let epoch = session.epoch();
    if session.game.is_rolling {
        spawn_roll_resolution(Arc::clone(room), epoch);
    } else if session.game.dice_value.is_none() || !session.game.movable_pieces.is_empty() {
        // Roll pending or a move pending: give the player the turn clock.
        spawn_turn_watchdog(Arc::clone(room), epoch);
    } else {
        // Dice showing with no legal move: pass shortly.
        spawn_auto_pass(Arc::clone(room), epoch);
    }
}

/// Lands the dice after the animation window.
fn spawn_roll_resolution(room: Arc<Mutex<GameSession>>, epoch: u64) {
    tokio::spawn(async move {
        sleep(ROLL_RESOLVE_DELAY).await;
        let mut session = room.lock().await;
        if session.epoch() != epoch {
            return;
        }
        let value = rand::rng().random_range(1..=6);
        let before = session.epoch();
        session.resolve_roll(value);
        broadcast(&session);
        schedule_timers(&room, &session, before);
    });
}

/// Advances the turn after a roll that allowed no move.
fn spawn_auto_pass(room: Arc<Mutex<GameSession>>, epoch: u64) {
    tokio::spawn(async move {
        sleep(AUTO_PASS_DELAY).await;
        let mut session = room.lock().await;
        if session.epoch() != epoch {
            return;
        }
        let before = session.epoch();
        session.auto_pass();
        broadcast(&session);
        schedule_timers(&room, &session, before);
    });
}

/// Forfeits the turn of a player who did nothing for the whole turn clock.
fn spawn_turn_watchdog(room: Arc<Mutex<GameSession>>, epoch: u64) {
    tokio::spawn(async move {
        sleep(TURN_TIMEOUT).await;
        let mut session = room.lock().await;
        if session.epoch() != epoch {
            return;
        }
        let before = session.epoch();
        session.forfeit_turn();
        broadcast(&session);
        schedule_timers(&room, &session, before);
    });
}

/// Plain-TCP liveness surface, orthogonal to the game engine: answers any
/// request on the socket with `200 OK` and a short text body.
pub async fn serve_health(listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((mut stream, _)) => {
                tokio::spawn(async move {
                    let mut buf = [0u8; 512];
                    let _ = stream.read(&mut buf).await;
                    let response = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok";
                    let _ = stream.write_all(response.as_bytes()).await;
                });
            }
            Err(e) => {
                error!("Health listener error: {}", e);
            }
        }
    }
}
