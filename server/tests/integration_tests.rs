//! Integration tests for the game server
//!
//! These tests exercise the real WebSocket listener end to end: each test
//! spawns a server on an ephemeral port, dials it with live clients, and
//! asserts on the JSON frames the server emits.

use futures_util::{SinkExt, StreamExt};
use ludo_server::network::{serve_health, Server};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// LOBBY TESTS
mod lobby_tests {
    use super::*;

    /// Four players fill the room in canonical color order; a fifth is
    /// turned away with the "full" error.
    #[tokio::test]
    async fn create_and_join_to_full() {
        let addr = start_server().await;

        let mut host = connect(addr).await;
        send(
            &mut host,
            json!({"type": "createGame", "payload": {"playerId": "p1", "playerName": "Alice"}}),
        )
        .await;
        let created = recv_frame(&mut host).await;
        assert_eq!(created["type"], "gameStateUpdate");
        assert_eq!(created["payload"]["gameStatus"], "setup");
        assert_eq!(created["payload"]["players"][0]["color"], "red");
        assert_eq!(created["payload"]["players"][0]["isHost"], true);
        let game_id = created["payload"]["gameId"].as_str().unwrap().to_string();
        assert_eq!(game_id.len(), 6);

        let mut others = Vec::new();
        for (player_id, name) in [("p2", "Bob"), ("p3", "Cleo"), ("p4", "Dan")] {
            let mut ws = connect(addr).await;
            send(
                &mut ws,
                json!({"type": "joinGame", "payload": {
                    "gameId": game_id, "playerId": player_id, "playerName": name,
                }}),
            )
            .await;
            others.push(ws);
        }

        let full_roster = recv_until(&mut host, |frame| {
            frame["payload"]["players"].as_array().is_some_and(|p| p.len() == 4)
        })
        .await;
        assert_eq!(
            full_roster["payload"]["playerOrder"],
            json!(["red", "green", "yellow", "blue"])
        );
        let players = full_roster["payload"]["players"].as_array().unwrap();
        for (seat, color) in ["red", "green", "yellow", "blue"].iter().enumerate() {
            assert_eq!(players[seat]["color"], *color);
            assert_eq!(players[seat]["seatIndex"], seat);
        }

        let mut fifth = connect(addr).await;
        send(
            &mut fifth,
            json!({"type": "joinGame", "payload": {
                "gameId": game_id, "playerId": "p5", "playerName": "Eve",
            }}),
        )
        .await;
        let rejected = recv_frame(&mut fifth).await;
        assert_eq!(rejected["type"], "error");
        assert_eq!(rejected["payload"]["message"], "This game is full.");
    }

    /// Joining a nonexistent room reports "not found" to the caller only.
    #[tokio::test]
    async fn join_unknown_room_reports_not_found() {
        let addr = start_server().await;

        let mut ws = connect(addr).await;
        send(
            &mut ws,
            json!({"type": "joinGame", "payload": {
                "gameId": "NOSUCH", "playerId": "p1", "playerName": "Alice",
            }}),
        )
        .await;
        let rejected = recv_frame(&mut ws).await;
        assert_eq!(rejected["type"], "error");
        assert_eq!(rejected["payload"]["message"], "Game NOSUCH not found.");
    }

    /// A known playerId joining again rebinds the connection without
    /// changing the roster, and a removed seat stays removed.
    #[tokio::test]
    async fn rejoin_rebinds_without_reseating() {
        let addr = start_server().await;
        let (mut host, game_id) = create_room(addr).await;
        let mut guest = join_room(addr, &game_id, "p2", "Bob").await;

        // Guest drops; the host sees the seat marked removed.
        guest.close(None).await.unwrap();
        let after_drop = recv_until(&mut host, |frame| {
            frame["payload"]["players"][1]["isRemoved"] == json!(true)
        })
        .await;
        assert_eq!(after_drop["payload"]["players"].as_array().unwrap().len(), 2);

        // Same identity from a fresh connection: roster unchanged.
        let mut returned = join_room(addr, &game_id, "p2", "Bob").await;
        let rebound = recv_until(&mut returned, |frame| frame["type"] == "gameStateUpdate").await;
        let players = rebound["payload"]["players"].as_array().unwrap();
        assert_eq!(players.len(), 2);
        assert_eq!(players[1]["isRemoved"], true);
    }
}

/// TURN DISCIPLINE TESTS
mod turn_tests {
    use super::*;

    /// Only the host starts; only the current player rolls.
    #[tokio::test]
    async fn start_and_roll_preconditions() {
        let addr = start_server().await;
        let (mut host, game_id) = create_room(addr).await;
        let mut guest = join_room(addr, &game_id, "p2", "Bob").await;
        recv_frame(&mut guest).await; // join broadcast

        send(
            &mut guest,
            json!({"type": "startGame", "payload": {"gameId": game_id, "playerId": "p2"}}),
        )
        .await;
        let rejected = recv_frame(&mut guest).await;
        assert_eq!(rejected["type"], "error");
        assert_eq!(rejected["payload"]["message"], "Only the host can start.");

        send(
            &mut host,
            json!({"type": "startGame", "payload": {"gameId": game_id, "playerId": "p1"}}),
        )
        .await;
        let started = recv_until(&mut host, |frame| frame["payload"]["gameStatus"] == "playing").await;
        assert_eq!(started["payload"]["currentTurnPlayerId"], "p1");
        assert_eq!(started["payload"]["turnTimeLeft"], 30);

        send(
            &mut guest,
            json!({"type": "rollDice", "payload": {"gameId": game_id, "playerId": "p2"}}),
        )
        .await;
        let rejected = recv_until(&mut guest, |frame| frame["type"] == "error").await;
        assert_eq!(rejected["payload"]["message"], "It's not your turn!");
    }

    /// A roll animates first, then lands on a value within the animation
    /// delay; the dice and the rolling flag are never visible together.
    #[tokio::test]
    async fn roll_resolves_after_animation() {
        let addr = start_server().await;
        let (mut host, game_id) = create_room(addr).await;
        let mut guest = join_room(addr, &game_id, "p2", "Bob").await;
        recv_frame(&mut guest).await;

        send(
            &mut host,
            json!({"type": "startGame", "payload": {"gameId": game_id, "playerId": "p1"}}),
        )
        .await;
        recv_until(&mut host, |frame| frame["payload"]["gameStatus"] == "playing").await;

        send(
            &mut host,
            json!({"type": "rollDice", "payload": {"gameId": game_id, "playerId": "p1"}}),
        )
        .await;
        let rolling = recv_until(&mut host, |frame| frame["payload"]["isRolling"] == json!(true)).await;
        assert_eq!(rolling["payload"]["diceValue"], Value::Null);

        let landed =
            recv_until(&mut host, |frame| !frame["payload"]["diceValue"].is_null()).await;
        assert_eq!(landed["payload"]["isRolling"], false);
        let value = landed["payload"]["diceValue"].as_u64().unwrap();
        assert!((1..=6).contains(&value));
    }
}

/// CHAT AND PROTOCOL ROBUSTNESS TESTS
mod protocol_tests {
    use super::*;

    /// Chat entries are timestamped and broadcast to the whole room.
    #[tokio::test]
    async fn chat_reaches_every_connection() {
        let addr = start_server().await;
        let (mut host, game_id) = create_room(addr).await;
        let mut guest = join_room(addr, &game_id, "p2", "Bob").await;
        recv_frame(&mut guest).await;

        send(
            &mut guest,
            json!({"type": "chatMessage", "payload": {
                "gameId": game_id, "playerId": "p2", "text": "good luck!",
            }}),
        )
        .await;

        for ws in [&mut host, &mut guest] {
            let frame = recv_until(ws, |frame| {
                frame["payload"]["chatMessages"].as_array().is_some_and(|c| !c.is_empty())
            })
            .await;
            let entry = &frame["payload"]["chatMessages"][0];
            assert_eq!(entry["playerId"], "p2");
            assert_eq!(entry["name"], "Bob");
            assert_eq!(entry["color"], "green");
            assert_eq!(entry["text"], "good luck!");
            assert!(entry["timestamp"].as_u64().unwrap() > 0);
        }
    }

    /// Unknown types and malformed frames are dropped without killing the
    /// connection or producing an error reply.
    #[tokio::test]
    async fn bad_frames_are_dropped_silently() {
        let addr = start_server().await;
        let (mut host, game_id) = create_room(addr).await;

        host.send(Message::Text("{not json".to_string())).await.unwrap();
        send(&mut host, json!({"type": "teleport", "payload": {}})).await;

        // The connection is still alive and serving the room.
        send(
            &mut host,
            json!({"type": "chatMessage", "payload": {
                "gameId": game_id, "playerId": "p1", "text": "still here",
            }}),
        )
        .await;
        let frame = recv_frame(&mut host).await;
        assert_eq!(frame["type"], "gameStateUpdate");
        assert_eq!(frame["payload"]["chatMessages"][0]["text"], "still here");
    }

    /// The liveness endpoint answers any request with 200 OK.
    #[tokio::test]
    async fn health_endpoint_responds_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_health(listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match timeout(Duration::from_secs(2), stream.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => response.extend_from_slice(&buf[..n]),
                Ok(Err(_)) => break,
            }
        }
        let response = String::from_utf8_lossy(&response);
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with("ok"));
    }
}

// HELPER FUNCTIONS

async fn start_server() -> SocketAddr {
    let server = Server::bind("127.0.0.1:0").await.expect("failed to bind server");
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}"))
        .await
        .expect("failed to connect");
    ws
}

async fn send(ws: &mut WsClient, frame: Value) {
    ws.send(Message::Text(frame.to_string()))
        .await
        .expect("failed to send frame");
}

/// Reads the next text frame as JSON, skipping control frames.
async fn recv_frame(ws: &mut WsClient) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("frame is not valid JSON");
        }
    }
}

/// Reads frames until one matches the predicate.
async fn recv_until(ws: &mut WsClient, mut pred: impl FnMut(&Value) -> bool) -> Value {
    for _ in 0..50 {
        let frame = recv_frame(ws).await;
        if pred(&frame) {
            return frame;
        }
    }
    panic!("no frame matched the predicate");
}

/// Creates a room with host "p1"/"Alice"; returns the host socket and game id.
async fn create_room(addr: SocketAddr) -> (WsClient, String) {
    let mut host = connect(addr).await;
    send(
        &mut host,
        json!({"type": "createGame", "payload": {"playerId": "p1", "playerName": "Alice"}}),
    )
    .await;
    let created = recv_frame(&mut host).await;
    let game_id = created["payload"]["gameId"].as_str().unwrap().to_string();
    (host, game_id)
}

/// Connects a new client and seats (or rebinds) it in the room.
async fn join_room(addr: SocketAddr, game_id: &str, player_id: &str, name: &str) -> WsClient {
    let mut ws = connect(addr).await;
    send(
        &mut ws,
        json!({"type": "joinGame", "payload": {
            "gameId": game_id, "playerId": player_id, "playerName": name,
        }}),
    )
    .await;
    ws
}
