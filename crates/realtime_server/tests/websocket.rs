mod common;

use common::{assert_silent, http, next_json, ws_connect, ws_connect_ready, TestServer, RECV_TIMEOUT};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_welcome_reports_client_count() {
    let server = TestServer::start().await;

    let mut first = ws_connect(&server).await;
    let welcome = next_json(&mut first).await;
    assert_eq!(welcome["type"], "WELCOME");
    assert_eq!(welcome["data"]["clients"], 1);
    assert!(welcome["data"]["message"].as_str().unwrap().contains("Welcome"));
    assert!(welcome["timestamp"].as_u64().unwrap() > 0);

    let mut second = ws_connect(&server).await;
    assert_eq!(next_json(&mut second).await["data"]["clients"], 2);

    let status = http(server.addr, "GET", "/status", None).await.json();
    assert_eq!(status["clients"], 2);
}

#[tokio::test]
async fn test_welcome_arrives_before_concurrent_broadcasts() {
    let server = TestServer::start().await;
    let addr = server.addr;
    let writer = tokio::spawn(async move {
        for value in 0..100 {
            http(addr, "POST", "/api/data", Some(json!({"key": "busy", "value": value}))).await;
        }
    });

    for _ in 0..10 {
        let mut ws = ws_connect(&server).await;
        assert_eq!(next_json(&mut ws).await["type"], "WELCOME");
    }
    writer.await.unwrap();
}

#[tokio::test]
async fn test_post_is_broadcast_to_every_client() {
    let server = TestServer::start().await;
    let mut a = ws_connect_ready(&server).await;
    let mut b = ws_connect_ready(&server).await;

    let response = http(server.addr, "POST", "/api/data", Some(json!({"key": "score", "value": 42}))).await;
    assert_eq!(response.status, 200);

    for ws in [&mut a, &mut b] {
        let message = next_json(ws).await;
        assert_eq!(message["type"], "DATA_UPDATED");
        assert_eq!(message["data"]["key"], "score");
        assert_eq!(message["data"]["value"], 42);
        assert_eq!(message["data"]["operation"], "set");
        assert!(message["timestamp"].as_u64().unwrap() > 0);
    }
}

#[tokio::test]
async fn test_update_and_delete_broadcasts() {
    let server = TestServer::start().await;
    let mut ws = ws_connect_ready(&server).await;

    http(server.addr, "PUT", "/api/data/config", Some(json!({"theme": "dark"}))).await;
    let message = next_json(&mut ws).await;
    assert_eq!(message["data"]["operation"], "update");
    assert_eq!(message["data"]["value"], json!({"theme": "dark"}));

    http(server.addr, "DELETE", "/api/data/config", None).await;
    let message = next_json(&mut ws).await;
    assert_eq!(message["data"], json!({"key": "config", "operation": "delete"}));
}

#[tokio::test]
async fn test_broadcasts_follow_commit_order() {
    let server = TestServer::start().await;
    let mut ws = ws_connect_ready(&server).await;

    for value in 0..10 {
        http(server.addr, "POST", "/api/data", Some(json!({"key": "seq", "value": value}))).await;
    }
    for value in 0..10 {
        assert_eq!(next_json(&mut ws).await["data"]["value"], value);
    }
}

#[tokio::test]
async fn test_ping_gets_pong_only_for_sender() {
    let server = TestServer::start().await;
    let mut a = ws_connect_ready(&server).await;
    let mut b = ws_connect_ready(&server).await;

    a.send(Message::text(r#"{"type":"PING"}"#)).await.unwrap();
    let reply = next_json(&mut a).await;
    assert_eq!(reply["type"], "PONG");
    assert!(reply["timestamp"].as_u64().unwrap() > 0);

    assert_silent(&mut a).await;
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn test_subscribe_and_echo() {
    let server = TestServer::start().await;
    let mut ws = ws_connect_ready(&server).await;

    ws.send(Message::text(r#"{"type":"SUBSCRIBE","data":{"channels":["users"]}}"#))
        .await
        .unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "SUBSCRIBED");
    assert_eq!(reply["data"], json!({"channels": ["users"]}));

    ws.send(Message::text(r#"{"type":"HELLO","data":{"n":1}}"#))
        .await
        .unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "ECHO");
    assert_eq!(reply["data"], json!({"type": "HELLO", "data": {"n": 1}}));
}

#[tokio::test]
async fn test_malformed_message_keeps_connection_open() {
    let server = TestServer::start().await;
    let mut ws = ws_connect_ready(&server).await;

    ws.send(Message::text("{definitely not json")).await.unwrap();
    ws.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();
    ws.send(Message::text(r#"{"type":"PING"}"#)).await.unwrap();

    assert_eq!(next_json(&mut ws).await["type"], "PONG");
}

/// Masked client frame with a payload shorter than 126 bytes.
fn client_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mask = [0xA1, 0xB2, 0xC3, 0xD4];
    let mut frame = vec![0x80 | opcode, 0x80 | payload.len() as u8];
    frame.extend_from_slice(&mask);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    frame
}

/// Reads one unmasked server frame, returning its opcode and payload.
async fn read_server_frame(reader: &mut BufReader<TcpStream>) -> (u8, Vec<u8>) {
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await.unwrap();
    let length = match head[1] & 0x7F {
        126 => reader.read_u16().await.unwrap() as usize,
        127 => reader.read_u64().await.unwrap() as usize,
        n => n as usize,
    };
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await.unwrap();
    (head[0] & 0x0F, payload)
}

#[tokio::test]
async fn test_invalid_utf8_text_frame_keeps_connection_open() {
    let server = TestServer::start().await;
    let stream = TcpStream::connect(server.addr).await.unwrap();
    let mut reader = BufReader::new(stream);

    // Upgrade and frames in one write so some arrive with the request head.
    let mut bytes = b"GET /ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n".to_vec();
    bytes.extend(client_frame(0x1, &[0xFF, 0xFE]));
    bytes.extend(client_frame(0x1, br#"{"type":"PING"}"#));
    reader.get_mut().write_all(&bytes).await.unwrap();

    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert!(line.starts_with("HTTP/1.1 101"));
    while line != "\r\n" {
        line.clear();
        reader.read_line(&mut line).await.unwrap();
    }

    let mut types = Vec::new();
    while types.len() < 2 {
        let (opcode, payload) = tokio::time::timeout(RECV_TIMEOUT, read_server_frame(&mut reader))
            .await
            .unwrap();
        assert_eq!(opcode, 0x1, "connection should stay open");
        let message: Value = serde_json::from_slice(&payload).unwrap();
        types.push(message["type"].as_str().unwrap().to_string());
    }
    assert_eq!(types, ["WELCOME", "PONG"]);
}

#[tokio::test]
async fn test_messages_longer_than_125_bytes() {
    let server = TestServer::start().await;
    let mut ws = ws_connect_ready(&server).await;

    for size in [126usize, 1_000, 70_000] {
        let text = "x".repeat(size);
        let message = json!({"type": "BIG", "data": text});
        ws.send(Message::text(message.to_string())).await.unwrap();

        let reply = next_json(&mut ws).await;
        assert_eq!(reply["type"], "ECHO");
        assert_eq!(reply["data"]["data"].as_str().unwrap().len(), size);
    }

    let value = "y".repeat(300);
    http(server.addr, "POST", "/api/data", Some(json!({"key": "long", "value": value.clone()}))).await;
    assert_eq!(next_json(&mut ws).await["data"]["value"], value);
}

#[tokio::test]
async fn test_websocket_ping_frame_gets_pong_frame() {
    let server = TestServer::start().await;
    let mut ws = ws_connect_ready(&server).await;

    ws.send(Message::Ping(vec![7u8, 7].into())).await.unwrap();
    let message = tokio::time::timeout(RECV_TIMEOUT, ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(message, Message::Pong(vec![7u8, 7].into()));
}

#[tokio::test]
async fn test_client_close_removes_client() {
    let server = TestServer::start().await;
    let mut ws = ws_connect_ready(&server).await;
    ws.close(None).await.unwrap();

    let mut cleared = false;
    for _ in 0..50 {
        if http(server.addr, "GET", "/status", None).await.json()["clients"] == 0 {
            cleared = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(cleared);
}

#[tokio::test]
async fn test_upgrade_without_key_is_dropped() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Version: 13\r\n\r\n")
        .await
        .unwrap();

    let mut received = Vec::new();
    tokio::time::timeout(RECV_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_upgrade_on_other_path_is_dropped() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n")
        .await
        .unwrap();

    let mut received = Vec::new();
    tokio::time::timeout(RECV_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn test_handshake_accept_key_on_the_wire() {
    let server = TestServer::start().await;
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"GET /ws HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n")
        .await
        .unwrap();

    let mut buf = vec![0u8; 4096];
    let mut received = Vec::new();
    while !received.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = tokio::time::timeout(RECV_TIMEOUT, stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0);
        received.extend_from_slice(&buf[..n]);
    }

    let text = String::from_utf8_lossy(&received);
    assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
    assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
}

#[tokio::test]
async fn test_shutdown_closes_sessions_with_going_away() {
    let server = TestServer::start().await;
    let mut ws = ws_connect_ready(&server).await;
    let data_file = server.data_file.clone();

    let dir = server.stop().await;

    let message = tokio::time::timeout(RECV_TIMEOUT, ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match message {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
        other => panic!("expected close frame, got {other:?}"),
    }
    assert!(data_file.exists());
    drop(dir);
}

#[tokio::test]
async fn test_slow_client_is_disconnected_on_overflow() {
    let server = TestServer::start_with(|config| config.outbound_queue_capacity = 1).await;
    // Never read from this client so its socket buffers and queue fill up.
    let _stalled = ws_connect(&server).await;
    let mut healthy = ws_connect_ready(&server).await;

    // Enough volume to exceed the kernel socket buffers of the stalled peer.
    let value = "z".repeat(64 * 1024);
    for _ in 0..256 {
        let response = http(
            server.addr,
            "POST",
            "/api/data",
            Some(json!({"key": "blob", "value": value.clone()})),
        )
        .await;
        assert_eq!(response.status, 200);
        // Keep the healthy client drained.
        assert_eq!(next_json(&mut healthy).await["type"], "DATA_UPDATED");
    }

    let mut dropped = false;
    for _ in 0..50 {
        if http(server.addr, "GET", "/status", None).await.json()["clients"] == 1 {
            dropped = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(dropped);
}
