//! End-to-end tests over real sockets.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::SinkExt;
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tower::BoxError;

use board_gateway::board::{board_routes, BoardStore};
use board_gateway::routing::RouteTable;
use board_gateway::scope::{Param, ParamType};
use board_gateway::{EventHandler, Reply};

use common::*;

async fn board_gateway() -> TestGateway {
    start(test_config(), board_routes(Arc::new(BoardStore::default())).unwrap()).await
}

async fn refused_status(url: String) -> u16 {
    match connect_async(url).await {
        Ok(_) => panic!("upgrade should have been refused"),
        Err(WsError::Http(response)) => response.status().as_u16(),
        Err(other) => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unrouted_path_is_not_upgraded() {
    let gateway = board_gateway().await;
    assert_eq!(refused_status(gateway.url("/nowhere")).await, 404);
    assert_eq!(refused_status(gateway.url("/chat")).await, 404);
}

#[tokio::test]
async fn test_chat_room_fan_out() {
    let gateway = board_gateway().await;

    let mut ada = gateway.connect("/chat/lobby").await;
    assert_eq!(recv_json(&mut ada).await, json!({"event": "joined", "data": {"room": "lobby"}}));
    let presence = recv_event(&mut ada, "presence").await;
    assert_eq!(presence["data"]["members"], 1);

    let mut bob = gateway.connect("/chat/lobby").await;
    recv_event(&mut bob, "joined").await;
    let presence = recv_event(&mut bob, "presence").await;
    assert_eq!(presence["data"]["members"], 2);

    send_json(&mut ada, json!({"event": "say", "data": {"text": "hello", "nick": "ada"}})).await;

    let expected = json!({"event": "said", "data": {"nick": "ada", "text": "hello"}});
    assert_eq!(recv_event(&mut ada, "said").await, expected);
    assert_eq!(recv_event(&mut bob, "said").await, expected);
}

#[tokio::test]
async fn test_malformed_frame_keeps_socket_open() {
    let gateway = board_gateway().await;
    let mut ws = gateway.connect("/chat/lobby").await;
    recv_event(&mut ws, "presence").await;

    send_text(&mut ws, "not json").await;
    let error = recv_json(&mut ws).await;
    assert_eq!(error["event"], "error");
    assert_eq!(error["data"]["code"], 1002);

    send_json(&mut ws, json!({"data": {"text": "no event"}})).await;
    assert_eq!(recv_json(&mut ws).await["data"]["code"], 1002);

    send_json(&mut ws, json!({"event": "say", "text": "still here"})).await;
    assert_eq!(recv_event(&mut ws, "said").await["data"]["text"], "still here");
}

#[tokio::test]
async fn test_handler_errors_become_error_frames() {
    let gateway = board_gateway().await;
    let mut ws = gateway.connect("/boards/roadmap").await;
    assert_eq!(recv_event(&mut ws, "cards").await["data"]["cards"], json!([]));

    // Wrong type for a model field: binding fails before the handler runs.
    send_json(&mut ws, json!({"event": "move", "data": {"move": {"card": "one", "column": "done"}}})).await;
    let error = recv_event(&mut ws, "error").await;
    assert_eq!(error["data"]["code"], 1002);

    // Valid shape, unknown card: the handler itself fails.
    send_json(&mut ws, json!({"event": "move", "data": {"move": {"card": 7, "column": "done"}}})).await;
    let error = recv_event(&mut ws, "error").await;
    assert_eq!(error["data"]["code"], 1000);
    assert_eq!(error["data"]["message"], "board \"roadmap\" has no card 7");
}

#[tokio::test]
async fn test_board_moves_reach_watchers() {
    let gateway = board_gateway().await;
    let mut editor = gateway.connect("/boards/roadmap").await;
    recv_event(&mut editor, "cards").await;
    let mut watcher = gateway.connect("/boards/roadmap").await;
    recv_event(&mut watcher, "cards").await;

    send_json(&mut editor, json!({"event": "add", "data": {"title": "launch"}})).await;
    let added = recv_event(&mut editor, "added").await;
    assert_eq!(added["data"]["column"], "todo");

    send_json(&mut editor, json!({"event": "move", "data": {"move": {"card": 1, "column": 2}}})).await;
    assert_eq!(recv_event(&mut editor, "moved").await["data"]["column"], "doing");

    let snapshot = recv_event(&mut watcher, "cards").await;
    assert_eq!(snapshot["data"]["cards"][0]["title"], "launch");
    assert_eq!(snapshot["data"]["cards"][0]["column"], "doing");
}

fn echo_table(closes: Arc<Mutex<Vec<(i64, String)>>>) -> RouteTable {
    let mut table = RouteTable::new();
    table
        .route("/echo/:name")
        .unwrap()
        .on_open(
            EventHandler::sync(
                "hello",
                vec![
                    Param::new("name", ParamType::Str),
                    Param::new("request_id", ParamType::Str),
                ],
                |args| {
                    Ok(Reply::new(
                        "hello",
                        json!({ "name": args.get::<String>("name"), "request_id": args.get::<String>("request_id") }),
                    ))
                },
            )
            .unwrap(),
        )
        .on_close(
            EventHandler::new(
                "record_close",
                vec![Param::new("code", ParamType::Int), Param::new("reason", ParamType::Str)],
                move |args| {
                    let closes = Arc::clone(&closes);
                    async move {
                        let code: i64 = args.get_or("code", 0);
                        let reason: String = args.get_or("reason", String::new());
                        closes.lock().unwrap().push((code, reason));
                        Ok::<_, BoxError>(())
                    }
                },
            )
            .unwrap(),
        );
    table
}

#[tokio::test]
async fn test_request_id_reaches_handlers() {
    let gateway = start(test_config(), echo_table(Arc::default())).await;

    let mut request = gateway.url("/echo/ada").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("x-request-id", HeaderValue::from_static("req-123"));
    let (mut ws, response) = connect_async(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let hello = recv_json(&mut ws).await;
    assert_eq!(hello["data"], json!({"name": "ada", "request_id": "req-123"}));

    // Without a client id one is generated.
    let (_ws, response) = connect_async(gateway.url("/echo/bob")).await.unwrap();
    let generated = response.headers()["x-request-id"].to_str().unwrap();
    assert_eq!(generated.len(), 36);
}

#[tokio::test]
async fn test_close_handlers_see_peer_code() {
    let closes = Arc::new(Mutex::new(Vec::new()));
    let gateway = start(test_config(), echo_table(Arc::clone(&closes))).await;

    let mut ws = gateway.connect("/echo/ada").await;
    recv_event(&mut ws, "hello").await;
    ws.send(Message::Close(Some(CloseFrame {
        code: CloseCode::from(4000),
        reason: "bye".into(),
    })))
    .await
    .unwrap();

    tokio::time::timeout(TIMEOUT, async {
        while closes.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("close handler never ran");
    assert_eq!(closes.lock().unwrap().as_slice(), [(4000, "bye".to_string())]);
}

#[tokio::test]
async fn test_connection_limit() {
    let mut config = test_config();
    config.listener.max_connections = 1;
    let gateway = start(config, echo_table(Arc::default())).await;

    let mut first = gateway.connect("/echo/ada").await;
    recv_event(&mut first, "hello").await;
    assert_eq!(refused_status(gateway.url("/echo/bob")).await, 503);

    first.close(None).await.unwrap();
    drop(first);
    let reopened = tokio::time::timeout(TIMEOUT, async {
        loop {
            if let Ok((ws, _)) = connect_async(gateway.url("/echo/bob")).await {
                return ws;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reopened.is_ok(), "slot was never released");
}

fn burst_table() -> RouteTable {
    let mut table = RouteTable::new();
    table
        .route("/burst")
        .unwrap()
        .on(
            "burst",
            EventHandler::sync("burst", vec![Param::connection("conn")], |args| {
                let conn = args.connection("conn").ok_or("connection not bound")?;
                for tick in 0..6 {
                    conn.reply(&Reply::new("tick", json!(tick)));
                }
                Ok(())
            })
            .unwrap(),
        )
        .on_drain(EventHandler::sync("drained", vec![], |_| Ok(Reply::new("drained", json!({})))).unwrap());
    table
}

#[tokio::test]
async fn test_drain_fires_after_backlog_clears() {
    let mut config = test_config();
    config.websocket.high_water = 2;
    let gateway = start(config, burst_table()).await;
    let mut ws = gateway.connect("/burst").await;

    send_json(&mut ws, json!({"event": "burst"})).await;
    for tick in 0..6 {
        let frame = recv_json(&mut ws).await;
        assert_eq!(frame, json!({"event": "tick", "data": tick}));
    }
    assert_eq!(recv_json(&mut ws).await, json!({"event": "drained", "data": {}}));
}

#[tokio::test]
async fn test_shutdown_closes_sockets() {
    let gateway = board_gateway().await;
    let mut ws = gateway.connect("/chat/lobby").await;
    recv_event(&mut ws, "presence").await;

    gateway.shutdown.trigger();

    let frame = recv_close(&mut ws).await.expect("close frame");
    assert_eq!(u16::from(frame.code), 1001);
    drop(ws);

    let finished = tokio::time::timeout(TIMEOUT, gateway.task).await;
    assert!(matches!(finished, Ok(Ok(Ok(())))));
}
