//! Chat rooms.
//!
//! Every socket on `/chat/{room}` joins the `chat:{room}` topic on open.
//! `say` and `typing` are fanned out to the room; subscription changes are
//! reported back as `presence`.

use serde_json::json;
use tower::BoxError;

use crate::errors::RegistrationError;
use crate::invoker::EventHandler;
use crate::routing::RouteTable;
use crate::scope::{Args, Dependency, Param, ParamType};
use crate::socket::{ConnectionHandle, Reply};

pub const ROUTE: &str = "/chat/{room}";

/// Topic a room's messages travel on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomTopic(pub String);

fn room_topic() -> Result<Dependency, RegistrationError> {
    Dependency::sync(
        "room_topic",
        vec![Param::new("room", ParamType::Str)],
        |args: &Args| -> Result<RoomTopic, BoxError> {
            let room: String = args.get("room").ok_or("room is required")?;
            Ok(RoomTopic(format!("chat:{room}")))
        },
    )
}

fn parts(args: &Args) -> Result<(ConnectionHandle, std::sync::Arc<RoomTopic>), BoxError> {
    let conn = args.connection("conn").ok_or("connection not bound")?;
    let topic = args.dep::<RoomTopic>("topic").ok_or("room topic not bound")?;
    Ok((conn, topic))
}

pub fn routes() -> Result<RouteTable, RegistrationError> {
    let topic = room_topic()?;
    let base = || vec![Param::connection("conn"), Param::depends("topic", topic.clone())];

    let join = EventHandler::sync(
        "join_room",
        [base(), vec![Param::new("room", ParamType::Str)]].concat(),
        |args: &Args| -> Result<Reply, BoxError> {
            let (conn, topic) = parts(args)?;
            conn.subscribe(&topic.0);
            Ok(Reply::new("joined", json!({ "room": args.get::<String>("room") })))
        },
    )?;

    let say = EventHandler::sync(
        "say",
        [
            base(),
            vec![
                Param::new("text", ParamType::Str),
                Param::new("nick", ParamType::Str).default("anonymous"),
            ],
        ]
        .concat(),
        |args: &Args| -> Result<(), BoxError> {
            let (conn, topic) = parts(args)?;
            let text: String = args.get("text").ok_or("text is required")?;
            if text.trim().is_empty() {
                return Err("text must not be empty".into());
            }
            let nick: String = args.get_or("nick", "anonymous".to_string());
            let delivered = conn.publish(&topic.0, Reply::new("said", json!({ "nick": nick, "text": text })).to_text());
            tracing::debug!(topic = %topic.0, delivered, "Chat message published");
            Ok(())
        },
    )?;

    let typing = EventHandler::sync(
        "typing",
        [
            base(),
            vec![
                Param::new("active", ParamType::Bool).default(true),
                Param::new("nick", ParamType::Str).default("anonymous"),
            ],
        ]
        .concat(),
        |args: &Args| -> Result<(), BoxError> {
            let (conn, topic) = parts(args)?;
            let frame = Reply::new(
                "typing",
                json!({ "nick": args.get::<String>("nick"), "active": args.get_or("active", true) }),
            );
            conn.publish(&topic.0, frame.to_text());
            Ok(())
        },
    )?;

    let presence = EventHandler::sync(
        "presence",
        vec![
            Param::new("topic", ParamType::Str),
            Param::new("new_count", ParamType::Int),
            Param::new("old_count", ParamType::Int),
        ],
        |args: &Args| -> Result<Reply, BoxError> {
            let members: i64 = args.get_or("new_count", 0);
            let before: i64 = args.get_or("old_count", 0);
            Ok(Reply::new(
                "presence",
                json!({ "topic": args.get::<String>("topic"), "members": members, "joined": members > before }),
            ))
        },
    )?;

    let leave = EventHandler::sync(
        "leave_room",
        [base(), vec![Param::new("code", ParamType::Int)]].concat(),
        |args: &Args| -> Result<(), BoxError> {
            let (conn, topic) = parts(args)?;
            let code: i64 = args.get_or("code", 0);
            tracing::debug!(topic = %topic.0, code, "Leaving room");
            conn.publish(&topic.0, Reply::new("left", json!({ "code": code })).to_text());
            Ok(())
        },
    )?;

    let mut table = RouteTable::new();
    table
        .route(ROUTE)?
        .on_open(join)
        .on_subscription(presence)
        .on("say", say)
        .on("typing", typing)
        .on_close(leave);
    Ok(table)
}
