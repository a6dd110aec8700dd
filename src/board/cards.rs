//! Card boards.
//!
//! Handlers on `/boards/:board` work on a [`BoardSession`]: a working copy of
//! the board checked out once per dispatch cycle and committed back to the
//! [`BoardStore`] when the cycle is torn down. Every handler bound to the same
//! event sees the same session.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower::BoxError;

use crate::errors::RegistrationError;
use crate::invoker::EventHandler;
use crate::routing::RouteTable;
use crate::scope::{Args, Dependency, EnumSpec, LiteralSet, ModelSpec, Param, ParamType, Scoped};
use crate::socket::Reply;

pub const ROUTE: &str = "/boards/:board";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Column {
    Todo,
    Doing,
    Done,
}

/// Accepts member names or their numbers (`"done"` or `3`).
pub fn column_spec() -> EnumSpec {
    EnumSpec::new("Column", [("todo", 1), ("doing", 2), ("done", 3)])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: i64,
    pub title: String,
    pub column: Column,
    pub position: i64,
    pub priority: String,
}

#[derive(Debug, Deserialize)]
struct CardMove {
    card: i64,
    column: Column,
    position: Option<i64>,
}

fn card_move_spec() -> ModelSpec {
    ModelSpec::new("CardMove")
        .field("card", ParamType::Int)
        .field("column", ParamType::Enum(column_spec()))
        .optional("position", ParamType::Int)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    #[error("board {board:?} has no card {card}")]
    UnknownCard { board: String, card: i64 },
}

/// Committed state of every board.
#[derive(Debug, Default)]
pub struct BoardStore {
    boards: DashMap<String, BTreeMap<i64, Card>>,
}

impl BoardStore {
    /// Working copy of `board`.
    pub fn checkout(&self, board: &str) -> BoardSession {
        let cards = self.boards.get(board).map(|cards| cards.clone()).unwrap_or_default();
        BoardSession {
            board: board.to_string(),
            cards: Arc::new(Mutex::new(cards)),
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Store the session's cards if it changed anything.
    pub fn commit(&self, session: &BoardSession) {
        if !session.dirty.swap(false, Ordering::SeqCst) {
            return;
        }
        let cards = session.lock().clone();
        tracing::debug!(board = %session.board, cards = cards.len(), "Board committed");
        self.boards.insert(session.board.clone(), cards);
    }

    pub fn cards(&self, board: &str) -> Vec<Card> {
        self.checkout(board).cards()
    }
}

/// One cycle's view of a board.
#[derive(Debug, Clone)]
pub struct BoardSession {
    board: String,
    cards: Arc<Mutex<BTreeMap<i64, Card>>>,
    dirty: Arc<AtomicBool>,
}

impl BoardSession {
    pub fn board(&self) -> &str {
        &self.board
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<i64, Card>> {
        self.cards.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cards ordered by column, then position.
    pub fn cards(&self) -> Vec<Card> {
        let mut cards: Vec<Card> = self.lock().values().cloned().collect();
        cards.sort_by_key(|card| (card.column, card.position, card.id));
        cards
    }

    pub fn add(&self, title: String, column: Column, priority: String) -> Card {
        let mut cards = self.lock();
        let id = cards.keys().next_back().map_or(1, |last| last + 1);
        let card = Card {
            id,
            title,
            column,
            position: end_of(&cards, column),
            priority,
        };
        cards.insert(id, card.clone());
        self.dirty.store(true, Ordering::SeqCst);
        card
    }

    /// Move a card; without a position it goes to the end of the column.
    pub fn move_card(&self, id: i64, column: Column, position: Option<i64>) -> Result<Card, CardError> {
        let mut cards = self.lock();
        let end = end_of(&cards, column);
        let Some(card) = cards.get_mut(&id) else {
            return Err(CardError::UnknownCard {
                board: self.board.clone(),
                card: id,
            });
        };
        card.column = column;
        card.position = position.unwrap_or(end);
        let moved = card.clone();
        self.dirty.store(true, Ordering::SeqCst);
        Ok(moved)
    }
}

fn end_of(cards: &BTreeMap<i64, Card>, column: Column) -> i64 {
    cards
        .values()
        .filter(|card| card.column == column)
        .map(|card| card.position + 1)
        .max()
        .unwrap_or(0)
}

/// Board session for the cycle, committed at teardown.
fn board_session(store: Arc<BoardStore>) -> Result<Dependency, RegistrationError> {
    Dependency::scoped(
        "board_session",
        vec![Param::new("board", ParamType::Str)],
        move |args: &Args| -> Result<Scoped<BoardSession>, BoxError> {
            let board: String = args.get("board").ok_or("board is required")?;
            let session = store.checkout(&board);
            let store = Arc::clone(&store);
            let committed = session.clone();
            Ok(Scoped::with_release(session, move || async move {
                store.commit(&committed);
            }))
        },
    )
}

fn session_of(args: &Args) -> Result<Arc<BoardSession>, BoxError> {
    args.dep::<BoardSession>("session").ok_or_else(|| "board session not bound".into())
}

fn snapshot(session: &BoardSession) -> Reply {
    Reply::new("cards", json!({ "board": session.board(), "cards": session.cards() }))
}

fn topic_of(session: &BoardSession) -> String {
    format!("board:{}", session.board())
}

pub fn routes(store: Arc<BoardStore>) -> Result<RouteTable, RegistrationError> {
    let session = board_session(store)?;
    let with_session = |params: Vec<Param>| [vec![Param::depends("session", session.clone())], params].concat();

    let watch = EventHandler::sync(
        "watch_board",
        with_session(vec![Param::connection("conn")]),
        |args: &Args| -> Result<Reply, BoxError> {
            let session = session_of(args)?;
            let conn = args.connection("conn").ok_or("connection not bound")?;
            conn.subscribe(&topic_of(&session));
            Ok(snapshot(&session))
        },
    )?;

    let list = EventHandler::sync("list_cards", with_session(vec![]), |args: &Args| -> Result<Reply, BoxError> {
        let session = session_of(args)?;
        Ok(snapshot(&session))
    })?;

    let priority = LiteralSet::from_values([json!("low"), json!("normal"), json!("high")])?;
    let add = EventHandler::sync(
        "add_card",
        with_session(vec![
            Param::new("title", ParamType::Str),
            Param::new("column", ParamType::Enum(column_spec())).default("todo"),
            Param::new("priority", ParamType::Literal(priority)).default("normal"),
        ]),
        |args: &Args| -> Result<Reply, BoxError> {
            let session = session_of(args)?;
            let title: String = args.get("title").ok_or("title is required")?;
            let column = match args.raw("column").map(|bound| bound.to_json()) {
                Some(value) => serde_json::from_value(value)?,
                None => Column::Todo,
            };
            let priority: String = args.get_or("priority", "normal".to_string());
            let card = session.add(title, column, priority);
            Ok(Reply::json("added", &card)?)
        },
    )?;

    let apply_move = EventHandler::sync(
        "apply_move",
        with_session(vec![Param::new("move", ParamType::Model(card_move_spec()))]),
        |args: &Args| -> Result<Reply, BoxError> {
            let session = session_of(args)?;
            let request: CardMove = args.model("move")?.ok_or("move is required")?;
            let card = session.move_card(request.card, request.column, request.position)?;
            Ok(Reply::json("moved", &card)?)
        },
    )?;

    // Runs after apply_move in the same cycle and sees its change.
    let announce = EventHandler::sync(
        "announce_board",
        with_session(vec![Param::connection("conn")]),
        |args: &Args| -> Result<(), BoxError> {
            let session = session_of(args)?;
            let conn = args.connection("conn").ok_or("connection not bound")?;
            conn.publish(&topic_of(&session), snapshot(&session).to_text());
            Ok(())
        },
    )?;

    let mut table = RouteTable::new();
    table
        .route(ROUTE)?
        .on_open(watch)
        .on("list", list)
        .on("add", add)
        .on("move", apply_move)
        .on("move", announce);
    Ok(table)
}
