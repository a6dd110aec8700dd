//! Demo board served by the `board-gateway` binary.
//!
//! Two route tables merged into one:
//! - `/chat/{room}`: room chat over topics, presence from subscription counts
//! - `/boards/:board`: a card board edited through a per-cycle session
//!
//! Consumers build their own tables the same way.

use std::sync::Arc;

use crate::errors::RegistrationError;
use crate::routing::RouteTable;

pub mod cards;
pub mod chat;

pub use cards::{BoardSession, BoardStore, Card, CardError, Column};

/// Chat and card routes in one table.
pub fn board_routes(store: Arc<BoardStore>) -> Result<RouteTable, RegistrationError> {
    let mut table = chat::routes()?;
    table.merge(cards::routes(store)?)?;
    Ok(table)
}
