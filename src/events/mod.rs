//! Runtime events: types and broadcast bus.
//!
//! Groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by the dispatch loop and
//! worker tasks.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
