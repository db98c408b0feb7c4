//! Session-synchronization state shared by every client watching one
//! operator account.
//!
//! The store owns session records and processing-state entries outright;
//! workers and handlers propose changes through its update API and the store
//! fans each accepted change out to every subscribed session that shares the
//! operator email. Everything lives in process memory and is lost on restart
//! by design.

pub mod events;
pub mod store;
pub mod sweeper;

pub use events::{ProcessingSnapshot, StateEvent};
pub use store::{SessionRecord, SessionStateStore, SessionStateStoreConfig};
pub use sweeper::spawn_session_sweeper;
