//! Durable stores (C7): session state and session history. Both sit under
//! the configured application data root, use shared-read file semantics,
//! and hold no locks between calls — each call opens, does its IO, and
//! closes.

mod history_store;
mod state_store;

pub use history_store::{HistoryEntry, SessionHistoryStore};
pub use state_store::{PersistedSession, SessionStateLoad, SessionStateStore};
