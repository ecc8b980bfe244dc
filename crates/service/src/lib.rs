//! Spreadsheet facade: one engine [`Spreadsheet`] per name, kept in step with
//! a [`CellStore`].
//!
//! # Locking
//!
//! The outer map lock is held only to look up or insert a handle. Each
//! operation then takes that spreadsheet's own lock (write for edits, read
//! for queries), so independent spreadsheets never wait on each other.
//! An edit and its store write happen inside the same critical section.
//!
//! # Write-through
//!
//! Memory is edited first, then the store. If the store write fails the
//! in-memory edit is undone and the operation fails with `DB`. `clear` is the
//! exception: storage is dropped first and memory is only cleared afterwards.
//!
//! [`Spreadsheet`]: cellgraph_engine::Spreadsheet
//! [`CellStore`]: cellgraph_store::CellStore

mod error;
mod services;

pub use error::ServiceError;
pub use services::SpreadsheetServices;

pub use cellgraph_engine::{ErrorKind, Updates};
