//! cellgraph network front end.
//!
//! [`Server`] accepts JSONL connections and hands each request to
//! [`dispatch`], which runs it against a shared [`SpreadsheetServices`].
//!
//! [`SpreadsheetServices`]: cellgraph_service::SpreadsheetServices

mod dispatch;
mod server;

pub use dispatch::dispatch;
pub use server::{Limits, Server, ServerMetrics};
