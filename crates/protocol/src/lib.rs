//! cellgraph wire protocol
//!
//! Requests and responses are JSON objects, one per line (JSONL), over TCP.
//!
//! ```text
//! → {"id":"1","op":"evaluate","spreadsheet":"s","cell":"A1","expr":"=5"}
//! ← {"id":"1","is_ok":true,"status":200,"result":{"A1":5.0}}
//! → {"id":"2","op":"evaluate","spreadsheet":"s","cell":"A1","expr":"=A1"}
//! ← {"id":"2","is_ok":false,"status":400,"errors":[{"code":"CIRCULAR_REF","message":"Cell A1 references itself"}]}
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use cellgraph_protocol::{parse_request, Response};
//!
//! let request = parse_request(&line)?;
//! let response = Response::ok(request.id, serde_json::json!("pong"));
//! let json = serde_json::to_string(&response)?;
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use cellgraph_engine::ErrorKind;

/// Current protocol version. Increment for breaking changes.
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// Client → Server
// =============================================================================

/// One request line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Echoed back in the response.
    pub id: String,
    #[serde(flatten)]
    pub op: Op,
}

/// Operation and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Evaluate {
        spreadsheet: String,
        cell: String,
        expr: String,
    },
    /// Copy `src`'s formula into `cell`.
    Copy {
        spreadsheet: String,
        cell: String,
        src: String,
    },
    Query {
        spreadsheet: String,
        cell: String,
    },
    Value {
        spreadsheet: String,
        cell: String,
    },
    Remove {
        spreadsheet: String,
        cell: String,
    },
    Clear {
        spreadsheet: String,
    },
    Dump {
        spreadsheet: String,
    },
    Load {
        spreadsheet: String,
        /// `[[cell, expr], ...]`
        cells: Vec<(String, String)>,
    },
    /// Names of all known spreadsheets.
    Spreadsheets,
    Ping,
}

impl Op {
    /// Wire name of the operation, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Evaluate { .. } => "evaluate",
            Op::Copy { .. } => "copy",
            Op::Query { .. } => "query",
            Op::Value { .. } => "value",
            Op::Remove { .. } => "remove",
            Op::Clear { .. } => "clear",
            Op::Dump { .. } => "dump",
            Op::Load { .. } => "load",
            Op::Spreadsheets => "spreadsheets",
            Op::Ping => "ping",
        }
    }
}

/// A line that is not a valid request.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRequest {
    /// The request id, if the line was a JSON object carrying one.
    pub id: Option<String>,
    pub message: String,
}

/// Parse one request line.
///
/// When the line is valid JSON but not a valid request, the id is still
/// recovered so the error response can be matched by the client.
pub fn parse_request(line: &str) -> Result<Request, MalformedRequest> {
    let value: Value = serde_json::from_str(line).map_err(|e| MalformedRequest {
        id: None,
        message: format!("invalid JSON: {}", e),
    })?;

    let id = value.get("id").and_then(Value::as_str).map(str::to_string);
    serde_json::from_value(value).map_err(|e| MalformedRequest {
        id,
        message: format!("invalid request: {}", e),
    })
}

// =============================================================================
// Server → Client
// =============================================================================

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers; null when the request had none.
    pub id: Option<String>,
    pub is_ok: bool,
    /// HTTP-style status code.
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorBody>,
}

/// One entry of a failure response's `errors` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorKind,
    pub message: String,
}

impl Response {
    pub fn ok(id: impl Into<Option<String>>, result: Value) -> Self {
        Self {
            id: id.into(),
            is_ok: true,
            status: 200,
            result: Some(result),
            errors: Vec::new(),
        }
    }

    pub fn error(id: impl Into<Option<String>>, code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_ok: false,
            status: status_for(code),
            result: None,
            errors: vec![ErrorBody { code, message: message.into() }],
        }
    }
}

/// HTTP-style status for an error kind.
pub fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::Exists => 409,
        ErrorKind::NotFound => 404,
        ErrorKind::Db | ErrorKind::Internal => 500,
        ErrorKind::BadReq | ErrorKind::Syntax | ErrorKind::CircularRef | ErrorKind::Eval => 400,
    }
}
