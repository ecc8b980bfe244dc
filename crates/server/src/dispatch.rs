//! Maps protocol operations onto service calls.

use log::{debug, error};
use serde_json::{Map, Value};

use cellgraph_protocol::{ErrorKind, Op, Request, Response};
use cellgraph_service::{ServiceError, SpreadsheetServices, Updates};
use cellgraph_store::CellStore;

/// Execute one request and build its response.
///
/// Never fails: every service error becomes an error envelope carrying the
/// request id.
pub fn dispatch<S: CellStore>(services: &SpreadsheetServices<S>, request: Request) -> Response {
    let Request { id, op } = request;
    let name = op.name();

    match execute(services, op) {
        Ok(result) => Response::ok(id, result),
        Err(e) => {
            let kind = e.kind();
            match kind {
                ErrorKind::Db | ErrorKind::Internal => error!("{} [{}] failed: {}", name, id, e),
                _ => debug!("{} [{}] rejected: {}", name, id, e),
            }
            Response::error(id, kind, e.to_string())
        }
    }
}

fn execute<S: CellStore>(services: &SpreadsheetServices<S>, op: Op) -> Result<Value, ServiceError> {
    let result = match op {
        Op::Evaluate { spreadsheet, cell, expr } => updates_json(services.evaluate(&spreadsheet, &cell, &expr)?),
        Op::Copy { spreadsheet, cell, src } => updates_json(services.copy(&spreadsheet, &cell, &src)?),
        Op::Query { spreadsheet, cell } => Value::String(services.query(&spreadsheet, &cell)?),
        Op::Value { spreadsheet, cell } => Value::from(services.value(&spreadsheet, &cell)?),
        Op::Remove { spreadsheet, cell } => updates_json(services.remove(&spreadsheet, &cell)?),
        Op::Clear { spreadsheet } => {
            services.clear(&spreadsheet)?;
            Value::Null
        }
        Op::Dump { spreadsheet } => Value::Array(
            services
                .dump(&spreadsheet)?
                .into_iter()
                .map(|(cell, expr)| Value::Array(vec![Value::String(cell), Value::String(expr)]))
                .collect(),
        ),
        Op::Load { spreadsheet, cells } => updates_json(services.load(&spreadsheet, cells)?),
        Op::Spreadsheets => Value::from(services.spreadsheet_names()?),
        Op::Ping => Value::from("pong"),
    };
    Ok(result)
}

/// `{"A1": 7.0, "B1": 8.0}`
fn updates_json(updates: Updates) -> Value {
    let object: Map<String, Value> = updates
        .into_iter()
        .map(|(cell, value)| (cell.to_string(), Value::from(value)))
        .collect();
    Value::Object(object)
}
