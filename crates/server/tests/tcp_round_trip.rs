// End-to-end: real sockets against a server on an ephemeral port.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cellgraph_config::ServerConfig;
use cellgraph_server::Server;
use cellgraph_service::SpreadsheetServices;
use cellgraph_store::{MemoryStore, SqliteStore};
use serde_json::{json, Value};

fn test_config() -> ServerConfig {
    ServerConfig { bind: "127.0.0.1:0".to_string(), ..ServerConfig::default() }
}

fn start(config: ServerConfig) -> Server {
    let services = Arc::new(SpreadsheetServices::new(MemoryStore::new()));
    Server::start(&config, services).unwrap()
}

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    fn connect(server: &Server) -> Self {
        let stream = TcpStream::connect(server.local_addr()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        Self { reader: BufReader::new(stream.try_clone().unwrap()), writer: stream }
    }

    fn send_line(&mut self, line: &str) {
        writeln!(self.writer, "{}", line).unwrap();
        self.writer.flush().unwrap();
    }

    fn recv(&mut self) -> Value {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).unwrap();
        assert!(n > 0, "connection closed while waiting for a response");
        serde_json::from_str(&line).unwrap()
    }

    fn call(&mut self, request: Value) -> Value {
        self.send_line(&request.to_string());
        self.recv()
    }

    /// True once the server has hung up on us.
    fn is_closed(&mut self) -> bool {
        let mut line = String::new();
        !matches!(self.reader.read_line(&mut line), Ok(n) if n > 0)
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn evaluate_and_propagate() {
    let server = start(test_config());
    let mut client = Client::connect(&server);

    let resp = client.call(json!({"id":"1","op":"evaluate","spreadsheet":"s","cell":"A1","expr":"=5"}));
    assert_eq!(resp, json!({"id":"1","is_ok":true,"status":200,"result":{"A1":5.0}}));

    client.call(json!({"id":"2","op":"evaluate","spreadsheet":"s","cell":"B1","expr":"=A1+1"}));
    client.call(json!({"id":"3","op":"evaluate","spreadsheet":"s","cell":"C1","expr":"=B1*2"}));

    let resp = client.call(json!({"id":"4","op":"evaluate","spreadsheet":"s","cell":"A1","expr":"=7"}));
    assert_eq!(resp["result"], json!({"A1":7.0,"B1":8.0,"C1":16.0}));

    let resp = client.call(json!({"id":"5","op":"value","spreadsheet":"s","cell":"C1"}));
    assert_eq!(resp["result"], json!(16.0));
}

#[test]
fn cycle_is_rejected_with_400() {
    let server = start(test_config());
    let mut client = Client::connect(&server);

    client.call(json!({"id":"1","op":"evaluate","spreadsheet":"s","cell":"B1","expr":"=A1+1"}));
    let resp = client.call(json!({"id":"2","op":"evaluate","spreadsheet":"s","cell":"A1","expr":"=B1"}));
    assert_eq!(resp["id"], json!("2"));
    assert_eq!(resp["is_ok"], json!(false));
    assert_eq!(resp["status"], json!(400));
    assert_eq!(resp["errors"][0]["code"], json!("CIRCULAR_REF"));

    let resp = client.call(json!({"id":"3","op":"query","spreadsheet":"s","cell":"A1"}));
    assert_eq!(resp["result"], json!(""));
}

#[test]
fn malformed_line_gets_bad_req_and_connection_survives() {
    let server = start(test_config());
    let mut client = Client::connect(&server);

    client.send_line("{oops");
    let resp = client.recv();
    assert_eq!(resp["id"], Value::Null);
    assert_eq!(resp["status"], json!(400));
    assert_eq!(resp["errors"][0]["code"], json!("BAD_REQ"));

    client.send_line(r#"{"id":"u","op":"explode"}"#);
    assert_eq!(client.recv()["id"], json!("u"));

    let resp = client.call(json!({"id":"p","op":"ping"}));
    assert_eq!(resp["result"], json!("pong"));
}

#[test]
fn repeated_parse_failures_close_the_connection() {
    let config = ServerConfig { max_parse_failures: 2, ..test_config() };
    let server = start(config);
    let mut client = Client::connect(&server);

    // A good request in between resets the count
    client.send_line("nope");
    client.recv();
    client.call(json!({"id":"p","op":"ping"}));

    client.send_line("nope");
    client.recv();
    client.send_line("still nope");
    client.recv();

    assert!(client.is_closed());
    assert_eq!(server.metrics().connections_closed_parse_failures.load(Ordering::Relaxed), 1);
}

#[test]
fn oversized_line_closes_the_connection() {
    let config = ServerConfig { max_line_bytes: 64, ..test_config() };
    let server = start(config);
    let mut client = Client::connect(&server);

    let resp = client.call(json!({"id":"1","op":"ping"}));
    assert_eq!(resp["result"], json!("pong"));

    client.send_line(&"x".repeat(200));

    // The error line may be lost if the socket is reset, but the hang-up is not
    let mut line = String::new();
    if let Ok(n) = client.reader.read_line(&mut line) {
        if n > 0 {
            let resp: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(resp["errors"][0]["code"], json!("BAD_REQ"));
            assert!(client.is_closed());
        }
    }
    wait_for(|| server.metrics().connections_closed_oversize.load(Ordering::Relaxed) == 1);
}

#[test]
fn connections_beyond_the_limit_are_refused() {
    let config = ServerConfig { max_connections: 1, ..test_config() };
    let server = start(config);

    let mut first = Client::connect(&server);
    first.call(json!({"id":"1","op":"ping"}));

    let mut second = Client::connect(&server);
    assert!(second.is_closed());
    assert_eq!(server.metrics().connections_refused_limit.load(Ordering::Relaxed), 1);

    drop(first);
    wait_for(|| server.connection_count() == 0);

    let mut third = Client::connect(&server);
    assert_eq!(third.call(json!({"id":"3","op":"ping"}))["result"], json!("pong"));
}

#[test]
fn connections_share_spreadsheets() {
    let server = start(test_config());
    let mut writer = Client::connect(&server);
    let mut reader = Client::connect(&server);

    writer.call(json!({
        "id": "1",
        "op": "load",
        "spreadsheet": "shared",
        "cells": [["A1", "=2"], ["A2", "=A1*10"], ["B2", "=A2+$A$1"]]
    }));

    let resp = reader.call(json!({"id":"2","op":"dump","spreadsheet":"shared"}));
    assert_eq!(resp["result"], json!([["A1","=2"],["A2","=A1*10"],["B2","=A2+$A$1"]]));

    let resp = reader.call(json!({"id":"3","op":"copy","spreadsheet":"shared","cell":"C3","src":"B2"}));
    assert_eq!(resp["result"], json!({"C3":2.0}));
    let resp = reader.call(json!({"id":"4","op":"query","spreadsheet":"shared","cell":"C3"}));
    assert_eq!(resp["result"], json!("=B3+$A$1"));

    let resp = writer.call(json!({"id":"5","op":"spreadsheets"}));
    assert_eq!(resp["result"], json!(["shared"]));

    let resp = writer.call(json!({"id":"6","op":"clear","spreadsheet":"shared"}));
    assert_eq!(resp["result"], Value::Null);
    let resp = reader.call(json!({"id":"7","op":"value","spreadsheet":"shared","cell":"B2"}));
    assert_eq!(resp["result"], json!(0.0));
}

#[test]
fn sqlite_backed_server_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cells.db");

    {
        let services = Arc::new(SpreadsheetServices::new(SqliteStore::open(&path).unwrap()));
        let server = Server::start(&test_config(), services).unwrap();
        let mut client = Client::connect(&server);
        client.call(json!({"id":"1","op":"evaluate","spreadsheet":"s","cell":"A1","expr":"=4"}));
        client.call(json!({"id":"2","op":"evaluate","spreadsheet":"s","cell":"B1","expr":"=A1*A1"}));
    }

    let services = Arc::new(SpreadsheetServices::new(SqliteStore::open(&path).unwrap()));
    let server = Server::start(&test_config(), services).unwrap();
    let mut client = Client::connect(&server);
    let resp = client.call(json!({"id":"3","op":"value","spreadsheet":"s","cell":"B1"}));
    assert_eq!(resp["result"], json!(16.0));
}
