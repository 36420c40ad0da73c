//! In-process fake MCP server over `tokio::io::duplex`.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

/// How the fake server answers one request
pub enum Reply {
    Result(Value),
    Error(i64, String),
    /// Never answer
    Silent,
    /// Answer after a delay without blocking later requests
    Late(Duration, Value),
    /// Close the connection
    Hangup,
}

/// Client ends of the connection plus what the server saw
pub struct FakeServer {
    pub reader: ReadHalf<DuplexStream>,
    pub writer: WriteHalf<DuplexStream>,
    pub log: ServerLog,
}

#[derive(Clone)]
pub struct ServerLog {
    received: Arc<Mutex<Vec<Value>>>,
}

impl ServerLog {
    /// Every message the server received, in order
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    pub fn requests_for(&self, method: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|m| m["method"] == method)
            .collect()
    }
}

/// Answers the handshake and `tools/list`; everything else goes to `handler`
pub fn spawn_fake_server<F>(mut handler: F) -> FakeServer
where
    F: FnMut(&str, &Value) -> Reply + Send + 'static,
{
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (client_reader, client_writer) = tokio::io::split(client);
    let (server_reader, server_writer) = tokio::io::split(server);

    let received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);
    let writer = Arc::new(tokio::sync::Mutex::new(server_writer));

    tokio::spawn(async move {
        let mut lines = BufReader::new(server_reader).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(message) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            log.lock().unwrap().push(message.clone());

            // Notifications carry no id
            let Some(id) = message.get("id").cloned() else {
                continue;
            };
            let method = message["method"].as_str().unwrap_or_default().to_string();

            let reply = match method.as_str() {
                "initialize" => Reply::Result(json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": {},
                    "serverInfo": {"name": "fake", "version": "0"}
                })),
                "tools/list" => Reply::Result(json!({
                    "tools": [{"name": "codex", "description": "run codex"}, {"name": ""}]
                })),
                _ => handler(&method, &message["params"]),
            };

            let response = match reply {
                Reply::Result(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
                Reply::Error(code, message) => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {"code": code, "message": message}
                }),
                Reply::Silent => continue,
                Reply::Late(delay, result) => {
                    let writer = Arc::clone(&writer);
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let response = json!({"jsonrpc": "2.0", "id": id, "result": result});
                        let _ = writer
                            .lock()
                            .await
                            .write_all(format!("{}\n", response).as_bytes())
                            .await;
                    });
                    continue;
                }
                Reply::Hangup => break,
            };

            let mut writer = writer.lock().await;
            if writer
                .write_all(format!("{}\n", response).as_bytes())
                .await
                .is_err()
            {
                break;
            }
        }
    });

    FakeServer {
        reader: client_reader,
        writer: client_writer,
        log: ServerLog { received },
    }
}
