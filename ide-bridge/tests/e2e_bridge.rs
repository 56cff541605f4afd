// E2E tests for the bridge transport.
//
// Starts the real server on an ephemeral port with the filesystem editor and talks to it
// over HTTP/SSE the way an assistant client would.

use futures::stream::BoxStream;
use futures::StreamExt;
use ide_bridge::{BridgeServer, DiscoveryRecord, DiscoveryStore, FsEditorAdapter, Settings};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(5);

fn settings(dir: &Path) -> Settings {
    Settings {
        workspace: vec![dir.to_path_buf()],
        discovery_dir: dir.join("discovery"),
        publish_discovery: false,
        client_ready_delay: Duration::from_millis(50),
        ..Settings::default()
    }
}

async fn start(settings: Settings) -> BridgeServer {
    BridgeServer::start(settings, Box::new(FsEditorAdapter::new()))
        .await
        .unwrap()
}

struct SseReader {
    chunks: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: String,
}

impl SseReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            chunks: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            buffer: String::new(),
        }
    }

    /// Next named event as `(event, data)`; heartbeat comments are skipped.
    async fn next_event(&mut self) -> (String, String) {
        timeout(WAIT, async {
            loop {
                if let Some(end) = self.buffer.find("\n\n") {
                    let frame: String = self.buffer.drain(..end + 2).collect();
                    let mut event = None;
                    let mut data = Vec::new();
                    for line in frame.lines() {
                        if let Some(value) = line.strip_prefix("event:") {
                            event = Some(value.trim().to_string());
                        } else if let Some(value) = line.strip_prefix("data:") {
                            data.push(value.trim_start().to_string());
                        }
                    }
                    if let Some(event) = event {
                        return (event, data.join("\n"));
                    }
                    continue;
                }
                let chunk = self
                    .chunks
                    .next()
                    .await
                    .expect("stream ended")
                    .expect("stream error");
                self.buffer.push_str(&String::from_utf8_lossy(&chunk));
            }
        })
        .await
        .expect("timed out waiting for SSE event")
    }

    async fn next_message(&mut self) -> Value {
        let (event, data) = self.next_event().await;
        assert_eq!(event, "message");
        serde_json::from_str(&data).unwrap()
    }

    /// Next message with the given JSON-RPC method, skipping any others.
    async fn next_method(&mut self, method: &str) -> Value {
        loop {
            let message = self.next_message().await;
            if message["method"] == method {
                return message;
            }
        }
    }
}

async fn open_session(client: &reqwest::Client, server: &BridgeServer) -> (SseReader, String) {
    let response = client
        .get(server.endpoint_url())
        .header("Authorization", format!("Bearer {}", server.token()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let mut reader = SseReader::new(response);
    let (event, url) = reader.next_event().await;
    assert_eq!(event, "endpoint");
    (reader, url)
}

async fn rpc(client: &reqwest::Client, url: &str, token: &str, body: Value) -> Value {
    client
        .post(url)
        .header("Authorization", token)
        .json(&body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn e2e_sessions_require_the_token() {
    let temp = TempDir::new().unwrap();
    let server = start(settings(temp.path())).await;
    let client = reqwest::Client::new();

    let response = client.get(server.endpoint_url()).send().await.unwrap();
    assert_eq!(response.status(), 401);
    let response = client
        .get(server.endpoint_url())
        .header("Authorization", "Bearer nope")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert!(server.registry().is_empty());

    let (_first, first_url) = open_session(&client, &server).await;
    let (_second, second_url) = open_session(&client, &server).await;
    assert!(first_url.starts_with(&format!("http://127.0.0.1:{}/mcp?session_id=", server.port())));
    assert_ne!(first_url, second_url);
    assert_eq!(server.registry().len(), 2);

    let body = rpc(
        &client,
        &first_url,
        server.token(),
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}),
    )
    .await;
    assert_eq!(body["result"]["protocolVersion"], "2024-11-05");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn e2e_initial_request_is_answered_over_the_stream() {
    let temp = TempDir::new().unwrap();
    let server = start(settings(temp.path())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.endpoint_url())
        .header("Authorization", server.token())
        .header("Accept", "text/event-stream")
        .json(&json!({"jsonrpc": "2.0", "id": 7, "method": "initialize", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let mut reader = SseReader::new(response);
    let (event, _) = reader.next_event().await;
    assert_eq!(event, "endpoint");
    let message = reader.next_message().await;
    assert_eq!(message["id"], 7);
    assert_eq!(message["result"]["serverInfo"]["name"], "ide-bridge");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn e2e_blocking_open_diff_returns_the_review_outcome() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("a.py");
    std::fs::write(&file, "print(1)").unwrap();
    let file = file.to_string_lossy().into_owned();
    let server = start(settings(temp.path())).await;
    let client = reqwest::Client::new();
    let (mut reader, session_url) = open_session(&client, &server).await;

    let call = {
        let client = client.clone();
        let token = server.token().to_string();
        let file = file.clone();
        tokio::spawn(async move {
            rpc(
                &client,
                &session_url,
                &token,
                json!({"jsonrpc": "2.0", "id": 3, "method": "tools/call", "params": {
                    "name": "openDiff",
                    "arguments": {"filePath": file, "newContent": "print(2)", "blocking": true}
                }}),
            )
            .await
        })
    };

    let pending_url = format!("http://127.0.0.1:{}/review/pending", server.port());
    timeout(WAIT, async {
        loop {
            let pending: Value = client
                .get(&pending_url)
                .header("Authorization", server.token())
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if pending.as_array().is_some_and(|list| !list.is_empty()) {
                assert_eq!(pending[0]["filePath"], file.as_str());
                assert_eq!(pending[0]["blocking"], true);
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("diff never became pending");

    let response = client
        .post(format!("http://127.0.0.1:{}/review/resolve", server.port()))
        .header("Authorization", server.token())
        .json(&json!({"filePath": file, "accepted": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body = timeout(WAIT, call).await.unwrap().unwrap();
    assert_eq!(
        body["result"]["structuredContent"],
        json!({"status": "accepted", "content": "print(2)"})
    );
    let text: Value =
        serde_json::from_str(body["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(text["status"], "accepted");

    let notification = reader.next_method("ide/diffAccepted").await;
    assert_eq!(
        notification,
        json!({"jsonrpc": "2.0", "method": "ide/diffAccepted", "params": {"filePath": file, "content": "print(2)"}})
    );
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "print(2)");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn e2e_tools_list_pushes_context_to_the_session() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("main.rs");
    std::fs::write(&file, "fn main() {}\n").unwrap();
    let file = file.to_string_lossy().into_owned();
    let server = start(settings(temp.path())).await;
    let client = reqwest::Client::new();
    let (mut reader, session_url) = open_session(&client, &server).await;

    let body = rpc(
        &client,
        &session_url,
        server.token(),
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {
            "name": "ide:navigateTo",
            "arguments": {"filePath": file, "line": 1}
        }}),
    )
    .await;
    assert_eq!(body["result"]["content"][0]["text"], format!("Navigated to {file}"));

    let body = rpc(
        &client,
        &session_url,
        server.token(),
        json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
    )
    .await;
    assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 3);

    let update = reader.next_message().await;
    assert_eq!(update["method"], "ide/contextUpdate");
    let open_files = &update["params"]["workspaceState"]["openFiles"];
    assert_eq!(open_files[0]["path"], file.as_str());
    assert_eq!(open_files[0]["isActive"], true);
    assert_eq!(update["params"]["workspaceState"]["isTrusted"], true);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn e2e_navigation_pushes_context_after_the_debounce() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("b.rs");
    std::fs::write(&file, "pub fn b() {}\n").unwrap();
    let file = file.to_string_lossy().into_owned();
    let server = start(Settings {
        context_debounce: Duration::from_millis(100),
        ..settings(temp.path())
    })
    .await;
    let client = reqwest::Client::new();
    let (mut reader, session_url) = open_session(&client, &server).await;

    let body = rpc(
        &client,
        &session_url,
        server.token(),
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {
            "name": "navigateTo",
            "arguments": {"filePath": file, "line": 1}
        }}),
    )
    .await;
    assert!(body["error"].is_null(), "{body}");

    let update = reader.next_message().await;
    assert_eq!(update["method"], "ide/contextUpdate");
    let open_files = &update["params"]["workspaceState"]["openFiles"];
    assert_eq!(open_files[0]["path"], file.as_str());
    assert_eq!(open_files[0]["isActive"], true);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn e2e_idle_stream_carries_heartbeats() {
    let temp = TempDir::new().unwrap();
    let server = start(settings(temp.path())).await;
    let client = reqwest::Client::new();
    let response = client
        .get(server.endpoint_url())
        .header("Authorization", server.token())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let mut chunks = response.bytes_stream();
    let mut seen = String::new();
    timeout(Duration::from_millis(2500), async {
        while !seen.contains(": heartbeat") {
            let chunk = chunks.next().await.expect("stream ended").unwrap();
            seen.push_str(&String::from_utf8_lossy(&chunk));
        }
    })
    .await
    .expect("no heartbeat on an idle stream");
    assert!(seen.contains("event: endpoint"));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn e2e_busy_listen_port_falls_back_to_an_ephemeral_one() {
    let temp = TempDir::new().unwrap();
    let busy = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = busy.local_addr().unwrap();
    let server = start(Settings {
        listen: taken,
        ..settings(temp.path())
    })
    .await;
    assert_ne!(server.port(), taken.port());

    let health = reqwest::get(format!("http://127.0.0.1:{}/healthz", server.port()))
        .await
        .unwrap();
    assert_eq!(health.status(), 200);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn e2e_discovery_record_lives_as_long_as_the_server() {
    let temp = TempDir::new().unwrap();
    let discovery_dir = temp.path().join("discovery");
    let server = start(Settings {
        publish_discovery: true,
        ..settings(temp.path())
    })
    .await;

    let files = server.discovery_files().to_vec();
    assert!(!files.is_empty());
    let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("ide-bridge-server-"));
    assert!(name.ends_with(&format!("-{}.json", server.port())));

    let record: DiscoveryRecord =
        serde_json::from_slice(&std::fs::read(&files[0]).unwrap()).unwrap();
    assert_eq!(record.port, server.port());
    assert_eq!(record.auth_token, server.token());
    assert_eq!(record.workspace_path, temp.path().to_string_lossy());

    let store = DiscoveryStore::new(&discovery_dir, "ide-bridge-server");
    assert_eq!(store.find_latest().await.unwrap(), Some(record));

    server.shutdown().await.unwrap();
    for file in files {
        assert!(!file.exists(), "{} left behind", file.display());
    }
}
