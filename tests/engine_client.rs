//! Integration tests for the engine client.
//!
//! A minimal in-process mock engine answers with literal HTTP bytes over
//! loopback TCP (and a Unix socket), which pins down the client's URL
//! shapes, payload encodings, status mapping, streaming decode, and
//! retry behavior.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use stevedore::engine::{EngineApi, EngineClient, EngineEndpoint, EngineError};
use stevedore::model::{ContainerStartSpec, PortMapping, Protocol};
use stevedore::orchestrator::Orchestrator;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug)]
struct RecordedRequest {
    method: String,
    path: String,
    headers: String,
    body: Vec<u8>,
}

/// One scripted answer, consumed per accepted connection in order.
enum MockResponse {
    /// Write these raw bytes, then close.
    Canned(String),
    /// Drop the connection without answering.
    CloseImmediately,
    /// Write `head`, then each chunk with a short pause, then close or
    /// hold the socket open.
    Streamed {
        head: String,
        chunks: Vec<Vec<u8>>,
        keep_open: bool,
    },
}

fn json_response(status: &str, body: &str) -> MockResponse {
    MockResponse::Canned(format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    ))
}

fn empty_response(status: &str) -> MockResponse {
    MockResponse::Canned(format!(
        "HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
    ))
}

/// Close-delimited head for streamed bodies (build progress, logs).
fn stream_head(content_type: &str) -> String {
    format!("HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nConnection: close\r\n\r\n")
}

/// An stdout frame in the engine's multiplexed log format.
fn log_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![1u8, 0, 0, 0];
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

struct MockEngine {
    port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockEngine {
    async fn start(script: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::new(Mutex::new(VecDeque::from(script)));

        let accepted_requests = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let Some(response) = queue.lock().unwrap().pop_front() else {
                    return;
                };
                let requests = Arc::clone(&accepted_requests);
                tokio::spawn(serve_connection(stream, response, requests));
            }
        });

        Self { port, requests }
    }

    fn client(&self) -> EngineClient {
        EngineClient::new(EngineEndpoint::Tcp {
            host: "127.0.0.1".to_string(),
            port: self.port,
        })
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        std::mem::take(&mut self.requests.lock().unwrap())
    }
}

async fn serve_connection<S>(
    mut stream: S,
    response: MockResponse,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match response {
        MockResponse::CloseImmediately => {}
        MockResponse::Canned(raw) => {
            if let Some(request) = read_request(&mut stream).await {
                requests.lock().unwrap().push(request);
            }
            let _ = stream.write_all(raw.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
        MockResponse::Streamed { head, chunks, keep_open } => {
            if let Some(request) = read_request(&mut stream).await {
                requests.lock().unwrap().push(request);
            }
            let _ = stream.write_all(head.as_bytes()).await;
            for chunk in chunks {
                tokio::time::sleep(Duration::from_millis(10)).await;
                if stream.write_all(&chunk).await.is_err() {
                    return;
                }
            }
            if keep_open {
                // Follow-mode: hold the socket until the peer goes away.
                let mut scratch = [0u8; 64];
                let _ = stream.read(&mut scratch).await;
            } else {
                let _ = stream.shutdown().await;
            }
        }
    }
}

async fn read_request<S>(stream: &mut S) -> Option<RecordedRequest>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut scratch = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut scratch).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&scratch[..n]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let mut request_line = headers.lines().next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let content_length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut scratch).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&scratch[..n]);
    }

    Some(RecordedRequest { method, path, headers, body })
}

fn start_spec(id: &str, image: &str) -> ContainerStartSpec {
    ContainerStartSpec {
        start_id: id.to_string(),
        image: image.to_string(),
        hostname: Some("web".to_string()),
        privileged: false,
        env: [("MODE".to_string(), "it".to_string())].into(),
        links: Vec::new(),
        ports: vec![PortMapping { container_port: 80, host_port: 8080, protocol: Protocol::Tcp }],
        wait_for_startup: None,
        startup_timeout_secs: 0,
    }
}

#[tokio::test]
async fn test_create_container_url_and_payload() {
    let mock = MockEngine::start(vec![json_response(
        "201 Created",
        r#"{"Id":"abc123","Warnings":[]}"#,
    )])
    .await;
    let client = mock.client();

    // Reuse the orchestrator's payload translation for a realistic body.
    let orchestrator = Orchestrator::new(client);
    let mut ledger = stevedore::ResourceLedger::new();
    orchestrator
        .start_containers(std::slice::from_ref(&start_spec("web", "app:it")), &mut ledger)
        .await
        .unwrap_err(); // inspect hits an exhausted script; the create itself is what we check

    let requests = mock.requests();
    let create = &requests[0];
    assert_eq!(create.method, "POST");
    assert!(create.path.starts_with("/containers/create?name=stevedore-web-"), "{}", create.path);

    let body: serde_json::Value = serde_json::from_slice(&create.body).unwrap();
    assert_eq!(body["Image"], "app:it");
    assert_eq!(body["Hostname"], "web");
    assert_eq!(body["Env"], serde_json::json!(["MODE=it"]));
    assert_eq!(body["ExposedPorts"]["80/tcp"], serde_json::json!({}));
    assert_eq!(
        body["HostConfig"]["PortBindings"]["80/tcp"],
        serde_json::json!([{"HostPort": "8080"}])
    );
    assert_eq!(body["HostConfig"]["PublishAllPorts"], serde_json::json!(false));
}

#[tokio::test]
async fn test_status_code_mapping() {
    let mock = MockEngine::start(vec![
        json_response("404 Not Found", r#"{"message":"no such container: xyz"}"#),
        json_response("409 Conflict", r#"{"message":"image is in use"}"#),
        json_response("500 Internal Server Error", r#"{"message":"engine exploded"}"#),
    ])
    .await;
    let client = mock.client();

    let err = client.inspect_container("xyz").await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(ref m) if m == "no such container: xyz"), "{err:?}");

    let err = client.remove_image("img", false).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ref m) if m == "image is in use"), "{err:?}");

    let err = client.start_container("xyz").await.unwrap_err();
    assert!(matches!(err, EngineError::Engine(ref m) if m == "engine exploded"), "{err:?}");
}

#[tokio::test]
async fn test_start_and_stop_treat_not_modified_as_success() {
    let mock = MockEngine::start(vec![
        empty_response("304 Not Modified"),
        empty_response("304 Not Modified"),
    ])
    .await;
    let client = mock.client();

    client.start_container("abc").await.unwrap();
    client.stop_container("abc", 10).await.unwrap();

    let requests = mock.requests();
    assert_eq!(requests[0].path, "/containers/abc/start");
    assert_eq!(requests[1].path, "/containers/abc/stop?t=10");
}

#[tokio::test]
async fn test_remove_container_flags() {
    let mock = MockEngine::start(vec![empty_response("204 No Content")]).await;
    let client = mock.client();

    client.remove_container("abc", true, true).await.unwrap();
    assert_eq!(mock.requests()[0].path, "/containers/abc?force=1&v=1");
}

#[tokio::test]
async fn test_build_image_streams_context_and_parses_progress() {
    let progress = [
        r#"{"stream":"Step 1/2 : FROM alpine\n"}"#,
        r#"{"stream":" ---> 3f4e5a6b7c8d\n"}"#,
        r#"{"stream":"Successfully built 4a5ff6c2d31e\n"}"#,
    ]
    .join("\n");
    let progress_bytes = progress.into_bytes();
    let mock = MockEngine::start(vec![MockResponse::Streamed {
        head: stream_head("application/json"),
        chunks: progress_bytes.chunks(40).map(<[u8]>::to_vec).collect(),
        keep_open: false,
    }])
    .await;
    let client = mock.client();

    let archive = b"pretend tar bytes".to_vec();
    let image_id = client.build_image(archive.clone(), Some("app:it")).await.unwrap();
    assert_eq!(image_id, "4a5ff6c2d31e");

    let requests = mock.requests();
    let build = &requests[0];
    assert_eq!(build.method, "POST");
    assert_eq!(build.path, "/build?t=app%3Ait");
    assert!(build.headers.to_lowercase().contains("content-type: application/x-tar"));
    assert_eq!(build.body, archive);
}

#[tokio::test]
async fn test_build_image_prefers_structured_id_record() {
    let progress = [
        r#"{"stream":"Successfully built 4a5ff6c2d31e\n"}"#,
        r#"{"aux":{"ID":"sha256:0123456789ab"}}"#,
    ]
    .join("\n");
    let mock = MockEngine::start(vec![MockResponse::Streamed {
        head: stream_head("application/json"),
        chunks: vec![progress.into_bytes()],
        keep_open: false,
    }])
    .await;

    let image_id = mock.client().build_image(b"tar".to_vec(), None).await.unwrap();
    assert_eq!(image_id, "sha256:0123456789ab");
    assert_eq!(mock.requests()[0].path, "/build");
}

#[tokio::test]
async fn test_build_image_error_record_fails() {
    let progress = concat!(
        r#"{"stream":"Step 1/3 : FROM alpine\n"}"#,
        "\n",
        r#"{"error":"build failed","errorDetail":{"message":"make: *** [all] Error 2"}}"#,
        "\n",
    );
    let mock = MockEngine::start(vec![MockResponse::Streamed {
        head: stream_head("application/json"),
        chunks: vec![progress.as_bytes().to_vec()],
        keep_open: false,
    }])
    .await;

    let err = mock.client().build_image(b"tar".to_vec(), None).await.unwrap_err();
    assert!(
        matches!(err, EngineError::BuildFailed(ref m) if m.contains("Error 2")),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_stream_logs_decodes_multiplexed_frames() {
    // The second frame arrives split across two TCP writes.
    let second = log_frame(b"ready to accept connections\n");
    let (second_a, second_b) = second.split_at(5);
    let mock = MockEngine::start(vec![MockResponse::Streamed {
        head: stream_head("application/vnd.docker.raw-stream"),
        chunks: vec![log_frame(b"booting\n"), second_a.to_vec(), second_b.to_vec()],
        keep_open: false,
    }])
    .await;
    let client = mock.client();

    let mut stream = client.stream_logs("abc", false).await.unwrap();
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
    }
    assert_eq!(text, "booting\nready to accept connections\n");
    assert_eq!(mock.requests()[0].path, "/containers/abc/logs?stdout=1&stderr=1&follow=0");
}

#[tokio::test]
async fn test_dropping_follow_stream_releases_connection() {
    let mock = MockEngine::start(vec![MockResponse::Streamed {
        head: stream_head("application/vnd.docker.raw-stream"),
        chunks: vec![log_frame(b"first\n")],
        keep_open: true,
    }])
    .await;
    let client = mock.client();

    let mut stream = client.stream_logs("abc", true).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(&first[..], b"first\n");

    // Dropping the stream aborts the connection task; the mock's read
    // unblocks on the resulting close instead of waiting forever.
    drop(stream);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(mock.requests()[0].path, "/containers/abc/logs?stdout=1&stderr=1&follow=1");
}

#[tokio::test]
async fn test_idempotent_get_is_retried_after_transport_failure() {
    let inspect_body = r#"{"Id":"abc","State":{"Running":true,"ExitCode":0},"NetworkSettings":{"Ports":{}}}"#;
    let mock = MockEngine::start(vec![
        MockResponse::CloseImmediately,
        json_response("200 OK", inspect_body),
    ])
    .await;
    let client = mock.client();

    let inspect = client.inspect_container("abc").await.unwrap();
    assert!(inspect.state.running);
}

#[tokio::test]
async fn test_post_is_not_retried_after_transport_failure() {
    let mock = MockEngine::start(vec![
        MockResponse::CloseImmediately,
        json_response("204 No Content", ""),
    ])
    .await;
    let client = mock.client();

    let err = client.start_container("abc").await.unwrap_err();
    assert!(matches!(err, EngineError::Transport(_)), "{err:?}");
    // The scripted success answer was never consumed.
    assert!(mock.requests().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_transport() {
    use tokio::net::UnixListener;

    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("engine.sock");
    let listener = UnixListener::bind(&socket_path).unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));

    let serve_requests = Arc::clone(&requests);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let response = json_response(
            "200 OK",
            r#"{"Id":"abc","State":{"Running":true,"ExitCode":0},"NetworkSettings":{"Ports":{}}}"#,
        );
        serve_connection(stream, response, serve_requests).await;
    });

    let client = EngineClient::new(EngineEndpoint::Unix { path: socket_path });
    let inspect = client.inspect_container("abc").await.unwrap();
    assert!(inspect.state.running);
    assert_eq!(client.host(), "127.0.0.1");
    assert_eq!(requests.lock().unwrap()[0].path, "/containers/abc/json");
}
