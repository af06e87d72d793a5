//! HTTP transport towards the engine.
//!
//! The engine API sees little traffic from one build, so each request
//! rides its own HTTP/1.1 connection. That keeps streaming endpoints
//! (build progress, follow-mode logs) trivially cancellable: dropping
//! the per-request connection task closes the socket.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::header;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::engine::{EngineError, Result};
use crate::env;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Backoff before the second and third attempt of an idempotent call.
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// Where the engine listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEndpoint {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

impl EngineEndpoint {
    /// Host that published container ports are reachable on. Ports
    /// published by a Unix-socket engine bind the local loopback.
    pub fn public_host(&self) -> &str {
        match self {
            EngineEndpoint::Tcp { host, .. } => host,
            EngineEndpoint::Unix { .. } => env::UNIX_ENGINE_HOST,
        }
    }

    /// Value for the `Host` header.
    fn authority(&self) -> String {
        match self {
            EngineEndpoint::Tcp { host, port } => format!("{host}:{port}"),
            EngineEndpoint::Unix { .. } => "localhost".to_string(),
        }
    }
}

impl std::fmt::Display for EngineEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineEndpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            EngineEndpoint::Unix { path } => write!(f, "unix://{}", path.display()),
        }
    }
}

trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

/// A response whose body may still be in flight, plus the connection
/// task that feeds it. Aborting the task closes the socket.
pub(crate) struct InflightResponse {
    pub response: Response<Incoming>,
    pub connection: JoinHandle<()>,
}

/// One engine endpoint plus the request plumbing against it.
pub(crate) struct Transport {
    endpoint: EngineEndpoint,
}

impl Transport {
    pub fn new(endpoint: EngineEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &EngineEndpoint {
        &self.endpoint
    }

    /// Issue a request. GET and DELETE are idempotent against this API
    /// and are retried on transport failure (3 attempts, 1 s/2 s
    /// backoff); anything else fails fast because the engine may already
    /// have acted on it.
    pub async fn request(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<(Bytes, &str)>,
    ) -> Result<InflightResponse> {
        let idempotent = method == Method::GET || method == Method::DELETE;
        let mut attempt = 0;
        loop {
            match self.request_once(method.clone(), path_and_query, body.clone()).await {
                Err(err) if idempotent && err.is_retryable() && attempt < RETRY_BACKOFF.len() => {
                    warn!(
                        "{} {} failed ({}), retrying in {:?}",
                        method,
                        path_and_query,
                        err,
                        RETRY_BACKOFF[attempt]
                    );
                    tokio::time::sleep(RETRY_BACKOFF[attempt]).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn request_once(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<(Bytes, &str)>,
    ) -> Result<InflightResponse> {
        let stream = self.connect().await?;
        let (mut sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
        let connection = tokio::spawn(async move {
            if let Err(err) = conn.await {
                trace!("engine connection closed: {}", err);
            }
        });

        let mut builder = Request::builder()
            .method(method)
            .uri(path_and_query)
            .header(header::HOST, self.endpoint.authority());

        let request = match body {
            Some((bytes, content_type)) => {
                builder = builder
                    .header(header::CONTENT_TYPE, content_type)
                    .header(header::CONTENT_LENGTH, bytes.len());
                builder.body(Full::new(bytes))
            }
            None => builder.body(Full::new(Bytes::new())),
        }
        .map_err(|err| EngineError::Protocol(format!("invalid request: {err}")))?;

        let response = sender.send_request(request).await?;
        Ok(InflightResponse { response, connection })
    }

    async fn connect(&self) -> Result<Box<dyn IoStream>> {
        debug!("Connecting to engine at {}", self.endpoint);
        let connect = async {
            let stream: Box<dyn IoStream> = match &self.endpoint {
                EngineEndpoint::Tcp { host, port } => {
                    Box::new(TcpStream::connect((host.as_str(), *port)).await?)
                }
                #[cfg(unix)]
                EngineEndpoint::Unix { path } => {
                    Box::new(tokio::net::UnixStream::connect(path).await?)
                }
                #[cfg(not(unix))]
                EngineEndpoint::Unix { .. } => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "unix socket transport requires a unix platform",
                    ));
                }
            };
            Ok::<_, std::io::Error>(stream)
        };
        match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(EngineError::Transport(format!(
                "timed out connecting to {}",
                self.endpoint
            ))),
        }
    }
}
