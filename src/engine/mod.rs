//! Remote container-engine API client.
//!
//! Speaks the engine's HTTP remote API directly over TCP or a Unix
//! socket. The module is organized into:
//!
//! - [`client`]: typed operations (build, create, start, stop, remove,
//!   inspect, logs) with status-code to error mapping
//! - [`transport`]: one-connection-per-request HTTP plumbing with
//!   bounded retries for idempotent calls
//! - [`wire`]: serde request/response bodies per the engine's schema
//! - [`logs`]: decoder for the multiplexed stdout/stderr log stream
//! - [`provider`]: endpoint selection (explicit options, `DOCKER_HOST`,
//!   built-in default)

mod client;
mod logs;
mod provider;
mod transport;
mod wire;

pub use client::EngineClient;
pub use logs::LogStream;
pub use provider::{EndpointError, ProviderSelector};
pub use transport::EngineEndpoint;
pub use wire::{
    ContainerCreateRequest, ContainerState, EmptyObject, HostConfig, InspectResponse,
    NetworkSettings, PortBinding,
};

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

/// Errors surfaced by engine calls.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Network-level failure reaching the engine.
    #[error("engine transport failure: {0}")]
    Transport(String),

    /// Response could not be decoded.
    #[error("malformed engine response: {0}")]
    Protocol(String),

    /// The engine does not know the referenced object (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The request clashes with existing engine state (HTTP 409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The image build stream carried an error record.
    #[error("image build failed: {0}")]
    BuildFailed(String),

    /// The engine reported a server-side failure.
    #[error("engine error: {0}")]
    Engine(String),
}

impl EngineError {
    /// Whether a retry on a fresh connection can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transport(_))
    }
}

impl From<hyper::Error> for EngineError {
    fn from(err: hyper::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Protocol(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Decoded log payload chunks; dropping the stream releases the transport.
pub type BoxedLogStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Engine operations the orchestrator drives.
///
/// [`EngineClient`] is the production implementation; tests substitute a
/// scripted fake to observe call ordering without a running engine.
#[async_trait]
pub trait EngineApi: Send + Sync {
    /// Stream a tar context to the build endpoint, returning the image id.
    async fn build_image(&self, archive: Vec<u8>, name_and_tag: Option<&str>) -> Result<String>;

    /// Whether an image (by id or `name:tag`) exists on the engine.
    async fn image_exists(&self, image: &str) -> Result<bool>;

    async fn remove_image(&self, image_id: &str, force: bool) -> Result<()>;

    /// Create a container, returning the engine-assigned id.
    async fn create_container(
        &self,
        name: &str,
        request: &ContainerCreateRequest,
    ) -> Result<String>;

    /// Start a container; starting an already-running container succeeds.
    async fn start_container(&self, container_id: &str) -> Result<()>;

    /// Stop a container, giving it `timeout_secs` before the engine kills it.
    async fn stop_container(&self, container_id: &str, timeout_secs: u32) -> Result<()>;

    async fn remove_container(
        &self,
        container_id: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<()>;

    async fn inspect_container(&self, container_id: &str) -> Result<InspectResponse>;

    /// Open the container's combined stdout/stderr log stream. The stream
    /// replays from container start; with `follow` it stays open for new
    /// output until dropped.
    async fn stream_logs(&self, container_id: &str, follow: bool) -> Result<BoxedLogStream>;

    /// Host that published container ports are reachable on.
    fn host(&self) -> &str;
}
