//! # stevedore
//!
//! Builds container images and runs containers on behalf of an automated
//! build, exposes their dynamic network endpoints back to the build, and
//! reliably tears everything down afterwards — including after partial
//! failures.
//!
//! ## Architecture Overview
//!
//! - **[`engine`]**: typed client for the container engine's HTTP remote
//!   API, over TCP or a Unix socket
//! - **[`orchestrator`]**: the build phases (build images, start
//!   containers, expose endpoints, stop containers, remove images) and
//!   the resource ledger that makes teardown exhaustive
//! - **[`model`]**: the declarative specifications a build hands in
//! - **[`integration`]**: [`BuildSession`], the façade a build shell
//!   drives phase by phase
//! - **[`cli`]**: the `stevedore` binary's argument and descriptor layer
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stevedore::{BuildSession, BuildSessionConfig};
//! use stevedore::model::{ContainerStartSpec, PortMapping, Protocol};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut session = BuildSession::connect(&BuildSessionConfig::default())?;
//!
//!     let spec = ContainerStartSpec {
//!         start_id: "db".to_string(),
//!         image: "postgres:16".to_string(),
//!         hostname: None,
//!         privileged: false,
//!         env: Default::default(),
//!         links: Vec::new(),
//!         ports: vec![PortMapping { container_port: 5432, host_port: 15432, protocol: Protocol::Tcp }],
//!         wait_for_startup: Some("ready to accept connections".to_string()),
//!         startup_timeout_secs: 60,
//!     };
//!
//!     let result = session.start_containers(std::slice::from_ref(&spec)).await;
//!     for (key, value) in session.endpoint_properties() {
//!         println!("{key}={value}");
//!     }
//!
//!     // Teardown runs whether or not startup succeeded.
//!     session.stop_containers().await;
//!     session.remove_images().await;
//!     result?;
//!     Ok(())
//! }
//! ```

/// Typed client for the engine's HTTP remote API.
///
/// Covers image builds (tar context in, progress stream out), container
/// lifecycle calls, inspection, and the multiplexed log stream, with the
/// engine's status codes mapped onto [`engine::EngineError`].
pub mod engine;

/// Build phases and resource tracking.
///
/// Drives the engine through the declared state, records every created
/// object in a [`orchestrator::ResourceLedger`], and guarantees the
/// cleanup phases can always run.
pub mod orchestrator;

/// Declarative specifications handed in by the build.
pub mod model;

/// Build-context packaging (directory to tar archive).
pub mod context;

/// The build-facing session façade.
pub mod integration;

/// Environment constants and defaults.
pub mod env;

/// Argument parsing and descriptor loading for the binary.
pub mod cli;

// Re-export the façade types most callers need
pub use integration::{BuildSession, BuildSessionConfig};

// Re-export the engine client surface
pub use engine::{EngineApi, EngineClient, EngineEndpoint, EngineError, ProviderSelector};

// Re-export the phase-level types
pub use orchestrator::{OrchestrateError, Orchestrator, ReadinessOutcome, ResourceLedger};
