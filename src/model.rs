//! Declarative build and start specifications.
//!
//! These are plain records populated by the caller (usually the CLI
//! descriptor loader). The orchestrator never mutates them; everything
//! engine-assigned (image ids, container ids, endpoints) lives in the
//! resource ledger instead.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Startup wait applied when a spec leaves the timeout at zero.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(300);

/// Source of the tar archive streamed to the image build endpoint.
#[derive(Debug, Clone)]
pub enum BuildContext {
    /// Directory packed into a gzipped tar archive at build time.
    Directory(PathBuf),
    /// Prebuilt tar archive read verbatim.
    ArchiveFile(PathBuf),
    /// In-memory archive bytes.
    Bytes(Vec<u8>),
}

/// One image the build wants produced before its containers start.
#[derive(Debug, Clone)]
pub struct ImageBuildSpec {
    /// Caller-supplied id, unique within one build invocation.
    pub start_id: String,
    /// Build context streamed to the engine.
    pub context: BuildContext,
    /// Optional `name:tag` applied to the built image.
    pub name_and_tag: Option<String>,
    /// Keep the image on the engine after the build finishes.
    pub keep: bool,
}

/// Link from one container to an earlier-started sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLink {
    /// `start_id` of the peer container.
    pub peer: String,
    /// Alias the peer is reachable under inside the linking container.
    pub alias: String,
}

/// Port protocol, `tcp` unless declared otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Explicit container-port to host-port binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    /// Wire key for this mapping, e.g. `80/tcp`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

/// One container the build wants running during its tests.
#[derive(Debug, Clone)]
pub struct ContainerStartSpec {
    /// Caller-supplied id, unique within one build invocation.
    pub start_id: String,
    /// Either the `start_id` of a built image or an external `name:tag`.
    pub image: String,
    pub hostname: Option<String>,
    pub privileged: bool,
    pub env: BTreeMap<String, String>,
    pub links: Vec<ContainerLink>,
    /// Explicit bindings; empty means publish-all.
    pub ports: Vec<PortMapping>,
    /// Regex the container's log output must match before it counts as up.
    pub wait_for_startup: Option<String>,
    /// Seconds to wait for the readiness pattern; zero selects the default.
    pub startup_timeout_secs: u64,
}

impl ContainerStartSpec {
    /// Effective startup wait, substituting the default for zero.
    pub fn startup_timeout(&self) -> Duration {
        if self.startup_timeout_secs == 0 {
            DEFAULT_STARTUP_TIMEOUT
        } else {
            Duration::from_secs(self.startup_timeout_secs)
        }
    }
}

/// Published port of a running container, as reported back to the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExposedEndpoint {
    /// Container-side key, e.g. `80/tcp`.
    pub private_port: String,
    /// Engine host the port is reachable on.
    pub host: String,
    /// Host port the engine published.
    pub host_port: u16,
}

/// Result of one image build, handed to downstream phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImageInfo {
    pub start_id: String,
    pub image_id: String,
}
