//! # Build-facing façade
//!
//! [`BuildSession`] ties the provider selection, orchestrator, and
//! resource ledger together behind the five operations a surrounding
//! build invokes:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 BuildSession                 │
//! │  ┌──────────────┐ ┌──────────┐ ┌──────────┐  │
//! │  │ Orchestrator │ │  Ledger  │ │  Engine  │  │
//! │  │   (phases)   │ │ (owned)  │ │  client  │  │
//! │  └──────────────┘ └──────────┘ └──────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The session owns the ledger for exactly one build invocation. The
//! forward phases (`build_images`, `start_containers`) may fail; the
//! teardown phases (`stop_containers`, `remove_images`) never do, so a
//! caller can — and should — run them unconditionally.

use std::collections::BTreeMap;

use tracing::info;

use crate::engine::{EndpointError, EngineApi, EngineClient, ProviderSelector};
use crate::model::{BuiltImageInfo, ContainerStartSpec, ExposedEndpoint, ImageBuildSpec};
use crate::orchestrator::{self, Orchestrator, ResourceLedger, render_properties};

/// Options for connecting a session to an engine.
#[derive(Debug, Clone, Default)]
pub struct BuildSessionConfig {
    /// Explicit engine host; overrides `DOCKER_HOST` and the default.
    pub docker_host: Option<String>,
    /// Port paired with `docker_host`.
    pub docker_port: Option<u16>,
}

/// One build invocation's view of the engine.
pub struct BuildSession<E: EngineApi = EngineClient> {
    orchestrator: Orchestrator<E>,
    ledger: ResourceLedger,
}

impl BuildSession<EngineClient> {
    /// Select an engine endpoint and open a session against it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured endpoint is unparsable.
    pub fn connect(config: &BuildSessionConfig) -> Result<Self, EndpointError> {
        let selector = ProviderSelector {
            docker_host: config.docker_host.clone(),
            docker_port: config.docker_port,
        };
        let client = selector.select()?;
        info!("Using engine at {}", client.endpoint());
        Ok(Self::with_engine(client))
    }
}

impl<E: EngineApi> BuildSession<E> {
    /// Open a session over an already-configured engine.
    pub fn with_engine(engine: E) -> Self {
        Self {
            orchestrator: Orchestrator::new(engine),
            ledger: ResourceLedger::new(),
        }
    }

    /// Phase 1: build every declared image.
    ///
    /// # Errors
    ///
    /// Propagates the first build failure; earlier images stay recorded
    /// for the teardown phases.
    pub async fn build_images(
        &mut self,
        specs: &[ImageBuildSpec],
    ) -> orchestrator::Result<Vec<BuiltImageInfo>> {
        self.orchestrator.build_images(specs, &mut self.ledger).await
    }

    /// Phase 2: start every declared container.
    ///
    /// # Errors
    ///
    /// Propagates the first start or readiness failure; earlier
    /// containers stay recorded for the teardown phases.
    pub async fn start_containers(
        &mut self,
        specs: &[ContainerStartSpec],
    ) -> orchestrator::Result<()> {
        self.orchestrator.start_containers(specs, &mut self.ledger).await
    }

    /// Phase 3: the endpoint map for the build, by start id.
    pub fn expose_endpoints(&self) -> BTreeMap<String, Vec<ExposedEndpoint>> {
        self.orchestrator.expose_endpoints(&self.ledger)
    }

    /// The endpoint map flattened to `<id>.<port>.host` / `<id>.<port>.port`
    /// pairs, the form the surrounding build consumes.
    pub fn endpoint_properties(&self) -> Vec<(String, String)> {
        render_properties(&self.expose_endpoints())
    }

    /// Phase 4: stop and remove every container. Infallible; repeat
    /// calls are no-ops once the ledger is drained.
    pub async fn stop_containers(&mut self) {
        self.orchestrator.stop_containers(&mut self.ledger).await;
    }

    /// Phase 5: remove every built image not marked `keep`. Infallible.
    pub async fn remove_images(&mut self) {
        self.orchestrator.remove_images(&mut self.ledger).await;
    }

    /// Whether any engine-side resources are still recorded.
    pub fn has_resources(&self) -> bool {
        !self.ledger.is_empty()
    }
}
