//! Phase-by-phase container orchestration.
//!
//! One build invocation runs the phases in a fixed order: build the
//! declared images, start the declared containers, hand endpoints to the
//! build, then — always — stop the containers and remove the images.
//! Every engine-side object is recorded in the [`ResourceLedger`] the
//! moment it exists, so the cleanup phases can run no matter where an
//! earlier phase stopped.

mod endpoints;
mod ledger;
mod readiness;

pub use endpoints::{endpoints_from_inspect, render_properties};
pub use ledger::{BuiltImage, ResourceLedger, RunningContainer};
pub use readiness::{ReadinessOutcome, await_pattern};

use std::collections::BTreeMap;

use chrono::Utc;
use regex::Regex;
use tracing::{info, warn};

use crate::engine::{ContainerCreateRequest, EngineApi, EngineError, HostConfig, PortBinding};
use crate::model::{BuiltImageInfo, ContainerStartSpec, ExposedEndpoint, ImageBuildSpec};
use crate::{context, env};

/// Grace period handed to the engine when stopping containers.
const STOP_TIMEOUT_SECS: u32 = 10;

/// Errors that fail a forward phase.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrateError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Loading or packing a build context failed.
    #[error("cannot load build context for image {start_id}: {source}")]
    Context {
        start_id: String,
        #[source]
        source: std::io::Error,
    },

    /// A readiness regex in a start spec does not compile.
    #[error("invalid readiness pattern for container {start_id}: {source}")]
    Pattern {
        start_id: String,
        #[source]
        source: regex::Error,
    },

    /// A link names a peer that is not running.
    #[error("container {start_id} links to {peer}, which is not in this build's running set")]
    LinkUnresolved { start_id: String, peer: String },

    /// The container never became ready and was removed again.
    #[error("container {start_id} failed to start: {reason}")]
    StartupFailed { start_id: String, reason: String },
}

/// Result type for orchestration phases.
pub type Result<T> = std::result::Result<T, OrchestrateError>;

/// Drives the engine through the build's phases.
pub struct Orchestrator<E> {
    engine: E,
    name_prefix: String,
}

impl<E: EngineApi> Orchestrator<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            name_prefix: env::CONTAINER_NAME_PREFIX.to_string(),
        }
    }

    /// Override the engine-side container name prefix.
    pub fn with_name_prefix(engine: E, prefix: impl Into<String>) -> Self {
        Self {
            engine,
            name_prefix: prefix.into(),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Build every declared image in declaration order.
    ///
    /// The phase aborts on the first failure. Images already built stay
    /// in the ledger on purpose: the always-run `remove-images` phase of
    /// the same build deletes them.
    ///
    /// # Errors
    ///
    /// Returns the first build, context, or tag-collision failure.
    pub async fn build_images(
        &self,
        specs: &[ImageBuildSpec],
        ledger: &mut ResourceLedger,
    ) -> Result<Vec<BuiltImageInfo>> {
        let mut built = Vec::with_capacity(specs.len());
        for spec in specs {
            info!("Building image {}", spec.start_id);

            if let Some(tag) = &spec.name_and_tag {
                // Never silently retag an existing image.
                if self.engine.image_exists(tag).await? {
                    return Err(EngineError::Conflict(format!(
                        "image tag {tag} already exists on the engine"
                    ))
                    .into());
                }
            }

            let archive =
                context::load_archive(&spec.context).map_err(|source| OrchestrateError::Context {
                    start_id: spec.start_id.clone(),
                    source,
                })?;

            let image_id = self
                .engine
                .build_image(archive, spec.name_and_tag.as_deref())
                .await?;

            ledger.record_image(BuiltImage {
                start_id: spec.start_id.clone(),
                image_id: image_id.clone(),
                keep: spec.keep,
                built_at: Utc::now(),
            });
            built.push(BuiltImageInfo {
                start_id: spec.start_id.clone(),
                image_id,
            });
        }
        Ok(built)
    }

    /// Start every declared container in declaration order.
    ///
    /// Image references are resolved against the ledger (a built image's
    /// start id wins over an external name), links are resolved to the
    /// engine-side names of already-running siblings, and containers
    /// with a readiness pattern are probed before they count as started.
    ///
    /// # Errors
    ///
    /// Fails with [`OrchestrateError::LinkUnresolved`] before any engine
    /// call for the offending container, and with
    /// [`OrchestrateError::StartupFailed`] — after force-removing the
    /// container — when readiness times out or the container exits.
    pub async fn start_containers(
        &self,
        specs: &[ContainerStartSpec],
        ledger: &mut ResourceLedger,
    ) -> Result<()> {
        for spec in specs {
            info!("Starting container {}", spec.start_id);

            // Everything that can fail without touching the engine is
            // resolved first, so a bad spec leaves nothing behind.
            let pattern = spec
                .wait_for_startup
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|source| OrchestrateError::Pattern {
                    start_id: spec.start_id.clone(),
                    source,
                })?;

            let mut links = Vec::with_capacity(spec.links.len());
            for link in &spec.links {
                let peer = ledger.running_container(&link.peer).ok_or_else(|| {
                    OrchestrateError::LinkUnresolved {
                        start_id: spec.start_id.clone(),
                        peer: link.peer.clone(),
                    }
                })?;
                links.push(format!("{}:{}", peer.name, link.alias));
            }

            let image = ledger
                .built_image(&spec.image)
                .map(|built| built.image_id.clone())
                .unwrap_or_else(|| spec.image.clone());

            let request = create_request(spec, image, links);
            let name = self.container_name(&spec.start_id);

            let container_id = self.engine.create_container(&name, &request).await?;
            self.engine.start_container(&container_id).await?;

            if let Some(pattern) = pattern {
                let deadline = tokio::time::Instant::now() + spec.startup_timeout();
                let outcome =
                    await_pattern(&self.engine, &container_id, &pattern, deadline).await?;
                match outcome {
                    ReadinessOutcome::Ready => {}
                    ReadinessOutcome::TimedOut => {
                        self.discard_failed_container(&spec.start_id, &container_id).await;
                        return Err(OrchestrateError::StartupFailed {
                            start_id: spec.start_id.clone(),
                            reason: format!(
                                "no match for /{}/ within {:?}",
                                pattern,
                                spec.startup_timeout()
                            ),
                        });
                    }
                    ReadinessOutcome::ContainerExited(code) => {
                        self.discard_failed_container(&spec.start_id, &container_id).await;
                        return Err(OrchestrateError::StartupFailed {
                            start_id: spec.start_id.clone(),
                            reason: format!("exited with status {code} before becoming ready"),
                        });
                    }
                }
            }

            let inspect = self.engine.inspect_container(&container_id).await?;
            let endpoints = endpoints_from_inspect(&inspect, self.engine.host())?;
            ledger.record_container(RunningContainer {
                start_id: spec.start_id.clone(),
                container_id,
                name,
                endpoints,
                started_at: Utc::now(),
            });
        }
        Ok(())
    }

    /// Read the endpoint map out of the ledger. Pure read; calling it
    /// twice without an intervening phase returns identical data.
    pub fn expose_endpoints(
        &self,
        ledger: &ResourceLedger,
    ) -> BTreeMap<String, Vec<ExposedEndpoint>> {
        ledger
            .containers()
            .iter()
            .map(|container| (container.start_id.clone(), container.endpoints.clone()))
            .collect()
    }

    /// Stop and remove every container, newest first. Never fails the
    /// build; individual engine errors are logged and the iteration
    /// continues.
    pub async fn stop_containers(&self, ledger: &mut ResourceLedger) {
        for container in ledger.drain_containers_newest_first() {
            info!("Stopping container {} ({})", container.start_id, container.container_id);
            if let Err(err) = self
                .engine
                .stop_container(&container.container_id, STOP_TIMEOUT_SECS)
                .await
            {
                warn!("Failed to stop container {}: {}", container.start_id, err);
            }
            if let Err(err) = self
                .engine
                .remove_container(&container.container_id, true, true)
                .await
            {
                warn!("Failed to remove container {}: {}", container.start_id, err);
            }
        }
    }

    /// Remove every built image, newest first, skipping `keep` entries.
    /// Never fails the build.
    pub async fn remove_images(&self, ledger: &mut ResourceLedger) {
        for image in ledger.drain_images_newest_first() {
            if image.keep {
                info!("Keeping image {} ({})", image.start_id, image.image_id);
                continue;
            }
            info!("Removing image {} ({})", image.start_id, image.image_id);
            if let Err(err) = self.engine.remove_image(&image.image_id, false).await {
                warn!("Failed to remove image {}: {}", image.start_id, err);
            }
        }
    }

    /// Engine-side name for a container; unique per invocation so stale
    /// leftovers from a crashed build never collide with a fresh run.
    fn container_name(&self, start_id: &str) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", self.name_prefix, start_id, &suffix[..8])
    }

    /// Best-effort removal of a container that failed its readiness wait.
    async fn discard_failed_container(&self, start_id: &str, container_id: &str) {
        warn!("Container {} failed readiness, removing it", start_id);
        if let Err(err) = self.engine.remove_container(container_id, true, true).await {
            warn!("Failed to remove container {}: {}", start_id, err);
        }
    }
}

/// Translate a start spec into the engine's create payload.
fn create_request(
    spec: &ContainerStartSpec,
    image: String,
    links: Vec<String>,
) -> ContainerCreateRequest {
    let mut exposed_ports = BTreeMap::new();
    let mut port_bindings: BTreeMap<String, Vec<PortBinding>> = BTreeMap::new();
    for port in &spec.ports {
        let key = port.key();
        exposed_ports.insert(key.clone(), Default::default());
        port_bindings.entry(key).or_default().push(PortBinding {
            host_ip: None,
            host_port: port.host_port.to_string(),
        });
    }

    ContainerCreateRequest {
        image,
        hostname: spec.hostname.clone(),
        env: spec
            .env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect(),
        exposed_ports,
        host_config: HostConfig {
            links,
            port_bindings,
            // No explicit bindings means every image-declared port gets a
            // host port assigned by the engine.
            publish_all_ports: spec.ports.is_empty(),
            privileged: spec.privileged,
        },
    }
}
