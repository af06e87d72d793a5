//! In-memory record of everything this build created on the engine.
//!
//! The ledger exists so cleanup can run no matter how far the build got:
//! every successful engine-side creation lands here first, and the
//! cleanup phases drain it in reverse insertion order (containers that
//! link to earlier ones stop first).
//!
//! All mutation happens from the orchestrator's main flow; the ledger is
//! handed `&mut` into each phase and never shared across tasks.

use chrono::{DateTime, Utc};

use crate::model::ExposedEndpoint;

/// One image built during this invocation.
#[derive(Debug, Clone)]
pub struct BuiltImage {
    pub start_id: String,
    /// Engine-assigned image id.
    pub image_id: String,
    /// Skip removal during cleanup.
    pub keep: bool,
    pub built_at: DateTime<Utc>,
}

/// One container started during this invocation.
#[derive(Debug, Clone)]
pub struct RunningContainer {
    pub start_id: String,
    /// Engine-assigned container id.
    pub container_id: String,
    /// Engine-side name, used as the link target by later containers.
    pub name: String,
    pub endpoints: Vec<ExposedEndpoint>,
    pub started_at: DateTime<Utc>,
}

/// Ordered record of images and containers owned by one build.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    built_images: Vec<BuiltImage>,
    running_containers: Vec<RunningContainer>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_image(&mut self, image: BuiltImage) {
        self.built_images.push(image);
    }

    pub fn record_container(&mut self, container: RunningContainer) {
        self.running_containers.push(container);
    }

    /// Image built under this start id, if any.
    pub fn built_image(&self, start_id: &str) -> Option<&BuiltImage> {
        self.built_images.iter().find(|image| image.start_id == start_id)
    }

    /// Container started under this start id, if any.
    pub fn running_container(&self, start_id: &str) -> Option<&RunningContainer> {
        self.running_containers
            .iter()
            .find(|container| container.start_id == start_id)
    }

    pub fn images(&self) -> &[BuiltImage] {
        &self.built_images
    }

    pub fn containers(&self) -> &[RunningContainer] {
        &self.running_containers
    }

    /// Take all containers, newest first, for cleanup.
    pub fn drain_containers_newest_first(&mut self) -> Vec<RunningContainer> {
        let mut containers = std::mem::take(&mut self.running_containers);
        containers.reverse();
        containers
    }

    /// Take all images, newest first, for cleanup.
    pub fn drain_images_newest_first(&mut self) -> Vec<BuiltImage> {
        let mut images = std::mem::take(&mut self.built_images);
        images.reverse();
        images
    }

    pub fn is_empty(&self) -> bool {
        self.built_images.is_empty() && self.running_containers.is_empty()
    }
}
