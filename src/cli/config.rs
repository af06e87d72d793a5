//! Descriptor loading and validation
//!
//! The descriptor is a TOML file naming the images to build and the
//! containers to start:
//!
//! ```toml
//! [[images]]
//! id = "app"
//! context = "docker/app"
//! name_and_tag = "app:it"
//!
//! [[containers]]
//! id = "db"
//! image = "postgres:16"
//! wait_for_startup = "ready to accept connections"
//!
//! [[containers]]
//! id = "web"
//! image = "app"
//! links = [{ container = "db", alias = "database" }]
//! ports = [{ container_port = 80, host_port = 8080 }]
//! ```
//!
//! Validation happens at load time so every declaration error is
//! reported before the engine sees a single request.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::debug;

use crate::model::{
    BuildContext, ContainerLink, ContainerStartSpec, ImageBuildSpec, PortMapping, Protocol,
};

/// Root of the descriptor file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildDescriptor {
    /// Engine host override; the command line wins over this.
    #[serde(default)]
    pub docker_host: Option<String>,

    #[serde(default)]
    pub docker_port: Option<u16>,

    #[serde(default)]
    pub images: Vec<ImageEntry>,

    #[serde(default)]
    pub containers: Vec<ContainerEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageEntry {
    pub id: String,

    /// Context directory packed into a tar archive at build time.
    #[serde(default)]
    pub context: Option<PathBuf>,

    /// Prebuilt tar archive, mutually exclusive with `context`.
    #[serde(default)]
    pub archive: Option<PathBuf>,

    #[serde(default)]
    pub name_and_tag: Option<String>,

    /// Leave the image on the engine after the build.
    #[serde(default)]
    pub keep: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerEntry {
    pub id: String,

    /// Either the id of a declared image or an external `name:tag`.
    pub image: String,

    #[serde(default)]
    pub hostname: Option<String>,

    #[serde(default)]
    pub privileged: bool,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub links: Vec<LinkEntry>,

    #[serde(default)]
    pub ports: Vec<PortEntry>,

    /// Regex the container log must match before the build continues.
    #[serde(default)]
    pub wait_for_startup: Option<String>,

    /// Seconds to wait for the pattern; 0 selects the default (300).
    #[serde(default)]
    pub startup_timeout: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkEntry {
    /// Id of the linked container.
    pub container: String,

    /// Alias inside the linking container; defaults to the id.
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PortEntry {
    pub container_port: u16,
    pub host_port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

impl BuildDescriptor {
    /// Load and validate a descriptor file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable, not valid TOML, or
    /// fails validation.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading descriptor from {:?}", path);
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read descriptor {path:?}"))?;
        let descriptor: BuildDescriptor =
            toml::from_str(&content).with_context(|| format!("descriptor {path:?} is not valid"))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check declaration-level invariants: unique ids, exactly one
    /// context source per image, links pointing at earlier containers.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        let mut ids = BTreeSet::new();
        for image in &self.images {
            ensure_valid_id(&image.id)?;
            if !ids.insert(image.id.as_str()) {
                bail!("duplicate id {:?}", image.id);
            }
            match (&image.context, &image.archive) {
                (Some(_), Some(_)) => {
                    bail!("image {:?} declares both context and archive", image.id)
                }
                (None, None) => {
                    bail!("image {:?} declares neither context nor archive", image.id)
                }
                _ => {}
            }
        }

        let mut earlier = BTreeSet::new();
        for container in &self.containers {
            ensure_valid_id(&container.id)?;
            if !ids.insert(container.id.as_str()) {
                bail!("duplicate id {:?}", container.id);
            }
            for link in &container.links {
                if !earlier.contains(link.container.as_str()) {
                    bail!(
                        "container {:?} links to {:?}, which is not declared before it",
                        container.id,
                        link.container
                    );
                }
            }
            if let Some(pattern) = &container.wait_for_startup {
                regex::Regex::new(pattern).with_context(|| {
                    format!(
                        "container {:?} has an invalid wait_for_startup pattern",
                        container.id
                    )
                })?;
            }
            earlier.insert(container.id.as_str());
        }
        Ok(())
    }

    /// Image specs, with relative context paths resolved against `base_dir`.
    pub fn image_specs(&self, base_dir: &Path) -> Vec<ImageBuildSpec> {
        self.images
            .iter()
            .map(|entry| {
                let context = match (&entry.context, &entry.archive) {
                    (Some(dir), _) => BuildContext::Directory(base_dir.join(dir)),
                    (None, Some(archive)) => BuildContext::ArchiveFile(base_dir.join(archive)),
                    // Unreachable after validate(); kept total anyway.
                    (None, None) => BuildContext::Bytes(Vec::new()),
                };
                ImageBuildSpec {
                    start_id: entry.id.clone(),
                    context,
                    name_and_tag: entry.name_and_tag.clone(),
                    keep: entry.keep,
                }
            })
            .collect()
    }

    /// Container specs in declaration order.
    pub fn container_specs(&self) -> Vec<ContainerStartSpec> {
        self.containers
            .iter()
            .map(|entry| ContainerStartSpec {
                start_id: entry.id.clone(),
                image: entry.image.clone(),
                hostname: entry.hostname.clone(),
                privileged: entry.privileged,
                env: entry.env.clone(),
                links: entry
                    .links
                    .iter()
                    .map(|link| ContainerLink {
                        peer: link.container.clone(),
                        alias: link.alias.clone().unwrap_or_else(|| link.container.clone()),
                    })
                    .collect(),
                ports: entry
                    .ports
                    .iter()
                    .map(|port| PortMapping {
                        container_port: port.container_port,
                        host_port: port.host_port,
                        protocol: port.protocol,
                    })
                    .collect(),
                wait_for_startup: entry.wait_for_startup.clone(),
                startup_timeout_secs: entry.startup_timeout,
            })
            .collect()
    }
}

/// Ids become part of engine-side container names, so they are held to
/// the engine's name alphabet.
fn ensure_valid_id(id: &str) -> Result<()> {
    let mut chars = id.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_rest = id
        .chars()
        .skip(1)
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if !valid_first || !valid_rest {
        bail!("invalid id {id:?}: use letters, digits, '_', '.' or '-'");
    }
    Ok(())
}
