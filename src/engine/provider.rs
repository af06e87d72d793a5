//! Engine endpoint selection.
//!
//! Resolution order: explicit host/port options, then the `DOCKER_HOST`
//! environment variable (`tcp://host:port` or `unix:///path`), then the
//! built-in local default.

use url::Url;

use crate::engine::{EngineClient, EngineEndpoint};
use crate::env;

/// A host string or `DOCKER_HOST` value that could not be understood.
#[derive(Debug, thiserror::Error)]
#[error("invalid engine endpoint: {0}")]
pub struct EndpointError(String);

/// Picks the engine endpoint a build talks to.
#[derive(Debug, Clone, Default)]
pub struct ProviderSelector {
    /// Explicit engine host (name or address, no scheme), highest priority.
    pub docker_host: Option<String>,
    /// Port paired with `docker_host`; defaults to the engine default.
    pub docker_port: Option<u16>,
}

impl ProviderSelector {
    /// Resolve the endpoint and yield a configured client.
    ///
    /// # Errors
    ///
    /// Returns an error if `DOCKER_HOST` is set but unparsable.
    pub fn select(&self) -> Result<EngineClient, EndpointError> {
        let env_value = std::env::var(env::DOCKER_HOST_ENV).ok();
        let endpoint = self.resolve(env_value.as_deref())?;
        tracing::debug!("Selected engine endpoint {}", endpoint);
        Ok(EngineClient::new(endpoint))
    }

    /// Endpoint resolution with the environment value passed in, so the
    /// precedence rules are testable without touching the process env.
    fn resolve(&self, env_value: Option<&str>) -> Result<EngineEndpoint, EndpointError> {
        if let Some(host) = &self.docker_host {
            return Ok(EngineEndpoint::Tcp {
                host: host.clone(),
                port: self.docker_port.unwrap_or(env::DEFAULT_ENGINE_PORT),
            });
        }

        if let Some(value) = env_value {
            return parse_docker_host(value);
        }

        Ok(EngineEndpoint::Tcp {
            host: env::DEFAULT_ENGINE_HOST.to_string(),
            port: env::DEFAULT_ENGINE_PORT,
        })
    }
}

/// Parse a `DOCKER_HOST`-style URL into an endpoint.
fn parse_docker_host(value: &str) -> Result<EngineEndpoint, EndpointError> {
    let url = Url::parse(value).map_err(|err| EndpointError(format!("{value}: {err}")))?;
    match url.scheme() {
        "tcp" | "http" => {
            let host = url
                .host_str()
                .ok_or_else(|| EndpointError(format!("{value}: missing host")))?
                .to_string();
            Ok(EngineEndpoint::Tcp {
                host,
                port: url.port().unwrap_or(env::DEFAULT_ENGINE_PORT),
            })
        }
        "unix" => {
            let path = url.path();
            if path.is_empty() {
                return Err(EndpointError(format!("{value}: missing socket path")));
            }
            Ok(EngineEndpoint::Unix { path: path.into() })
        }
        scheme => Err(EndpointError(format!("{value}: unsupported scheme {scheme}"))),
    }
}
