//! Endpoint extraction and publication formatting.

use std::collections::BTreeMap;

use crate::engine::{EngineError, InspectResponse, Result};
use crate::model::ExposedEndpoint;

/// Compute the published endpoints of a container from its inspect data.
///
/// Ports with a `null` or empty mapping list are declared but
/// unpublished and are omitted. The first mapping wins when the engine
/// reports several.
///
/// # Errors
///
/// Returns a protocol error if the engine reports a non-decimal host port.
pub fn endpoints_from_inspect(inspect: &InspectResponse, host: &str) -> Result<Vec<ExposedEndpoint>> {
    let mut endpoints = Vec::new();
    for (private_port, mappings) in &inspect.network_settings.ports {
        let Some(mappings) = mappings else { continue };
        let Some(first) = mappings.first() else { continue };
        let host_port: u16 = first.host_port.parse().map_err(|_| {
            EngineError::Protocol(format!(
                "unparsable host port {:?} for {}",
                first.host_port, private_port
            ))
        })?;
        endpoints.push(ExposedEndpoint {
            private_port: private_port.clone(),
            host: host.to_string(),
            host_port,
        });
    }
    Ok(endpoints)
}

/// Flatten an endpoint map into the `<id>.<port>.host` / `<id>.<port>.port`
/// pairs published to the surrounding build.
pub fn render_properties(
    endpoints: &BTreeMap<String, Vec<ExposedEndpoint>>,
) -> Vec<(String, String)> {
    let mut properties = Vec::new();
    for (start_id, list) in endpoints {
        for endpoint in list {
            properties.push((
                format!("{start_id}.{}.host", endpoint.private_port),
                endpoint.host.clone(),
            ));
            properties.push((
                format!("{start_id}.{}.port", endpoint.private_port),
                endpoint.host_port.to_string(),
            ));
        }
    }
    properties
}
