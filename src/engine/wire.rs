//! Request and response bodies per the engine's remote API schema.
//!
//! Field names are the wire contract; everything here serializes to the
//! exact JSON the engine documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Body of `POST /containers/create`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContainerCreateRequest {
    #[serde(rename = "Image")]
    pub image: String,

    #[serde(rename = "Hostname", skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// `KEY=VALUE` pairs.
    #[serde(rename = "Env", skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    /// `"<port>/<proto>"` keys mapped to empty objects.
    #[serde(rename = "ExposedPorts", skip_serializing_if = "BTreeMap::is_empty")]
    pub exposed_ports: BTreeMap<String, EmptyObject>,

    #[serde(rename = "HostConfig")]
    pub host_config: HostConfig,
}

/// The engine represents set membership as `{}` values.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EmptyObject {}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HostConfig {
    /// `peerName:alias` entries.
    #[serde(rename = "Links", skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,

    #[serde(rename = "PortBindings", skip_serializing_if = "BTreeMap::is_empty")]
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,

    #[serde(rename = "PublishAllPorts")]
    pub publish_all_ports: bool,

    #[serde(rename = "Privileged")]
    pub privileged: bool,
}

/// One host-side binding of a container port. The engine keeps the port
/// as a decimal string on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp", default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,

    #[serde(rename = "HostPort")]
    pub host_port: String,
}

/// Body of the `POST /containers/create` response.
#[derive(Debug, Deserialize)]
pub struct ContainerCreateResponse {
    #[serde(rename = "Id")]
    pub id: String,

    #[serde(rename = "Warnings", default)]
    pub warnings: Vec<String>,
}

/// Subset of `GET /containers/{id}/json` the orchestrator consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct InspectResponse {
    #[serde(rename = "Id")]
    pub id: String,

    /// Engine-side name, with the leading slash the API reports.
    #[serde(rename = "Name", default)]
    pub name: Option<String>,

    #[serde(rename = "State", default)]
    pub state: ContainerState,

    #[serde(rename = "NetworkSettings", default)]
    pub network_settings: NetworkSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Running", default)]
    pub running: bool,

    #[serde(rename = "ExitCode", default)]
    pub exit_code: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkSettings {
    /// `"<port>/<proto>"` to host mappings; `null` means declared but
    /// unpublished.
    #[serde(rename = "Ports", default)]
    pub ports: BTreeMap<String, Option<Vec<PortBinding>>>,
}

/// One newline-delimited record of the image build progress stream.
#[derive(Debug, Default, Deserialize)]
pub struct BuildProgress {
    #[serde(default)]
    pub stream: Option<String>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(rename = "errorDetail", default)]
    pub error_detail: Option<BuildErrorDetail>,

    #[serde(default)]
    pub aux: Option<BuildAux>,
}

#[derive(Debug, Deserialize)]
pub struct BuildErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
}

/// Structured result record some engines emit at the end of a build.
#[derive(Debug, Deserialize)]
pub struct BuildAux {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
}

/// Error envelope the engine wraps failure bodies in.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_request_wire_shape() {
        let mut exposed = BTreeMap::new();
        exposed.insert("80/tcp".to_string(), EmptyObject {});
        let mut bindings = BTreeMap::new();
        bindings.insert(
            "80/tcp".to_string(),
            vec![PortBinding {
                host_ip: None,
                host_port: "8080".to_string(),
            }],
        );

        let request = ContainerCreateRequest {
            image: "sha256:deadbeef".to_string(),
            hostname: Some("web".to_string()),
            env: vec!["MODE=test".to_string()],
            exposed_ports: exposed,
            host_config: HostConfig {
                links: vec!["stevedore-db-1a2b3c4d:database".to_string()],
                port_bindings: bindings,
                publish_all_ports: false,
                privileged: true,
            },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "Image": "sha256:deadbeef",
                "Hostname": "web",
                "Env": ["MODE=test"],
                "ExposedPorts": {"80/tcp": {}},
                "HostConfig": {
                    "Links": ["stevedore-db-1a2b3c4d:database"],
                    "PortBindings": {"80/tcp": [{"HostPort": "8080"}]},
                    "PublishAllPorts": false,
                    "Privileged": true,
                }
            })
        );
    }

    #[test]
    fn test_minimal_create_request_omits_empty_collections() {
        let request = ContainerCreateRequest {
            image: "postgres:16".to_string(),
            host_config: HostConfig {
                publish_all_ports: true,
                ..HostConfig::default()
            },
            ..ContainerCreateRequest::default()
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "Image": "postgres:16",
                "HostConfig": {"PublishAllPorts": true, "Privileged": false}
            })
        );
    }

    #[test]
    fn test_inspect_response_with_null_and_missing_ports() {
        let body = json!({
            "Id": "abc123",
            "Name": "/stevedore-c1-0f0f0f0f",
            "State": {"Running": true, "ExitCode": 0},
            "NetworkSettings": {
                "Ports": {
                    "80/tcp": [{"HostIp": "0.0.0.0", "HostPort": "32768"}],
                    "443/tcp": null
                }
            }
        });

        let inspect: InspectResponse = serde_json::from_value(body).unwrap();
        assert!(inspect.state.running);
        assert_eq!(
            inspect.network_settings.ports["80/tcp"],
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: "32768".to_string(),
            }])
        );
        assert_eq!(inspect.network_settings.ports["443/tcp"], None);
    }

    #[test]
    fn test_build_progress_error_record() {
        let record: BuildProgress = serde_json::from_str(
            r#"{"error":"The command '/bin/sh -c make' returned a non-zero code: 2","errorDetail":{"message":"non-zero code: 2"}}"#,
        )
        .unwrap();
        assert!(record.error.is_some());
        assert_eq!(
            record.error_detail.unwrap().message.as_deref(),
            Some("non-zero code: 2")
        );
    }
}
