//! Typed operations against the engine remote API.
//!
//! Every method maps one endpoint: fixed URL shape, documented body,
//! status-code to error translation. Streaming endpoints (build
//! progress, logs) are consumed incrementally so large outputs never
//! buffer whole.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Method, Response, StatusCode};
use tracing::{debug, info, trace};
use url::form_urlencoded;

use crate::engine::transport::{InflightResponse, Transport};
use crate::engine::wire::{
    BuildProgress, ContainerCreateRequest, ContainerCreateResponse, ErrorBody, InspectResponse,
};
use crate::engine::{BoxedLogStream, EngineApi, EngineEndpoint, EngineError, LogStream, Result};

/// Client for one engine endpoint.
pub struct EngineClient {
    transport: Transport,
    host: String,
}

impl EngineClient {
    pub fn new(endpoint: EngineEndpoint) -> Self {
        let host = endpoint.public_host().to_string();
        Self {
            transport: Transport::new(endpoint),
            host,
        }
    }

    /// Endpoint this client talks to.
    pub fn endpoint(&self) -> &EngineEndpoint {
        self.transport.endpoint()
    }

    async fn collect(response: Response<Incoming>) -> Result<Bytes> {
        let collected = response.into_body().collect().await?;
        Ok(collected.to_bytes())
    }

    /// Issue a request and buffer the whole response.
    async fn roundtrip(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<(Bytes, &str)>,
    ) -> Result<(StatusCode, Bytes)> {
        let InflightResponse { response, .. } =
            self.transport.request(method, path_and_query, body).await?;
        let status = response.status();
        let bytes = Self::collect(response).await?;
        Ok((status, bytes))
    }

    async fn post_json<T: serde::Serialize>(
        &self,
        path_and_query: &str,
        body: &T,
    ) -> Result<(StatusCode, Bytes)> {
        let bytes = Bytes::from(serde_json::to_vec(body)?);
        self.roundtrip(Method::POST, path_and_query, Some((bytes, "application/json")))
            .await
    }
}

#[async_trait]
impl EngineApi for EngineClient {
    async fn build_image(&self, archive: Vec<u8>, name_and_tag: Option<&str>) -> Result<String> {
        let path = match name_and_tag {
            Some(tag) => format!("/build?{}", encode_query(&[("t", tag)])),
            None => "/build".to_string(),
        };
        debug!("Building image via {} ({} context bytes)", path, archive.len());

        let InflightResponse { response, .. } = self
            .transport
            .request(Method::POST, &path, Some((Bytes::from(archive), "application/x-tar")))
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = Self::collect(response).await?;
            return Err(status_error(status, &body));
        }

        // The response is newline-delimited progress records; the image id
        // arrives in an aux record or the terminal "Successfully built" line.
        let mut body = response.into_body();
        let mut pending = String::new();
        let mut image_id: Option<String> = None;
        while let Some(frame) = body.frame().await {
            let frame = frame?;
            if let Ok(data) = frame.into_data() {
                pending.push_str(&String::from_utf8_lossy(&data));
                while let Some(newline) = pending.find('\n') {
                    let line: String = pending.drain(..=newline).collect();
                    scan_progress_line(line.trim(), &mut image_id)?;
                }
            }
        }
        scan_progress_line(pending.trim(), &mut image_id)?;

        let image_id = image_id.ok_or_else(|| {
            EngineError::Protocol("build stream ended without an image id".to_string())
        })?;
        info!("Built image {}", image_id);
        Ok(image_id)
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let (status, body) = self
            .roundtrip(Method::GET, &format!("/images/{image}/json"), None)
            .await?;
        match status {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(status_error(s, &body)),
        }
    }

    async fn remove_image(&self, image_id: &str, force: bool) -> Result<()> {
        let force = if force { 1 } else { 0 };
        let (status, body) = self
            .roundtrip(
                Method::DELETE,
                &format!("/images/{image_id}?force={force}"),
                None,
            )
            .await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        info!("Removed image {}", image_id);
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        request: &ContainerCreateRequest,
    ) -> Result<String> {
        let path = format!("/containers/create?{}", encode_query(&[("name", name)]));
        trace!("Creating container {} from image {}", name, request.image);

        let (status, body) = self.post_json(&path, request).await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        let created: ContainerCreateResponse = serde_json::from_slice(&body)?;
        for warning in &created.warnings {
            debug!("Engine warning for {}: {}", name, warning);
        }
        info!("Created container {} ({})", name, created.id);
        Ok(created.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        let (status, body) = self
            .roundtrip(Method::POST, &format!("/containers/{container_id}/start"), None)
            .await?;
        // 304 means already running; starting twice is a no-op success.
        if !status.is_success() && status != StatusCode::NOT_MODIFIED {
            return Err(status_error(status, &body));
        }
        info!("Started container {}", container_id);
        Ok(())
    }

    async fn stop_container(&self, container_id: &str, timeout_secs: u32) -> Result<()> {
        let (status, body) = self
            .roundtrip(
                Method::POST,
                &format!("/containers/{container_id}/stop?t={timeout_secs}"),
                None,
            )
            .await?;
        if !status.is_success() && status != StatusCode::NOT_MODIFIED {
            return Err(status_error(status, &body));
        }
        info!("Stopped container {}", container_id);
        Ok(())
    }

    async fn remove_container(
        &self,
        container_id: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<()> {
        let force = if force { 1 } else { 0 };
        let volumes = if remove_volumes { 1 } else { 0 };
        let (status, body) = self
            .roundtrip(
                Method::DELETE,
                &format!("/containers/{container_id}?force={force}&v={volumes}"),
                None,
            )
            .await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        info!("Removed container {}", container_id);
        Ok(())
    }

    async fn inspect_container(&self, container_id: &str) -> Result<InspectResponse> {
        let (status, body) = self
            .roundtrip(Method::GET, &format!("/containers/{container_id}/json"), None)
            .await?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn stream_logs(&self, container_id: &str, follow: bool) -> Result<BoxedLogStream> {
        let follow = if follow { 1 } else { 0 };
        let path = format!("/containers/{container_id}/logs?stdout=1&stderr=1&follow={follow}");
        let InflightResponse { response, connection } =
            self.transport.request(Method::GET, &path, None).await?;

        let status = response.status();
        if !status.is_success() {
            connection.abort();
            let body = Self::collect(response).await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        Ok(Box::pin(LogStream::new(response.into_body(), connection)))
    }

    fn host(&self) -> &str {
        &self.host
    }
}

fn encode_query(pairs: &[(&str, &str)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Interpret one build progress line, recording the image id when seen.
fn scan_progress_line(line: &str, image_id: &mut Option<String>) -> Result<()> {
    if line.is_empty() {
        return Ok(());
    }
    let record: BuildProgress = serde_json::from_str(line)
        .map_err(|err| EngineError::Protocol(format!("bad build progress record: {err}")))?;

    if record.error.is_some() || record.error_detail.is_some() {
        let message = record
            .error_detail
            .and_then(|detail| detail.message)
            .or(record.error)
            .unwrap_or_else(|| "unknown build error".to_string());
        return Err(EngineError::BuildFailed(message));
    }

    if let Some(id) = record.aux.and_then(|aux| aux.id) {
        *image_id = Some(id);
    } else if let Some(text) = record.stream {
        trace!("build: {}", text.trim_end());
        if let Some(rest) = text.split("Successfully built ").nth(1) {
            if let Some(id) = rest.split_whitespace().next() {
                *image_id = Some(id.to_string());
            }
        }
    }
    Ok(())
}

fn status_error(status: StatusCode, body: &[u8]) -> EngineError {
    let message = error_message(status, body);
    match status.as_u16() {
        404 => EngineError::NotFound(message),
        409 => EngineError::Conflict(message),
        _ => EngineError::Engine(message),
    }
}

/// Pull the engine's `{"message": ...}` envelope out of an error body,
/// falling back to the raw text or bare status.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
        if !parsed.message.is_empty() {
            return parsed.message;
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        format!("engine returned HTTP {status}")
    } else {
        text.to_string()
    }
}
