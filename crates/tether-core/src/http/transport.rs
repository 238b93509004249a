//! Transport seam
//!
//! [`Transport`] performs one raw exchange. It knows nothing about
//! credentials, caching or queuing; a `TransportError` means no response
//! was received at all. Requests that cannot even be built come back as
//! [`TransportError::Malformed`] without touching the network.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use tracing::debug;

use super::request::{ApiRequest, RequestBody, TransportResponse};
use crate::error::{ClientError, TransportError};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<TransportResponse, TransportError>;
}

/// HTTP(S) transport backed by `reqwest`
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::InvalidRequest(format!("cannot build HTTP client: {}", e)))?;
        Self::with_client(client, base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, ClientError> {
        // Url::join drops the last segment unless the base ends with '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| ClientError::InvalidRequest(format!("bad base URL {}: {}", base_url, e)))?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL of a request path
    pub fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::Malformed(format!("invalid path {}: {}", path, e)))
    }

    fn build_form(parts: &[super::MultipartPart]) -> Result<Form, TransportError> {
        let mut form = Form::new();
        for part in parts {
            let mut field = Part::bytes(part.data.clone());
            if let Some(ref filename) = part.filename {
                field = field.file_name(filename.clone());
            }
            if let Some(ref content_type) = part.content_type {
                field = field
                    .mime_str(content_type)
                    .map_err(|e| TransportError::Malformed(format!("bad part type: {}", e)))?;
            }
            form = form.part(part.name.clone(), field);
        }
        Ok(form)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<TransportResponse, TransportError> {
        let url = self.url_for(&request.path)?;
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        debug!("{} {}", request.method, url);

        let mut builder = self.client.request(method, url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            // reqwest writes the multipart Content-Type with its own boundary
            RequestBody::Multipart(parts) => builder.multipart(Self::build_form(parts)?),
        };

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;

        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_builder() {
        TransportError::Malformed(error.to_string())
    } else if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}
