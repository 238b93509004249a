//! Request and response model
//!
//! [`ApiRequest`] is a plain descriptor: it can be dispatched, cached by key
//! and persisted in the offline queue without reference to any transport.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// HTTP verbs used by the platform API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Reads may be served from the response cache
    pub fn is_read(self) -> bool {
        matches!(self, Method::Get)
    }

    /// Writes are queued when the transport is unavailable
    pub fn is_write(self) -> bool {
        !self.is_read()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(ClientError::InvalidRequest(format!(
                "unsupported method: {}",
                other
            ))),
        }
    }
}

/// One part of a multipart upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipartPart {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl MultipartPart {
    /// A plain text field
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: None,
            content_type: None,
            data: value.into().into_bytes(),
        }
    }

    /// A file field
    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: Option<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            filename: Some(filename.into()),
            content_type,
            data,
        }
    }
}

/// Request payload
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(Vec<MultipartPart>),
}

impl RequestBody {
    pub fn is_multipart(&self) -> bool {
        matches!(self, RequestBody::Multipart(_))
    }
}

/// A request against the platform API
///
/// `path` is relative to the configured base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: RequestBody,
    /// Overrides the client-wide timeout
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: RequestBody::Empty,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn multipart(mut self, parts: Vec<MultipartPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Case-insensitive header lookup
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Remove a header regardless of the case it was set with
    pub fn remove_header(&mut self, name: &str) {
        self.headers.retain(|k, _| !k.eq_ignore_ascii_case(name));
    }

    /// Path without any inline query string
    pub fn bare_path(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }
}

/// Raw exchange result from a [`Transport`](super::Transport)
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    ///
    /// Empty bodies become `null`; non-JSON bodies become a string.
    pub fn json_body(&self) -> Value {
        if self.body.is_empty() {
            return Value::Null;
        }
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.body).into_owned()))
    }
}

/// Response handed back to callers
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
    /// Served from the response cache because the network was unavailable
    pub from_cache: bool,
    /// Cached payload older than the freshness threshold
    pub stale: bool,
}

impl ApiResponse {
    pub fn live(status: u16, body: Value) -> Self {
        Self {
            status,
            body,
            from_cache: false,
            stale: false,
        }
    }

    /// Deserialize the body into a typed value
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_classification() {
        assert!(Method::Get.is_read());
        for method in [Method::Post, Method::Put, Method::Patch, Method::Delete] {
            assert!(method.is_write(), "{} should be a write", method);
        }
        assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
        assert!("TRACE".parse::<Method>().is_err());
    }

    #[test]
    fn test_header_helpers_ignore_case() {
        let mut request = ApiRequest::post("/media").header("content-type", "image/png");
        assert_eq!(request.header_value("Content-Type"), Some("image/png"));

        request.remove_header("CONTENT-TYPE");
        assert!(request.headers.is_empty());
    }

    #[test]
    fn test_bare_path() {
        assert_eq!(ApiRequest::get("/meals?day=mon").bare_path(), "/meals");
        assert_eq!(ApiRequest::get("/meals").bare_path(), "/meals");
    }

    #[test]
    fn test_multipart_persists_as_base64() {
        let request = ApiRequest::post("/media").multipart(vec![MultipartPart::file(
            "photo",
            "field-trip.png",
            Some("image/png".to_string()),
            vec![0x89, 0x50, 0x4e, 0x47],
        )]);

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["body"]["kind"], json!("multipart"));
        assert_eq!(encoded["body"]["value"][0]["data"], json!("iVBORw=="));

        let decoded: ApiRequest = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_transport_response_json_body() {
        let ok = TransportResponse {
            status: 200,
            body: br#"{"id":1}"#.to_vec(),
        };
        assert_eq!(ok.json_body(), json!({"id": 1}));

        let empty = TransportResponse {
            status: 204,
            body: Vec::new(),
        };
        assert_eq!(empty.json_body(), Value::Null);

        let text = TransportResponse {
            status: 502,
            body: b"Bad Gateway".to_vec(),
        };
        assert_eq!(text.json_body(), json!("Bad Gateway"));
        assert!(!text.is_success());
    }

    #[test]
    fn test_api_response_typed_json() {
        #[derive(Deserialize)]
        struct Meal {
            id: u32,
        }

        let response = ApiResponse::live(200, json!({"id": 4}));
        let meal: Meal = response.json().unwrap();
        assert_eq!(meal.id, 4);
        assert!(response.json::<Vec<String>>().is_err());
    }
}
