//! Authenticated JSON request client.
//!
//! Every call carries the stored bearer token and a JSON content type.
//! Failures of any kind are shown to the user through the [`Notifier`] and
//! then returned to the caller.

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Body, Client, Method, Request, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::session::SessionGuard;

/// Message used when an error response carries no readable message.
pub const GENERIC_ERROR_MESSAGE: &str = "API request failed";

/// A fully prepared HTTP request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// Final, merged headers.
    pub headers: HeaderMap,
    /// Body text, if any.
    pub body: Option<String>,
}

/// A raw HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: StatusCode,
    /// Body bytes.
    pub body: Vec<u8>,
}

/// Sends HTTP requests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a request and collect the full response body.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Transport backed by a hyper client.
#[derive(Debug, Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector>,
}

impl HyperTransport {
    /// Create a transport with a fresh connection pool.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = Request::builder().method(request.method).uri(request.url);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(request.headers);
        }
        let req = builder.body(request.body.map(Body::from).unwrap_or_else(Body::empty))?;

        let resp = self.client.request(req).await?;
        let status = resp.status();
        let body = hyper::body::to_bytes(resp.into_body()).await?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Caller-supplied request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    method: Method,
    headers: HeaderMap,
    body: Option<String>,
}

impl RequestOptions {
    /// GET with no extra headers and no body.
    pub fn new() -> Self {
        Self::default()
    }

    /// POST with no body yet.
    pub fn post() -> Self {
        Self::new().method(Method::POST)
    }

    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header. It replaces any default header of the same name.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set a raw body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn json_body<T: Serialize>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_string(value)?;
        Ok(self.body(body))
    }
}

/// Merge caller headers over the defaults, caller winning per header name.
pub fn merge_headers(defaults: HeaderMap, caller: &HeaderMap) -> HeaderMap {
    let mut merged = defaults;
    for name in caller.keys() {
        merged.remove(name);
    }
    for (name, value) in caller.iter() {
        merged.append(name.clone(), value.clone());
    }
    merged
}

/// Pull a readable message out of an error response body.
///
/// Accepts `{"detail": "..."}`, validation-style
/// `{"detail": [{"msg": "..."}, ...]}` and `{"message": "..."}`.
pub fn error_message(body: &[u8]) -> String {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        return GENERIC_ERROR_MESSAGE.to_string();
    };

    match value.get("detail") {
        Some(Value::String(detail)) => return detail.clone(),
        Some(Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            if !messages.is_empty() {
                return messages.join("; ");
            }
        }
        _ => {}
    }

    value
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| GENERIC_ERROR_MESSAGE.to_string())
}

/// Client for the attendance backend.
pub struct ApiClient {
    base_url: String,
    guard: Arc<SessionGuard>,
    notifier: Arc<dyn Notifier>,
    transport: Arc<dyn HttpTransport>,
}

impl ApiClient {
    /// Create a client for `base_url` using the hyper transport.
    pub fn new(
        base_url: impl Into<String>,
        guard: Arc<SessionGuard>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::with_transport(base_url, guard, notifier, Arc::new(HyperTransport::new()))
    }

    /// Create a client with an explicit transport.
    pub fn with_transport(
        base_url: impl Into<String>,
        guard: Arc<SessionGuard>,
        notifier: Arc<dyn Notifier>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            guard,
            notifier,
            transport,
        }
    }

    /// The base URL endpoints are appended to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue an authenticated request and return the parsed JSON body.
    ///
    /// On failure the user is notified with the error message and the
    /// error is returned.
    pub async fn request(&self, endpoint: &str, options: RequestOptions) -> Result<Value> {
        match self.send(endpoint, options).await {
            Ok(value) => {
                debug!("API request to {} successful", endpoint);
                Ok(value)
            }
            Err(e) => {
                error!("API request to {} failed: {}", endpoint, e);
                self.notifier.notify(&e.to_string());
                Err(e)
            }
        }
    }

    /// Like [`request`](Self::request), deserializing the body into `T`.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<T> {
        let value = self.request(endpoint, options).await?;
        serde_json::from_value(value).map_err(|e| {
            self.notifier.notify(&e.to_string());
            Error::Json(e)
        })
    }

    async fn send(&self, endpoint: &str, options: RequestOptions) -> Result<Value> {
        let token = self.guard.check_auth().ok_or(Error::NotAuthenticated)?;

        let mut defaults = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            Error::InvalidParameter {
                name: "token".to_string(),
                value: "<redacted>".to_string(),
            }
        })?;
        defaults.insert(AUTHORIZATION, bearer);
        defaults.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let request = HttpRequest {
            method: options.method,
            url: format!("{}{}", self.base_url, endpoint),
            headers: merge_headers(defaults, &options.headers),
            body: options.body,
        };

        debug!("Making API request: {} {}", request.method, request.url);
        let response = self.transport.send(request).await?;

        if !response.status.is_success() {
            let message = error_message(&response.body);
            debug!("API request failed with {}: {}", response.status, message);
            return Err(Error::Request {
                status: Some(response.status.as_u16()),
                message,
            });
        }

        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&response.body)?)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
