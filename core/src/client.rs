//! Request building, execution and response parsing for the Parse REST API.
//!
//! # Design
//! `Client` is a cheap handle (an `Arc` inside) holding the connection
//! settings and the transport. It is constructed once and cloned into every
//! `Resource` and `Query`, so there is no process-wide connection state.
//! Each call is split into `build_request` (pure), a single blocking
//! `Transport::execute`, and `parse_response` (pure); only `request` wires the
//! three together.
//!
//! `with_session` derives a handle that sends a session token on every call
//! that does not carry its own, so reads see what that user may see.

use std::sync::Arc;

use url::form_urlencoded;

use crate::batch::Batch;
use crate::collection::Collection;
use crate::config::ClientConfig;
use crate::error::{ParseError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};
use crate::query::Query;
use crate::resource::Resource;

pub const APPLICATION_ID_HEADER: &str = "X-Parse-Application-Id";
pub const REST_API_KEY_HEADER: &str = "X-Parse-REST-API-Key";
pub const MASTER_KEY_HEADER: &str = "X-Parse-Master-Key";
pub const SESSION_TOKEN_HEADER: &str = "X-Parse-Session-Token";

/// Connection context shared by resources and queries.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
    session_token: Option<Arc<str>>,
}

#[derive(Debug)]
struct Inner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
}

impl Client {
    /// Client executing requests with a blocking `ureq` agent.
    #[cfg(feature = "ureq")]
    pub fn new(config: ClientConfig) -> Self {
        let transport = crate::http::UreqTransport::new(config.timeout);
        Self::with_transport(config, Arc::new(transport))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner { config, transport }),
            session_token: None,
        }
    }

    /// A handle on the same connection acting as the user behind `token`.
    pub fn with_session(&self, token: impl Into<String>) -> Self {
        Self {
            inner: self.inner.clone(),
            session_token: Some(Arc::from(token.into())),
        }
    }

    /// The same connection without a session.
    pub fn without_session(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            session_token: None,
        }
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Absolute URL of an endpoint.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.inner.config.api_root, endpoint.trim_start_matches('/'))
    }

    /// Host-relative path of an endpoint, as batch items address it
    /// (`/1/classes/GameScore` for an API root of `https://host/1`).
    pub fn batch_path(&self, endpoint: &str) -> Result<String> {
        let root = url::Url::parse(&self.inner.config.api_root)
            .map_err(|e| ParseError::InvalidApiRoot(format!("{}: {e}", self.inner.config.api_root)))?;
        Ok(format!(
            "{}/{}",
            root.path().trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        ))
    }

    /// Build the request for one call.
    ///
    /// GET parameters go into the query string; other methods carry `body`
    /// as JSON (an empty object when absent). Without an explicit
    /// `session_token` the handle's own session is used. A session token
    /// suppresses the master key.
    pub fn build_request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &[(String, String)],
        body: Option<&serde_json::Value>,
        session_token: Option<&str>,
    ) -> Result<HttpRequest> {
        let config = &self.inner.config;
        if config.application_id.is_empty() || config.rest_api_key.is_empty() {
            return Err(ParseError::MissingCredentials);
        }

        let mut path = self.endpoint_url(endpoint);
        if !params.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                .finish();
            path.push('?');
            path.push_str(&query);
        }

        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (APPLICATION_ID_HEADER.to_string(), config.application_id.clone()),
            (REST_API_KEY_HEADER.to_string(), config.rest_api_key.clone()),
        ];
        match (session_token.or(self.session_token()), &config.master_key) {
            (Some(token), _) => headers.push((SESSION_TOKEN_HEADER.to_string(), token.to_string())),
            (None, Some(master_key)) => headers.push((MASTER_KEY_HEADER.to_string(), master_key.clone())),
            (None, None) => {}
        }

        let body = match method {
            HttpMethod::Get | HttpMethod::Delete => None,
            HttpMethod::Post | HttpMethod::Put => Some(match body {
                Some(body) => serde_json::to_string(body).map_err(|e| ParseError::Serialization(e.to_string()))?,
                None => "{}".to_string(),
            }),
        };

        Ok(HttpRequest {
            method,
            path,
            headers,
            body,
        })
    }

    /// Map the response status to an error, or parse the JSON body.
    pub fn parse_response(&self, response: HttpResponse) -> Result<serde_json::Value> {
        if !response.is_success() {
            return Err(ParseError::from_status(response.status, response.body));
        }
        if response.body.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&response.body).map_err(|e| ParseError::Deserialization(e.to_string()))
    }

    /// Build, execute and parse one call.
    pub fn request(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &[(String, String)],
        body: Option<&serde_json::Value>,
        session_token: Option<&str>,
    ) -> Result<serde_json::Value> {
        let request = self.build_request(method, endpoint, params, body, session_token)?;
        tracing::debug!(%method, endpoint, "sending request");
        let response = self.inner.transport.execute(request)?;
        tracing::debug!(%method, endpoint, status = response.status, "received response");
        self.parse_response(response)
    }

    pub fn get(&self, endpoint: &str, params: &[(String, String)]) -> Result<serde_json::Value> {
        self.request(HttpMethod::Get, endpoint, params, None, None)
    }

    pub fn post(&self, endpoint: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        self.request(HttpMethod::Post, endpoint, &[], Some(body), None)
    }

    pub fn put(&self, endpoint: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        self.request(HttpMethod::Put, endpoint, &[], Some(body), None)
    }

    pub fn delete(&self, endpoint: &str) -> Result<serde_json::Value> {
        self.request(HttpMethod::Delete, endpoint, &[], None, None)
    }

    /// A new, unsaved object of `class_name`.
    pub fn object(&self, class_name: &str) -> Resource {
        Resource::new(self, class_name)
    }

    /// Fetch one object by id.
    pub fn retrieve(&self, class_name: &str, object_id: &str) -> Result<Resource> {
        Resource::retrieve(self, Collection::from_class_name(class_name), object_id)
    }

    /// An unfiltered query over `class_name`.
    pub fn query(&self, class_name: &str) -> Query {
        Query::new(self, Collection::from_class_name(class_name))
    }

    pub fn batch(&self) -> Batch {
        Batch::new(self)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("session", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
