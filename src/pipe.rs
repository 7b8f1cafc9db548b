//! Outbound network pipes.
//!
//! A pipe is a named outbound endpoint declared in the specification. The
//! declared [`PipeKind`] selects the implementation; HTTP is the only one
//! bundled. Every request carries a deadline and is not retried.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, Method,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::spec::{PipeDef, PipeKind};
use crate::value::{Value, ValueMap};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipeError {
    #[error("Unknown pipe: {0}")]
    UnknownPipe(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Request failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipeRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeResponse {
    pub status: u16,
    pub body: Value,
}

impl PipeResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn into_value(self) -> Value {
        let mut map = ValueMap::new();
        map.insert("ok".to_string(), Value::Boolean(self.ok()));
        map.insert("status".to_string(), Value::Integer(i64::from(self.status)));
        map.insert("body".to_string(), self.body);
        Value::Map(map)
    }
}

#[async_trait]
pub trait Pipe: Send + Sync {
    fn kind(&self) -> PipeKind;

    async fn request(&self, request: PipeRequest) -> Result<PipeResponse, PipeError>;
}

#[derive(Debug, Clone)]
pub struct HttpPipe {
    base_url: String,
    headers: BTreeMap<String, String>,
    client: Client,
}

impl HttpPipe {
    pub fn new(def: &PipeDef) -> Self {
        Self {
            base_url: def.base_url.trim_end_matches('/').to_string(),
            headers: def.headers.clone(),
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            return self.base_url.clone();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn header_map(&self, extra: &BTreeMap<String, String>) -> Result<HeaderMap, PipeError> {
        let mut headers = HeaderMap::new();
        for (name, value) in self.headers.iter().chain(extra.iter()) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| PipeError::InvalidRequest(e.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| PipeError::InvalidRequest(e.to_string()))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }
}

pub fn parse_method(method: &str) -> Result<Method, PipeError> {
    let upper = if method.is_empty() {
        "GET".to_string()
    } else {
        method.to_ascii_uppercase()
    };
    match upper.as_str() {
        "GET" | "POST" | "PUT" | "PATCH" | "DELETE" | "HEAD" => Method::from_bytes(upper.as_bytes())
            .map_err(|e| PipeError::InvalidRequest(e.to_string())),
        other => Err(PipeError::InvalidRequest(format!(
            "unsupported method `{}`",
            other
        ))),
    }
}

#[async_trait]
impl Pipe for HttpPipe {
    fn kind(&self) -> PipeKind {
        PipeKind::Http
    }

    async fn request(&self, request: PipeRequest) -> Result<PipeResponse, PipeError> {
        let method = parse_method(&request.method)?;
        let url = self.url(&request.path);
        debug!(method = %method, url = %url, "Pipe request");

        let mut builder = self
            .client
            .request(method, &url)
            .headers(self.header_map(&request.headers)?);
        if let Some(body) = &request.body {
            builder = builder.json(&body.to_json());
        }
        let response = builder
            .send()
            .await
            .map_err(|e| PipeError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| PipeError::Transport(e.to_string()))?;
        let body = serde_json::from_str::<serde_json::Value>(&text)
            .map(Value::from)
            .unwrap_or(Value::String(text));
        Ok(PipeResponse { status, body })
    }
}

/// Named pipes with their per-pipe deadlines.
#[derive(Clone, Default)]
pub struct PipeRegistry {
    pipes: HashMap<String, (Arc<dyn Pipe>, Option<Duration>)>,
}

impl PipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_defs(defs: &BTreeMap<String, PipeDef>) -> Self {
        let mut registry = Self::new();
        for (name, def) in defs {
            let pipe: Arc<dyn Pipe> = match def.kind {
                PipeKind::Http => Arc::new(HttpPipe::new(def)),
            };
            registry.pipes.insert(name.clone(), (pipe, def.timeout));
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, pipe: Arc<dyn Pipe>) {
        self.pipes.insert(name.into(), (pipe, None));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pipes.contains_key(name)
    }

    /// Sends `request` through the named pipe, failing with
    /// [`PipeError::Timeout`] once the pipe's own or the default deadline
    /// passes.
    pub async fn call(
        &self,
        name: &str,
        request: PipeRequest,
        default_timeout: Duration,
    ) -> Result<PipeResponse, PipeError> {
        let (pipe, timeout) = self
            .pipes
            .get(name)
            .ok_or_else(|| PipeError::UnknownPipe(name.to_string()))?;
        let deadline = timeout.unwrap_or(default_timeout);
        match tokio::time::timeout(deadline, pipe.request(request)).await {
            Ok(result) => result,
            Err(_) => Err(PipeError::Timeout(deadline)),
        }
    }
}
