//! Request validation against an API description.
//!
//! The channel consults a [`SpecValidator`] once per upgrade request, before
//! any dialogue exists. [`ApiSpec`] reads the `paths` object of an OpenAPI
//! JSON document: a request is valid when its path matches a declared path
//! template (`{name}` matches any single segment) and its method is declared
//! under that template.

use std::collections::BTreeMap;
use std::path::Path;

use axum::http::{HeaderMap, Method, Uri, Version};
use relay_protocol::HttpContent;
use serde_json::Value;
use tracing::debug;

use crate::errors::SpecError;

/// The parts of an inbound request the bridge forwards and validates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedRequest {
    /// Request method, upper case.
    pub method: String,
    /// Path component.
    pub path: String,
    /// Query string without the `?`.
    pub query: Option<String>,
    /// Protocol version (`HTTP/1.1`).
    pub version: String,
    /// Headers with lower-case names; repeated headers are comma-joined.
    pub headers: BTreeMap<String, String>,
    /// Request body.
    pub body: Vec<u8>,
}

impl ParsedRequest {
    /// Capture a request from its HTTP parts.
    pub fn from_parts(method: &Method, uri: &Uri, version: Version, headers: &HeaderMap) -> Self {
        let mut collected: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers {
            let Ok(value) = value.to_str() else { continue };
            let _ = collected
                .entry(name.as_str().to_owned())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_owned());
        }
        Self {
            method: method.as_str().to_owned(),
            path: uri.path().to_owned(),
            query: uri.query().map(str::to_owned),
            version: format!("{version:?}"),
            headers: collected,
            body: Vec::new(),
        }
    }

    /// Path plus query string.
    pub fn url(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{query}", self.path),
            None => self.path.clone(),
        }
    }

    /// The HTTP REQUEST content forwarded to the consumer.
    pub fn to_content(&self) -> HttpContent {
        HttpContent::Request {
            method: self.method.clone(),
            url: self.url(),
            version: self.version.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// Decides whether an inbound request may open a session.
pub trait SpecValidator: Send + Sync {
    /// `true` when the request is acceptable.
    fn verify(&self, request: &ParsedRequest) -> bool;
}

/// Accepts every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl SpecValidator for AllowAll {
    fn verify(&self, _request: &ParsedRequest) -> bool {
        true
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

#[derive(Clone, Debug)]
struct Route {
    template: String,
    segments: Vec<Segment>,
    methods: Vec<String>,
}

impl Route {
    fn matches(&self, segments: &[&str]) -> bool {
        self.segments.len() == segments.len()
            && self.segments.iter().zip(segments).all(|(want, got)| match want {
                Segment::Param => !got.is_empty(),
                Segment::Literal(lit) => lit == got,
            })
    }
}

const HTTP_METHODS: &[&str] = &["get", "put", "post", "delete", "options", "head", "patch", "trace"];

/// Path/method table read from an OpenAPI document.
#[derive(Clone, Debug)]
pub struct ApiSpec {
    routes: Vec<Route>,
}

impl ApiSpec {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SpecError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse from a JSON string.
    pub fn from_json(content: &str) -> Result<Self, SpecError> {
        let doc: Value = serde_json::from_str(content)?;
        let paths = doc
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| SpecError::Invalid("missing `paths` object".into()))?;

        let mut routes = Vec::with_capacity(paths.len());
        for (template, item) in paths {
            let methods = item
                .as_object()
                .map(|ops| {
                    ops.keys()
                        .filter(|k| HTTP_METHODS.contains(&k.as_str()))
                        .map(|k| k.to_ascii_uppercase())
                        .collect()
                })
                .unwrap_or_default();
            routes.push(Route {
                template: template.clone(),
                segments: split(template)
                    .map(|s| {
                        if s.starts_with('{') && s.ends_with('}') {
                            Segment::Param
                        } else {
                            Segment::Literal(s.to_owned())
                        }
                    })
                    .collect(),
                methods,
            });
        }
        Ok(Self { routes })
    }

    /// Declared path templates.
    pub fn templates(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.template.as_str())
    }
}

impl SpecValidator for ApiSpec {
    fn verify(&self, request: &ParsedRequest) -> bool {
        let segments: Vec<&str> = split(&request.path).collect();
        let method = request.method.to_ascii_uppercase();
        let verdict = self
            .routes
            .iter()
            .any(|route| route.matches(&segments) && route.methods.contains(&method));
        debug!(path = %request.path, %method, verdict, "api spec verdict");
        verdict
    }
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
