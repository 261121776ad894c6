// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Canonical trigger model.
//!
//! Every gateway turns its native wire format into a [`Trigger`] and turns the
//! worker's [`Response`] back into its native format. Triggers are immutable
//! values: they are built once by a gateway and dropped after the round trip.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use thiserror::Error;

/// Headers removed from upstream responses before they are relayed.
pub const HOP_BY_HOP_HEADERS: &[&str] = &["Content-Length", "Connection", "Transfer-Encoding"];

/// Errors raised while building triggers or matching responses to them.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum TriggerError {
    /// HTTP request without a method.
    #[error("http request method must not be empty")]
    EmptyMethod,

    /// HTTP request without a path.
    #[error("http request path must not be empty")]
    EmptyPath,

    /// Event without a topic.
    #[error("event topic must not be empty")]
    EmptyTopic,

    /// The worker answered with the wrong response variant.
    #[error("response variant mismatch: expected {expected}, got {actual}")]
    ResponseMismatch {
        /// Variant the trigger required.
        expected: TriggerKind,
        /// Variant the worker produced.
        actual: TriggerKind,
    },
}

/// Discriminant shared by [`Trigger`] and [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    Http,
    Event,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::Http => write!(f, "http"),
            TriggerKind::Event => write!(f, "event"),
        }
    }
}

/// Canonical form of a header name: `x-nitric-request-id` becomes
/// `X-Nitric-Request-Id`.
pub fn canonical_header_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.trim().chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// Multi-valued header map with canonical keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all values of `name` with `value`.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(canonical_header_key(name), vec![value.into()]);
    }

    /// Add `value` to the values already held for `name`.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .entry(canonical_header_key(name))
            .or_default()
            .push(value.into());
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&canonical_header_key(name))
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.0
            .get(&canonical_header_key(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.0.remove(&canonical_header_key(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&canonical_header_key(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drop the headers listed in [`HOP_BY_HOP_HEADERS`].
    pub fn strip_hop_by_hop(&mut self) {
        for name in HOP_BY_HOP_HEADERS {
            self.remove(name);
        }
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k.as_ref(), v);
        }
        headers
    }
}

impl IntoIterator for Headers {
    type Item = (String, Vec<String>);
    type IntoIter = std::collections::btree_map::IntoIter<String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Inbound HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    method: String,
    path: String,
    headers: Headers,
    query: BTreeMap<String, String>,
    body: Bytes,
}

impl HttpRequest {
    /// Build a request; `method` and `path` must be non-empty.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Result<Self, TriggerError> {
        let method = method.into();
        let path = path.into();
        if method.is_empty() {
            return Err(TriggerError::EmptyMethod);
        }
        if path.is_empty() {
            return Err(TriggerError::EmptyPath);
        }
        Ok(Self {
            method,
            path,
            headers: Headers::new(),
            query: BTreeMap::new(),
            body: Bytes::new(),
        })
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_query(mut self, query: BTreeMap<String, String>) -> Self {
        self.query = query;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Inbound topic event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    id: String,
    topic: String,
    payload: Bytes,
}

impl Event {
    /// Build an event; `topic` must be non-empty.
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<Self, TriggerError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(TriggerError::EmptyTopic);
        }
        Ok(Self {
            id: id.into(),
            topic,
            payload: payload.into(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// A provider-independent inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Http(HttpRequest),
    Event(Event),
}

impl Trigger {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Trigger::Http(_) => TriggerKind::Http,
            Trigger::Event(_) => TriggerKind::Event,
        }
    }
}

impl From<HttpRequest> for Trigger {
    fn from(request: HttpRequest) -> Self {
        Trigger::Http(request)
    }
}

impl From<Event> for Trigger {
    fn from(event: Event) -> Self {
        Trigger::Event(event)
    }
}

/// Worker answer to an [`HttpRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Worker answer to a [`Trigger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Http(HttpResponse),
    EventAck { success: bool },
}

impl Response {
    pub fn kind(&self) -> TriggerKind {
        match self {
            Response::Http(_) => TriggerKind::Http,
            Response::EventAck { .. } => TriggerKind::Event,
        }
    }

    /// Fail unless this response answers `trigger`'s variant.
    pub fn ensure_matches(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        if self.kind() == trigger.kind() {
            Ok(())
        } else {
            Err(TriggerError::ResponseMismatch {
                expected: trigger.kind(),
                actual: self.kind(),
            })
        }
    }
}
