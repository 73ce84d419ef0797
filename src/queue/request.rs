//! Fetch request model
//!
//! A [`FetchRequest`] is the unit of crawl work a job produces. Everything
//! except `body` is text so a request survives a round trip through the
//! durable backlog without byte/string ambiguity.

use crate::queue::callbacks::CallbackRef;
use crate::queue::{QueueError, QueueResult};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A header value: either a single string or a list of strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

impl HeaderValue {
    /// Returns every value as a list
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Single(value) => vec![value.as_str()],
            Self::Multiple(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multiple(values)
    }
}

/// Request headers in insertion order
pub type Headers = IndexMap<String, HeaderValue>;

/// Request cookies
pub type Cookies = BTreeMap<String, String>;

/// Arbitrary structured per-request data
pub type Meta = serde_json::Map<String, serde_json::Value>;

/// A request waiting to be fetched by the crawl engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Generated when the request is persisted to the backlog
    pub id: Option<String>,

    pub url: String,

    pub method: String,

    /// Higher values are dequeued first
    pub priority: i32,

    /// Registry key of the response handler
    pub callback: Option<CallbackRef>,

    /// Registry key of the error handler
    pub errback: Option<CallbackRef>,

    pub headers: Headers,

    pub body: Vec<u8>,

    pub cookies: Cookies,

    pub meta: Meta,

    /// Skips the duplicate filter on admission
    pub dont_filter: bool,

    /// Set when the request is persisted; durable FIFO tiebreak
    pub created_at: Option<DateTime<Utc>>,
}

impl FetchRequest {
    /// Creates a GET request with priority 0
    ///
    /// The URL must be absolute; it is stored as given.
    pub fn new(url: &str) -> QueueResult<Self> {
        url::Url::parse(url).map_err(|e| QueueError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            id: None,
            url: url.to_string(),
            method: "GET".to_string(),
            priority: 0,
            callback: None,
            errback: None,
            headers: Headers::new(),
            body: Vec::new(),
            cookies: Cookies::new(),
            meta: Meta::new(),
            dont_filter: false,
            created_at: None,
        })
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = method.to_ascii_uppercase();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_callback(mut self, key: &str) -> Self {
        self.callback = Some(CallbackRef::new(key));
        self
    }

    pub fn with_errback(mut self, key: &str) -> Self {
        self.errback = Some(CallbackRef::new(key));
        self
    }

    /// Sets a header, replacing any header of the same name in any case
    ///
    /// A replaced header keeps its position and its original spelling.
    pub fn with_header(mut self, name: &str, value: impl Into<HeaderValue>) -> Self {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            Some((_, existing)) => *existing = value,
            None => {
                self.headers.insert(name.to_string(), value);
            }
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.cookies.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_meta(mut self, key: &str, value: serde_json::Value) -> Self {
        self.meta.insert(key.to_string(), value);
        self
    }

    /// Marks the request to bypass the duplicate filter
    pub fn dont_filter(mut self) -> Self {
        self.dont_filter = true;
        self
    }

    /// Looks up a header by name, ignoring ASCII case
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Registry keys referenced by this request
    pub fn callback_keys(&self) -> impl Iterator<Item = &CallbackRef> {
        self.callback.iter().chain(self.errback.iter())
    }
}
