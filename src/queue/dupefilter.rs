//! Duplicate request filtering
//!
//! The queue asks a [`DuplicateFilter`] before admitting a request. The
//! filter lives for one job run: it is opened when the queue opens and
//! closed with the run's close reason.

use crate::queue::request::FetchRequest;
use crate::queue::QueueResult;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Capability deciding whether a request was already seen in this run
pub trait DuplicateFilter {
    /// Prepares the filter for a new run
    fn open(&mut self) -> QueueResult<()> {
        Ok(())
    }

    /// Returns true if the request was seen before; records it otherwise
    fn seen(&mut self, request: &FetchRequest) -> QueueResult<bool>;

    /// Finishes the run
    fn close(&mut self, _reason: &str) -> QueueResult<()> {
        Ok(())
    }
}

/// Computes a stable fingerprint of a request
///
/// Covers the method, the URL with its query parameters sorted and its
/// fragment dropped, and the body. Headers do not take part.
pub fn request_fingerprint(request: &FetchRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_url(&request.url).as_bytes());
    hasher.update(b"\n");
    hasher.update(&request.body);
    hex::encode(hasher.finalize())
}

fn canonical_url(raw: &str) -> String {
    let Ok(mut url) = url::Url::parse(raw) else {
        return raw.to_string();
    };

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }

    url.to_string()
}

/// In-memory filter keyed by [`request_fingerprint`]
#[derive(Debug, Default)]
pub struct FingerprintFilter {
    fingerprints: HashSet<String>,
}

impl FingerprintFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct requests seen in this run
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }
}

impl DuplicateFilter for FingerprintFilter {
    fn open(&mut self) -> QueueResult<()> {
        self.fingerprints.clear();
        Ok(())
    }

    fn seen(&mut self, request: &FetchRequest) -> QueueResult<bool> {
        Ok(!self.fingerprints.insert(request_fingerprint(request)))
    }

    fn close(&mut self, reason: &str) -> QueueResult<()> {
        tracing::debug!(
            "Duplicate filter closed ({}), {} distinct requests seen",
            reason,
            self.fingerprints.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> FetchRequest {
        FetchRequest::new(url).unwrap()
    }

    #[test]
    fn test_second_sighting_is_seen() {
        let mut filter = FingerprintFilter::new();
        assert!(!filter.seen(&get("https://example.com/a")).unwrap());
        assert!(filter.seen(&get("https://example.com/a")).unwrap());
        assert!(!filter.seen(&get("https://example.com/b")).unwrap());
        assert_eq!(filter.len(), 2);
    }

    #[test]
    fn test_fingerprint_ignores_query_order_and_fragment() {
        let a = get("https://example.com/search?b=2&a=1#top");
        let b = get("https://example.com/search?a=1&b=2");
        assert_eq!(request_fingerprint(&a), request_fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_covers_method_and_body() {
        let get_req = get("https://example.com/form");
        let post_req = get("https://example.com/form").with_method("POST");
        let post_body = get("https://example.com/form")
            .with_method("POST")
            .with_body("q=1");

        assert_ne!(request_fingerprint(&get_req), request_fingerprint(&post_req));
        assert_ne!(request_fingerprint(&post_req), request_fingerprint(&post_body));
    }

    #[test]
    fn test_open_resets_the_run() {
        let mut filter = FingerprintFilter::new();
        filter.seen(&get("https://example.com/a")).unwrap();
        filter.open().unwrap();
        assert!(filter.is_empty());
        assert!(!filter.seen(&get("https://example.com/a")).unwrap());
    }
}
