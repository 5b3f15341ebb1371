//! Recognized prefetchable resources
//!
//! A URL is intercepted when it is a bundle the worker has already stored,
//! or a `.js` resource under one of the registered base directories.

use crate::error::{PrefetchError, PrefetchResult};
use std::collections::HashSet;
use url::Url;

/// Known bundle bases and exact bundle URLs
#[derive(Debug, Clone, Default)]
pub struct BundleRegistry {
    bases: Vec<Url>,
    known: HashSet<String>,
}

impl BundleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a base directory, resolved against `origin`
    ///
    /// A trailing `/` is added if missing so `/build` covers `/build/x.js`
    /// but not `/builder.js`. Returns the resolved base.
    pub fn add_base(&mut self, origin: &Url, base: &str) -> PrefetchResult<Url> {
        let mut resolved = origin
            .join(base)
            .map_err(|e| PrefetchError::invalid_url(base, e))?;
        if !resolved.path().ends_with('/') {
            let path = format!("{}/", resolved.path());
            resolved.set_path(&path);
        }
        resolved.set_query(None);
        resolved.set_fragment(None);

        if !self.bases.contains(&resolved) {
            self.bases.push(resolved.clone());
        }
        Ok(resolved)
    }

    /// Remember an exact bundle URL
    pub fn remember(&mut self, url: &Url) {
        self.known.insert(url.as_str().to_string());
    }

    /// Whether requests for `url` should be intercepted
    pub fn recognizes(&self, url: &Url) -> bool {
        if self.known.contains(url.as_str()) {
            return true;
        }
        url.path().ends_with(".js")
            && self
                .bases
                .iter()
                .any(|base| url.as_str().starts_with(base.as_str()))
    }

    /// Registered bases
    pub fn bases(&self) -> &[Url] {
        &self.bases
    }

    /// Number of exact bundle URLs remembered
    pub fn known_count(&self) -> usize {
        self.known.len()
    }
}
