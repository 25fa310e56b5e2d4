//! Filter registration and per-request resolution.

use std::sync::Arc;

use http::Method;

use super::pattern::split_segments;
use super::FilterEntry;
use crate::core::{Error, Result};

/// Ordered set of registered filters.
///
/// Filled at startup, then frozen and shared read-only by every request.
/// Order is ascending by [`FilterEntry::order`], ties broken by registration
/// order.
#[derive(Default)]
pub struct FilterRegistry {
    entries: Vec<Arc<FilterEntry>>,
    frozen: bool,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter.
    ///
    /// Fails with [`Error::RegistryFrozen`] once the registry is frozen, and
    /// with [`Error::InvalidPattern`] if a pattern does not compile.
    pub fn register(&mut self, mut entry: FilterEntry) -> Result<()> {
        if self.frozen {
            tracing::warn!(filter = entry.get_name(), "filter registered after freeze");
            return Err(Error::RegistryFrozen);
        }

        entry.prepare(self.entries.len())?;

        tracing::debug!(
            filter = entry.get_name(),
            kind = entry.kind().as_str(),
            order = entry.get_order(),
            patterns = ?entry.pattern_sources(),
            "filter registered"
        );

        self.entries.push(Arc::new(entry));
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, entry: FilterEntry) -> Result<Self> {
        self.register(entry)?;
        Ok(self)
    }

    /// Sort entries and refuse further registration.
    pub fn freeze(&mut self) {
        if self.frozen {
            return;
        }
        // Stable: equal orders keep registration order
        self.entries.sort_by_key(|e| e.get_order());
        self.frozen = true;

        tracing::info!(filters = ?self.names(), "filter registry frozen");
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Filter names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.sorted().map(|e| e.get_name()).collect()
    }

    /// Entries applying to `path` and `method`, in execution order.
    pub fn resolve(&self, path: &str, method: &Method) -> MatchedFilters {
        let segments = split_segments(path);
        let matched: Vec<_> = self
            .sorted()
            .filter(|e| e.selects(&segments, path, method))
            .cloned()
            .collect();
        MatchedFilters(matched.into())
    }

    /// Entries in execution order whether or not the registry is frozen.
    fn sorted(&self) -> impl Iterator<Item = &Arc<FilterEntry>> {
        let mut refs: Vec<_> = self.entries.iter().collect();
        if !self.frozen {
            refs.sort_by_key(|e| (e.get_order(), e.index()));
        }
        refs.into_iter()
    }
}

/// Filters selected for one request. Never changes after resolution.
#[derive(Clone, Default)]
pub struct MatchedFilters(Arc<[Arc<FilterEntry>]>);

impl MatchedFilters {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<FilterEntry>> {
        self.0.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FilterEntry>> {
        self.0.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.get_name()).collect()
    }
}

impl std::fmt::Debug for MatchedFilters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
