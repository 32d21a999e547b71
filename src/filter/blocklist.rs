//! Blocklist for ad/tracking domains.
//!
//! The set is published as an immutable snapshot. Lookups load the current
//! snapshot without locking; the loader builds a new set and swaps it in.

use std::sync::Arc;

use arc_swap::ArcSwap;
use rustc_hash::FxHashSet;

use crate::dns::normalize_domain;

/// A set of blocked domains for efficient lookup.
pub struct Blocklist {
    domains: ArcSwap<FxHashSet<String>>,
}

impl Blocklist {
    /// Create an empty blocklist. Nothing is blocked until it is populated.
    pub fn new() -> Self {
        Self {
            domains: ArcSwap::from_pointee(FxHashSet::default()),
        }
    }

    /// Create a blocklist holding the given domains.
    pub fn from_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let blocklist = Self::new();
        blocklist.replace(domains.into_iter().map(|d| normalize_domain(d.as_ref())).collect());
        blocklist
    }

    /// Check if a domain is blocked.
    pub fn contains(&self, domain: &str) -> bool {
        let domains = self.domains.load();
        if domains.is_empty() {
            return false;
        }

        domains.contains(&normalize_domain(domain))
    }

    /// Swap in a new set. Entries must already be normalized.
    pub fn replace(&self, domains: FxHashSet<String>) {
        self.domains.store(Arc::new(domains));
    }

    pub fn insert(&self, domain: &str) {
        let domain = normalize_domain(domain);
        self.domains.rcu(|current| {
            let mut next = FxHashSet::clone(current);
            next.insert(domain.clone());
            next
        });
    }

    pub fn remove(&self, domain: &str) {
        let domain = normalize_domain(domain);
        self.domains.rcu(|current| {
            let mut next = FxHashSet::clone(current);
            next.remove(&domain);
            next
        });
    }

    /// Returns the number of domains in the blocklist.
    pub fn len(&self) -> usize {
        self.domains.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Blocklist {
    fn default() -> Self {
        Self::new()
    }
}
