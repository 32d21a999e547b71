//! Blocklist file loading.
//!
//! Accepts plain domain lists and hosts-format files:
//!
//! ```text
//! # comment
//! ads.example.com
//! 0.0.0.0 tracker.example.net   # trailing comment
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashSet;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::Blocklist;
use crate::dns::normalize_domain;

/// Hostnames that hosts files map to themselves and must never be blocked.
const IGNORED_HOSTS: &[&str] = &["localhost", "localhost.localdomain", "local", "broadcasthost"];

/// Parse a blocklist file into a set of normalized domains.
pub fn parse_list(contents: &str) -> FxHashSet<String> {
    contents
        .lines()
        .flat_map(|line| {
            let line = line.split('#').next().unwrap_or_default();
            let mut fields = line.split_whitespace().peekable();
            // Hosts format: address followed by one or more names.
            if fields
                .peek()
                .is_some_and(|first| first.parse::<std::net::IpAddr>().is_ok())
            {
                fields.next();
            }
            fields
        })
        .map(normalize_domain)
        .filter(|domain| !domain.is_empty() && !IGNORED_HOSTS.contains(&domain.as_str()))
        .collect()
}

/// Load `path` into `blocklist`, replacing its contents.
pub async fn load(blocklist: &Blocklist, path: &Path) -> std::io::Result<usize> {
    let contents = tokio::fs::read_to_string(path).await?;
    let domains = parse_list(&contents);
    let count = domains.len();
    blocklist.replace(domains);

    Ok(count)
}

/// Keep `blocklist` in sync with `path`, reloading every `interval`.
///
/// A failed reload keeps the previous snapshot.
pub fn spawn_refresh(blocklist: Arc<Blocklist>, path: PathBuf, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match load(&blocklist, &path).await {
                Ok(count) => info!(path = %path.display(), domains = count, "Blocklist loaded"),
                Err(e) => warn!(path = %path.display(), error = %e, "Blocklist reload failed"),
            }
        }
    })
}
