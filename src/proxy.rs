//! DNS forwarder orchestration.
//!
//! Builds the shared state, binds the transport and runs the background
//! jobs (blocklist refresh, cache sweep, stats).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use crate::cache::DnsCache;
use crate::dns::BlockPolicy;
use crate::filter::{Blocklist, loader};
use crate::resolver::Resolver;
use crate::transport::udp::UdpTransport;
use crate::upstream::{self, Strategy};

/// How often expired cache entries are swept and stats are logged.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the DNS forwarder.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Local address to bind (e.g., 0.0.0.0:53)
    pub bind_addr: SocketAddr,
    /// Upstream transport
    pub strategy: Strategy,
    /// Upstream endpoints: `ip:port` for UDP, URLs for HTTPS
    pub upstreams: Vec<String>,
    /// Upstream timeout per query
    pub timeout: Duration,
    /// Cache capacity (0 = unbounded)
    pub cache_max_entries: usize,
    /// Concurrent query limit (0 = unbounded)
    pub max_in_flight: usize,
    pub block_policy: BlockPolicy,
    /// Blocklist file, reloaded every `blocklist_refresh`
    pub blocklist: Option<PathBuf>,
    pub blocklist_refresh: Duration,
}

/// Run the DNS forwarder with the given configuration.
///
/// Returns only if startup fails or the transport stops.
pub async fn run(config: ProxyConfig) -> anyhow::Result<()> {
    let upstream = upstream::build(config.strategy, &config.upstreams, config.timeout)
        .context("invalid upstream configuration")?;

    let blocklist = Arc::new(Blocklist::new());
    let cache = Arc::new(DnsCache::with_capacity(config.cache_max_entries));
    let resolver = Arc::new(Resolver::new(
        blocklist.clone(),
        cache.clone(),
        Arc::from(upstream),
        config.block_policy,
    ));

    let udp = UdpTransport::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "DNS forwarder listening");
    info!(
        strategy = ?config.strategy,
        upstreams = %config.upstreams.join(", "),
        "Upstreams configured"
    );

    if let Some(path) = config.blocklist.clone() {
        loader::spawn_refresh(blocklist, path, config.blocklist_refresh);
    }

    let transport = udp.start(resolver.clone(), config.max_in_flight);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            let purged = cache.purge_expired();
            let stats = resolver.stats_snapshot_and_reset();
            info!(
                uptime_secs = stats.uptime_secs,
                cache = resolver.cache_len(),
                purged,
                blocklist = resolver.blocked_count(),
                requests = stats.requests,
                forwarded = stats.forwarded,
                cached = stats.cached,
                blocked = stats.blocked,
                failed = stats.failed,
                avg_response_ms = stats.avg_response_ms,
                "stats"
            );
        }
    });

    transport.await.context("UDP transport stopped")?;

    Ok(())
}
