//! Upstream resolvers.
//!
//! Every strategy picks its endpoint from a [`RoundRobin`] pool on each
//! call, so rotation happens per query rather than per connection.

pub mod https;
pub mod pool;
pub mod udp;

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;

use crate::error::{PoolError, UpstreamError};

pub use https::HttpsUpstream;
pub use pool::RoundRobin;
pub use udp::UdpUpstream;

/// Default upstreams when none are configured.
pub const DEFAULT_UDP_UPSTREAMS: &[&str] = &["1.1.1.1:53", "8.8.8.8:53"];
pub const DEFAULT_HTTPS_UPSTREAMS: &[&str] = &[
    "https://cloudflare-dns.com/dns-query",
    "https://dns.google/dns-query",
];

/// A resolver that answers raw DNS queries.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send a raw query and return the raw response.
    async fn ask_question(&self, query: &[u8]) -> Result<Vec<u8>, UpstreamError>;

    fn protocol_name(&self) -> &'static str;
}

/// Upstream transport strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    Udp,
    #[default]
    Https,
}

impl Strategy {
    pub fn default_upstreams(self) -> Vec<String> {
        let defaults = match self {
            Strategy::Udp => DEFAULT_UDP_UPSTREAMS,
            Strategy::Https => DEFAULT_HTTPS_UPSTREAMS,
        };
        defaults.iter().map(|s| s.to_string()).collect()
    }
}

/// Errors building an upstream from configuration.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("invalid UDP upstream address {0:?}")]
    InvalidAddress(String),

    #[error("failed to build HTTPS client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Construct the upstream for `strategy` over `endpoints`.
pub fn build(
    strategy: Strategy,
    endpoints: &[String],
    timeout: Duration,
) -> Result<Box<dyn Upstream>, BuildError> {
    if endpoints.is_empty() {
        return Err(PoolError::Empty.into());
    }

    match strategy {
        Strategy::Udp => {
            let addrs = endpoints
                .iter()
                .map(|e| e.parse::<SocketAddr>().map_err(|_| BuildError::InvalidAddress(e.clone())))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Box::new(UdpUpstream::new(RoundRobin::new(addrs), timeout)))
        }
        Strategy::Https => Ok(Box::new(HttpsUpstream::new(
            RoundRobin::new(endpoints.to_vec()),
            timeout,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_rejects_empty_pool() {
        let result = build(Strategy::Udp, &[], Duration::from_secs(1));

        assert!(matches!(result, Err(BuildError::Pool(PoolError::Empty))));
    }

    #[test]
    fn build_rejects_bad_udp_address() {
        let result = build(Strategy::Udp, &["not-an-addr".to_string()], Duration::from_secs(1));

        assert!(matches!(result, Err(BuildError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn build_selects_strategy() {
        let udp = build(
            Strategy::Udp,
            &Strategy::Udp.default_upstreams(),
            Duration::from_secs(1),
        )
        .unwrap();
        let https = build(
            Strategy::Https,
            &Strategy::Https.default_upstreams(),
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(udp.protocol_name(), "UDP");
        assert_eq!(https.protocol_name(), "HTTPS");
    }
}
