//! Transport layer for receiving DNS queries from clients.

pub mod udp;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::error::ResolveError;

/// Transport protocol identifier for logging.
#[derive(Debug, Clone, Copy)]
pub enum Protocol {
    Udp,
}

impl Protocol {
    fn as_str(self) -> &'static str {
        match self {
            Protocol::Udp => "UDP",
        }
    }
}

/// Logger for DNS query events.
pub struct QueryLogger {
    protocol: Protocol,
}

impl QueryLogger {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    pub fn blocked(&self, domain: &str, client: SocketAddr, elapsed_ms: f64) {
        debug!(
            protocol = self.protocol.as_str(),
            %client,
            domain,
            total_ms = elapsed_ms,
            "BLOCKED"
        );
    }

    pub fn cached(&self, domain: &str, client: SocketAddr, elapsed_ms: f64) {
        debug!(
            protocol = self.protocol.as_str(),
            %client,
            domain,
            total_ms = elapsed_ms,
            "CACHED"
        );
    }

    pub fn forwarded(&self, domain: &str, client: SocketAddr, total_ms: f64, upstream_ms: f64) {
        debug!(
            protocol = self.protocol.as_str(),
            %client,
            domain,
            total_ms = total_ms,
            upstream_ms = upstream_ms,
            "FORWARDED"
        );
    }

    /// The query is dropped; the client will retry on its own.
    pub fn failed(&self, client: SocketAddr, error: &ResolveError) {
        match error {
            ResolveError::Malformed(_) => debug!(
                protocol = self.protocol.as_str(),
                %client,
                error = %error,
                "DROPPED"
            ),
            ResolveError::Upstream(_) => warn!(
                protocol = self.protocol.as_str(),
                %client,
                error = %error,
                "DROPPED"
            ),
        }
    }
}
