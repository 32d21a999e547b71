//! Plain UDP upstream (RFC 1035 §4.2.1).
//!
//! Each query gets its own ephemeral socket connected to the selected
//! endpoint, so the kernel filters out datagrams from anyone else and the
//! random source port makes spoofed answers harder to land.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

use super::{RoundRobin, Upstream};
use crate::dns;
use crate::error::UpstreamError;
use crate::transport::MAX_DNS_PACKET_SIZE;

pub struct UdpUpstream {
    pool: RoundRobin<SocketAddr>,
    timeout: Duration,
}

impl UdpUpstream {
    pub fn new(pool: RoundRobin<SocketAddr>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

#[async_trait]
impl Upstream for UdpUpstream {
    async fn ask_question(&self, query: &[u8]) -> Result<Vec<u8>, UpstreamError> {
        let server = *self.pool.next()?;
        let endpoint = server.to_string();
        let query_id = dns::message_id(query).map_err(|source| UpstreamError::Malformed {
            endpoint: endpoint.clone(),
            source,
        })?;

        tokio::time::timeout(self.timeout, exchange(server, query, query_id))
            .await
            .map_err(|_| UpstreamError::Timeout {
                endpoint: endpoint.clone(),
            })?
            .map_err(|e| UpstreamError::Network {
                endpoint,
                reason: e.to_string(),
            })
    }

    fn protocol_name(&self) -> &'static str {
        "UDP"
    }
}

/// Send `query` and wait for the datagram answering it.
async fn exchange(server: SocketAddr, query: &[u8], query_id: u16) -> std::io::Result<Vec<u8>> {
    let bind_addr = if server.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    };

    let socket = UdpSocket::bind(bind_addr).await?;
    socket.connect(server).await?;
    socket.send(query).await?;

    let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];
    loop {
        let len = socket.recv(&mut buf).await?;
        match dns::response_id(&buf[..len]) {
            Ok(id) if id == query_id => {
                buf.truncate(len);
                debug!(server = %server, bytes = len, "UDP response received");
                return Ok(buf);
            }
            _ => debug!(server = %server, "Ignoring unmatched UDP datagram"),
        }
    }
}
