//! UDP transport for DNS queries.
//!
//! A single loop reads datagrams one at a time and hands each to its own
//! task. A slow upstream only delays its own query, and an error or panic
//! while handling one query never reaches the loop or any other query.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::resolver::{Resolution, Resolver};

use super::{MAX_DNS_PACKET_SIZE, Protocol, QueryLogger};

/// UDP transport for the DNS forwarder.
///
/// Binds to a local address and answers queries through a [`Resolver`].
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start the UDP transport.
    ///
    /// With `max_in_flight > 0`, datagrams arriving while that many queries
    /// are still being handled are dropped.
    pub fn start(self, resolver: Arc<Resolver>, max_in_flight: usize) -> JoinHandle<()> {
        let admission = (max_in_flight > 0).then(|| Arc::new(Semaphore::new(max_in_flight)));

        tokio::spawn(run(self.socket, resolver, admission))
    }
}

/// Receive loop: one datagram at a time, each handled in a fresh task.
async fn run(socket: Arc<UdpSocket>, resolver: Arc<Resolver>, admission: Option<Arc<Semaphore>>) {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
    info!(addr = ?socket.local_addr().ok(), "UDP transport started");

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "UDP recv error");
                continue;
            }
        };

        let permit = match &admission {
            Some(semaphore) => match semaphore.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!(client = %src, "Too many queries in flight, dropping");
                    resolver.stats().record_failed();
                    continue;
                }
            },
            None => None,
        };

        let packet = buf[..len].to_vec();
        let socket = socket.clone();
        let resolver = resolver.clone();
        tokio::spawn(async move {
            handle_query(&socket, &resolver, &packet, src).await;
            drop(permit);
        });
    }
}

/// Resolve one query and write the answer back, or drop it on failure.
async fn handle_query(socket: &UdpSocket, resolver: &Resolver, packet: &[u8], src: SocketAddr) {
    let start_time = Instant::now();
    let logger = QueryLogger::new(Protocol::Udp);

    let resolution = match resolver.resolve(packet).await {
        Ok(resolution) => resolution,
        Err(e) => {
            resolver.stats().record_failed();
            logger.failed(src, &e);
            return;
        }
    };

    if let Err(e) = socket.send_to(resolution.response(), src).await {
        warn!(client = %src, error = %e, "UDP response error");
        resolver.stats().record_failed();
        return;
    }

    let elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0;
    match &resolution {
        Resolution::Blocked { domain, .. } => {
            resolver.stats().record_blocked(elapsed_ms);
            logger.blocked(domain, src, elapsed_ms);
        }
        Resolution::Cached { domain, .. } => {
            resolver.stats().record_cached(elapsed_ms);
            logger.cached(domain, src, elapsed_ms);
        }
        Resolution::Forwarded {
            domain,
            upstream_ms,
            ..
        } => {
            resolver.stats().record_forwarded(elapsed_ms);
            logger.forwarded(domain, src, elapsed_ms, *upstream_ms);
        }
    }
}
