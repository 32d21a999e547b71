//! dnsgate - A filtering, caching DNS forwarder.
//!
//! Queries are checked against a blocklist, then the answer cache, then
//! forwarded to a round-robin pool of UDP or DNS-over-HTTPS upstreams.

pub mod cache;
pub mod dns;
pub mod error;
pub mod filter;
pub mod proxy;
pub mod resolver;
pub mod stats;
pub mod transport;
pub mod upstream;
