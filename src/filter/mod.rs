//! DNS query filtering module.
//!
//! Provides ad-blocking by matching queried domains against a blocklist
//! that a background loader keeps up to date.

mod blocklist;
pub mod loader;

pub use blocklist::Blocklist;

use crate::dns::{BlockPolicy, DnsQuery, DnsResponse};

/// Check if a DNS query should be blocked and return an appropriate response.
///
/// Returns `Some(response)` if the query should be blocked, `None` if it should
/// be resolved normally.
pub fn filter_query(blocklist: &Blocklist, query: &DnsQuery, policy: BlockPolicy) -> Option<Vec<u8>> {
    if blocklist.contains(&query.question.name) {
        Some(DnsResponse::blocked(query, policy).to_bytes())
    } else {
        None
    }
}
