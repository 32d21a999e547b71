//! DNS query resolution logic.
//!
//! Handles the core query processing pipeline:
//! 1. Filter (block ads/trackers)
//! 2. Cache lookup
//! 3. Forward to upstream, caching the answer
//!
//! Transports handle the actual I/O, resolver handles decisions.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::cache::DnsCache;
use crate::dns::{BlockPolicy, CacheKey, DnsQuery, DnsResponse, RCODE_NOERROR, ttl_seconds};
use crate::error::{ResolveError, UpstreamError};
use crate::filter::{Blocklist, filter_query};
use crate::stats::{Stats, StatsSnapshot};
use crate::upstream::Upstream;

/// How a query was answered.
#[derive(Debug)]
pub enum Resolution {
    /// Domain is blocked; synthesized response.
    Blocked { response: Vec<u8>, domain: String },
    /// Answered from cache with the query's ID.
    Cached { response: Vec<u8>, domain: String },
    /// Upstream's response, passed through unchanged.
    Forwarded {
        response: Vec<u8>,
        domain: String,
        upstream_ms: f64,
    },
}

impl Resolution {
    pub fn response(&self) -> &[u8] {
        match self {
            Resolution::Blocked { response, .. }
            | Resolution::Cached { response, .. }
            | Resolution::Forwarded { response, .. } => response,
        }
    }

    pub fn domain(&self) -> &str {
        match self {
            Resolution::Blocked { domain, .. }
            | Resolution::Cached { domain, .. }
            | Resolution::Forwarded { domain, .. } => domain,
        }
    }
}

/// Resolver handles DNS query processing decisions.
///
/// Holds all state shared between in-flight queries: the blocklist, the
/// answer cache, the upstream, and statistics.
pub struct Resolver {
    blocklist: Arc<Blocklist>,
    cache: Arc<DnsCache>,
    upstream: Arc<dyn Upstream>,
    block_policy: BlockPolicy,
    stats: Stats,
}

impl Resolver {
    pub fn new(
        blocklist: Arc<Blocklist>,
        cache: Arc<DnsCache>,
        upstream: Arc<dyn Upstream>,
        block_policy: BlockPolicy,
    ) -> Self {
        Self {
            blocklist,
            cache,
            upstream,
            block_policy,
            stats: Stats::new(),
        }
    }

    /// Answer a raw DNS query.
    ///
    /// Blocklist, cache and upstream are consulted in that order; the first
    /// one with an answer wins. Upstream answers are cached before returning.
    pub async fn resolve(&self, packet: &[u8]) -> Result<Resolution, ResolveError> {
        let query = DnsQuery::parse(packet)?;
        let domain = query.domain();

        if let Some(response) = filter_query(&self.blocklist, &query, self.block_policy) {
            return Ok(Resolution::Blocked { response, domain });
        }

        let key = query.cache_key();
        if let Some(records) = self.cache.get(&key) {
            let response = DnsResponse::answer(&query, records).to_bytes();
            return Ok(Resolution::Cached { response, domain });
        }

        let start = Instant::now();
        let response = self.upstream.ask_question(packet).await?;
        let upstream_ms = start.elapsed().as_secs_f64() * 1000.0;

        let parsed = DnsResponse::parse(&response).map_err(|source| UpstreamError::Malformed {
            endpoint: self.upstream.protocol_name().to_string(),
            source,
        })?;
        self.cache_response(key, parsed);

        Ok(Resolution::Forwarded {
            response,
            domain,
            upstream_ms,
        })
    }

    /// Cache successful, complete answers to the question that was asked.
    fn cache_response(&self, key: CacheKey, response: DnsResponse) {
        if response.rcode() != RCODE_NOERROR || response.is_truncated() {
            return;
        }
        if response.questions.first().map(CacheKey::from_question).as_ref() != Some(&key) {
            debug!(protocol = self.upstream.protocol_name(), "Upstream answered a different question");
            return;
        }
        if let Some(ttl) = ttl_seconds(&response.answers) {
            self.cache.put(key, response.answers, ttl);
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn stats_snapshot_and_reset(&self) -> StatsSnapshot {
        self.stats.snapshot_and_reset()
    }

    /// Returns the number of domains in the blocklist.
    pub fn blocked_count(&self) -> usize {
        self.blocklist.len()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{CLASS_IN, DnsQuestion, DnsRecord, RCODE_NXDOMAIN, TYPE_A};
    use crate::error::DnsError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    enum Reply {
        Answer(u32),
        NoAnswers,
        NxDomain,
        Garbage,
        Timeout,
        /// Answers for an unrelated name.
        Foreign,
    }

    struct MockUpstream {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl MockUpstream {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for MockUpstream {
        async fn ask_question(&self, query: &[u8]) -> Result<Vec<u8>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let query = DnsQuery::parse(query).unwrap();
            let record = DnsRecord {
                name: query.question.name.clone(),
                rtype: TYPE_A,
                class: CLASS_IN,
                ttl: 0,
                rdata: vec![93, 184, 216, 34],
            };

            match self.reply {
                Reply::Answer(ttl) => {
                    Ok(DnsResponse::answer(&query, vec![DnsRecord { ttl, ..record }]).to_bytes())
                }
                Reply::NoAnswers => Ok(DnsResponse::answer(&query, Vec::new()).to_bytes()),
                Reply::NxDomain => {
                    let mut response = DnsResponse::answer(&query, vec![record]);
                    response.flags |= u16::from(RCODE_NXDOMAIN);
                    Ok(response.to_bytes())
                }
                Reply::Garbage => {
                    let mut bytes = DnsResponse::answer(&query, vec![record]).to_bytes();
                    bytes.truncate(bytes.len() - 2);
                    Ok(bytes)
                }
                Reply::Foreign => {
                    let other = DnsQuery {
                        question: DnsQuestion {
                            name: "other.test".to_string(),
                            ..query.question.clone()
                        },
                        ..query
                    };
                    let record = DnsRecord {
                        name: "other.test".to_string(),
                        ttl: 300,
                        rdata: vec![6, 6, 6, 6],
                        ..record
                    };
                    Ok(DnsResponse::answer(&other, vec![record]).to_bytes())
                }
                Reply::Timeout => Err(UpstreamError::Timeout {
                    endpoint: "mock".to_string(),
                }),
            }
        }

        fn protocol_name(&self) -> &'static str {
            "MOCK"
        }
    }

    fn build_query(id: u16, domain: &str) -> Vec<u8> {
        let mut packet = id.to_be_bytes().to_vec();
        packet.extend_from_slice(&[0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        for label in domain.split('.') {
            packet.push(label.len() as u8);
            packet.extend_from_slice(label.as_bytes());
        }
        packet.extend_from_slice(&[0x00, 0x00, 0x01, 0x00, 0x01]);
        packet
    }

    fn resolver(blocked: &[&str], upstream: Arc<MockUpstream>) -> Resolver {
        Resolver::new(
            Arc::new(Blocklist::from_domains(blocked.iter().copied())),
            Arc::new(DnsCache::new()),
            upstream,
            BlockPolicy::Sinkhole,
        )
    }

    #[tokio::test]
    async fn blocked_domain_gets_sinkhole_without_upstream() {
        let upstream = MockUpstream::new(Reply::Answer(300));
        let resolver = resolver(&["ads.example.com"], upstream.clone());

        let resolution = resolver.resolve(&build_query(0x5151, "ads.example.com")).await.unwrap();

        let (response, domain) = match resolution {
            Resolution::Blocked { response, domain } => (response, domain),
            other => panic!("expected blocked, got {other:?}"),
        };
        let response = DnsResponse::parse(&response).unwrap();
        assert_eq!(domain, "ads.example.com");
        assert_eq!(response.id, 0x5151);
        assert_eq!(response.rcode(), RCODE_NOERROR);
        assert_eq!(response.answers[0].rdata, vec![0, 0, 0, 0]);
        assert_eq!(upstream.calls(), 0);
        assert_eq!(resolver.cache_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn answers_are_cached_for_their_ttl() {
        let upstream = MockUpstream::new(Reply::Answer(300));
        let resolver = resolver(&[], upstream.clone());

        let first = resolver.resolve(&build_query(1, "example.com")).await.unwrap();
        assert!(matches!(first, Resolution::Forwarded { .. }));
        assert_eq!(upstream.calls(), 1);
        assert_eq!(resolver.cache_len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let second = resolver.resolve(&build_query(2, "example.com")).await.unwrap();
        let response = match second {
            Resolution::Cached { response, .. } => response,
            other => panic!("expected cache hit, got {other:?}"),
        };
        let response = DnsResponse::parse(&response).unwrap();
        assert_eq!(response.id, 2);
        assert_eq!(response.answers[0].rdata, vec![93, 184, 216, 34]);
        assert_eq!(upstream.calls(), 1);

        tokio::time::advance(Duration::from_secs(300)).await;
        let third = resolver.resolve(&build_query(3, "example.com")).await.unwrap();
        assert!(matches!(third, Resolution::Forwarded { .. }));
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn empty_and_error_answers_are_not_cached() {
        for reply in [Reply::NoAnswers, Reply::NxDomain, Reply::Answer(0)] {
            let upstream = MockUpstream::new(reply);
            let resolver = resolver(&[], upstream.clone());

            resolver.resolve(&build_query(1, "example.com")).await.unwrap();
            resolver.resolve(&build_query(2, "example.com")).await.unwrap();

            assert_eq!(upstream.calls(), 2);
            assert_eq!(resolver.cache_len(), 0);
        }
    }

    #[tokio::test]
    async fn answer_for_another_question_is_not_cached() {
        let upstream = MockUpstream::new(Reply::Foreign);
        let resolver = resolver(&[], upstream.clone());

        resolver.resolve(&build_query(1, "bank.example")).await.unwrap();
        let second = resolver.resolve(&build_query(2, "bank.example")).await.unwrap();

        assert!(matches!(second, Resolution::Forwarded { .. }));
        assert_eq!(upstream.calls(), 2);
        assert_eq!(resolver.cache_len(), 0);
    }

    #[tokio::test]
    async fn upstream_failure_is_an_error() {
        let upstream = MockUpstream::new(Reply::Timeout);
        let resolver = resolver(&[], upstream.clone());

        let err = resolver.resolve(&build_query(1, "example.com")).await.unwrap_err();

        assert!(matches!(err, ResolveError::Upstream(UpstreamError::Timeout { .. })));
        assert_eq!(resolver.cache_len(), 0);
    }

    #[tokio::test]
    async fn malformed_upstream_response_is_an_error() {
        let upstream = MockUpstream::new(Reply::Garbage);
        let resolver = resolver(&[], upstream);

        let err = resolver.resolve(&build_query(1, "example.com")).await.unwrap_err();

        assert!(matches!(err, ResolveError::Upstream(UpstreamError::Malformed { .. })));
    }

    #[tokio::test]
    async fn malformed_query_is_rejected_before_upstream() {
        let upstream = MockUpstream::new(Reply::Answer(300));
        let resolver = resolver(&[], upstream.clone());

        let err = resolver.resolve(&[0x12, 0x34, 0x01]).await.unwrap_err();

        assert!(matches!(err, ResolveError::Malformed(DnsError::Truncated)));
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_misses_are_all_answered() {
        let upstream = MockUpstream::new(Reply::Answer(300));
        let resolver = resolver(&[], upstream.clone());
        let queries: Vec<_> = (0..16).map(|id| build_query(id, "example.com")).collect();

        let results = futures::future::join_all(queries.iter().map(|q| resolver.resolve(q))).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert!((1..=16).contains(&upstream.calls()));
    }
}
