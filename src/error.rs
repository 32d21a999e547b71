//! Error types for the query pipeline.
//!
//! Every failure that can happen while handling a single query is an
//! ordinary value here; the transport logs it and drops the query.

use thiserror::Error;

/// Wire-format decoding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DnsError {
    #[error("message truncated")]
    Truncated,

    #[error("message has no question")]
    NoQuestion,

    #[error("message is not a query")]
    NotAQuery,

    #[error("message is not a response")]
    NotAResponse,

    #[error("invalid label")]
    BadLabel,

    #[error("compression pointer loop")]
    PointerLoop,

    #[error("domain name exceeds 255 bytes")]
    NameTooLong,

    #[error("record data does not match its length")]
    BadRecordData,

    #[error("message exceeds 65535 bytes")]
    TooLarge,
}

/// Upstream pool errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("no upstream endpoints configured")]
    Empty,
}

/// Failures talking to an upstream resolver.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("timed out waiting for {endpoint}")]
    Timeout { endpoint: String },

    #[error("network error talking to {endpoint}: {reason}")]
    Network { endpoint: String, reason: String },

    #[error("{endpoint} returned HTTP {status}")]
    BadStatus { endpoint: String, status: u16 },

    #[error("malformed response from {endpoint}: {source}")]
    Malformed {
        endpoint: String,
        #[source]
        source: DnsError,
    },

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Why a query could not be answered.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed query: {0}")]
    Malformed(#[from] DnsError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}
