//! DNS-over-HTTPS upstream (RFC 8484).
//!
//! Queries are sent as HTTP POST requests whose body is the raw DNS message:
//!
//! ```text
//! POST /dns-query HTTP/2
//! Content-Type: application/dns-message
//! Accept: application/dns-message
//!
//! <raw DNS message bytes>
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{RoundRobin, Upstream};
use crate::dns;
use crate::error::{DnsError, UpstreamError};

/// Content type for DNS wire-format bodies (RFC 8484 §6).
const DNS_MESSAGE_CONTENT_TYPE: &str = "application/dns-message";

pub struct HttpsUpstream {
    client: reqwest::Client,
    pool: RoundRobin<String>,
    timeout: Duration,
}

impl HttpsUpstream {
    /// Build the upstream with a pooled TLS client.
    pub fn new(pool: RoundRobin<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            client,
            pool,
            timeout,
        })
    }
}

#[async_trait]
impl Upstream for HttpsUpstream {
    async fn ask_question(&self, query: &[u8]) -> Result<Vec<u8>, UpstreamError> {
        let url = self.pool.next()?;
        let network = |e: reqwest::Error| {
            if e.is_timeout() {
                UpstreamError::Timeout {
                    endpoint: url.clone(),
                }
            } else {
                UpstreamError::Network {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        };
        let timed_out = |_: tokio::time::error::Elapsed| UpstreamError::Timeout {
            endpoint: url.clone(),
        };

        debug!(url = %url, message_len = query.len(), "Sending DoH query");

        let response = tokio::time::timeout(
            self.timeout,
            self.client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, DNS_MESSAGE_CONTENT_TYPE)
                .header(reqwest::header::ACCEPT, DNS_MESSAGE_CONTENT_TYPE)
                .body(query.to_vec())
                .send(),
        )
        .await
        .map_err(timed_out)?
        .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::BadStatus {
                endpoint: url.clone(),
                status: status.as_u16(),
            });
        }

        let body = tokio::time::timeout(self.timeout, read_body(response))
            .await
            .map_err(timed_out)?
            .map_err(network)?
            .ok_or_else(|| UpstreamError::Malformed {
                endpoint: url.clone(),
                source: DnsError::TooLarge,
            })?;

        dns::response_id(&body).map_err(|source| UpstreamError::Malformed {
            endpoint: url.clone(),
            source,
        })?;

        debug!(url = %url, response_len = body.len(), "DoH response received");

        Ok(body)
    }

    fn protocol_name(&self) -> &'static str {
        "HTTPS"
    }
}

/// Read the body, giving up with `None` once it outgrows a DNS message.
async fn read_body(mut response: reqwest::Response) -> Result<Option<Vec<u8>>, reqwest::Error> {
    if response
        .content_length()
        .is_some_and(|len| len > dns::MAX_MESSAGE_LEN as u64)
    {
        return Ok(None);
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > dns::MAX_MESSAGE_LEN {
            return Ok(None);
        }
        body.extend_from_slice(&chunk);
    }

    Ok(Some(body))
}
