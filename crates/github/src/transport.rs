//! HTTP transport and response classification.
//!
//! [`Transport`] is the seam between the scheduler and the network: the
//! production [`HttpTransport`] posts to the GraphQL endpoint with reqwest,
//! tests substitute scripted implementations. Classification of a
//! [`RawResponse`] into data or a typed [`ClientError`] is transport
//! independent.

use std::time::Duration;

use async_trait::async_trait;
use contributors::request_body;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use serde_json::Value;

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::request::RequestEnvelope;

/// Quota-remaining header present on every provider response.
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
/// Epoch second at which the quota window resets.
pub const RESET_HEADER: &str = "x-ratelimit-reset";

/// Sends one envelope and returns the undecoded response.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs a single POST. Only transport failures are errors here;
    /// every HTTP status is returned as a [`RawResponse`].
    async fn post(&self, envelope: &RequestEnvelope) -> Result<RawResponse, ClientError>;
}

/// Rate-limit signalling extracted from response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// `x-ratelimit-remaining`.
    pub remaining: Option<u64>,
    /// `x-ratelimit-reset`, as Unix seconds.
    pub reset_at: Option<i64>,
    /// `retry-after`, in seconds.
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    /// Parses the headers that drive backoff decisions.
    pub fn parse(headers: &HeaderMap) -> Self {
        fn number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        }
        Self {
            remaining: number(headers, REMAINING_HEADER),
            reset_at: number(headers, RESET_HEADER),
            retry_after: number(headers, RETRY_AFTER.as_str()),
        }
    }
}

/// An HTTP response before classification.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Rate-limit headers.
    pub headers: RateLimitHeaders,
    /// Response body bytes.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Classifies the response.
    ///
    /// - `200` with non-null `data`: the decoded body.
    /// - `200`, `data` null or absent, quota header `0`: [`ClientError::RateLimited`],
    ///   waiting until the advertised reset (never negative).
    /// - `403` without a quota header: [`ClientError::AbuseDetected`],
    ///   waiting for `retry-after`.
    /// - `200` otherwise: [`ClientError::Graphql`] with the full payload.
    /// - any other status: [`ClientError::Http`].
    ///
    /// `now` is the current Unix time in seconds; `fallback` is used when a
    /// throttling response carries no timing header.
    pub fn classify(self, now: i64, fallback: Duration) -> Result<Value, ClientError> {
        match self.status {
            200 => {
                let payload: Value = serde_json::from_slice(&self.body)?;
                let has_data = payload.get("data").is_some_and(|d| !d.is_null());
                if has_data {
                    return Ok(payload);
                }
                if self.headers.remaining == Some(0) {
                    let after = match self.headers.reset_at {
                        Some(reset) => Duration::from_secs(
                            u64::try_from(reset.saturating_sub(now)).unwrap_or(0),
                        ),
                        None => fallback,
                    };
                    return Err(ClientError::RateLimited { after });
                }
                Err(ClientError::Graphql { payload })
            }
            403 if self.headers.remaining.is_none() => {
                let after = self
                    .headers
                    .retry_after
                    .map_or(fallback, Duration::from_secs);
                Err(ClientError::AbuseDetected { after })
            }
            status => Err(ClientError::Http {
                status,
                body: truncate_body(&self.body),
            }),
        }
    }
}

/// Posts envelopes to the GraphQL endpoint over HTTPS.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpTransport {
    /// Builds a transport with the provider's expected default headers.
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            http,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, envelope: &RequestEnvelope) -> Result<RawResponse, ClientError> {
        let body = serde_json::to_vec(&request_body(&envelope.operation()))?;
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(envelope.token.expose())
            .body(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let headers = RateLimitHeaders::parse(response.headers());
        let body = response.bytes().await?.to_vec();
        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    const MAX_LEN: usize = 4096;
    let mut body = String::from_utf8_lossy(bytes).to_string();
    if body.len() > MAX_LEN {
        let mut cut = MAX_LEN;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FALLBACK: Duration = Duration::from_secs(60);

    fn response(status: u16, headers: RateLimitHeaders, body: Value) -> RawResponse {
        RawResponse {
            status,
            headers,
            body: serde_json::to_vec(&body).unwrap(),
        }
    }

    #[test]
    fn data_is_success() {
        let r = response(200, RateLimitHeaders::default(), json!({"data": {"viewer": {}}}));
        assert_eq!(r.classify(0, FALLBACK).unwrap()["data"]["viewer"], json!({}));
    }

    #[test]
    fn null_data_with_exhausted_quota_waits_until_reset() {
        let headers = RateLimitHeaders {
            remaining: Some(0),
            reset_at: Some(1_030),
            retry_after: None,
        };
        let r = response(200, headers, json!({"data": null}));
        assert!(matches!(
            r.classify(1_000, FALLBACK),
            Err(ClientError::RateLimited { after }) if after == Duration::from_secs(30)
        ));
    }

    #[test]
    fn reset_in_the_past_means_no_wait() {
        let headers = RateLimitHeaders {
            remaining: Some(0),
            reset_at: Some(900),
            retry_after: None,
        };
        let r = response(200, headers, json!({"data": null}));
        assert!(matches!(
            r.classify(1_000, FALLBACK),
            Err(ClientError::RateLimited { after }) if after == Duration::ZERO
        ));
    }

    #[test]
    fn garbage_reset_header_cannot_overflow() {
        let headers = RateLimitHeaders {
            remaining: Some(0),
            reset_at: Some(-9_223_372_036_854_775_000),
            retry_after: None,
        };
        let r = response(200, headers, json!({"data": null}));
        assert!(matches!(
            r.classify(1_000, FALLBACK),
            Err(ClientError::RateLimited { after }) if after == Duration::ZERO
        ));

        let headers = RateLimitHeaders {
            reset_at: Some(i64::MAX),
            ..headers
        };
        let r = response(200, headers, json!({"data": null}));
        assert!(matches!(
            r.classify(-1_000, FALLBACK),
            Err(ClientError::RateLimited { after }) if after == Duration::from_secs(i64::MAX as u64)
        ));
    }

    #[test]
    fn null_data_with_quota_left_is_a_graphql_error() {
        let headers = RateLimitHeaders {
            remaining: Some(10),
            ..RateLimitHeaders::default()
        };
        let body = json!({"data": null, "errors": [{"message": "boom"}]});
        let r = response(200, headers, body.clone());
        assert!(matches!(
            r.classify(0, FALLBACK),
            Err(ClientError::Graphql { payload }) if payload == body
        ));
    }

    #[test]
    fn forbidden_without_quota_header_is_abuse() {
        let headers = RateLimitHeaders {
            retry_after: Some(7),
            ..RateLimitHeaders::default()
        };
        let r = response(403, headers, json!({"message": "abuse"}));
        assert!(matches!(
            r.classify(0, FALLBACK),
            Err(ClientError::AbuseDetected { after }) if after == Duration::from_secs(7)
        ));
    }

    #[test]
    fn forbidden_with_quota_header_is_plain_http_error() {
        let headers = RateLimitHeaders {
            remaining: Some(4000),
            ..RateLimitHeaders::default()
        };
        let r = response(403, headers, json!({"message": "no"}));
        assert!(matches!(
            r.classify(0, FALLBACK),
            Err(ClientError::Http { status: 403, .. })
        ));
    }

    #[test]
    fn unauthorized_is_http_error() {
        let r = response(401, RateLimitHeaders::default(), json!({"message": "Bad credentials"}));
        assert!(matches!(r.classify(0, FALLBACK), Err(ClientError::Http { status: 401, .. })));
    }

    #[test]
    fn headers_are_parsed() {
        let mut map = HeaderMap::new();
        map.insert(REMAINING_HEADER, HeaderValue::from_static("0"));
        map.insert(RESET_HEADER, HeaderValue::from_static("1700000000"));
        map.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(
            RateLimitHeaders::parse(&map),
            RateLimitHeaders {
                remaining: Some(0),
                reset_at: Some(1_700_000_000),
                retry_after: Some(12),
            }
        );
    }
}
