use std::future::Future;
use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url, redirect};

use crate::config::{RetryPolicy, ScraperConfig};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ACCEPTED_ENCODINGS: &str = "gzip; q=1.0, identity; q=0.5";
const MAX_REDIRECTS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
    #[error("Timed out fetching {url} after {attempts} attempt(s)")]
    Timeout { url: String, attempts: u32 },
    #[error("HTTP {status} for {url}")]
    ClientError { url: String, status: StatusCode },
    #[error("Site unreachable at {url} after {attempts} attempt(s): {message}")]
    SiteUnreachable {
        url: String,
        attempts: u32,
        message: String,
    },
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Outcome of a single request attempt, before the retry policy is applied.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("server temporarily unavailable")]
    Busy,
    #[error("client error {0}")]
    Client(StatusCode),
    #[error("{0}")]
    Other(String),
}

impl Failure {
    fn into_error(self, url: &str, attempts: u32) -> TransportError {
        let url = url.to_string();
        match self {
            Failure::Timeout(_) => TransportError::Timeout { url, attempts },
            Failure::Client(status) => TransportError::ClientError { url, status },
            // `with_retries` pauses on Busy without limit, so it never maps it.
            failure @ (Failure::Busy | Failure::Other(_)) => TransportError::SiteUnreachable {
                url,
                attempts,
                message: failure.to_string(),
            },
        }
    }
}

/// A fetched page: the post-redirect URL and the decoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub url: String,
    pub body: String,
}

/// Session-bound access to the site.
///
/// Implementations keep whatever session state the remote side expects
/// (cookies) between calls, so calls must be issued in program order.
pub trait Fetcher {
    /// GETs `url`, or POSTs `form` to it form-encoded when present.
    fn fetch(
        &mut self,
        url: &str,
        form: Option<&[(String, String)]>,
    ) -> impl Future<Output = Result<Fetched, TransportError>>;

    /// POSTs a SOAP 1.1 envelope to `url`.
    fn call_soap(
        &mut self,
        url: &str,
        action: &str,
        envelope: &str,
    ) -> impl Future<Output = Result<Fetched, TransportError>>;
}

enum Payload<'a> {
    Get,
    Form(&'a [(String, String)]),
    Soap { action: &'a str, envelope: &'a str },
}

/// Cookie-aware HTTP session backed by `reqwest`.
#[derive(Debug)]
pub struct Session {
    client: Client,
    retry: RetryPolicy,
}

impl Session {
    pub fn new(config: &ScraperConfig) -> Result<Self, TransportError> {
        let client = client_builder(config).build()?;
        Ok(Self::with_client(client, config))
    }

    fn with_client(client: Client, config: &ScraperConfig) -> Self {
        Self {
            client,
            retry: config.retry.clone(),
        }
    }

    async fn send(&self, url: &str, payload: Payload<'_>) -> Result<Fetched, TransportError> {
        let url = encode_url(url)?;
        log::debug!("Fetching {}", url);
        with_retries(&self.retry, url.as_str(), || self.attempt(&url, &payload)).await
    }

    async fn attempt(&self, url: &Url, payload: &Payload<'_>) -> Result<Fetched, Failure> {
        let request = match payload {
            Payload::Get => self.client.get(url.clone()),
            Payload::Form(fields) => self
                .client
                .post(url.clone())
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encode_form(url, fields)),
            Payload::Soap { action, envelope } => self
                .client
                .post(url.clone())
                .header(CONTENT_TYPE, "text/xml; charset=utf-8")
                .header("SOAPAction", *action)
                .body(envelope.to_string()),
        };

        let response = request
            .header(ACCEPT_ENCODING, ACCEPTED_ENCODINGS)
            .send()
            .await
            .map_err(classify)?;

        check_status(response.status())?;

        let final_url = response.url().to_string();
        if final_url != url.as_str() {
            log::debug!("{} resolved to {}", url, final_url);
        }

        let gzipped = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
        let payload = response.bytes().await.map_err(classify)?;

        Ok(Fetched {
            url: final_url,
            body: decode_body(&payload, gzipped),
        })
    }
}

impl Fetcher for Session {
    async fn fetch(
        &mut self,
        url: &str,
        form: Option<&[(String, String)]>,
    ) -> Result<Fetched, TransportError> {
        let payload = match form {
            Some(fields) => Payload::Form(fields),
            None => Payload::Get,
        };
        self.send(url, payload).await
    }

    async fn call_soap(
        &mut self,
        url: &str,
        action: &str,
        envelope: &str,
    ) -> Result<Fetched, TransportError> {
        self.send(url, Payload::Soap { action, envelope }).await
    }
}

fn client_builder(config: &ScraperConfig) -> reqwest::ClientBuilder {
    Client::builder()
        .cookie_store(true)
        .timeout(config.timeout)
        .user_agent(config.site.user_agent.as_str())
        .redirect(redirect::Policy::custom(|attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else {
                log::debug!("Redirect ({}): {}", attempt.status(), attempt.url());
                attempt.follow()
            }
        }))
}

fn classify(e: reqwest::Error) -> Failure {
    if e.is_timeout() {
        Failure::Timeout(e.to_string())
    } else if let Some(status) = e.status() {
        check_status(status).err().unwrap_or(Failure::Other(e.to_string()))
    } else {
        Failure::Other(e.to_string())
    }
}

fn check_status(status: StatusCode) -> Result<(), Failure> {
    match status {
        StatusCode::SERVICE_UNAVAILABLE => Err(Failure::Busy),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Err(Failure::Other(format!("HTTP {}", status)))
        }
        s if s.is_client_error() => Err(Failure::Client(s)),
        s if s.is_success() => Ok(()),
        s => Err(Failure::Other(format!("HTTP {}", s))),
    }
}

/// Runs `attempt` until it succeeds or the policy gives up.
///
/// Timeouts and unclassified failures share one budget of
/// `policy.max_retries` retries, each preceded by `policy.backoff`. A busy
/// server is retried after `policy.busy_pause` without touching the budget.
/// Client errors are returned immediately.
pub async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    url: &str,
    mut attempt: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    let mut failures: u32 = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(Failure::Busy) => {
                log::warn!(
                    "{} is temporarily unavailable, retrying in {:?}",
                    url,
                    policy.busy_pause
                );
                pause(policy.busy_pause).await;
            }
            Err(failure @ Failure::Client(_)) => {
                log::error!("Fetching {} failed: {}", url, failure);
                return Err(failure.into_error(url, failures + 1));
            }
            Err(failure) => {
                failures += 1;
                if failures > policy.max_retries {
                    log::error!(
                        "Giving up on {} after {} attempt(s): {}",
                        url,
                        failures,
                        failure
                    );
                    return Err(failure.into_error(url, failures));
                }
                log::warn!(
                    "Fetching {} failed ({}), retry {}/{} in {:?}",
                    url,
                    failure,
                    failures,
                    policy.max_retries,
                    policy.backoff
                );
                pause(policy.backoff).await;
            }
        }
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

/// Parses `raw`, percent-encoding any path characters outside the URL-safe set.
pub fn encode_url(raw: &str) -> Result<Url, TransportError> {
    Url::parse(raw).map_err(|e| TransportError::InvalidUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })
}

fn encode_form(url: &Url, fields: &[(String, String)]) -> String {
    let mut scratch = url.clone();
    scratch.set_query(None);
    scratch
        .query_pairs_mut()
        .extend_pairs(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    scratch.query().unwrap_or_default().to_string()
}

/// Gunzips `payload` when flagged (or when it carries the gzip magic bytes).
/// A payload that fails to decompress is returned as-is.
pub fn decode_body(payload: &[u8], gzipped: bool) -> String {
    if gzipped || payload.starts_with(&GZIP_MAGIC) {
        let mut decoded = Vec::new();
        match GzDecoder::new(payload).read_to_end(&mut decoded) {
            Ok(_) => return String::from_utf8_lossy(&decoded).into_owned(),
            Err(e) => log::debug!("Body is not gzip-compressed ({}), using raw payload", e),
        }
    }
    String::from_utf8_lossy(payload).into_owned()
}
