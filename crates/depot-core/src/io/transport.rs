//! Read-only HTTP retrieval with retry and mirror fallback.
//!
//! A fetch walks an ordered list of [`Location`]s. Each location gets a
//! bounded number of attempts with exponential backoff for transient errors;
//! permanent errors and (when authenticated) rate limits move straight on to
//! the next location. Only when every location has failed does the call
//! fail, as [`TransportError::RateLimited`] if any location reported a rate
//! limit and [`TransportError::AllSourcesUnavailable`] otherwise.
//!
//! ```text
//! Trying --ok--> Done
//!   |
//!   +--transient, attempts left--> Backoff --> Trying
//!   +--otherwise--> Failed --> NextLocation --> Trying | Exhausted
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use depot_schema::Sha256Digest;
use reqwest::{Client, StatusCode, header};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Response header some repositories use to publish a content digest.
pub const CHECKSUM_HEADER: &str = "x-checksum-sha256";

/// Default number of attempts per location.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// One place a resource can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Base URL. A `{path}` placeholder is expanded in place, otherwise
    /// the path is appended with a `/`.
    pub base: String,
    /// Resource path relative to the base.
    pub path: String,
    /// Whether the configured access token may be sent to this location.
    pub authenticated: bool,
}

impl Location {
    pub fn new(base: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            path: path.into(),
            authenticated: false,
        }
    }

    pub fn authenticated(mut self, yes: bool) -> Self {
        self.authenticated = yes;
        self
    }

    /// Full request URL.
    pub fn url(&self) -> String {
        let path = self.path.trim_start_matches('/');
        if self.base.contains("{path}") {
            self.base.replace("{path}", path)
        } else if path.is_empty() {
            self.base.clone()
        } else {
            format!("{}/{path}", self.base.trim_end_matches('/'))
        }
    }
}

/// Why a single location was given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection could not be established or the body could not be read.
    Connect(String),
    /// The attempt exceeded its timeout.
    Timeout,
    /// The server answered with a non-success status.
    Status(u16),
    /// The server reported an exhausted request quota.
    RateLimited { retry_after: Option<Duration> },
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(msg) => write!(f, "connection error: {msg}"),
            Self::Timeout => write!(f, "timed out"),
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::RateLimited {
                retry_after: Some(d),
            } => write!(f, "rate limited (retry after {}s)", d.as_secs()),
            Self::RateLimited { retry_after: None } => write!(f, "rate limited"),
        }
    }
}

/// A location that failed, recorded once regardless of how many tries it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationFailure {
    pub url: String,
    pub kind: FailureKind,
    pub tries: u32,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No locations to fetch from")]
    NoLocations,

    #[error("All {} sources unavailable (last: {})", .failures.len(), last_failure(.failures))]
    AllSourcesUnavailable { failures: Vec<LocationFailure> },

    #[error("Rate limited{}", .retry_after.map(|d| format!(", retry after {}s", d.as_secs())).unwrap_or_default())]
    RateLimited {
        retry_after: Option<Duration>,
        failures: Vec<LocationFailure>,
    },

    #[error("Cancelled")]
    Cancelled,
}

fn last_failure(failures: &[LocationFailure]) -> String {
    failures
        .last()
        .map_or_else(String::new, |f| format!("{} from {}", f.kind, f.url))
}

/// A successful fetch.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Bytes,
    /// URL that served the body.
    pub url: String,
    /// Digest published by the server, if any.
    pub digest: Option<Sha256Digest>,
    /// Locations that failed before this one succeeded.
    pub failures: Vec<LocationFailure>,
}

/// Retrieval seam used by the catalog and acquisition layers.
#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch the first available location, in order.
    async fn fetch(
        &self,
        locations: &[Location],
        cancel: &CancellationToken,
    ) -> Result<Fetched, TransportError>;
}

/// Retry and timeout settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub token: Option<String>,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            token: None,
            user_agent: crate::USER_AGENT.to_string(),
        }
    }
}

impl TransportConfig {
    /// Delay before attempt `attempt + 1`, doubling from the initial backoff.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Result of one HTTP attempt against one location.
enum Attempt {
    Done {
        body: Bytes,
        digest: Option<Sha256Digest>,
    },
    Transient(FailureKind),
    Permanent(FailureKind),
    RateLimited(Option<Duration>),
}

enum State {
    Trying { location: usize, attempt: u32 },
    Failed { location: usize, tries: u32, kind: FailureKind },
    NextLocation(usize),
    Exhausted,
}

/// reqwest-backed [`Fetch`] implementation.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn attempt(&self, location: &Location, url: &str) -> Attempt {
        let mut request = self
            .client
            .get(url)
            .header(header::USER_AGENT, &self.config.user_agent)
            .timeout(self.config.timeout);
        if location.authenticated {
            if let Some(token) = &self.config.token {
                request = request.bearer_auth(token);
            }
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Attempt::Transient(FailureKind::Timeout),
            Err(e) => return Attempt::Transient(FailureKind::Connect(e.to_string())),
        };

        let status = response.status();
        if is_rate_limited(status, response.headers()) {
            return Attempt::RateLimited(retry_after(response.headers()));
        }
        if status.is_success() {
            let digest = response
                .headers()
                .get(CHECKSUM_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| Sha256Digest::new(v).ok());
            return match response.bytes().await {
                Ok(body) => Attempt::Done { body, digest },
                Err(e) if e.is_timeout() => Attempt::Transient(FailureKind::Timeout),
                Err(e) => Attempt::Transient(FailureKind::Connect(e.to_string())),
            };
        }
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            Attempt::Transient(FailureKind::Status(status.as_u16()))
        } else {
            Attempt::Permanent(FailureKind::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl Fetch for HttpTransport {
    async fn fetch(
        &self,
        locations: &[Location],
        cancel: &CancellationToken,
    ) -> Result<Fetched, TransportError> {
        if locations.is_empty() {
            return Err(TransportError::NoLocations);
        }

        let mut failures = Vec::new();
        let mut state = State::Trying {
            location: 0,
            attempt: 1,
        };

        loop {
            state = match state {
                State::Trying { location, attempt } => {
                    if cancel.is_cancelled() {
                        return Err(TransportError::Cancelled);
                    }
                    let loc = &locations[location];
                    let url = loc.url();
                    debug!(url = %url, attempt, "fetching");

                    let outcome = tokio::select! {
                        () = cancel.cancelled() => return Err(TransportError::Cancelled),
                        outcome = self.attempt(loc, &url) => outcome,
                    };

                    let (kind, retryable, hint) = match outcome {
                        Attempt::Done { body, digest } => {
                            return Ok(Fetched {
                                body,
                                url,
                                digest,
                                failures,
                            });
                        }
                        Attempt::Permanent(kind) => (kind, false, None),
                        Attempt::Transient(kind) => (kind, true, None),
                        Attempt::RateLimited(retry_after) => {
                            // An exhausted token quota will not recover within our backoff window.
                            let token_in_use = loc.authenticated && self.config.token.is_some();
                            (FailureKind::RateLimited { retry_after }, !token_in_use, retry_after)
                        }
                    };

                    if retryable && attempt < self.config.max_attempts {
                        let delay = hint
                            .map_or_else(|| self.config.backoff(attempt), |h| h.min(self.config.max_backoff));
                        debug!(url = %url, attempt, error = %kind, delay_ms = delay.as_millis() as u64, "retrying");
                        tokio::select! {
                            () = cancel.cancelled() => return Err(TransportError::Cancelled),
                            () = tokio::time::sleep(delay) => {}
                        }
                        State::Trying {
                            location,
                            attempt: attempt + 1,
                        }
                    } else {
                        State::Failed {
                            location,
                            tries: attempt,
                            kind,
                        }
                    }
                }
                State::Failed {
                    location,
                    tries,
                    kind,
                } => {
                    let url = locations[location].url();
                    warn!(url = %url, tries, error = %kind, "source failed");
                    failures.push(LocationFailure { url, kind, tries });
                    State::NextLocation(location + 1)
                }
                State::NextLocation(next) if next < locations.len() => State::Trying {
                    location: next,
                    attempt: 1,
                },
                State::NextLocation(_) => State::Exhausted,
                State::Exhausted => {
                    let limited = failures.iter().rev().find_map(|f| match f.kind {
                        FailureKind::RateLimited { retry_after } => Some(retry_after),
                        _ => None,
                    });
                    return Err(match limited {
                        Some(retry_after) => TransportError::RateLimited {
                            retry_after,
                            failures,
                        },
                        None => TransportError::AllSourcesUnavailable { failures },
                    });
                }
            };
        }
    }
}

fn is_rate_limited(status: StatusCode, headers: &header::HeaderMap) -> bool {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return true;
    }
    status == StatusCode::FORBIDDEN
        && headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == "0")
}

fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(secs) = value(header::RETRY_AFTER.as_str()) {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }
    value("x-ratelimit-reset").map(|reset| {
        let now = chrono::Utc::now().timestamp();
        Duration::from_secs((reset - now).max(0) as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn fast_config() -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..TransportConfig::default()
        }
    }

    #[test]
    fn location_url_joins_and_expands() {
        assert_eq!(
            Location::new("https://a.example/", "/730/key.vdf").url(),
            "https://a.example/730/key.vdf"
        );
        assert_eq!(
            Location::new("https://cdn.example/gh/owner/repo@main/{path}", "key.vdf").url(),
            "https://cdn.example/gh/owner/repo@main/key.vdf"
        );
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = TransportConfig {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(300),
            ..TransportConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn falls_back_to_mirror_recording_one_failure() {
        let mut primary = Server::new_async().await;
        let mut mirror = Server::new_async().await;

        let p = primary
            .mock("GET", "/index.json")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;
        let m = mirror
            .mock("GET", "/index.json")
            .with_status(200)
            .with_body("mirror bytes")
            .create_async()
            .await;

        let transport = HttpTransport::new(fast_config());
        let locations = [
            Location::new(primary.url(), "index.json"),
            Location::new(mirror.url(), "index.json"),
        ];
        let fetched = transport
            .fetch(&locations, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(&fetched.body[..], b"mirror bytes");
        assert_eq!(fetched.failures.len(), 1);
        assert_eq!(fetched.failures[0].url, locations[0].url());
        assert_eq!(fetched.failures[0].kind, FailureKind::Status(503));
        assert_eq!(fetched.failures[0].tries, 3);
        p.assert_async().await;
        m.assert_async().await;
    }

    #[tokio::test]
    async fn permanent_status_is_not_retried() {
        let mut server = Server::new_async().await;
        let missing = server
            .mock("GET", "/gone")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let transport = HttpTransport::new(fast_config());
        let err = transport
            .fetch(&[Location::new(server.url(), "gone")], &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            TransportError::AllSourcesUnavailable { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].tries, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        missing.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_with_token_moves_on_without_retry() {
        let mut server = Server::new_async().await;
        let limited = server
            .mock("GET", "/index.json")
            .match_header("authorization", "Bearer secret")
            .with_status(429)
            .with_header("retry-after", "30")
            .expect(1)
            .create_async()
            .await;

        let transport = HttpTransport::new(TransportConfig {
            token: Some("secret".into()),
            ..fast_config()
        });
        let err = transport
            .fetch(
                &[Location::new(server.url(), "index.json").authenticated(true)],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            TransportError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(30)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        limited.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_without_token_is_retried() {
        let mut server = Server::new_async().await;
        let limited = server
            .mock("GET", "/index.json")
            .with_status(403)
            .with_header("x-ratelimit-remaining", "0")
            .expect(3)
            .create_async()
            .await;

        let transport = HttpTransport::new(fast_config());
        let err = transport
            .fetch(&[Location::new(server.url(), "index.json")], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::RateLimited { .. }));
        limited.assert_async().await;
    }

    #[tokio::test]
    async fn token_only_sent_to_authenticated_locations() {
        let mut primary = Server::new_async().await;
        let mut mirror = Server::new_async().await;
        let p = primary
            .mock("GET", "/f")
            .match_header("authorization", "Bearer secret")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;
        let m = mirror
            .mock("GET", "/f")
            .match_header("authorization", Matcher::Missing)
            .with_body("ok")
            .create_async()
            .await;

        let transport = HttpTransport::new(TransportConfig {
            token: Some("secret".into()),
            max_attempts: 1,
            ..fast_config()
        });
        let fetched = transport
            .fetch(
                &[
                    Location::new(primary.url(), "f").authenticated(true),
                    Location::new(mirror.url(), "f"),
                ],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(&fetched.body[..], b"ok");
        p.assert_async().await;
        m.assert_async().await;
    }

    #[tokio::test]
    async fn reads_checksum_header() {
        let mut server = Server::new_async().await;
        let digest = Sha256Digest::compute(b"hello");
        server
            .mock("GET", "/f")
            .with_header(CHECKSUM_HEADER, digest.as_str())
            .with_body("hello")
            .create_async()
            .await;

        let transport = HttpTransport::new(fast_config());
        let fetched = transport
            .fetch(&[Location::new(server.url(), "f")], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(fetched.digest, Some(digest));
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let transport = HttpTransport::new(fast_config());
        let err = transport
            .fetch(&[Location::new("http://127.0.0.1:9", "x")], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }

    #[tokio::test]
    async fn latest_rate_limit_hint_wins() {
        let mut primary = Server::new_async().await;
        let mut mirror = Server::new_async().await;
        for (server, secs) in [(&mut primary, "30"), (&mut mirror, "90")] {
            server
                .mock("GET", "/index.json")
                .with_status(429)
                .with_header("retry-after", secs)
                .create_async()
                .await;
        }

        let transport = HttpTransport::new(TransportConfig {
            token: Some("secret".into()),
            ..fast_config()
        });
        let err = transport
            .fetch(
                &[
                    Location::new(primary.url(), "index.json").authenticated(true),
                    Location::new(mirror.url(), "index.json").authenticated(true),
                ],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            TransportError::RateLimited { retry_after, failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(retry_after, Some(Duration::from_secs(90)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_interrupts_backoff() {
        let mut server = Server::new_async().await;
        let flaky = server
            .mock("GET", "/index.json")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let transport = HttpTransport::new(TransportConfig {
            initial_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(60),
            ..fast_config()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            transport.fetch(&[Location::new(server.url(), "index.json")], &cancel),
        )
        .await
        .expect("cancel did not cut the backoff short");

        assert!(matches!(result, Err(TransportError::Cancelled)));
        flaky.assert_async().await;
    }

    #[tokio::test]
    async fn timeouts_are_retried_then_fall_back() {
        // Accepts connections and never answers.
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let silent_url = format!("http://{}", silent.local_addr().unwrap());
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = silent.accept().await {
                held.push(socket);
            }
        });

        let mut mirror = Server::new_async().await;
        let m = mirror
            .mock("GET", "/index.json")
            .with_body("mirror bytes")
            .expect(1)
            .create_async()
            .await;

        let transport = HttpTransport::new(TransportConfig {
            timeout: Duration::from_millis(200),
            max_attempts: 2,
            ..fast_config()
        });
        let fetched = transport
            .fetch(
                &[
                    Location::new(silent_url.as_str(), "index.json"),
                    Location::new(mirror.url(), "index.json"),
                ],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(&fetched.body[..], b"mirror bytes");
        assert_eq!(fetched.failures.len(), 1);
        assert_eq!(fetched.failures[0].kind, FailureKind::Timeout);
        assert_eq!(fetched.failures[0].tries, 2);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn empty_location_list_fails() {
        let transport = HttpTransport::new(fast_config());
        let err = transport.fetch(&[], &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::NoLocations));
    }
}
