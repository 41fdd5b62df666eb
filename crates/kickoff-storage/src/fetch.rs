use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use kickoff_core::Clock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window: Duration,
    /// Extra wait on top of the exact time for the oldest request to age out.
    pub padding: Duration,
    /// Pause after the provider answers 429 before the single retry.
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // football-data.org free tier allows 10/min; keep one in reserve.
        Self {
            max_requests: 9,
            window: Duration::from_secs(60),
            padding: Duration::from_millis(100),
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Client-side sliding window over request timestamps. Not shared across
/// processes; state is lost on restart.
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    timestamps: Mutex<VecDeque<DateTime<Utc>>>,
}

impl SlidingWindowLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn prune(&self, timestamps: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        let window = chrono::Duration::from_std(self.config.window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        while let Some(oldest) = timestamps.front() {
            if now.signed_duration_since(*oldest) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Wait until a request slot is free, then claim it. Returns how long the
    /// caller was held back.
    pub async fn acquire(&self) -> Duration {
        let mut timestamps = self.timestamps.lock().await;
        let mut waited = Duration::ZERO;
        let max_requests = self.config.max_requests.max(1);

        loop {
            let now = self.clock.now();
            self.prune(&mut timestamps, now);
            if timestamps.len() < max_requests {
                timestamps.push_back(now);
                return waited;
            }

            let Some(oldest) = timestamps.front().copied() else {
                continue;
            };
            let age = now
                .signed_duration_since(oldest)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let wait = self.config.window.saturating_sub(age) + self.config.padding;
            info!(
                wait_ms = wait.as_millis() as u64,
                in_window = timestamps.len(),
                "rate limit reached, waiting"
            );
            self.clock.sleep(wait).await;
            waited += wait;
        }
    }

    pub async fn reset(&self) {
        self.timestamps.lock().await.clear();
    }

    pub async fn in_window(&self) -> usize {
        let mut timestamps = self.timestamps.lock().await;
        self.prune(&mut timestamps, self.clock.now());
        timestamps.len()
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub headers: Vec<(String, String)>,
    pub rate_limit: RateLimitConfig,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            headers: Vec::new(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider responded {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("provider still rate limiting after cooldown retry for {url}")]
    RateLimited { url: String },
}

enum Attempt {
    Done(FetchedResponse),
    Throttled,
}

pub struct RateLimitedClient {
    client: reqwest::Client,
    limiter: SlidingWindowLimiter,
    clock: Arc<dyn Clock>,
}

impl RateLimitedClient {
    pub fn new(config: HttpClientConfig, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name {name}"))?;
            let mut value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header {name}"))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .default_headers(headers);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            limiter: SlidingWindowLimiter::new(config.rate_limit, clock.clone()),
            clock,
        })
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    /// GET `url` under the request quota. A 429 clears the window, waits out
    /// the cooldown and retries exactly once.
    pub async fn fetch(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("provider_fetch", url);
        async {
            if let Attempt::Done(resp) = self.fetch_once(url).await? {
                return Ok(resp);
            }

            let cooldown = self.limiter.config().cooldown;
            warn!(
                cooldown_secs = cooldown.as_secs(),
                "429 from provider, backing off before retry"
            );
            self.limiter.reset().await;
            self.clock.sleep(cooldown).await;

            match self.fetch_once(url).await? {
                Attempt::Done(resp) => Ok(resp),
                Attempt::Throttled => Err(FetchError::RateLimited {
                    url: url.to_string(),
                }),
            }
        }
        .instrument(span)
        .await
    }

    async fn fetch_once(&self, url: &str) -> Result<Attempt, FetchError> {
        self.limiter.acquire().await;

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Attempt::Throttled);
        }

        let final_url = resp.url().to_string();
        let body = resp.bytes().await?.to_vec();
        if !status.is_success() {
            return Err(FetchError::Provider {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(Attempt::Done(FetchedResponse {
            status,
            final_url,
            body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{extract::State, http::HeaderMap as AxumHeaders, routing::get, Router};
    use chrono::TimeZone;
    use kickoff_core::ManualClock;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 13, 11, 0, 0).single().unwrap()
    }

    async fn spawn(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn client(clock: Arc<ManualClock>) -> RateLimitedClient {
        RateLimitedClient::new(
            HttpClientConfig {
                headers: vec![("X-Auth-Token".into(), "secret".into())],
                ..Default::default()
            },
            clock,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn tenth_request_waits_for_oldest_to_leave_window() {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = SlidingWindowLimiter::new(RateLimitConfig::default(), clock.clone());

        for _ in 0..9 {
            assert_eq!(limiter.acquire().await, Duration::ZERO);
        }
        let waited = limiter.acquire().await;

        assert_eq!(waited, Duration::from_millis(60_100));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(60_100)]);
        assert_eq!(limiter.in_window().await, 1);
    }

    #[tokio::test]
    async fn wait_is_measured_from_oldest_timestamp() {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = SlidingWindowLimiter::new(RateLimitConfig::default(), clock.clone());

        for i in 0..9 {
            if i > 0 {
                clock.advance(Duration::from_secs(5));
            }
            limiter.acquire().await;
        }
        // oldest is 40s old, so 20s + padding remain
        let waited = limiter.acquire().await;
        assert_eq!(waited, Duration::from_millis(20_100));
        assert_eq!(limiter.in_window().await, 9);
    }

    #[tokio::test]
    async fn requests_spread_over_the_window_never_wait() {
        let clock = Arc::new(ManualClock::new(start()));
        let limiter = SlidingWindowLimiter::new(RateLimitConfig::default(), clock.clone());

        for _ in 0..30 {
            assert_eq!(limiter.acquire().await, Duration::ZERO);
            clock.advance(Duration::from_secs(7));
        }
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn retries_once_after_429_cooldown() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/matches",
                get(|State(hits): State<Arc<AtomicUsize>>, headers: AxumHeaders| async move {
                    assert_eq!(headers["x-auth-token"], "secret");
                    if hits.fetch_add(1, Ordering::SeqCst) == 0 {
                        (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down".to_string())
                    } else {
                        (axum::http::StatusCode::OK, r#"{"matches":[]}"#.to_string())
                    }
                }),
            )
            .with_state(hits.clone());
        let addr = spawn(router).await;
        let clock = Arc::new(ManualClock::new(start()));
        let client = client(clock.clone());

        let resp = client.fetch(&format!("http://{addr}/matches")).await.unwrap();

        assert_eq!(resp.status, StatusCode::OK);
        let value: serde_json::Value = resp.json().unwrap();
        assert!(value["matches"].as_array().unwrap().is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60)]);
        // window was cleared before the retry claimed its slot
        assert_eq!(client.limiter().in_window().await, 1);
    }

    #[tokio::test]
    async fn second_429_is_surfaced() {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/matches",
                get(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down")
                }),
            )
            .with_state(hits.clone());
        let addr = spawn(router).await;
        let clock = Arc::new(ManualClock::new(start()));

        let err = client(clock.clone())
            .fetch(&format!("http://{addr}/matches"))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::RateLimited { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_success_status_carries_status_and_body() {
        let router = Router::new().route(
            "/matches",
            get(|| async { (axum::http::StatusCode::FORBIDDEN, "restricted resource") }),
        );
        let addr = spawn(router).await;
        let clock = Arc::new(ManualClock::new(start()));

        let err = client(clock.clone())
            .fetch(&format!("http://{addr}/matches"))
            .await
            .unwrap_err();

        match &err {
            FetchError::Provider { status, body } => {
                assert_eq!(*status, 403);
                assert_eq!(body, "restricted resource");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.to_string().contains("403"));
        assert!(clock.sleeps().is_empty());
    }
}
