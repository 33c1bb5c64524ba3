//! Per-provider admission control over requests and tokens per minute.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Ceilings applied to one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            tokens_per_minute: 90_000,
        }
    }
}

/// Point-in-time view of a provider's window, mostly for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub limits: RateLimitConfig,
    pub requests_in_window: u32,
    pub tokens_in_window: u64,
}

#[derive(Debug, Clone, Copy)]
struct Admission {
    at: Instant,
    tokens: u64,
}

#[derive(Debug)]
struct ProviderWindow {
    limits: RateLimitConfig,
    admissions: VecDeque<Admission>,
    tokens_in_window: u64,
}

enum Decision {
    Admitted,
    Wait(Duration),
}

impl ProviderWindow {
    fn new(limits: RateLimitConfig) -> Self {
        Self {
            limits,
            admissions: VecDeque::new(),
            tokens_in_window: 0,
        }
    }

    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.admissions.front() {
            if now.duration_since(front.at) < window {
                break;
            }
            self.tokens_in_window -= front.tokens;
            self.admissions.pop_front();
        }
    }

    /// Check-and-increment of both counters under the caller's lock.
    fn try_admit(&mut self, now: Instant, window: Duration, estimated: u64) -> Decision {
        self.evict(now, window);

        let max_requests = self.limits.requests_per_minute.max(1) as usize;
        let max_tokens = self.limits.tokens_per_minute;

        // A request larger than the whole budget only runs alone in an empty window.
        let charged = estimated.min(max_tokens);

        let requests_ok = self.admissions.len() < max_requests;
        let tokens_ok = self.tokens_in_window + charged <= max_tokens;
        if requests_ok && tokens_ok {
            self.admissions.push_back(Admission { at: now, tokens: charged });
            self.tokens_in_window += charged;
            return Decision::Admitted;
        }

        // Find the earliest expiry after which both ceilings would hold.
        let mut requests = self.admissions.len();
        let mut tokens = self.tokens_in_window;
        for admission in &self.admissions {
            requests -= 1;
            tokens -= admission.tokens;
            if requests < max_requests && tokens + charged <= max_tokens {
                let expires = admission.at + window;
                return Decision::Wait(expires.saturating_duration_since(now));
            }
        }
        Decision::Wait(window)
    }
}

/// Rolling-window admission control keyed by provider name.
///
/// [`RateLimiter::acquire`] suspends the caller until the request fits under both
/// ceilings; it never rejects. Each admission is logged with its timestamp so that
/// no rolling window of [`RateLimiter::window`] ever holds more than the configured
/// requests or tokens. The check and the increment happen under a single lock, so
/// two concurrent callers can never both claim the last slot.
#[derive(Debug)]
pub struct RateLimiter {
    default_limits: RateLimitConfig,
    overrides: HashMap<String, RateLimitConfig>,
    window: Duration,
    windows: Mutex<HashMap<String, ProviderWindow>>,
}

impl RateLimiter {
    /// Creates a limiter applying `default_limits` to every provider.
    pub fn new(default_limits: RateLimitConfig) -> Self {
        Self {
            default_limits,
            overrides: HashMap::new(),
            window: DEFAULT_WINDOW,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the ceilings for one provider.
    pub fn with_provider_limits(mut self, provider: impl Into<String>, limits: RateLimitConfig) -> Self {
        self.overrides.insert(provider.into(), limits);
        self
    }

    /// Replaces the 60 second window.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn limits_for(&self, provider: &str) -> RateLimitConfig {
        self.overrides
            .get(provider)
            .copied()
            .unwrap_or(self.default_limits)
    }

    /// Waits until `provider` may send a request estimated at `estimated_tokens`.
    pub async fn acquire(&self, provider: &str, estimated_tokens: u64) {
        let limits = self.limits_for(provider);
        if estimated_tokens > limits.tokens_per_minute {
            warn!(
                provider,
                estimated_tokens,
                tokens_per_minute = limits.tokens_per_minute,
                "request estimate exceeds the whole token budget; it will run alone"
            );
        }

        loop {
            let decision = {
                let mut windows = self.windows.lock();
                let state = windows
                    .entry(provider.to_string())
                    .or_insert_with(|| ProviderWindow::new(limits));
                state.try_admit(Instant::now(), self.window, estimated_tokens)
            };

            match decision {
                Decision::Admitted => {
                    debug!(provider, estimated_tokens, "request admitted");
                    return;
                }
                Decision::Wait(delay) => {
                    warn!(
                        provider,
                        estimated_tokens,
                        wait_ms = delay.as_millis() as u64,
                        "rate limit reached, waiting for window capacity"
                    );
                    tokio::time::sleep(delay.max(Duration::from_millis(1))).await;
                }
            }
        }
    }

    /// Current usage for `provider`, or `None` if it never requested admission.
    pub fn snapshot(&self, provider: &str) -> Option<WindowSnapshot> {
        let mut windows = self.windows.lock();
        let state = windows.get_mut(provider)?;
        state.evict(Instant::now(), self.window);
        Some(WindowSnapshot {
            limits: state.limits,
            requests_in_window: state.admissions.len() as u32,
            tokens_in_window: state.tokens_in_window,
        })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn limiter(rpm: u32, tpm: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            requests_per_minute: rpm,
            tokens_per_minute: tpm,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn admits_immediately_under_limits() {
        let limiter = limiter(5, 1_000);
        let started = Instant::now();
        for _ in 0..5 {
            limiter.acquire("openai", 100).await;
        }
        assert_eq!(started.elapsed(), Duration::ZERO);

        let snapshot = limiter.snapshot("openai").expect("window exists");
        assert_eq!(snapshot.requests_in_window, 5);
        assert_eq!(snapshot.tokens_in_window, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn request_ceiling_suspends_until_window_rolls() {
        let limiter = limiter(2, 1_000_000);
        let started = Instant::now();
        limiter.acquire("openai", 1).await;
        limiter.acquire("openai", 1).await;
        limiter.acquire("openai", 1).await;
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn token_ceiling_suspends_caller() {
        let limiter = limiter(100, 1_000);
        let started = Instant::now();
        limiter.acquire("anthropic", 600).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.acquire("anthropic", 300).await;
        assert_eq!(started.elapsed(), Duration::from_secs(10));

        // 900 in flight; 200 more only fits once the first admission expires.
        limiter.acquire("anthropic", 200).await;
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(started.elapsed() < Duration::from_secs(70));
    }

    #[tokio::test(start_paused = true)]
    async fn providers_are_isolated() {
        let limiter = limiter(1, 1_000);
        let started = Instant::now();
        limiter.acquire("openai", 10).await;
        limiter.acquire("anthropic", 10).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_override_takes_precedence() {
        let limiter = limiter(1, 1_000).with_provider_limits(
            "openai",
            RateLimitConfig {
                requests_per_minute: 3,
                tokens_per_minute: 1_000,
            },
        );
        let started = Instant::now();
        for _ in 0..3 {
            limiter.acquire("openai", 1).await;
        }
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(limiter.limits_for("anthropic").requests_per_minute, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_request_runs_alone() {
        let limiter = limiter(10, 100);
        let started = Instant::now();
        limiter.acquire("openai", 5_000).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(
            limiter.snapshot("openai").expect("window").tokens_in_window,
            100
        );

        limiter.acquire("openai", 1).await;
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_overflow_rolling_window() {
        let limiter = Arc::new(limiter(3, 1_000));
        let started = Instant::now();

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let limiter = Arc::clone(&limiter);
            tasks.push(tokio::spawn(async move {
                limiter.acquire("openai", 50).await;
                started.elapsed()
            }));
        }

        let mut admitted_at = Vec::new();
        for task in tasks {
            admitted_at.push(task.await.expect("task joined"));
        }
        admitted_at.sort();

        // Every 60s window starting at an admission holds at most 3 admissions.
        for (i, start) in admitted_at.iter().enumerate() {
            let in_window = admitted_at[i..]
                .iter()
                .filter(|t| **t - *start < Duration::from_secs(60))
                .count();
            assert!(in_window <= 3, "window at {start:?} admitted {in_window}");
        }
        assert_eq!(admitted_at.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_token_budget_is_respected() {
        let limiter = Arc::new(limiter(1_000, 250));
        let admitted = Arc::new(Mutex::new(Vec::new()));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let limiter = Arc::clone(&limiter);
            let admitted = Arc::clone(&admitted);
            tasks.push(tokio::spawn(async move {
                limiter.acquire("openai", 100).await;
                admitted.lock().push(Instant::now());
            }));
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(admitted.lock().len(), 2);

        for task in tasks {
            task.await.expect("task joined");
        }
        assert_eq!(admitted.lock().len(), 6);
    }
}
