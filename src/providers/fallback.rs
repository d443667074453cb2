use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::time::Instant;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::config::AppConfig;
use crate::observability::Metrics;
use std::sync::Arc;

use super::{build_provider_entries, ChatMessage, ChatOptions, LlmResponse, ProviderEntry};

/// Parses "retry in X.XXXs" or "retry in Xs" from API error bodies.
static RETRY_AFTER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[Rr]etry in (\d+(?:\.\d+)?)s").expect("retry-after regex"));

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const RATE_LIMIT_FALLBACK_WAIT: Duration = Duration::from_secs(60);

/// Caps outbound LLM calls per sliding window, across every provider.
pub struct LlmRateLimiter {
    times: Mutex<Vec<Instant>>,
    max: usize,
    window: Duration,
}

impl LlmRateLimiter {
    pub fn new(max_per_window: usize, window_sec: u64) -> Self {
        Self {
            times: Mutex::new(Vec::new()),
            max: if max_per_window == 0 { 2 } else { max_per_window },
            window: Duration::from_secs(if window_sec == 0 { 15 } else { window_sec }),
        }
    }

    /// Block until a slot is free, then claim it. Valid timestamps are
    /// recomputed on every pass; when saturated, sleeps until the oldest
    /// entry ages out and retries. The mutex is held only across list
    /// scans, never across a sleep.
    pub async fn wait(&self) {
        loop {
            let wait_for = {
                let mut times = self.times.lock().expect("rate limiter lock poisoned");
                let now = Instant::now();
                times.retain(|t| now.duration_since(*t) < self.window);
                if times.len() < self.max {
                    times.push(now);
                    return;
                }
                let oldest = times[0];
                self.window.saturating_sub(now.duration_since(oldest))
            };
            if wait_for.is_zero() {
                continue;
            }
            tokio::time::sleep(wait_for).await;
        }
    }
}

/// Ordered LLM providers with per-provider retries and failover.
///
/// Failover moves to the *next* provider after a provider's attempts are
/// exhausted; retry repeats the *same* provider with exponential backoff.
pub struct FallbackProvider {
    entries: Vec<ProviderEntry>,
    retry_max: usize,
    rate_limit: LlmRateLimiter,
    metrics: Option<Arc<Metrics>>,
}

impl FallbackProvider {
    pub fn from_config(cfg: &AppConfig) -> Self {
        let retry_max = if cfg.task.retry_max == 0 {
            2
        } else {
            cfg.task.retry_max
        };
        Self {
            entries: build_provider_entries(cfg),
            retry_max,
            rate_limit: LlmRateLimiter::new(
                cfg.providers.llm_rate_limit.max_per_window,
                cfg.providers.llm_rate_limit.window_sec,
            ),
            metrics: None,
        }
    }

    pub fn with_entries(entries: Vec<ProviderEntry>, retry_max: usize, rate_limit: LlmRateLimiter) -> Self {
        Self {
            entries,
            retry_max,
            rate_limit,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    /// First configured provider's default model.
    pub fn default_model(&self) -> String {
        self.entries
            .first()
            .map(|e| e.provider.default_model().to_string())
            .unwrap_or_else(|| "gpt-4o-mini".to_string())
    }

    /// Try each provider in order with up to `retry_max + 1` attempts.
    /// The first success wins; after every provider is exhausted the last
    /// error surfaces to the caller.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        model: &str,
        options: &ChatOptions,
    ) -> anyhow::Result<LlmResponse> {
        let mut last_err: Option<anyhow::Error> = None;

        for entry in &self.entries {
            let max_attempts = self.retry_max + 1;
            for attempt in 0..max_attempts {
                self.rate_limit.wait().await;

                if attempt > 0 {
                    let mut backoff = BACKOFF_BASE * (1u32 << (attempt - 1).min(16) as u32);
                    if backoff > BACKOFF_CAP {
                        backoff = BACKOFF_CAP;
                    }
                    let rate_limited = last_err.as_ref().map(|e| is_rate_limit(e)).unwrap_or(false);
                    if rate_limited {
                        backoff = match last_err.as_ref().and_then(|e| parse_retry_after(e)) {
                            Some(parsed) => parsed,
                            None => RATE_LIMIT_FALLBACK_WAIT,
                        };
                        // Two rate-limit strikes: stop hammering this
                        // provider and move on to the next one.
                        if attempt >= 2 {
                            break;
                        }
                    }
                    warn!(
                        provider = %entry.name,
                        attempt,
                        backoff_secs = backoff.as_secs_f64(),
                        "LLM call failed, backing off before retry"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = options.cancel.cancelled() => {
                            return Err(last_err.unwrap_or_else(|| anyhow::anyhow!("cancelled")));
                        }
                    }
                }

                if let Some(metrics) = &self.metrics {
                    metrics.inc_llm_request(&entry.name);
                }
                match entry.provider.chat(messages, tools, model, options).await {
                    Ok(resp) => return Ok(resp),
                    Err(e) => {
                        warn!(provider = %entry.name, attempt = attempt + 1, "LLM attempt failed: {}", e);
                        last_err = Some(e);
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no LLM providers configured")))
    }
}

/// Classify an error chain as a provider rate limit.
pub fn is_rate_limit(err: &anyhow::Error) -> bool {
    let s = format!("{:#}", err);
    s.contains("429") || s.contains("RESOURCE_EXHAUSTED") || s.contains("quota")
}

/// Extract the suggested wait from an error body, clamped to 1–90 s.
pub fn parse_retry_after(err: &anyhow::Error) -> Option<Duration> {
    let s = format!("{:#}", err);
    let captures = RETRY_AFTER_RE.captures(&s)?;
    let secs: f64 = captures[1].parse().ok()?;
    if secs <= 0.0 {
        return None;
    }
    let d = Duration::from_secs_f64(secs);
    Some(d.clamp(Duration::from_secs(1), Duration::from_secs(90)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::providers::LlmProvider;

    struct ScriptedProvider {
        calls: AtomicUsize,
        fail_times: usize,
        error: String,
    }

    impl ScriptedProvider {
        fn entry(name: &str, fail_times: usize, error: &str) -> (ProviderEntry, Arc<Self>) {
            let p = Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_times,
                error: error.to_string(),
            });
            (
                ProviderEntry {
                    name: name.to_string(),
                    provider: p.clone(),
                },
                p,
            )
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _tools: &[Value],
            _model: &str,
            _options: &ChatOptions,
        ) -> anyhow::Result<LlmResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                anyhow::bail!("{}", self.error);
            }
            Ok(LlmResponse {
                content: "ok".into(),
                ..Default::default()
            })
        }

        fn default_model(&self) -> &str {
            "test-model"
        }
    }

    fn limiter() -> LlmRateLimiter {
        // Wide open so retry timing dominates the tests.
        LlmRateLimiter::new(1000, 1)
    }

    #[test]
    fn rate_limit_classification() {
        assert!(is_rate_limit(&anyhow::anyhow!("HTTP 429 too many requests")));
        assert!(is_rate_limit(&anyhow::anyhow!("RESOURCE_EXHAUSTED: slow down")));
        assert!(is_rate_limit(&anyhow::anyhow!("quota exceeded for project")));
        assert!(!is_rate_limit(&anyhow::anyhow!("connection refused")));
    }

    #[test]
    fn retry_after_parsing_and_clamping() {
        let d = parse_retry_after(&anyhow::anyhow!("429: retry in 2.5s please")).unwrap();
        assert_eq!(d, Duration::from_secs_f64(2.5));

        // Sub-second suggestions clamp up to a full second.
        let d = parse_retry_after(&anyhow::anyhow!("Retry in 0.2s")).unwrap();
        assert_eq!(d, Duration::from_secs(1));

        // Huge suggestions clamp down to 90 s.
        let d = parse_retry_after(&anyhow::anyhow!("retry in 600s")).unwrap();
        assert_eq!(d, Duration::from_secs(90));

        assert!(parse_retry_after(&anyhow::anyhow!("no hint here")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failover_to_second_provider() {
        let (bad, bad_p) = ScriptedProvider::entry("first", usize::MAX, "boom");
        let (good, good_p) = ScriptedProvider::entry("second", 0, "");
        let fb = FallbackProvider::with_entries(vec![bad, good], 1, limiter());

        let resp = fb
            .chat(&[ChatMessage::user("hi")], &[], "m", &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.content, "ok");
        // First provider exhausted its retry budget before failover.
        assert_eq!(bad_p.calls.load(Ordering::SeqCst), 2);
        assert_eq!(good_p.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_same_provider_then_succeed() {
        let (flaky, flaky_p) = ScriptedProvider::entry("flaky", 1, "500 server error");
        let fb = FallbackProvider::with_entries(vec![flaky], 2, limiter());

        let resp = fb
            .chat(&[ChatMessage::user("hi")], &[], "m", &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.content, "ok");
        assert_eq!(flaky_p.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_provider_abandoned_after_two_strikes() {
        let (limited, limited_p) =
            ScriptedProvider::entry("limited", usize::MAX, "429 retry in 2.5s");
        let (good, good_p) = ScriptedProvider::entry("backup", 0, "");
        let fb = FallbackProvider::with_entries(vec![limited, good], 5, limiter());

        let start = tokio::time::Instant::now();
        let resp = fb
            .chat(&[ChatMessage::user("hi")], &[], "m", &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.content, "ok");
        // Strike one retries after the parsed 2.5 s delay; strike two
        // abandons the provider despite the larger retry budget.
        assert_eq!(limited_p.calls.load(Ordering::SeqCst), 2);
        assert_eq!(good_p.calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_secs_f64(2.5));
    }

    #[tokio::test(start_paused = true)]
    async fn all_exhausted_surfaces_last_error() {
        let (a, _) = ScriptedProvider::entry("a", usize::MAX, "error alpha");
        let (b, _) = ScriptedProvider::entry("b", usize::MAX, "error beta");
        let fb = FallbackProvider::with_entries(vec![a, b], 0, limiter());

        let err = fb
            .chat(&[ChatMessage::user("hi")], &[], "m", &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("error beta"));
    }

    #[tokio::test]
    async fn empty_entries_reports_no_providers() {
        let fb = FallbackProvider::with_entries(vec![], 2, limiter());
        let err = fb
            .chat(&[ChatMessage::user("hi")], &[], "m", &ChatOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no LLM providers configured"));
        assert_eq!(fb.default_model(), "gpt-4o-mini");
    }

    #[tokio::test]
    async fn rate_limiter_caps_window() {
        let limiter = LlmRateLimiter::new(3, 15);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.wait().await;
        }
        // Three slots admitted without blocking.
        assert!(start.elapsed() < Duration::from_secs(1));
        let times = limiter.times.lock().unwrap();
        assert_eq!(times.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_blocks_until_oldest_ages_out() {
        let limiter = Arc::new(LlmRateLimiter::new(1, 10));
        limiter.wait().await;

        let l2 = limiter.clone();
        let start = tokio::time::Instant::now();
        let handle = tokio::spawn(async move { l2.wait().await });
        handle.await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));
    }
}
