//! Token-bucket rate limiting.
//!
//! The limiter hands out reservations: each call debits the shared bucket
//! and sleeps for the computed delay before returning, so callers are paced
//! to the configured rate without any queueing of their own. The bucket
//! arithmetic behind the mutex is the only serialization point; any number
//! of callers may hold reservations concurrently.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use super::context::RunContext;
use crate::error::Result;
use crate::metrics;

/// A sustained rate with a burst allowance.
#[derive(Debug, Clone, Copy)]
pub struct Rate {
    /// Units (operations or bytes) replenished per second.
    pub units_per_sec: f64,
    /// Units available immediately before pacing kicks in.
    pub burst: u64,
}

impl Rate {
    /// A rate of `units` per second with a one-second burst allowance.
    pub fn per_second(units: f64) -> Self {
        Self {
            units_per_sec: units,
            burst: units.ceil().max(1.0) as u64,
        }
    }

    pub fn with_burst(mut self, burst: u64) -> Self {
        self.burst = burst.max(1);
        self
    }
}

/// Observer for limiter reservations.
///
/// Injected at construction so independent limiter instances report to
/// independent sinks and tests can observe reservations in isolation.
pub trait LimiterSink: Send + Sync {
    fn on_reserved(&self, units: u64, delay: Duration);
}

/// Default sink backed by the process metrics recorder.
pub struct MetricsSink;

impl LimiterSink for MetricsSink {
    fn on_reserved(&self, units: u64, delay: Duration) {
        metrics::record_rate_reservation(units, delay);
    }
}

struct Bucket {
    /// May go negative: a negative balance is outstanding reservation debt
    /// that future refills pay down.
    available: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, rate: &Rate) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        self.available =
            (self.available + elapsed.as_secs_f64() * rate.units_per_sec).min(rate.burst as f64);
    }
}

/// Token-bucket limiter.
///
/// An unconfigured limiter (`RateLimiter::unlimited()`) never blocks: both
/// wait variants return immediately.
pub struct RateLimiter {
    rate: Option<Rate>,
    bucket: Mutex<Bucket>,
    sink: Option<Arc<dyn LimiterSink>>,
}

impl RateLimiter {
    pub fn new(rate: Option<Rate>) -> Self {
        let available = rate.map(|r| r.burst as f64).unwrap_or(0.0);
        Self {
            rate,
            bucket: Mutex::new(Bucket {
                available,
                last_refill: Instant::now(),
            }),
            sink: None,
        }
    }

    /// A limiter with no rate set; both wait variants are no-ops.
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn with_sink(mut self, sink: Arc<dyn LimiterSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Reserve one unit and sleep out the reservation's delay.
    pub async fn wait(&self, ctx: &RunContext) -> Result<()> {
        self.wait_n(ctx, 1).await
    }

    /// Reserve `n` bytes and sleep out the reservation's delay.
    pub async fn wait_bytes(&self, ctx: &RunContext, n: u64) -> Result<()> {
        self.wait_n(ctx, n).await
    }

    async fn wait_n(&self, ctx: &RunContext, n: u64) -> Result<()> {
        let Some(rate) = &self.rate else {
            return Ok(());
        };
        if rate.units_per_sec <= 0.0 {
            return Ok(());
        }

        let delay = {
            let mut bucket = self.bucket.lock().unwrap();
            bucket.refill(rate);
            bucket.available -= n as f64;
            if bucket.available >= 0.0 {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(-bucket.available / rate.units_per_sec)
            }
        };

        if let Some(sink) = &self.sink {
            sink.on_reserved(n, delay);
        }

        if !delay.is_zero() {
            trace!(units = n, delay_ms = delay.as_millis() as u64, "rate limited");
            ctx.sleep("waiting on rate limiter", delay).await?;
        }

        Ok(())
    }

    /// Clear accumulated bucket state back to a full burst. Idempotent.
    pub fn reset(&self) {
        if let Some(rate) = &self.rate {
            let mut bucket = self.bucket.lock().unwrap();
            bucket.available = rate.burst as f64;
            bucket.last_refill = Instant::now();
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingSink {
        units: AtomicU64,
        delayed: AtomicU64,
    }

    impl CountingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                units: AtomicU64::new(0),
                delayed: AtomicU64::new(0),
            })
        }
    }

    impl LimiterSink for CountingSink {
        fn on_reserved(&self, units: u64, delay: Duration) {
            self.units.fetch_add(units, Ordering::SeqCst);
            if !delay.is_zero() {
                self.delayed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn test_unconfigured_limiter_never_blocks() {
        let limiter = RateLimiter::unlimited();
        let ctx = RunContext::new();

        let start = std::time::Instant::now();
        for _ in 0..1000 {
            limiter.wait(&ctx).await.unwrap();
        }
        limiter.wait_bytes(&ctx, u64::MAX).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_limiter_paces_callers() {
        let limiter = RateLimiter::new(Some(Rate::per_second(100.0).with_burst(1)));
        let ctx = RunContext::new();

        let start = Instant::now();
        for _ in 0..21 {
            limiter.wait(&ctx).await.unwrap();
        }
        // 1 burst token + 20 paced reservations at 100/s.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(195), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_bytes_debits_by_size() {
        let limiter = RateLimiter::new(Some(Rate::per_second(1000.0).with_burst(1000)));
        let ctx = RunContext::new();

        let start = Instant::now();
        limiter.wait_bytes(&ctx, 1000).await.unwrap(); // burst
        limiter.wait_bytes(&ctx, 500).await.unwrap(); // paced: 0.5s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(490), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_full_burst() {
        let limiter = RateLimiter::new(Some(Rate::per_second(1.0).with_burst(5)));
        let ctx = RunContext::new();

        for _ in 0..5 {
            limiter.wait(&ctx).await.unwrap();
        }
        limiter.reset();
        limiter.reset(); // idempotent

        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait(&ctx).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_observes_reservations() {
        let sink = CountingSink::new();
        let limiter =
            RateLimiter::new(Some(Rate::per_second(10.0).with_burst(1))).with_sink(sink.clone());
        let ctx = RunContext::new();

        limiter.wait(&ctx).await.unwrap();
        limiter.wait_bytes(&ctx, 7).await.unwrap();

        assert_eq!(sink.units.load(Ordering::SeqCst), 8);
        assert_eq!(sink.delayed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_context_aborts_the_sleep() {
        let limiter = RateLimiter::new(Some(Rate::per_second(1.0).with_burst(1)));
        let ctx = RunContext::new();

        limiter.wait(&ctx).await.unwrap(); // burst token
        ctx.cancel();
        let err = limiter.wait(&ctx).await.unwrap_err();
        assert!(err.is_cancellation());
    }
}
