//! Per-platform sliding-window rate limiter with adaptive slowdown. Window
//! state lives in Postgres so every worker process shares one budget; waiters
//! inside a process are served FIFO by a per-platform gate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog::Db;

#[derive(Debug, Error)]
pub enum RateError {
    #[error("daily request cap exceeded for {platform}")]
    DailyCapExceeded { platform: String },
    #[error("rate limiter storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitPolicy {
    pub window_calls: u32,
    pub window_seconds: u64,
    pub daily_cap: Option<u64>,
    pub buffer_fraction: f64,
}

impl RateLimitPolicy {
    pub fn steam() -> Self {
        Self {
            window_calls: 100,
            window_seconds: 300,
            daily_cap: Some(100_000),
            buffer_fraction: 0.8,
        }
    }

    /// Conservative fallback for platforms without a tuned policy.
    pub fn conservative() -> Self {
        Self {
            window_calls: 60,
            window_seconds: 60,
            daily_cap: None,
            buffer_fraction: 0.8,
        }
    }

    /// Adaptive pre-record sleep. Below the buffer fraction: none. Between
    /// buffer and saturation: a quadratic ramp from 0.1s up to 5.0s.
    /// Saturated windows are handled separately by a full window wait.
    pub fn slowdown(&self, usage: u32) -> Duration {
        let ratio = usage as f64 / self.window_calls as f64;
        if ratio < self.buffer_fraction || ratio >= 1.0 {
            return Duration::ZERO;
        }
        let t = (ratio - self.buffer_fraction) / (1.0 - self.buffer_fraction);
        Duration::from_secs_f64(0.1 + t * t * 4.9)
    }

    pub fn is_saturated(&self, usage: u32) -> bool {
        usage >= self.window_calls
    }
}

pub struct RateLimiter {
    db: Db,
    policies: HashMap<String, RateLimitPolicy>,
    // One gate per platform so concurrent acquirers line up FIFO (tokio
    // mutexes wake waiters in acquisition order).
    gates: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RateLimiter {
    pub fn new(db: Db) -> Self {
        let mut policies = HashMap::new();
        policies.insert("steam".to_string(), RateLimitPolicy::steam());
        Self {
            db,
            policies,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_policy(mut self, platform: &str, policy: RateLimitPolicy) -> Self {
        self.policies.insert(platform.to_string(), policy);
        self
    }

    pub fn policy(&self, platform: &str) -> RateLimitPolicy {
        self.policies
            .get(platform)
            .copied()
            .unwrap_or_else(RateLimitPolicy::conservative)
    }

    /// Block until `weight` calls fit the platform's window, then record
    /// them. On return the caller is guaranteed not to exceed the window
    /// budget; the daily cap fails hard instead of waiting.
    pub async fn acquire(&self, platform: &str, weight: u32) -> Result<(), RateError> {
        let policy = self.policy(platform);
        let gate = self.gate(platform);
        let _fifo = gate.lock().await;

        loop {
            let usage = self.window_usage(platform, policy.window_seconds).await?;

            if policy.is_saturated(usage) {
                let wait = self.window_wait(platform, policy.window_seconds).await?;
                warn!(platform, usage, wait_ms = wait.as_millis() as u64, "rate window saturated, waiting");
                tokio::time::sleep(wait).await;
                continue;
            }

            let slowdown = policy.slowdown(usage);
            if !slowdown.is_zero() {
                debug!(platform, usage, slowdown_ms = slowdown.as_millis() as u64, "rate buffer slowdown");
                tokio::time::sleep(slowdown).await;
            }

            self.charge_daily(platform, &policy, weight).await?;
            self.record(platform, weight).await?;
            return Ok(());
        }
    }

    fn gate(&self, platform: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap();
        gates
            .entry(platform.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Evict expired events and count the live window in shared state.
    async fn window_usage(&self, platform: &str, window_seconds: u64) -> Result<u32, RateError> {
        sqlx::query(
            "DELETE FROM rate_limit_events
              WHERE platform_code = $1
                AND recorded_at < now() - make_interval(secs => $2)",
        )
        .persistent(false)
        .bind(platform)
        .bind(window_seconds as f64)
        .execute(&self.db.pool)
        .await?;

        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM rate_limit_events
              WHERE platform_code = $1
                AND recorded_at >= now() - make_interval(secs => $2)",
        )
        .persistent(false)
        .bind(platform)
        .bind(window_seconds as f64)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(count.max(0) as u32)
    }

    /// Time until the oldest in-window event rolls out, plus a small epsilon.
    async fn window_wait(&self, platform: &str, window_seconds: u64) -> Result<Duration, RateError> {
        let oldest: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT min(recorded_at) FROM rate_limit_events WHERE platform_code = $1",
        )
        .persistent(false)
        .bind(platform)
        .fetch_one(&self.db.pool)
        .await?;

        let wait = match oldest {
            Some(oldest) => {
                let expiry = oldest + chrono::Duration::seconds(window_seconds as i64);
                (expiry - Utc::now()).to_std().unwrap_or(Duration::ZERO)
            }
            None => Duration::ZERO,
        };
        Ok(wait + Duration::from_millis(100))
    }

    async fn record(&self, platform: &str, weight: u32) -> Result<(), RateError> {
        sqlx::query(
            "INSERT INTO rate_limit_events (platform_code, recorded_at)
             SELECT $1, now() FROM generate_series(1, $2)",
        )
        .persistent(false)
        .bind(platform)
        .bind(weight.max(1) as i32)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    /// Rolling 24h counter, reset in place when the window ages out. The
    /// increment is undone if it crosses the cap so a rejected caller does
    /// not poison the budget.
    async fn charge_daily(
        &self,
        platform: &str,
        policy: &RateLimitPolicy,
        weight: u32,
    ) -> Result<(), RateError> {
        let Some(cap) = policy.daily_cap else {
            return Ok(());
        };
        let calls: i64 = sqlx::query_scalar(
            "INSERT INTO rate_limit_daily (platform_code, window_start, calls)
             VALUES ($1, now(), $2)
             ON CONFLICT (platform_code) DO UPDATE SET
                 calls = CASE WHEN rate_limit_daily.window_start < now() - interval '24 hours'
                              THEN $2 ELSE rate_limit_daily.calls + $2 END,
                 window_start = CASE WHEN rate_limit_daily.window_start < now() - interval '24 hours'
                                     THEN now() ELSE rate_limit_daily.window_start END
             RETURNING calls",
        )
        .persistent(false)
        .bind(platform)
        .bind(weight.max(1) as i64)
        .fetch_one(&self.db.pool)
        .await?;

        if calls > cap as i64 {
            sqlx::query(
                "UPDATE rate_limit_daily SET calls = GREATEST(calls - $2, 0) WHERE platform_code = $1",
            )
            .persistent(false)
            .bind(platform)
            .bind(weight.max(1) as i64)
            .execute(&self.db.pool)
            .await?;
            return Err(RateError::DailyCapExceeded {
                platform: platform.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_slowdown_below_buffer() {
        let policy = RateLimitPolicy::steam();
        assert_eq!(policy.slowdown(0), Duration::ZERO);
        assert_eq!(policy.slowdown(79), Duration::ZERO);
    }

    #[test]
    fn slowdown_ramps_quadratically_in_buffer_zone() {
        let policy = RateLimitPolicy::steam();
        // At the buffer edge (80/100) the ramp starts at 0.1s.
        let at_edge = policy.slowdown(80);
        assert!((at_edge.as_secs_f64() - 0.1).abs() < 1e-9);
        // Halfway through the buffer zone (90/100): 0.1 + 0.25 * 4.9.
        let mid = policy.slowdown(90);
        assert!((mid.as_secs_f64() - (0.1 + 0.25 * 4.9)).abs() < 1e-9);
        // Just under saturation approaches but never exceeds 5.0s.
        let near_full = policy.slowdown(99);
        assert!(near_full.as_secs_f64() < 5.0);
        assert!(near_full > mid);
    }

    #[test]
    fn saturation_is_a_hard_edge() {
        let policy = RateLimitPolicy::steam();
        assert!(!policy.is_saturated(99));
        assert!(policy.is_saturated(100));
        assert_eq!(policy.slowdown(100), Duration::ZERO);
    }
}
