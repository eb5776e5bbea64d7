// Copyright 2022 Xayn AG
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Per-service sliding-window quota plus a concurrency cap.

use std::{
    collections::{HashMap, VecDeque},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::{
    sync::{Mutex, RwLock, Semaphore, SemaphorePermit},
    time::Instant,
};
use tokio_util::sync::CancellationToken as TokioCancellationToken;

use crate::{Error, SERVICE_DART_API, SERVICE_LLM};

/// Cooperative cancellation handle. Cloning shares the same underlying signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(TokioCancellationToken);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    async fn cancelled(&self) {
        self.0.cancelled().await;
    }
}

/// Quota configuration for a single named service.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Maximum number of calls allowed within `window`.
    pub max_calls: u32,
    /// The sliding window width.
    pub window: Duration,
    /// Maximum number of in-flight calls.
    pub burst_limit: u32,
}

impl RateLimiterConfig {
    pub const fn new(max_calls: u32, window_secs: u64, burst_limit: u32) -> Self {
        Self {
            max_calls,
            window: Duration::from_secs(window_secs),
            burst_limit,
        }
    }

    /// Default configuration for the named service, mirroring the source's
    /// `MultiServiceRateLimiter.default_configs`.
    pub fn for_service(name: &str) -> Self {
        match name {
            SERVICE_DART_API => Self::new(100, 60, 20),
            SERVICE_LLM => Self::new(60, 60, 10),
            _ => Self::new(30, 60, 5),
        }
    }
}

#[derive(Debug, Default)]
struct Stats {
    total_calls: AtomicU64,
    throttled_calls: AtomicU64,
    total_wait_ms: AtomicU64,
}

/// A snapshot of a rate limiter's counters, safe to log or serialize.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterStats {
    pub total_calls: u64,
    pub throttled_calls: u64,
    pub avg_wait_ms: f64,
    pub current_window_calls: usize,
}

struct Window {
    call_times: VecDeque<Instant>,
}

/// Sliding-window quota plus concurrency cap for a single named service.
///
/// Mirrors the source's `RateLimiter`: a `deque` of call timestamps guarded by a
/// lock, cleaned on every `acquire`, plus a semaphore bounding in-flight calls.
pub struct RateLimiter {
    config: RateLimiterConfig,
    window: Mutex<Window>,
    semaphore: Semaphore,
    stats: Stats,
}

/// RAII guard returned by [`RateLimiter::acquire`]; releases the concurrency slot
/// on drop.
pub struct Permit<'a> {
    _semaphore_permit: SemaphorePermit<'a>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            semaphore: Semaphore::new(config.burst_limit as usize),
            config,
            window: Mutex::new(Window {
                call_times: VecDeque::new(),
            }),
            stats: Stats::default(),
        }
    }

    /// Waits for both a rolling-window quota slot and a concurrency slot.
    ///
    /// Never fails on its own; blocks until a slot opens. If `cancellation` fires
    /// first, returns [`Error::Cancelled`] without consuming a slot.
    pub async fn acquire(
        &self,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Permit<'_>, Error> {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                cleanup_old_calls(&mut window.call_times, now, self.config.window);

                if window.call_times.len() as u32 >= self.config.max_calls {
                    let oldest = *window.call_times.front().expect("non-empty by len check");
                    Some(self.config.window.saturating_sub(now - oldest))
                } else {
                    window.call_times.push_back(now);
                    self.stats.total_calls.fetch_add(1, Ordering::Relaxed);
                    None
                }
            };

            match wait {
                None => break,
                Some(wait) => {
                    self.stats.throttled_calls.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .total_wait_ms
                        .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
                    if let Some(cancellation) = cancellation {
                        tokio::select! {
                            () = tokio::time::sleep(wait) => {}
                            () = cancellation.cancelled() => return Err(Error::Cancelled),
                        }
                    } else {
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        let semaphore_permit = if let Some(cancellation) = cancellation {
            tokio::select! {
                permit = self.semaphore.acquire() => permit.expect("semaphore never closed"),
                () = cancellation.cancelled() => return Err(Error::Cancelled),
            }
        } else {
            self.semaphore
                .acquire()
                .await
                .expect("semaphore never closed")
        };

        Ok(Permit {
            _semaphore_permit: semaphore_permit,
        })
    }

    pub async fn stats(&self) -> RateLimiterStats {
        let window = self.window.lock().await;
        let total_calls = self.stats.total_calls.load(Ordering::Relaxed);
        let throttled_calls = self.stats.throttled_calls.load(Ordering::Relaxed);
        let total_wait_ms = self.stats.total_wait_ms.load(Ordering::Relaxed);
        let avg_wait_ms = if throttled_calls > 0 {
            total_wait_ms as f64 / throttled_calls as f64
        } else {
            0.0
        };
        RateLimiterStats {
            total_calls,
            throttled_calls,
            avg_wait_ms,
            current_window_calls: window.call_times.len(),
        }
    }
}

fn cleanup_old_calls(call_times: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&front) = call_times.front() {
        if now - front >= window {
            call_times.pop_front();
        } else {
            break;
        }
    }
}

/// Holds one [`RateLimiter`] per named service, lazily constructed from
/// [`RateLimiterConfig::for_service`] on first use.
///
/// Mirrors the source's `MultiServiceRateLimiter` global-singleton pattern, but
/// passed as an explicit dependency rather than a module-level global (`spec.md`
/// §9, "Cross-cutting singletons").
#[derive(Default)]
pub struct MultiServiceRateLimiter {
    limiters: RwLock<HashMap<String, std::sync::Arc<RateLimiter>>>,
}

impl MultiServiceRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, service: &str) -> std::sync::Arc<RateLimiter> {
        if let Some(limiter) = self.limiters.read().await.get(service) {
            return limiter.clone();
        }

        let mut limiters = self.limiters.write().await;
        limiters
            .entry(service.to_owned())
            .or_insert_with(|| {
                std::sync::Arc::new(RateLimiter::new(RateLimiterConfig::for_service(service)))
            })
            .clone()
    }

    pub async fn acquire(
        &self,
        service: &str,
        cancellation: Option<&CancellationToken>,
    ) -> Result<(), Error> {
        let limiter = self.get(service).await;
        // the permit is intentionally dropped immediately: the semaphore slot is
        // only meant to cap the number of calls that are mid-flight at the point
        // `acquire` resolves, not to hold a lock for the whole upstream call.
        limiter.acquire(cancellation).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_never_exceeds_quota_within_window() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(3, 60, 10));
        for _ in 0..3 {
            limiter.acquire(None).await.unwrap();
        }
        let stats = limiter.stats().await;
        assert_eq!(stats.current_window_calls, 3);
        assert_eq!(stats.total_calls, 3);
    }

    #[tokio::test]
    async fn cancellation_returns_cancelled_without_consuming_quota() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(1, 60, 10));
        limiter.acquire(None).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let result = limiter.acquire(Some(&token)).await;
        assert!(matches!(result, Err(Error::Cancelled)));

        let stats = limiter.stats().await;
        assert_eq!(stats.current_window_calls, 1);
    }

    #[tokio::test]
    async fn multi_service_limiter_uses_default_configs() {
        let multi = MultiServiceRateLimiter::new();
        let dart = multi.get(SERVICE_DART_API).await;
        assert_eq!(dart.config.max_calls, 100);
        let llm = multi.get(SERVICE_LLM).await;
        assert_eq!(llm.config.max_calls, 60);
        let other = multi.get("unknown").await;
        assert_eq!(other.config.max_calls, 30);
    }
}
