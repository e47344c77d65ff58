//! Token-bucket-style gate shared by `SearchClient` and `LLMClient` (spec §4.1).
//!
//! Modelled on the teacher's `ProxyManager`: an `Arc<Mutex<State>>` guarding
//! plain data, with async methods that take the lock, compute, and release it
//! before awaiting any I/O (here: the sleep itself).

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

struct State {
    /// Timestamps of successful `acquire`s still inside the rolling window.
    window: VecDeque<Instant>,
    current_backoff_ms: u64,
}

/// Rolling-window rate limiter with exponential backoff on provider
/// rate-limit signals.
pub struct RateLimiter {
    max_rpm: u32,
    window: Duration,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    multiplier: u32,
    state: Mutex<State>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ok,
    Cancelled,
}

impl RateLimiter {
    pub fn new(max_rpm: u32, initial_backoff_ms: u64, max_backoff_ms: u64, multiplier: u32) -> Self {
        Self {
            max_rpm: max_rpm.max(1),
            window: Duration::from_secs(60),
            initial_backoff_ms,
            max_backoff_ms,
            multiplier: multiplier.max(2),
            state: Mutex::new(State {
                window: VecDeque::new(),
                current_backoff_ms: initial_backoff_ms,
            }),
        }
    }

    /// Suspend the caller until a token is available or `cancel` fires.
    /// FIFO among waiters falls naturally out of serializing on the mutex.
    pub async fn acquire(&self, cancel: &CancellationToken) -> AcquireOutcome {
        loop {
            if cancel.is_cancelled() {
                return AcquireOutcome::Cancelled;
            }

            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                prune_window(&mut state.window, now, self.window);

                if (state.window.len() as u32) < self.max_rpm {
                    state.window.push_back(now);
                    // A clean acquisition (no provider rate-limit signal
                    // pending) resets backoff, per spec §4.1.
                    state.current_backoff_ms = self.initial_backoff_ms;
                    None
                } else {
                    let oldest = *state.window.front().expect("len checked above");
                    Some(self.window.saturating_sub(now.saturating_duration_since(oldest)))
                }
            };

            match wait {
                None => return AcquireOutcome::Ok,
                Some(dur) => {
                    tracing::debug!(wait_ms = dur.as_millis() as u64, "rate limiter window full, waiting");
                    tokio::select! {
                        _ = tokio::time::sleep(dur) => {}
                        _ = cancel.cancelled() => return AcquireOutcome::Cancelled,
                    }
                }
            }
        }
    }

    /// Called when a downstream provider returns a rate-limit error.
    /// Raises the shared backoff for every worker using this limiter.
    pub async fn signal_rate_limit_error(&self, retry_after: Option<Duration>, cancel: &CancellationToken) {
        let wait = {
            let mut state = self.state.lock().await;
            let wait = retry_after.unwrap_or(Duration::from_millis(state.current_backoff_ms));
            state.current_backoff_ms =
                (state.current_backoff_ms * self.multiplier as u64).min(self.max_backoff_ms);
            wait
        };

        tracing::warn!(wait_ms = wait.as_millis() as u64, "rate limit signalled, backing off");
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => {}
        }
    }

    #[cfg(test)]
    async fn current_backoff_ms(&self) -> u64 {
        self.state.lock().await.current_backoff_ms
    }
}

fn prune_window(window: &mut VecDeque<Instant>, now: Instant, span: Duration) {
    while let Some(front) = window.front() {
        if now.saturating_duration_since(*front) >= span {
            window.pop_front();
        } else {
            break;
        }
    }
}
