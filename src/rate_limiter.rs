//! Blocking token-bucket rate limiter.
//!
//! Grounded on `original_source/backend/src/async_http_client.py`'s
//! `RateLimiter.acquire()`: a lock-held refill followed by a sleep, never a
//! busy-spin, using a monotonic clock.

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

struct State {
    tokens: f64,
    last_update: Instant,
}

/// `acquire()` blocks the caller until one token is available; returns
/// immediately when tokens remain.
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<State>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst: f64::from(burst.max(1)),
            state: Mutex::new(State {
                tokens: f64::from(burst.max(1)),
                last_update: Instant::now(),
            }),
        }
    }

    /// Blocks until a token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.saturating_duration_since(state.last_update).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
                state.last_update = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - state.tokens) / self.rate))
                }
            };

            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}
