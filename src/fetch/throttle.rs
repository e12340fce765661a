//! Politeness throttle shared by every worker of a fetch batch.
//!
//! Unlike a per-domain limiter, one batch talks to one conference site, so a
//! single grant clock is enough: any two grants are at least `interval` apart
//! no matter which worker asks.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use paperspider_core::fetch::Throttle;
//!
//! # async fn example() {
//! let throttle = Throttle::new(Duration::from_millis(250));
//!
//! // First grant is immediate
//! throttle.acquire().await;
//!
//! // Second grant waits until 250ms after the first
//! throttle.acquire().await;
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Cumulative wait after which the throttle starts warning (30 seconds).
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Minimum spacing between the starts of outbound requests.
///
/// Shared as `Arc<Throttle>` across workers. The grant clock is guarded by a
/// `tokio::sync::Mutex` held across the sleep, so waiters queue up in order
/// and each one observes the previous grant time.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    disabled: bool,
    /// Time of the last grant; `None` until the first request.
    last_grant: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl Throttle {
    /// Creates a throttle enforcing `interval` between grants.
    ///
    /// A zero interval yields a disabled throttle.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = interval.as_millis()))]
    pub fn new(interval: Duration) -> Self {
        if interval.is_zero() {
            return Self::disabled();
        }
        debug!("creating throttle");
        Self {
            interval,
            disabled: false,
            last_grant: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Creates a throttle that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            interval: Duration::ZERO,
            disabled: true,
            last_grant: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    /// Returns whether the throttle is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Minimum spacing between grants.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Total time callers have spent waiting so far.
    #[must_use]
    pub fn cumulative_delay(&self) -> Duration {
        Duration::from_millis(self.cumulative_delay_ms.load(Ordering::SeqCst))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }

    /// Waits until a request may start, then records the grant.
    ///
    /// The first grant is immediate. Cancel-safe: dropping the future before
    /// it resolves leaves the grant clock untouched.
    pub async fn acquire(&self) {
        if self.disabled {
            return;
        }

        let mut last_grant = self.last_grant.lock().await;
        if let Some(last) = *last_grant {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                let delay = self.interval - elapsed;
                let cumulative = self.add_cumulative_delay(delay);
                debug!(
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying politeness delay"
                );
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        cumulative_delay_secs = cumulative.as_secs(),
                        "long cumulative politeness wait - consider a smaller batch"
                    );
                }
                tokio::time::sleep(delay).await;
            }
        }
        *last_grant = Some(Instant::now());
    }
}
