use rand::Rng;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

/// Integer token bucket with lazy refill.
///
/// Tokens accrue at `refill_per_sec` and are credited in whole units only;
/// the refill clock advances only when at least one token was credited, so
/// fractional progress is never lost.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_per_sec: u32,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    #[cfg(test)]
    fn available(&self) -> u32 {
        let mut state = self.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let accrued = (elapsed.as_secs_f64() * f64::from(self.refill_per_sec)).floor();
        if accrued >= 1.0 {
            let accrued = accrued.min(f64::from(self.capacity)) as u32;
            state.tokens = self.capacity.min(state.tokens.saturating_add(accrued));
            state.last_refill = now;
        }
    }

    /// Take one token if available, otherwise return the time until the next
    /// whole token accrues.
    pub fn try_take(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut state = self.lock();
        self.refill(&mut state, now);
        if state.tokens > 0 {
            state.tokens -= 1;
            return Ok(());
        }
        if self.refill_per_sec == 0 {
            return Err(Duration::from_secs(1));
        }
        let per_token = Duration::from_secs_f64(1.0 / f64::from(self.refill_per_sec));
        let since = now.saturating_duration_since(state.last_refill);
        Err(per_token.saturating_sub(since).max(Duration::from_millis(1)))
    }

    /// Wait until a token is available and consume it.
    pub async fn take(&self) {
        loop {
            match self.try_take() {
                Ok(()) => return,
                Err(wait) => {
                    let jitter_cap = (wait.as_millis() as u64 / 2).max(1);
                    let jitter = rand::thread_rng().gen_range(0..jitter_cap);
                    tokio::time::sleep(wait + Duration::from_millis(jitter)).await;
                }
            }
        }
    }
}
