//! In-memory OTP store and dual sliding-window rate limiter (spec.md §4.2).
//!
//! Modeled as an owned service with its own mutex and sweeper task rather
//! than a module-level static, per spec.md §9: this keeps the store
//! injectable (a fake clock in tests) and lets `AppState` hold it behind an
//! `Arc` like every other store.

use super::clock::Clock;
use crate::domain::Error;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub issue_window: Duration,
    pub issue_max: usize,
    pub verify_window: Duration,
    pub verify_max: usize,
    pub ttl: Duration,
    pub sweep_interval: StdDuration,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            issue_window: Duration::seconds(60),
            issue_max: 3,
            verify_window: Duration::minutes(15),
            verify_max: 3,
            ttl: Duration::minutes(5),
            sweep_interval: StdDuration::from_secs(3600),
        }
    }
}

struct OtpEntry {
    code: String,
    expires_at: OffsetDateTime,
    verify_attempts: VecDeque<OffsetDateTime>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, OtpEntry>,
    issue_windows: HashMap<String, VecDeque<OffsetDateTime>>,
}

pub struct OtpStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    config: OtpConfig,
}

fn prune(window: &mut VecDeque<OffsetDateTime>, now: OffsetDateTime, horizon: Duration) {
    while let Some(front) = window.front() {
        if now - *front > horizon {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// Equal-time comparison: walks both strings to the end regardless of where
/// they first differ, so a timing side-channel can't narrow down the code
/// digit by digit.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

impl OtpStore {
    pub fn new(clock: Arc<dyn Clock>, config: OtpConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
            config,
        }
    }

    /// Generates and stores a fresh code, or rejects with `RateLimited` if
    /// the email has already issued `issue_max` codes in `issue_window`.
    pub async fn issue(&self, email: &str) -> Result<String, Error> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let window = state.issue_windows.entry(email.to_string()).or_default();
        prune(window, now, self.config.issue_window);

        if window.len() >= self.config.issue_max {
            let retry_after = self.config.issue_window - (now - *window.front().unwrap());
            return Err(Error::RateLimited {
                retry_after_secs: retry_after.whole_seconds().max(0) as u64,
            });
        }

        let code = generate_code();
        window.push_back(now);
        state.entries.insert(
            email.to_string(),
            OtpEntry {
                code: code.clone(),
                expires_at: now + self.config.ttl,
                verify_attempts: VecDeque::new(),
            },
        );

        Ok(code)
    }

    /// Checks `submitted` against the live code for `email`. Consumes the
    /// entry on a match; otherwise records the attempt against the
    /// verify-window rate limiter.
    pub async fn verify(&self, email: &str, submitted: &str) -> Result<(), Error> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let Some(entry) = state.entries.get_mut(email) else {
            return Err(Error::OtpExpired);
        };

        if now >= entry.expires_at {
            state.entries.remove(email);
            return Err(Error::OtpExpired);
        }

        prune(&mut entry.verify_attempts, now, self.config.verify_window);
        if entry.verify_attempts.len() >= self.config.verify_max {
            let retry_after =
                self.config.verify_window - (now - *entry.verify_attempts.front().unwrap());
            return Err(Error::RateLimited {
                retry_after_secs: retry_after.whole_seconds().max(0) as u64,
            });
        }

        if constant_time_eq(&entry.code, submitted) {
            state.entries.remove(email);
            Ok(())
        } else {
            entry.verify_attempts.push_back(now);
            Err(Error::OtpInvalid)
        }
    }

    /// Explicit removal, used by the registration orchestrator once a
    /// verification has committed (belt-and-braces cleanup, spec.md §4.7
    /// step 7 — `verify` above already removes on success, this covers the
    /// path where the caller wants to discard an OTP without consuming it).
    pub async fn remove(&self, email: &str) {
        self.state.lock().await.entries.remove(email);
    }

    pub async fn outstanding_count(&self) -> i64 {
        self.state.lock().await.entries.len() as i64
    }

    async fn sweep(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.entries.retain(|_, entry| now < entry.expires_at);
        state
            .issue_windows
            .retain(|_, window| !window.is_empty() && now - *window.back().unwrap() < self.config.issue_window);
    }

    /// Runs until `cancel` fires, pruning expired entries on a fixed
    /// interval. Mirrors the cancellable-polling-loop shape used elsewhere
    /// in this codebase for background watchers.
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    self.sweep().await;
                }
                _ = cancel.cancelled() => {
                    log::info!("otp store sweeper shutting down");
                    break;
                }
            }
        }
    }
}

fn generate_code() -> String {
    let mut rng = rand::rng();
    format!("{:06}", rng.random_range(0..1_000_000u32))
}

#[cfg(test)]
mod tests {
    use super::super::clock::test_support::FakeClock;
    use super::*;

    fn store_with_clock() -> (Arc<FakeClock>, OtpStore) {
        let clock = Arc::new(FakeClock::new());
        let store = OtpStore::new(clock.clone(), OtpConfig::default());
        (clock, store)
    }

    #[tokio::test]
    async fn issue_then_verify_succeeds() {
        let (_clock, store) = store_with_clock();
        let code = store.issue("a@x.io").await.unwrap();
        assert_eq!(code.len(), 6);
        store.verify("a@x.io", &code).await.unwrap();
    }

    #[tokio::test]
    async fn verify_consumes_the_otp() {
        let (_clock, store) = store_with_clock();
        let code = store.issue("a@x.io").await.unwrap();
        store.verify("a@x.io", &code).await.unwrap();
        let err = store.verify("a@x.io", &code).await.unwrap_err();
        assert!(matches!(err, Error::OtpExpired));
    }

    #[tokio::test]
    async fn wrong_code_is_invalid_not_expired() {
        let (_clock, store) = store_with_clock();
        store.issue("a@x.io").await.unwrap();
        let err = store.verify("a@x.io", "000000").await.unwrap_err();
        assert!(matches!(err, Error::OtpInvalid));
    }

    #[tokio::test]
    async fn otp_expires_after_ttl() {
        let (clock, store) = store_with_clock();
        let code = store.issue("a@x.io").await.unwrap();
        clock.advance(301);
        let err = store.verify("a@x.io", &code).await.unwrap_err();
        assert!(matches!(err, Error::OtpExpired));
    }

    #[tokio::test]
    async fn fourth_issue_within_window_is_rate_limited() {
        let (_clock, store) = store_with_clock();
        for _ in 0..3 {
            store.issue("a@x.io").await.unwrap();
        }
        let err = store.issue("a@x.io").await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
    }

    #[tokio::test]
    async fn issue_window_resets_after_it_elapses() {
        let (clock, store) = store_with_clock();
        for _ in 0..3 {
            store.issue("a@x.io").await.unwrap();
        }
        clock.advance(61);
        store.issue("a@x.io").await.unwrap();
    }

    #[tokio::test]
    async fn fourth_wrong_verify_within_window_is_rate_limited() {
        let (_clock, store) = store_with_clock();
        store.issue("a@x.io").await.unwrap();
        for _ in 0..3 {
            let err = store.verify("a@x.io", "000000").await.unwrap_err();
            assert!(matches!(err, Error::OtpInvalid));
        }
        let err = store.verify("a@x.io", "000000").await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
    }
}
