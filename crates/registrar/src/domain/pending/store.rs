//! In-memory pending-registration store (spec.md §4.3): holds a validated
//! registration payload between `Register` and a successful `VerifyOTP`.
//!
//! `take` is the only way a caller ever reads here and it is destructive —
//! serialized by the same mutex that guards inserts, so of N concurrent
//! `VerifyOTP` calls for one email exactly one observes `Some`, the rest
//! observe `None` (spec.md §5: "read-remove executed under a mutex...
//! exactly one wins").

use crate::domain::otp::Clock;
use registrar_core::RegistrationRequest;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct PendingConfig {
    pub ttl: Duration,
    pub sweep_interval: StdDuration,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            // Slightly longer than the OTP TTL (spec.md §4.3: "its TTL must
            // be >= OTP expires_at, plus a small slack").
            ttl: Duration::minutes(15),
            sweep_interval: StdDuration::from_secs(3600),
        }
    }
}

struct Entry {
    request: RegistrationRequest,
    expires_at: OffsetDateTime,
}

pub struct PendingRegistrationStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    config: PendingConfig,
}

impl PendingRegistrationStore {
    pub fn new(clock: Arc<dyn Clock>, config: PendingConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
            config,
        }
    }

    /// Replaces any existing pending payload for this email (spec.md §4.3:
    /// "If a second Register call arrives for the same email while one is
    /// pending, the new payload replaces the old").
    pub async fn put(&self, email: &str, request: RegistrationRequest) {
        let expires_at = self.clock.now() + self.config.ttl;
        self.entries
            .lock()
            .await
            .insert(email.to_string(), Entry { request, expires_at });
    }

    /// Read-and-remove. Returns `None` if absent, expired, or already taken
    /// by a concurrent caller.
    pub async fn take(&self, email: &str) -> Option<RegistrationRequest> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match entries.remove(email) {
            Some(entry) if entry.expires_at > now => Some(entry.request),
            _ => None,
        }
    }

    pub async fn count(&self) -> i64 {
        self.entries.lock().await.len() as i64
    }

    async fn sweep(&self) {
        let now = self.clock.now();
        self.entries
            .lock()
            .await
            .retain(|_, entry| entry.expires_at > now);
    }

    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    self.sweep().await;
                }
                _ = cancel.cancelled() => {
                    log::info!("pending registration sweeper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::otp::clock::test_support::FakeClock;

    fn sample_request(email: &str) -> RegistrationRequest {
        RegistrationRequest {
            team_name: "Byte Busters".into(),
            leader_name: "Asha Rao".into(),
            leader_email: email.into(),
            leader_phone: "9876543210".into(),
            college_name: "NIT Trichy".into(),
            year: "3".into(),
            domain: "Web".into(),
            team_members: vec![],
            terms_accepted: true,
        }
    }

    #[tokio::test]
    async fn take_removes_the_entry() {
        let clock = Arc::new(FakeClock::new());
        let store = PendingRegistrationStore::new(clock, PendingConfig::default());
        store.put("a@x.io", sample_request("a@x.io")).await;
        assert!(store.take("a@x.io").await.is_some());
        assert!(store.take("a@x.io").await.is_none());
    }

    #[tokio::test]
    async fn put_replaces_an_existing_pending_payload() {
        let clock = Arc::new(FakeClock::new());
        let store = PendingRegistrationStore::new(clock, PendingConfig::default());
        store.put("a@x.io", sample_request("a@x.io")).await;
        let mut second = sample_request("a@x.io");
        second.team_name = "Replaced".into();
        store.put("a@x.io", second).await;
        let taken = store.take("a@x.io").await.unwrap();
        assert_eq!(taken.team_name, "Replaced");
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let clock = Arc::new(FakeClock::new());
        let store = PendingRegistrationStore::new(clock.clone(), PendingConfig::default());
        store.put("a@x.io", sample_request("a@x.io")).await;
        clock.advance(16 * 60);
        assert!(store.take("a@x.io").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn only_one_concurrent_take_wins() {
        let clock = Arc::new(FakeClock::new());
        let store = Arc::new(PendingRegistrationStore::new(clock, PendingConfig::default()));
        store.put("a@x.io", sample_request("a@x.io")).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.take("a@x.io").await }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
