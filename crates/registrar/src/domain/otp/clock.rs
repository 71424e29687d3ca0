use time::OffsetDateTime;

/// Injected everywhere a store needs "now", so OTP/pending TTL and
/// rate-limit-window tests can advance time deterministically instead of
/// sleeping real seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[cfg(test)]
pub mod test_support {
    use super::Clock;
    use std::sync::atomic::{AtomicI64, Ordering};
    use time::OffsetDateTime;

    /// A clock that starts at the current real time and only moves forward
    /// when told to, via `advance`.
    pub struct FakeClock {
        unix_seconds: AtomicI64,
    }

    impl FakeClock {
        pub fn new() -> Self {
            Self {
                unix_seconds: AtomicI64::new(OffsetDateTime::now_utc().unix_timestamp()),
            }
        }

        pub fn advance(&self, seconds: i64) {
            self.unix_seconds.fetch_add(seconds, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> OffsetDateTime {
            OffsetDateTime::from_unix_timestamp(self.unix_seconds.load(Ordering::SeqCst))
                .expect("valid unix timestamp")
        }
    }
}
