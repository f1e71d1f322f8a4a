//! Per-key admission control.
//!
//! One keyed GCRA limiter per endpoint class, keyed by client network
//! identity. Buckets are created lazily on first use and dropped again by a
//! periodic sweep once they have refilled completely, so memory stays
//! bounded under churn of distinct client keys.

use std::{collections::HashMap, num::NonZeroU32, sync::Arc, time::Duration};

use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
};

use crate::domain::{ClientKey, EndpointClass};

type KeyedLimiter<C> =
    RateLimiter<ClientKey, DashMapStateStore<ClientKey>, C, NoOpMiddleware<<C as Clock>::Instant>>;

const fn nonzero(n: u32) -> NonZeroU32 {
    match NonZeroU32::new(n) {
        Some(n) => n,
        None => panic!("rate quota must be positive"),
    }
}

/// Bucket capacity and refill rate for every endpoint class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuotas {
    pub auth: Quota,
    pub handshake: Quota,
    pub room_mutation: Quota,
    pub snapshot_write: Quota,
    pub general: Quota,
    pub message: Quota,
}

impl RateQuotas {
    pub fn get(&self, class: EndpointClass) -> Quota {
        match class {
            EndpointClass::Auth => self.auth,
            EndpointClass::Handshake => self.handshake,
            EndpointClass::RoomMutation => self.room_mutation,
            EndpointClass::SnapshotWrite => self.snapshot_write,
            EndpointClass::General => self.general,
            EndpointClass::Message => self.message,
        }
    }

    /// The same quota for every class. Mostly useful in tests.
    pub fn uniform(quota: Quota) -> Self {
        Self {
            auth: quota,
            handshake: quota,
            room_mutation: quota,
            snapshot_write: quota,
            general: quota,
            message: quota,
        }
    }
}

impl Default for RateQuotas {
    fn default() -> Self {
        Self {
            auth: Quota::per_minute(nonzero(10)),
            handshake: Quota::per_minute(nonzero(30)),
            room_mutation: Quota::per_minute(nonzero(60)),
            snapshot_write: Quota::per_minute(nonzero(20)),
            general: Quota::per_minute(nonzero(100)),
            message: Quota::per_second(nonzero(50)).allow_burst(nonzero(200)),
        }
    }
}

/// Token-bucket admission per (client key, endpoint class).
pub struct RateGovernor<C: Clock = DefaultClock> {
    limiters: HashMap<EndpointClass, KeyedLimiter<C>>,
    clock: C,
}

impl RateGovernor<DefaultClock> {
    pub fn new(quotas: RateQuotas) -> Self {
        Self::with_clock(quotas, DefaultClock::default())
    }
}

impl<C: Clock> RateGovernor<C> {
    pub fn with_clock(quotas: RateQuotas, clock: C) -> Self {
        let limiters = EndpointClass::ALL
            .into_iter()
            .map(|class| {
                let limiter =
                    RateLimiter::new(quotas.get(class), DashMapStateStore::default(), &clock);
                (class, limiter)
            })
            .collect();
        Self { limiters, clock }
    }

    /// Take one token from the key's bucket for `class`.
    ///
    /// # Errors
    ///
    /// Returns how long the caller has to wait until a token is available.
    /// A denied check consumes nothing.
    pub fn check(&self, key: ClientKey, class: EndpointClass) -> Result<(), Duration> {
        let Some(limiter) = self.limiters.get(&class) else {
            return Ok(());
        };
        limiter
            .check_key(&key)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    pub fn admit(&self, key: ClientKey, class: EndpointClass) -> bool {
        self.check(key, class).is_ok()
    }

    /// Drop every bucket that has refilled completely.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep(&self) -> usize {
        let before = self.bucket_count();
        for limiter in self.limiters.values() {
            limiter.retain_recent();
            limiter.shrink_to_fit();
        }
        before.saturating_sub(self.bucket_count())
    }

    /// Number of live buckets across all classes.
    pub fn bucket_count(&self) -> usize {
        self.limiters.values().map(|limiter| limiter.len()).sum()
    }
}

/// Background task sweeping idle buckets every `interval`.
pub async fn cleanup_task(governor: Arc<RateGovernor>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let removed = governor.sweep();
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = governor.bucket_count(),
                "Swept idle rate buckets"
            );
        }
    }
}
