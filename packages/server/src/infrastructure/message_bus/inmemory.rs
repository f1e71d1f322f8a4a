//! In-memory pub/sub bus built on a tokio broadcast channel.
//!
//! Every pattern subscription gets its own receiver on one shared channel
//! and filters by channel name. A subscriber that falls more than
//! `capacity` messages behind skips the overflow, which matches the
//! at-most-once contract of the bus.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::domain::{BusDelivery, BusError, BusSubscription, MessageBus};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct InMemoryMessageBus {
    sender: broadcast::Sender<BusDelivery>,
    patterns: Arc<DashMap<u64, Pattern>>,
    next_id: Arc<AtomicU64>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            patterns: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of live pattern subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.patterns.len()
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<usize, BusError> {
        let matching = self
            .patterns
            .iter()
            .filter(|entry| entry.value().matches(channel))
            .count();
        if matching == 0 {
            return Ok(0);
        }

        let delivery = BusDelivery {
            channel: channel.to_string(),
            payload,
        };
        // no receivers left between the count and the send
        if self.sender.send(delivery).is_err() {
            return Ok(0);
        }
        Ok(matching)
    }

    async fn psubscribe(&self, pattern: &str) -> Result<BusSubscription, BusError> {
        let pattern = Pattern::parse(pattern)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = SubscriptionState {
            receiver: self.sender.subscribe(),
            pattern: pattern.clone(),
            _guard: PatternGuard {
                id,
                patterns: self.patterns.clone(),
            },
        };
        self.patterns.insert(id, pattern);

        let deliveries = stream::unfold(state, |mut state| async move {
            loop {
                match state.receiver.recv().await {
                    Ok(delivery) if state.pattern.matches(&delivery.channel) => {
                        return Some((delivery, state));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Bus subscriber lagged, messages dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(deliveries.boxed())
    }
}

/// Channel pattern: an exact name, or a prefix followed by one trailing `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Exact(String),
    Prefix(String),
}

impl Pattern {
    fn parse(pattern: &str) -> Result<Self, BusError> {
        let (body, wildcard) = match pattern.strip_suffix('*') {
            Some(prefix) => (prefix, true),
            None => (pattern, false),
        };
        if body.contains(['*', '?', '[']) {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        }
        if !wildcard && body.is_empty() {
            return Err(BusError::InvalidPattern(pattern.to_string()));
        }
        Ok(if wildcard {
            Pattern::Prefix(body.to_string())
        } else {
            Pattern::Exact(body.to_string())
        })
    }

    fn matches(&self, channel: &str) -> bool {
        match self {
            Pattern::Exact(name) => name == channel,
            Pattern::Prefix(prefix) => channel.starts_with(prefix.as_str()),
        }
    }
}

struct SubscriptionState {
    receiver: broadcast::Receiver<BusDelivery>,
    pattern: Pattern,
    _guard: PatternGuard,
}

/// Forgets the pattern when the subscription stream is dropped.
struct PatternGuard {
    id: u64,
    patterns: Arc<DashMap<u64, Pattern>>,
}

impl Drop for PatternGuard {
    fn drop(&mut self) {
        self.patterns.remove(&self.id);
    }
}
