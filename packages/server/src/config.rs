//! Relay configuration.
//!
//! The binary assembles a [`RelayConfig`] from command-line arguments and
//! environment variables; tests build one directly. [`RelayConfig::validate`]
//! runs before anything is started.

use std::{fmt, net::SocketAddr, num::NonZeroU32, time::Duration};

use governor::Quota;
use thiserror::Error;

use crate::{
    domain::{EndpointClass, InstanceId},
    infrastructure::{
        rate_governor::RateQuotas,
        token::hmac::{DEFAULT_ACCESS_LIFETIME, MIN_SECRET_LENGTH},
    },
};

pub const DEFAULT_COOKIE_NAME: &str = "token";
pub const DEFAULT_CHANNEL_PREFIX: &str = "yjs:room:";
pub const DEFAULT_EVENT_TOPIC: &str = "editor-events";
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_PRESENCE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("token secret must be at least {MIN_SECRET_LENGTH} bytes, got {0}")]
    WeakSecret(usize),

    #[error("rate limit for {class} must be positive")]
    InvalidQuota { class: EndpointClass },

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("presence heartbeat ({heartbeat:?}) must be shorter than the TTL ({ttl:?})")]
    HeartbeatTooSlow { heartbeat: Duration, ttl: Duration },

    #[error("invalid instance id '{0}'")]
    InvalidInstanceId(String),

    #[error("channel prefix and event topic must not be empty")]
    EmptyName,
}

#[derive(Clone)]
pub struct RelayConfig {
    pub bind_addr: SocketAddr,
    /// Origins admitted to the handshake; `*` admits any.
    pub allowed_origins: Vec<String>,
    /// Cookie the credential falls back to.
    pub cookie_name: String,
    /// Take the client key from `X-Forwarded-For` / `X-Real-IP`. Only safe
    /// behind a proxy that overwrites those headers.
    pub trust_forwarded_for: bool,
    pub token_secret: String,
    pub token_lifetime: Duration,
    pub quotas: RateQuotas,
    pub sweep_interval: Duration,
    pub presence_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub channel_prefix: String,
    pub event_topic: String,
    pub instance_id: InstanceId,
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("bind_addr", &self.bind_addr)
            .field("allowed_origins", &self.allowed_origins)
            .field("cookie_name", &self.cookie_name)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("token_secret", &"<redacted>")
            .field("token_lifetime", &self.token_lifetime)
            .field("quotas", &self.quotas)
            .field("sweep_interval", &self.sweep_interval)
            .field("presence_ttl", &self.presence_ttl)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("channel_prefix", &self.channel_prefix)
            .field("event_topic", &self.event_topic)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl RelayConfig {
    /// Configuration with every optional setting at its default.
    pub fn new(bind_addr: SocketAddr, token_secret: impl Into<String>) -> Self {
        Self {
            bind_addr,
            allowed_origins: Vec::new(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            trust_forwarded_for: false,
            token_secret: token_secret.into(),
            token_lifetime: DEFAULT_ACCESS_LIFETIME,
            quotas: RateQuotas::default(),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            presence_ttl: DEFAULT_PRESENCE_TTL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            event_topic: DEFAULT_EVENT_TOPIC.to_string(),
            instance_id: InstanceId::generate(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token_secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigError::WeakSecret(self.token_secret.len()));
        }
        for (name, interval) in [
            ("token lifetime", self.token_lifetime),
            ("sweep interval", self.sweep_interval),
            ("presence TTL", self.presence_ttl),
            ("heartbeat interval", self.heartbeat_interval),
        ] {
            if interval.is_zero() {
                return Err(ConfigError::ZeroInterval(name));
            }
        }
        if self.heartbeat_interval >= self.presence_ttl {
            return Err(ConfigError::HeartbeatTooSlow {
                heartbeat: self.heartbeat_interval,
                ttl: self.presence_ttl,
            });
        }
        if self.channel_prefix.is_empty() || self.event_topic.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        Ok(())
    }

    /// Consumer group of this instance on the event topic.
    pub fn consumer_group(&self) -> String {
        format!("relay-{}", self.instance_id)
    }
}

/// Requests per minute for one endpoint class.
pub fn quota_per_minute(class: EndpointClass, per_minute: u32) -> Result<Quota, ConfigError> {
    NonZeroU32::new(per_minute)
        .map(Quota::per_minute)
        .ok_or(ConfigError::InvalidQuota { class })
}

/// Sustained rate per second with a separate burst capacity.
pub fn quota_per_second(
    class: EndpointClass,
    per_second: u32,
    burst: u32,
) -> Result<Quota, ConfigError> {
    let rate = NonZeroU32::new(per_second).ok_or(ConfigError::InvalidQuota { class })?;
    let burst = NonZeroU32::new(burst).ok_or(ConfigError::InvalidQuota { class })?;
    Ok(Quota::per_second(rate).allow_burst(burst))
}

/// Split a comma separated list, dropping blanks.
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
