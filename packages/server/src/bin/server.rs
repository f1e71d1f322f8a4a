//! Collaborative-editing relay server.
//!
//! Relays WebSocket traffic between the clients of a room and tracks who is
//! in each room.
//!
//! Run with:
//! ```not_rust
//! JWT_SECRET=... cargo run --bin tandem-server
//! cargo run --bin tandem-server -- --host 0.0.0.0 --port 3000 --allowed-origins https://a.example
//! ```

use std::{net::SocketAddr, sync::Arc, time::Duration};

use clap::Parser;
use tandem_server::{
    config::{self, ConfigError, RelayConfig},
    domain::{EndpointClass, InstanceId},
    infrastructure::{
        HmacTokenService, InMemoryEventLog, InMemoryMessageBus, InMemoryPresenceStore, RateQuotas,
    },
    ui::Server,
};
use tandem_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "tandem-server")]
#[command(about = "Real-time relay for collaborative editing", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, env = "TANDEM_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, env = "TANDEM_PORT", default_value = "8080")]
    port: u16,

    /// Comma separated origins admitted to the handshake (`*` for any)
    #[arg(long, env = "TANDEM_ALLOWED_ORIGINS", default_value = "")]
    allowed_origins: String,

    /// HMAC secret for bearer tokens, at least 32 bytes
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Access token lifetime in seconds
    #[arg(long, env = "TANDEM_TOKEN_LIFETIME_SECS", default_value = "1800")]
    token_lifetime_secs: u64,

    /// Cookie that may carry the bearer token
    #[arg(long, env = "TANDEM_COOKIE_NAME", default_value = config::DEFAULT_COOKIE_NAME)]
    cookie_name: String,

    /// Key rate limits on X-Forwarded-For / X-Real-IP (only behind a trusted proxy)
    #[arg(long, env = "TANDEM_TRUST_FORWARDED_FOR")]
    trust_forwarded_for: bool,

    /// Instance id on the bus and in presence entries (random when unset)
    #[arg(long, env = "TANDEM_INSTANCE_ID")]
    instance_id: Option<String>,

    /// Bus channel prefix of room channels
    #[arg(long, env = "TANDEM_CHANNEL_PREFIX", default_value = config::DEFAULT_CHANNEL_PREFIX)]
    channel_prefix: String,

    /// Event log topic of editor events
    #[arg(long, env = "TANDEM_EVENT_TOPIC", default_value = config::DEFAULT_EVENT_TOPIC)]
    event_topic: String,

    /// Presence entry TTL in seconds
    #[arg(long, env = "TANDEM_PRESENCE_TTL_SECS", default_value = "60")]
    presence_ttl_secs: u64,

    /// Presence heartbeat interval in seconds
    #[arg(long, env = "TANDEM_HEARTBEAT_SECS", default_value = "20")]
    heartbeat_secs: u64,

    /// Idle rate bucket sweep interval in seconds
    #[arg(long, env = "TANDEM_SWEEP_SECS", default_value = "60")]
    sweep_secs: u64,

    /// Auth requests per minute per client
    #[arg(long, env = "TANDEM_RATE_AUTH", default_value = "10")]
    rate_auth: u32,

    /// Handshakes per minute per client
    #[arg(long, env = "TANDEM_RATE_HANDSHAKE", default_value = "30")]
    rate_handshake: u32,

    /// Room mutations per minute per client
    #[arg(long, env = "TANDEM_RATE_ROOM_MUTATION", default_value = "60")]
    rate_room_mutation: u32,

    /// Snapshot writes per minute per client
    #[arg(long, env = "TANDEM_RATE_SNAPSHOT_WRITE", default_value = "20")]
    rate_snapshot_write: u32,

    /// Other requests per minute per client
    #[arg(long, env = "TANDEM_RATE_GENERAL", default_value = "100")]
    rate_general: u32,

    /// Relay frames per second per client
    #[arg(long, env = "TANDEM_RATE_MESSAGE", default_value = "50")]
    rate_message: u32,

    /// Relay frame burst per client
    #[arg(long, env = "TANDEM_RATE_MESSAGE_BURST", default_value = "200")]
    rate_message_burst: u32,
}

impl TryFrom<Args> for RelayConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let bind = format!("{}:{}", args.host, args.port);
        let bind_addr: SocketAddr = bind
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(bind.clone()))?;

        let instance_id = match args.instance_id {
            Some(id) => {
                InstanceId::new(id.clone()).map_err(|_| ConfigError::InvalidInstanceId(id))?
            }
            None => InstanceId::generate(),
        };

        let quotas = RateQuotas {
            auth: config::quota_per_minute(EndpointClass::Auth, args.rate_auth)?,
            handshake: config::quota_per_minute(EndpointClass::Handshake, args.rate_handshake)?,
            room_mutation: config::quota_per_minute(
                EndpointClass::RoomMutation,
                args.rate_room_mutation,
            )?,
            snapshot_write: config::quota_per_minute(
                EndpointClass::SnapshotWrite,
                args.rate_snapshot_write,
            )?,
            general: config::quota_per_minute(EndpointClass::General, args.rate_general)?,
            message: config::quota_per_second(
                EndpointClass::Message,
                args.rate_message,
                args.rate_message_burst,
            )?,
        };

        let relay = RelayConfig {
            allowed_origins: config::parse_list(&args.allowed_origins),
            cookie_name: args.cookie_name,
            trust_forwarded_for: args.trust_forwarded_for,
            token_lifetime: Duration::from_secs(args.token_lifetime_secs),
            quotas,
            sweep_interval: Duration::from_secs(args.sweep_secs),
            presence_ttl: Duration::from_secs(args.presence_ttl_secs),
            heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
            channel_prefix: args.channel_prefix,
            event_topic: args.event_topic,
            instance_id,
            ..RelayConfig::new(bind_addr, args.jwt_secret)
        };
        relay.validate()?;
        Ok(relay)
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    // Initialize dependencies in order:
    // 1. Configuration
    // 2. Token service
    // 3. Bus, presence store and event log
    // 4. Server

    // 1. Validate configuration
    let config = match RelayConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    tracing::debug!(?config, "Configuration loaded");
    if config.allowed_origins.is_empty() {
        tracing::warn!("No allowed origins configured; browser handshakes will be rejected");
    }

    // 2. Create the token service
    let token_service =
        match HmacTokenService::new(config.token_secret.as_bytes(), config.token_lifetime) {
            Ok(service) => Arc::new(service),
            Err(e) => {
                tracing::error!("Failed to create token service: {}", e);
                std::process::exit(1);
            }
        };

    // 3. Create the process-local bus, presence store and event log
    let bus = Arc::new(InMemoryMessageBus::new());
    let presence_store = Arc::new(InMemoryPresenceStore::new());
    let event_log = Arc::new(InMemoryEventLog::new());

    // 4. Create and run the server
    let server = Server::new(config, bus, presence_store, event_log, token_service);
    if let Err(e) = server.run().await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
