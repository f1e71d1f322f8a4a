//! Server assembly and execution.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    http::{
        HeaderValue,
        header::{REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS},
    },
    middleware,
    routing::get,
};
use tandem_shared::time::{Clock, SystemClock};
use thiserror::Error;
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::{
    config::{ConfigError, RelayConfig},
    domain::{
        BusError, EventLog, EventLogError, MessageBus, NoopSubscriber, PresenceStore,
        PresenceTracker, TokenService,
    },
    infrastructure::{
        BroadcastBridge, ConnectionRegistry, EventLogConsumer, EventLogProducer, RateGovernor,
        rate_governor::cleanup_task,
    },
    usecase::{HandshakeAuthenticator, MessageClass, RelayRoomHandler},
};

use super::{
    handler::{
        editor_handler, get_presence, health_check, rate_limit, yjs_handler, yjs_query_handler,
    },
    signal::shutdown_signal,
    state::AppState,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to start bus listener: {0}")]
    Bus(#[from] BusError),

    #[error("failed to start event log consumer: {0}")]
    EventLog(#[from] EventLogError),
}

/// Collaborative-editing relay
///
/// Owns the configuration and the external collaborators (bus, presence
/// store, event log, token service). Several servers sharing the same
/// collaborators behave as instances of one cluster.
///
/// # Example
///
/// ```ignore
/// let server = Server::new(config, bus, presence_store, event_log, token_service);
/// server.run().await?;
/// ```
pub struct Server {
    config: RelayConfig,
    bus: Arc<dyn MessageBus>,
    presence_store: Arc<dyn PresenceStore>,
    event_log: Arc<dyn EventLog>,
    token_service: Arc<dyn TokenService>,
    clock: Arc<dyn Clock>,
}

impl Server {
    pub fn new(
        config: RelayConfig,
        bus: Arc<dyn MessageBus>,
        presence_store: Arc<dyn PresenceStore>,
        event_log: Arc<dyn EventLog>,
        token_service: Arc<dyn TokenService>,
    ) -> Self {
        Self {
            config,
            bus,
            presence_store,
            event_log,
            token_service,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Bind the configured address and serve until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the address cannot
    /// be bound, or a background consumer fails to start.
    pub async fn run(self) -> Result<(), ServerError> {
        self.config.validate()?;
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `signal` resolves.
    ///
    /// # Errors
    ///
    /// See [`Server::run`].
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.config.validate()?;
        let config = Arc::new(self.config);
        let instance_id = config.instance_id.clone();

        // 1. Bus bridge and the registries of both message classes
        let bridge = Arc::new(BroadcastBridge::new(
            self.bus,
            instance_id.clone(),
            config.channel_prefix.clone(),
        ));
        let primary_registry = Arc::new(ConnectionRegistry::new(bridge.clone()));
        let legacy_registry = Arc::new(ConnectionRegistry::new(Arc::new(NoopSubscriber)));

        // 2. Presence, room handlers and handshake admission
        let presence = Arc::new(PresenceTracker::new(
            self.presence_store,
            instance_id.clone(),
            config.presence_ttl,
        ));
        let producer = Arc::new(EventLogProducer::new(
            self.event_log.clone(),
            config.event_topic.clone(),
        ));
        let primary = Arc::new(RelayRoomHandler::new(
            MessageClass::Opaque,
            primary_registry.clone(),
            bridge.clone(),
            presence.clone(),
            self.clock.clone(),
        ));
        let legacy = Arc::new(RelayRoomHandler::new(
            MessageClass::EditorEvent,
            legacy_registry.clone(),
            producer,
            presence.clone(),
            self.clock.clone(),
        ));
        let authenticator = Arc::new(HandshakeAuthenticator::new(
            self.token_service,
            &config.allowed_origins,
        ));
        let governor = Arc::new(RateGovernor::new(config.quotas));

        // 3. Background tasks
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        tasks.push(bridge.start(primary_registry.clone()).await?);
        tasks.push(
            EventLogConsumer::new(
                self.event_log,
                config.event_topic.clone(),
                config.consumer_group(),
                legacy_registry,
            )
            .start()
            .await?,
        );
        tasks.push(tokio::spawn(heartbeat(presence.clone(), config.heartbeat_interval)));
        tasks.push(tokio::spawn(cleanup_task(governor.clone(), config.sweep_interval)));

        // 4. Router
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app_state = Arc::new(AppState {
            config: config.clone(),
            authenticator,
            primary,
            legacy,
            governor,
            presence,
            clock: self.clock,
            shutdown: shutdown_rx,
        });
        let app = router(app_state);

        let local_addr = listener.local_addr()?;
        tracing::info!(instance_id = %instance_id, "Relay listening on {}", local_addr);
        tracing::info!("Connect to: ws://{}/ws/yjs/<roomId>", local_addr);

        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            signal.await;
            // open sessions close themselves when this flips
            let _ = shutdown_tx.send(true);
        })
        .await;

        for task in &tasks {
            task.abort();
        }
        tracing::info!("Server shutdown complete");

        result.map_err(ServerError::from)
    }
}

/// Routes of the relay.
///
/// Every response, rejections included, carries an `x-request-id` and the
/// usual browser hardening headers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // WebSocket endpoints
        .route("/ws/yjs", get(yjs_query_handler))
        .route("/ws/yjs/{room_id}", get(yjs_handler))
        .route("/ws/editor", get(editor_handler))
        // HTTP endpoints
        .route("/api/health", get(health_check))
        .route("/api/rooms/{room_id}/presence", get(get_presence))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(SetResponseHeaderLayer::overriding(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        // outermost last: the id is set before tracing and copied back onto the response
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Keep this instance's presence entries alive.
async fn heartbeat(presence: Arc<PresenceTracker>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let refreshed = presence.refresh_local().await;
        tracing::trace!(refreshed, "Presence heartbeat");
    }
}
