//! Shared application state.

use std::sync::Arc;

use tandem_shared::time::Clock;
use tokio::sync::watch;

use crate::{
    config::RelayConfig,
    domain::PresenceTracker,
    infrastructure::RateGovernor,
    usecase::{HandshakeAuthenticator, RelayRoomHandler},
};

pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub authenticator: Arc<HandshakeAuthenticator>,
    /// Opaque relay on `/ws/yjs/{roomId}`.
    pub primary: Arc<RelayRoomHandler>,
    /// Editor-event relay on `/ws/editor`.
    pub legacy: Arc<RelayRoomHandler>,
    pub governor: Arc<RateGovernor>,
    pub presence: Arc<PresenceTracker>,
    pub clock: Arc<dyn Clock>,
    /// Flips to `true` once the server starts shutting down.
    pub shutdown: watch::Receiver<bool>,
}
