//! Shared context handed to every RPC method handler (§4.H, §4.I).

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::auth::rate_limit::RateLimiter;
use crate::auth::registry::ConnectionAdmission;
use crate::auth::Authenticator;
use crate::config::AppConfig;
use crate::discovery::HybridDiscoveryMonitor;
use crate::health::HealthSupervisor;
use crate::mediamtx::MediaMtxClient;
use crate::path_manager::PathManager;
use crate::recording::RecordingDriver;
use crate::rpc::protocol::JsonRpcNotification;

pub struct RpcContext {
    pub config: AppConfig,
    pub authenticator: Arc<Authenticator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub admission: Arc<ConnectionAdmission>,
    pub discovery: Arc<HybridDiscoveryMonitor>,
    pub mediamtx: Arc<MediaMtxClient>,
    pub path_manager: Arc<PathManager>,
    pub recording: Arc<RecordingDriver>,
    pub health: Arc<HealthSupervisor>,
    pub notifier: broadcast::Sender<JsonRpcNotification>,
    pub started_at: Instant,
}

impl RpcContext {
    pub fn notify(&self, notification: JsonRpcNotification) {
        // A lagging/absent subscriber must never block dispatch.
        let _ = self.notifier.send(notification);
    }
}
