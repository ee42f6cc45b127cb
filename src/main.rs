//! Camera service daemon entry point.
//!
//! Parses CLI overrides, assembles the typed [`AppConfig`], and brings the
//! four core subsystems up in the §4.I startup order: MediaMTX client →
//! Path Manager → Discovery Monitor → Health Supervisor → Session Server.
//! Any component failure during startup triggers reverse teardown of
//! whatever already started; a running service tears down the same way
//! on a shutdown signal (§4.I, §5 "Cancellation").

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use camera_service::auth::api_key::ApiKeyStore;
use camera_service::auth::rate_limit::RateLimiter;
use camera_service::auth::registry::ConnectionAdmission;
use camera_service::auth::token::TokenAuthenticator;
use camera_service::auth::Authenticator;
use camera_service::config::AppConfig;
use camera_service::discovery::{HybridDiscoveryMonitor, KernelEventSource, NoneEventSource};
use camera_service::health::HealthSupervisor;
use camera_service::mediamtx::MediaMtxClient;
use camera_service::orchestrator;
use camera_service::path_manager::PathManager;
use camera_service::recording::RecordingDriver;
use camera_service::rpc::context::RpcContext;
use camera_service::rpc::registry::MethodRegistry;
use camera_service::rpc::server::JsonRpcServer;
use camera_service::utils::bind_tcp_listener;
use camera_service::{files, AppError};

/// Log level for the daemon, mirroring the teacher's `LogLevel` enum.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Camera service daemon command line arguments.
#[derive(Parser, Debug)]
#[command(name = "camera-service")]
#[command(version, about = "Bridges local video-capture devices to a MediaMTX media server", long_about = None)]
struct CliArgs {
    /// Control-channel listen address (overrides config default).
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Control-channel (JSON-RPC WebSocket) port.
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// File/artifact + health HTTP port.
    #[arg(long, value_name = "PORT")]
    file_port: Option<u16>,

    /// MediaMTX host.
    #[arg(long, value_name = "HOST")]
    mediamtx_host: Option<String>,

    /// MediaMTX configuration API port.
    #[arg(long, value_name = "PORT")]
    mediamtx_api_port: Option<u16>,

    /// Inclusive lower bound of the monitored device index range.
    #[arg(long, value_name = "N")]
    device_range_start: Option<u32>,

    /// Inclusive upper bound of the monitored device index range.
    #[arg(long, value_name = "N")]
    device_range_end: Option<u32>,

    /// Path to the API key store document (created if absent).
    #[arg(long, value_name = "FILE")]
    api_keys_path: Option<PathBuf>,

    /// HMAC secret for signed tokens. If unset, a random secret is
    /// generated for this process lifetime and every previously issued
    /// token becomes invalid on restart -- fine for a fresh deployment,
    /// but callers that need stable tokens across restarts must set this
    /// (directly or via the env overlay, see §6).
    #[arg(long, value_name = "SECRET")]
    token_secret: Option<String>,

    /// Environment variable prefix for the §6 overlay
    /// (`<PREFIX>_JWT_SECRET`, `<PREFIX>_API_KEYS_PATH`, `<PREFIX>_RATE_RPM`).
    #[arg(long, value_name = "PREFIX", default_value = "CAMERA_SERVICE")]
    env_prefix: String,

    /// External device-introspection tool binary name (§4.A).
    #[arg(long, value_name = "BIN", default_value = "v4l2-ctl")]
    prober_tool: String,

    /// External snapshot/recording encoder binary name (§4.F).
    #[arg(long, value_name = "BIN", default_value = "ffmpeg")]
    encoder_tool: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    info!("starting camera-service v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::default();
    apply_cli_overrides(&mut config, &args);
    config.apply_env_overlay(&args.env_prefix);

    if config.security.token_secret.is_empty() {
        warn!("no token secret configured; generating an ephemeral one -- signed tokens will not survive a restart");
        config.security.token_secret = generate_ephemeral_secret();
    }

    tokio::fs::create_dir_all(&config.mediamtx.recordings_path).await?;
    tokio::fs::create_dir_all(&config.mediamtx.snapshots_path).await?;
    if let Some(parent) = PathBuf::from(&config.security.api_keys_path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match run(config, args).await {
        Ok(()) => {
            info!("camera-service shut down cleanly");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "camera-service exited with a fatal startup error");
            Err(err.into())
        }
    }
}

/// Brings every component up in the §4.I order, serves both HTTP
/// surfaces until a shutdown signal arrives, then tears everything down.
/// Returns the first fatal [`AppError`] if startup fails partway through,
/// having already reverse-torn-down whatever did start.
async fn run(config: AppConfig, args: CliArgs) -> camera_service::Result<()> {
    // --- C: MediaMTX HTTP client -------------------------------------
    let mediamtx = Arc::new(MediaMtxClient::new(&config.mediamtx)?);
    info!(host = %config.mediamtx.host, api_port = config.mediamtx.api_port, "mediamtx client ready");

    // --- E: Path Manager ----------------------------------------------
    let path_manager = Arc::new(PathManager::new(mediamtx.clone()));

    // --- B: Hybrid Discovery Monitor ------------------------------------
    let discovery = Arc::new(HybridDiscoveryMonitor::new(config.camera.clone()).with_prober_tool(args.prober_tool.clone()));
    info!(
        range = ?config.camera.device_range,
        "discovery monitor ready, range {}..={}",
        config.camera.device_range.0,
        config.camera.device_range.1
    );

    // --- G: Auth & Rate-Limit Middleware --------------------------------
    let api_keys = match ApiKeyStore::load(PathBuf::from(&config.security.api_keys_path)).await {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(error = %err, "failed to load api key store, tearing down");
            return Err(AppError::Fatal(format!("api key store: {err}")));
        }
    };
    let tokens = TokenAuthenticator::new(config.security.token_secret.clone());
    let authenticator = Arc::new(Authenticator::new(tokens, api_keys));
    let rate_limiter = Arc::new(RateLimiter::new(
        std::time::Duration::from_secs(config.security.rate_limit_window_secs),
        config.security.requests_per_minute,
    ));
    let admission = Arc::new(ConnectionAdmission::new(config.server.max_connections));

    // --- D: Health Supervisor (started below, after context exists) ----
    let health = Arc::new(HealthSupervisor::new(&config.mediamtx));

    // --- F: Snapshot/Recording Driver ------------------------------------
    let recording = Arc::new(RecordingDriver::new(
        mediamtx.clone(),
        args.encoder_tool.clone(),
        PathBuf::from(&config.mediamtx.recordings_path),
        PathBuf::from(&config.mediamtx.snapshots_path),
    ));

    let (notifier, _) = broadcast::channel(256);

    let ctx = Arc::new(RpcContext {
        config: config.clone(),
        authenticator,
        rate_limiter,
        admission,
        discovery: discovery.clone(),
        mediamtx: mediamtx.clone(),
        path_manager,
        recording,
        health: health.clone(),
        notifier,
        started_at: std::time::Instant::now(),
    });

    // Background tasks: health supervisor, discovery monitor, orchestrator.
    // A failure in any of these is fatal to the process (§4.I "any component
    // failure triggers reverse teardown"); we model that here as the first
    // task handle to finish causing the whole `run` future to return.
    let mut health_handle = {
        let health = health.clone();
        let probe: Arc<dyn camera_service::health::HealthProbe> = mediamtx.clone();
        tokio::spawn(async move { health.run(probe).await })
    };

    let mut discovery_handle = {
        let discovery = discovery.clone();
        let kernel_source: Box<dyn KernelEventSource> = Box::new(NoneEventSource);
        tokio::spawn(async move { discovery.run(kernel_source).await })
    };

    let mut orchestrator_handle = {
        let ctx = ctx.clone();
        tokio::spawn(async move { orchestrator::run(ctx).await })
    };

    // --- H: JSON-RPC Session Server + §4.J file/health HTTP surface -----
    let mut registry = MethodRegistry::new();
    camera_service::rpc::register_builtin_methods(&mut registry);
    let rpc_server = Arc::new(JsonRpcServer::new(ctx.clone(), registry));

    let control_addr: std::net::SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|err| AppError::Fatal(format!("invalid server.host/port: {err}")))?;
    let file_addr: std::net::SocketAddr = format!("{}:{}", config.server.host, config.server.file_port)
        .parse()
        .map_err(|err| AppError::Fatal(format!("invalid server.host/file_port: {err}")))?;

    let control_listener = bind_tcp_listener(control_addr).map_err(|err| {
        error!(addr = %control_addr, error = %err, "failed to bind control channel, tearing down");
        AppError::Fatal(format!("bind {control_addr}: {err}"))
    })?;
    let file_listener = bind_tcp_listener(file_addr).map_err(|err| {
        error!(addr = %file_addr, error = %err, "failed to bind file/health listener, tearing down");
        AppError::Fatal(format!("bind {file_addr}: {err}"))
    })?;

    let control_listener = tokio::net::TcpListener::from_std(control_listener).map_err(AppError::Io)?;
    let file_listener = tokio::net::TcpListener::from_std(file_listener).map_err(AppError::Io)?;

    info!(addr = %control_addr, path = %config.server.websocket_path, "control channel listening");
    info!(addr = %file_addr, "file/health surface listening");

    let control_router = rpc_server.router();
    let file_router = files::router(ctx.clone());

    let control_server = axum::serve(control_listener, control_router.into_make_service());
    let file_server = axum::serve(file_listener, file_router.into_make_service());

    let shutdown_signal = async {
        tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
    };

    tokio::select! {
        _ = shutdown_signal => {
            info!("stopping on shutdown signal");
        }
        result = control_server => {
            if let Err(err) = result {
                error!(error = %err, "control channel server error");
            }
        }
        result = file_server => {
            if let Err(err) = result {
                error!(error = %err, "file/health server error");
            }
        }
        result = &mut health_handle => {
            error!(?result, "health supervisor task exited unexpectedly");
        }
        result = &mut discovery_handle => {
            error!(?result, "discovery monitor task exited unexpectedly");
        }
        result = &mut orchestrator_handle => {
            error!(?result, "orchestrator task exited unexpectedly");
        }
    }

    // Graceful shutdown: notify clients, then cancel whichever background
    // tasks did not already exit on their own (§4.H, §5 "Cancellation" --
    // dropping a JoinHandle detaches rather than cancels, so each task that
    // is still running is aborted explicitly).
    rpc_server.shutdown().await;
    health_handle.abort();
    discovery_handle.abort();
    orchestrator_handle.abort();

    Ok(())
}

fn apply_cli_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(address) = &args.address {
        config.server.host = address.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(port) = args.file_port {
        config.server.file_port = port;
    }
    if let Some(host) = &args.mediamtx_host {
        config.mediamtx.host = host.clone();
    }
    if let Some(port) = args.mediamtx_api_port {
        config.mediamtx.api_port = port;
    }
    if let (Some(start), Some(end)) = (args.device_range_start, args.device_range_end) {
        config.camera.device_range = (start, end);
    }
    if let Some(path) = &args.api_keys_path {
        config.security.api_keys_path = path.to_string_lossy().to_string();
    }
    if let Some(secret) = &args.token_secret {
        config.security.token_secret = secret.clone();
    }
}

/// Generates a non-persistent HMAC secret for a process that was started
/// without one configured. Not cryptographically precious beyond this
/// process's lifetime, but must not be predictable or fixed.
fn generate_ephemeral_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Initializes `tracing` the way the teacher's `init_logging` does: a
/// per-target filter derived from CLI level/verbosity, overridable by
/// `RUST_LOG`.
fn init_logging(level: LogLevel, verbose_count: u8) {
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "camera_service=error,tower_http=error",
        LogLevel::Warn => "camera_service=warn,tower_http=warn",
        LogLevel::Info => "camera_service=info,tower_http=info",
        LogLevel::Debug => "camera_service=debug,tower_http=debug",
        LogLevel::Trace => "camera_service=trace,tower_http=debug",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {err}");
    }
}
