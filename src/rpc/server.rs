//! JSON-RPC WebSocket session server (§4.H "Framing", §6 "Control channel").
//!
//! Grounded in the teacher's `web/ws.rs` split-sender/receiver +
//! `tokio::select!` shape, generalized from topic-filtered event fan-out to
//! authenticated JSON-RPC request/response plus broadcast notifications.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::rpc::clients::ClientRegistry;
use crate::rpc::context::RpcContext;
use crate::rpc::dispatch::dispatch_frame;
use crate::rpc::protocol::JsonRpcNotification;
use crate::rpc::registry::MethodRegistry;

pub struct JsonRpcServer {
    pub context: Arc<RpcContext>,
    pub registry: Arc<MethodRegistry>,
    pub clients: Arc<ClientRegistry>,
}

impl JsonRpcServer {
    pub fn new(context: Arc<RpcContext>, registry: MethodRegistry) -> Self {
        Self {
            context,
            registry: Arc::new(registry),
            clients: Arc::new(ClientRegistry::new()),
        }
    }

    /// Builds the axum router mounting the control channel at the
    /// configured websocket path (§6, default `/ws`).
    pub fn router(self: &Arc<Self>) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
        Router::new()
            .route(&self.context.config.server.websocket_path.clone(), get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.clone())
    }

    /// §4.H "Graceful shutdown": notify every open connection, then let
    /// their read loops observe the close.
    pub async fn shutdown(&self) {
        let notification = JsonRpcNotification::new("server_shutdown", serde_json::json!({}));
        if let Ok(frame) = serde_json::to_string(&notification) {
            self.clients.broadcast(frame).await;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(server): State<Arc<JsonRpcServer>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, server))
}

async fn handle_socket(socket: WebSocket, server: Arc<JsonRpcServer>) {
    let Some(_slot) = server.context.admission.try_admit() else {
        warn!("connection rejected: max_connections reached");
        return;
    };

    let client_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    server.clients.register(client_id, outbound_tx).await;
    server.context.rate_limiter.register(&client_id.to_string()).await;

    let mut notifications: broadcast::Receiver<JsonRpcNotification> = server.context.notifier.subscribe();
    let mut principal = None;

    info!(client = %client_id, "rpc client connected");

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(response) = dispatch_frame(&server.context, &server.registry, &client_id.to_string(), &mut principal, &text).await {
                            if sender.send(Message::Text(response)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(client = %client_id, "rpc client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sender.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(client = %client_id, error = %err, "rpc websocket receive error");
                        break;
                    }
                }
            }

            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if sender.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            notification = notifications.recv() => {
                match notification {
                    Ok(notification) => {
                        if let Ok(frame) = serde_json::to_string(&notification) {
                            if sender.send(Message::Text(frame)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(client = %client_id, missed = n, "rpc client lagged on notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    server.clients.remove(&client_id).await;
    server.context.rate_limiter.remove(&client_id.to_string()).await;
}
