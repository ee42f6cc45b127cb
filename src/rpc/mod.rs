//! JSON-RPC Session Server (§4.H).

pub mod clients;
pub mod context;
pub mod dispatch;
pub mod methods;
pub mod protocol;
pub mod registry;
pub mod server;

pub use context::RpcContext;
pub use registry::MethodRegistry;
pub use server::JsonRpcServer;

use crate::auth::Role;
use crate::rpc_handler;

/// Populates the method table with every built-in method from §4.H's
/// table. `authenticate` has no minimum role (it establishes one).
pub fn register_builtin_methods(registry: &mut MethodRegistry) {
    registry.register("authenticate", None, "1.0", rpc_handler!(methods::authenticate));
    registry.register("ping", Some(Role::Viewer), "1.0", rpc_handler!(methods::ping));
    registry.register("get_camera_list", Some(Role::Viewer), "1.0", rpc_handler!(methods::get_camera_list));
    registry.register("get_camera_status", Some(Role::Viewer), "1.0", rpc_handler!(methods::get_camera_status));
    registry.register("get_streams", Some(Role::Viewer), "1.0", rpc_handler!(methods::get_streams));
    registry.register("list_recordings", Some(Role::Viewer), "1.0", rpc_handler!(methods::list_recordings));
    registry.register("list_snapshots", Some(Role::Viewer), "1.0", rpc_handler!(methods::list_snapshots));
    registry.register("get_recording_info", Some(Role::Viewer), "1.0", rpc_handler!(methods::get_recording_info));
    registry.register("get_snapshot_info", Some(Role::Viewer), "1.0", rpc_handler!(methods::get_snapshot_info));
    registry.register("take_snapshot", Some(Role::Operator), "1.0", rpc_handler!(methods::take_snapshot));
    registry.register("start_recording", Some(Role::Operator), "1.0", rpc_handler!(methods::start_recording));
    registry.register("stop_recording", Some(Role::Operator), "1.0", rpc_handler!(methods::stop_recording));
    registry.register("delete_recording", Some(Role::Operator), "1.0", rpc_handler!(methods::delete_recording));
    registry.register("get_metrics", Some(Role::Admin), "1.0", rpc_handler!(methods::get_metrics));
    registry.register("get_status", Some(Role::Admin), "1.0", rpc_handler!(methods::get_status));
    registry.register("get_server_info", Some(Role::Admin), "1.0", rpc_handler!(methods::get_server_info));
    registry.register("get_storage_info", Some(Role::Admin), "1.0", rpc_handler!(methods::get_storage_info));
}
