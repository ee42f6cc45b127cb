//! Shared, domain-agnostic helpers used across the service: raw socket
//! binding with explicit dual-stack control, and log throttling for
//! repeated-failure conditions (device probing, health checks).

pub mod net;
pub mod throttle;

pub use net::{bind_tcp_listener, bind_udp_socket};
pub use throttle::LogThrottler;
