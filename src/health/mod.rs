//! Health Supervisor with circuit-breaker anti-flapping (§4.D, §3 `HealthState`).

pub mod supervisor;

pub use supervisor::{HealthProbe, HealthStatus, HealthSupervisor, HealthSupervisorSnapshot};
