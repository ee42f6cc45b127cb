//! Hybrid Discovery Monitor (§4.B): device enumeration, kernel-event
//! filtering, adaptive polling, and per-device capability validation.

pub mod capability;
pub mod device;
pub mod kernel_events;
pub mod monitor;
pub mod poller;
pub mod stream_name;

pub use capability::{CapabilitySource, DeviceCapabilityState, EffectiveCapability, ValidationThresholds};
pub use device::{Device, DeviceEvent, DeviceEventKind, DeviceStatus};
pub use kernel_events::{ChannelEventSource, KernelEvent, KernelEventAction, KernelEventSource, NoneEventSource};
pub use monitor::{CapabilityStatus, HybridDiscoveryMonitor};
pub use stream_name::stream_name_for;
