//! Device data model (§3 `Device`).

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceStatus {
    Connected,
    Disconnected,
    Error,
}

/// A locally-attached video-capture device, identified by its stable path.
#[derive(Debug, Clone, Serialize)]
pub struct Device {
    pub path: String,
    pub index: u32,
    pub name: String,
    pub status: DeviceStatus,
}

impl Device {
    pub fn new(path: impl Into<String>, index: u32) -> Self {
        let path = path.into();
        Self {
            name: path.clone(),
            path,
            index,
            status: DeviceStatus::Connected,
        }
    }
}

/// The kind of change that produced a [`DeviceEvent`] (§4.B, §4.I).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventKind {
    Connected,
    Disconnected,
    StatusChanged,
}

/// An event emitted by the Discovery Monitor for the Orchestrator to act on.
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    pub device: Device,
    pub correlation_id: String,
}
