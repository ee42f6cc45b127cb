//! Kernel device-event source abstraction (§4.B, §6, §9 "Optional-dependency
//! fallback").
//!
//! The host's video-subsystem event source (udev/netlink or equivalent) is an
//! external collaborator (§1 Out of scope) — this crate defines only the
//! interface it consumes. The monitor composes whichever implementation is
//! present; there is no conditional compilation or runtime reflection.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelEventAction {
    Add,
    Remove,
    Change,
}

#[derive(Debug, Clone)]
pub struct KernelEvent {
    pub device_node: String,
    pub action: KernelEventAction,
}

/// A source of kernel device events. `next_event` must return within
/// `timeout` (§5: "each kernel-event poll... must have a bounded timeout so
/// the loop remains responsive to cancellation") even if nothing happened.
#[async_trait]
pub trait KernelEventSource: Send + Sync {
    async fn next_event(&mut self, timeout: Duration) -> Option<KernelEvent>;
}

/// Fallback implementation used when no kernel-event library is available:
/// the monitor runs polling-only (§9).
pub struct NoneEventSource;

#[async_trait]
impl KernelEventSource for NoneEventSource {
    async fn next_event(&mut self, timeout: Duration) -> Option<KernelEvent> {
        tokio::time::sleep(timeout).await;
        None
    }
}

/// Adapts an external event feed (fed by an out-of-scope kernel-event
/// subscriber this crate does not implement) into a [`KernelEventSource`].
pub struct ChannelEventSource {
    receiver: mpsc::Receiver<KernelEvent>,
}

impl ChannelEventSource {
    pub fn new(receiver: mpsc::Receiver<KernelEvent>) -> Self {
        Self { receiver }
    }
}

#[async_trait]
impl KernelEventSource for ChannelEventSource {
    async fn next_event(&mut self, timeout: Duration) -> Option<KernelEvent> {
        tokio::time::timeout(timeout, self.receiver.recv()).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn none_source_bounds_its_wait_by_timeout() {
        let mut source = NoneEventSource;
        let started = std::time::Instant::now();
        let event = source.next_event(Duration::from_millis(20)).await;
        assert!(event.is_none());
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn channel_source_forwards_events_until_timeout() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(KernelEvent {
            device_node: "/dev/video0".to_string(),
            action: KernelEventAction::Add,
        })
        .await
        .unwrap();
        let mut source = ChannelEventSource::new(rx);
        let event = source.next_event(Duration::from_millis(100)).await;
        assert!(event.is_some());
    }
}
