//! Connection admission (§4.G "Connection admission", §8 "Connection count
//! exactly at max_connections rejects the next accept").

use std::sync::atomic::{AtomicUsize, Ordering};

/// Tracks active connection count against a configured ceiling. The Session
/// Server asks this before accepting a new client and releases the slot via
/// the returned guard's `Drop` on disconnect.
pub struct ConnectionAdmission {
    max_connections: usize,
    active: AtomicUsize,
}

impl ConnectionAdmission {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            active: AtomicUsize::new(0),
        }
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Attempt to admit one more connection. Returns `None` if the service is
    /// already at `max_connections`.
    pub fn try_admit(self: &std::sync::Arc<Self>) -> Option<ConnectionSlot> {
        loop {
            let current = self.active.load(Ordering::SeqCst);
            if current >= self.max_connections {
                return None;
            }
            if self
                .active
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(ConnectionSlot { admission: self.clone() });
            }
        }
    }
}

/// RAII guard for one admitted connection; releases its slot on drop.
pub struct ConnectionSlot {
    admission: std::sync::Arc<ConnectionAdmission>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.admission.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn admits_up_to_max_then_rejects() {
        let admission = Arc::new(ConnectionAdmission::new(2));
        let a = admission.try_admit();
        let b = admission.try_admit();
        let c = admission.try_admit();
        assert!(a.is_some());
        assert!(b.is_some());
        assert!(c.is_none());
        assert_eq!(admission.active_connections(), 2);
    }

    #[test]
    fn dropping_a_slot_frees_capacity() {
        let admission = Arc::new(ConnectionAdmission::new(1));
        let slot = admission.try_admit().unwrap();
        assert!(admission.try_admit().is_none());
        drop(slot);
        assert!(admission.try_admit().is_some());
    }
}
