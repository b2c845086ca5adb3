//! Peer readiness signal

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// One-shot "peer enumeration and channel are ready" flag
///
/// The embedding environment signals this exactly once. Operations that
/// need the peer fail with `NotReady` until then; repeated signals are
/// harmless.
#[derive(Clone, Default)]
pub struct ReadinessFlag {
    ready: Arc<AtomicBool>,
}

impl ReadinessFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the peer is ready.
    pub fn signal(&self) {
        if !self.ready.swap(true, Ordering::AcqRel) {
            info!("peer signalled ready");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_ready() {
        let flag = ReadinessFlag::new();
        assert!(!flag.is_ready());
    }

    #[test]
    fn signal_is_sticky_and_shared() {
        let flag = ReadinessFlag::new();
        let clone = flag.clone();
        flag.signal();
        flag.signal();
        assert!(clone.is_ready());
    }
}
