//! Recording gate.
//!
//! Enables or disables capture without stopping the proxy listener. The state
//! is process-local and starts off.

use std::sync::atomic::{AtomicBool, Ordering};

/// Boolean capture switch shared between the proxy handler and the control surface.
#[derive(Debug, Default)]
pub struct RecordingGate {
    recording: AtomicBool,
}

impl RecordingGate {
    /// Creates a gate in the "not recording" state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether capture is enabled.
    ///
    /// This is the hot path for every intercepted request - just an atomic load.
    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    /// Sets the recording state, returning the previous value.
    pub fn set_recording(&self, recording: bool) -> bool {
        let old = self.recording.swap(recording, Ordering::SeqCst);
        if old != recording {
            tracing::info!("Recording {} -> {}", old, recording);
        }
        old
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_off() {
        assert!(!RecordingGate::new().is_recording());
    }

    #[test]
    fn set_returns_previous() {
        let gate = RecordingGate::new();
        assert!(!gate.set_recording(true));
        assert!(gate.is_recording());
        assert!(gate.set_recording(false));
        assert!(!gate.is_recording());
    }
}
