use std::sync::Arc;

use crossbeam_channel::Receiver;
use tokio::sync::watch;

use livecall_foundation::{CallState, CallStateManager};
use livecall_telemetry::CallMetrics;
use livecall_video::RgbFrame;

/// Read-only view of the call handed to the presentation layer.
///
/// `connect`/`disconnect` on [`crate::CallRuntime`] are the only mutating
/// entry points; everything here just observes.
#[derive(Clone)]
pub struct CallObservables {
    state: CallStateManager,
    metrics: Arc<CallMetrics>,
    preview: watch::Receiver<Option<RgbFrame>>,
}

impl CallObservables {
    pub(crate) fn new(
        state: CallStateManager,
        metrics: Arc<CallMetrics>,
        preview: watch::Receiver<Option<RgbFrame>>,
    ) -> Self {
        Self {
            state,
            metrics,
            preview,
        }
    }

    pub fn state(&self) -> CallState {
        self.state.current()
    }

    pub fn subscribe_state(&self) -> Receiver<CallState> {
        self.state.subscribe()
    }

    /// Microphone loudness in [0, 1], for UI animation.
    pub fn volume(&self) -> f32 {
        self.metrics.volume()
    }

    /// Latest user-facing failure message; empty when the last connect
    /// attempt did not fail.
    pub fn error_message(&self) -> String {
        self.state.error_message()
    }

    /// Latest camera frame; `None` outside video mode.
    pub fn video_frame(&self) -> Option<RgbFrame> {
        self.preview.borrow().clone()
    }

    pub fn subscribe_video(&self) -> watch::Receiver<Option<RgbFrame>> {
        self.preview.clone()
    }

    pub fn metrics(&self) -> &CallMetrics {
        &self.metrics
    }
}
