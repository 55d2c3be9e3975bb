use crate::error::AppError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Lifecycle of a single call.
///
/// `Ended` and `Error` are terminal for a call instance; the machine is
/// re-entered through `Connecting` for the next call. A user hangup maps to
/// a transition to `Ended`, which is allowed from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Connecting,
    Active,
    Error,
    Ended,
}

#[derive(Clone)]
pub struct CallStateManager {
    state: Arc<RwLock<CallState>>,
    error_msg: Arc<RwLock<String>>,
    state_tx: Sender<CallState>,
    state_rx: Receiver<CallState>,
}

impl Default for CallStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStateManager {
    pub fn new() -> Self {
        let (state_tx, state_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(RwLock::new(CallState::Idle)),
            error_msg: Arc::new(RwLock::new(String::new())),
            state_tx,
            state_rx,
        }
    }

    pub fn transition(&self, new_state: CallState) -> Result<(), AppError> {
        let mut current = self.state.write();
        if *current == new_state {
            return Ok(());
        }

        let valid = matches!(
            (*current, new_state),
            (CallState::Idle, CallState::Connecting)
                | (CallState::Ended, CallState::Connecting)
                | (CallState::Error, CallState::Connecting)
                // Re-dialing while a call exists: the runtime tears the old
                // session down first, then re-enters Connecting.
                | (CallState::Active, CallState::Connecting)
                | (CallState::Connecting, CallState::Active)
                | (CallState::Connecting, CallState::Error)
                | (CallState::Active, CallState::Error)
                | (_, CallState::Ended)
        );

        if !valid {
            return Err(AppError::InvalidTransition(format!(
                "{:?} -> {:?}",
                *current, new_state
            )));
        }

        tracing::info!("Call state: {:?} -> {:?}", *current, new_state);
        *current = new_state;
        let _ = self.state_tx.send(new_state);
        Ok(())
    }

    /// Enter `Connecting` for a fresh attempt, clearing the previous error.
    pub fn begin_connect(&self) -> Result<(), AppError> {
        self.error_msg.write().clear();
        self.transition(CallState::Connecting)
    }

    /// Record a user-facing failure message and enter `Error`.
    ///
    /// A failure reported after the call already ended leaves the state
    /// alone; the message is still recorded for diagnostics.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        *self.error_msg.write() = message;
        let _ = self.transition(CallState::Error);
    }

    pub fn current(&self) -> CallState {
        *self.state.read()
    }

    pub fn error_message(&self) -> String {
        self.error_msg.read().clone()
    }

    pub fn subscribe(&self) -> Receiver<CallState> {
        self.state_rx.clone()
    }
}
