//! Atomic lifecycle state cell.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{LifecycleError, LifecycleResult, LifecycleState};

/// Lifecycle state as an atomic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum LifecycleStateValue {
    Running = 0,
    ShuttingDown = 1,
    Stopped = 2,
}

impl From<u8> for LifecycleStateValue {
    fn from(v: u8) -> Self {
        match v {
            0 => LifecycleStateValue::Running,
            1 => LifecycleStateValue::ShuttingDown,
            _ => LifecycleStateValue::Stopped,
        }
    }
}

impl From<LifecycleStateValue> for LifecycleState {
    fn from(v: LifecycleStateValue) -> Self {
        match v {
            LifecycleStateValue::Running => LifecycleState::Running,
            LifecycleStateValue::ShuttingDown => LifecycleState::ShuttingDown,
            LifecycleStateValue::Stopped => LifecycleState::Stopped,
        }
    }
}

impl From<LifecycleState> for LifecycleStateValue {
    fn from(v: LifecycleState) -> Self {
        match v {
            LifecycleState::Running => LifecycleStateValue::Running,
            LifecycleState::ShuttingDown => LifecycleStateValue::ShuttingDown,
            LifecycleState::Stopped => LifecycleStateValue::Stopped,
        }
    }
}

/// Process-wide lifecycle state, starting at `Running`.
#[derive(Debug)]
pub struct StateCell {
    value: AtomicU8,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            value: AtomicU8::new(LifecycleStateValue::Running as u8),
        }
    }

    /// Current state.
    pub fn get(&self) -> LifecycleState {
        LifecycleStateValue::from(self.value.load(Ordering::SeqCst)).into()
    }

    /// Move from `from` to `to`. Only forward transitions are accepted, and
    /// only one caller can win a given transition.
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> LifecycleResult<()> {
        let from_value = LifecycleStateValue::from(from);
        let to_value = LifecycleStateValue::from(to);
        if to_value as u8 <= from_value as u8 {
            return Err(LifecycleError::InvalidStateTransition { from, to });
        }

        self.value
            .compare_exchange(
                from_value as u8,
                to_value as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(|actual| LifecycleError::InvalidStateTransition {
                from: LifecycleStateValue::from(actual).into(),
                to,
            })
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
