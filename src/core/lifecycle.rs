use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PipelineState {
    Stopped = 0,
    Starting = 1,
    Running = 2,
    Draining = 3,
    Faulted = 4,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PipelineState::Starting,
            2 => PipelineState::Running,
            3 => PipelineState::Draining,
            4 => PipelineState::Faulted,
            _ => PipelineState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Stopped => "stopped",
            PipelineState::Starting => "starting",
            PipelineState::Running => "running",
            PipelineState::Draining => "draining",
            PipelineState::Faulted => "faulted",
        }
    }

    /// Running and Draining report healthy; everything else does not.
    pub fn is_healthy(&self) -> bool {
        matches!(self, PipelineState::Running | PipelineState::Draining)
    }

    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Faulted)
                | (Starting, Stopped)
                | (Running, Draining)
                | (Running, Faulted)
                | (Draining, Stopped)
                | (Draining, Faulted)
        )
    }
}

/// Shared, lock-free view of the coordinator's state.
#[derive(Debug, Clone)]
pub struct StateHandle {
    inner: Arc<AtomicU8>,
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(PipelineState::Stopped as u8)),
        }
    }

    pub fn get(&self) -> PipelineState {
        PipelineState::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// Move to `next` if that is a legal edge from the current state.
    pub fn transition(&self, next: PipelineState) -> bool {
        let current = self.get();
        if !current.can_transition_to(next) {
            tracing::warn!(from = current.as_str(), to = next.as_str(), "Illegal pipeline state transition ignored");
            return false;
        }
        let swapped = self
            .inner
            .compare_exchange(current as u8, next as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            tracing::info!(from = current.as_str(), to = next.as_str(), "Pipeline state changed");
        }
        swapped
    }
}
