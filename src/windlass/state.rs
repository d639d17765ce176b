// src/windlass/state.rs - Run flags, status snapshot and the completion signal
use super::position::Direction;
use crate::hardware::HardwareError;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WindlassError {
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
    #[error("Command rejected: {0}")]
    InvalidCommand(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindlassState {
    pub direction: Direction,
    pub running: bool,
    pub paused: bool,
    pub quit: bool,
    pub prev_was_manual: bool,
}

impl Default for WindlassState {
    fn default() -> Self {
        Self {
            direction: Direction::Idle,
            running: false,
            paused: true,
            quit: false,
            prev_was_manual: false,
        }
    }
}

/// One-shot "run finished" flag for a single remote consumer.
///
/// `generation` counts every raise and is never reset, so observers that
/// must not consume the flag (the telemetry stream) can still notice new
/// completions.
#[derive(Debug, Default)]
pub struct CompletionSignal {
    pending: AtomicBool,
    generation: AtomicU64,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise unless already pending. Returns whether this call raised it.
    pub fn raise_once(&self) -> bool {
        let raised = self
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if raised {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        raised
    }

    pub fn raise(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Consume the flag. Only the first caller after a raise sees `true`.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::SeqCst)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindlassStatus {
    pub target_length: f64,
    pub actual_length: f64,
    pub running: bool,
    pub paused: bool,
    pub direction: Direction,
    pub quit: bool,
    pub signal_completed: bool,
    pub completions: u64,
}

impl Default for WindlassStatus {
    fn default() -> Self {
        let state = WindlassState::default();
        Self {
            target_length: 0.0,
            actual_length: 0.0,
            running: state.running,
            paused: state.paused,
            direction: state.direction,
            quit: state.quit,
            signal_completed: false,
            completions: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Already on target when called; nothing moved.
    OnTarget,
    /// The run stopped on its target.
    Reached,
    /// Stopped by `pause()` or `quit_listener()`.
    Paused,
    /// Paused and resumed in a new direction before the loop noticed.
    Redirected,
    /// Another run is in progress.
    Busy,
}
