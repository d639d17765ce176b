// src/telemetry.rs - Live chain length feed for a single observer
use crate::config::WindlassConfig;
use crate::windlass::{Windlass, WindlassStatus, round1};
use async_stream::stream;
use futures_core::Stream;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Value sent in place of a length once a run has completed.
pub const COMPLETED_SENTINEL: f64 = -1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionReading {
    Position(f64),
    Completed,
}

impl PositionReading {
    pub fn value(&self) -> f64 {
        match self {
            PositionReading::Position(length) => *length,
            PositionReading::Completed => COMPLETED_SENTINEL,
        }
    }

    /// Payload of a server-sent `data:` line.
    pub fn to_event_data(&self) -> String {
        self.value().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryChannel {
    status: watch::Receiver<WindlassStatus>,
    fast: Duration,
    idle: Duration,
}

impl TelemetryChannel {
    pub fn new(windlass: &Windlass, config: &WindlassConfig) -> Self {
        Self {
            status: windlass.subscribe_status(),
            fast: config.telemetry_fast(),
            idle: config.telemetry_idle(),
        }
    }

    /// Open a reading stream. It ends only when the windlass quits; dropping
    /// it tears it down.
    ///
    /// First poll: one reading straight away, running or not. Running: the
    /// rounded length, every `fast`. After each completion: one
    /// [`PositionReading::Completed`]. Otherwise nothing, polling every `idle`.
    pub fn subscribe(&self) -> impl Stream<Item = PositionReading> + Send + 'static + use<> {
        let mut status = self.status.clone();
        let fast = self.fast;
        let idle = self.idle;
        stream! {
            let mut first = true;
            let mut seen = {
                let current = status.borrow_and_update();
                current.completions - u64::from(current.signal_completed && current.completions > 0)
            };
            loop {
                let (running, quit, actual, completions) = {
                    let current = status.borrow_and_update();
                    (current.running, current.quit, current.actual_length, current.completions)
                };
                if quit {
                    break;
                }
                if first {
                    first = false;
                    yield PositionReading::Position(round1(actual));
                } else if running {
                    sleep(fast).await;
                    let (still_running, actual) = {
                        let current = status.borrow();
                        (current.running, current.actual_length)
                    };
                    // A run that ended during the sleep is reported by its sentinel.
                    if still_running {
                        yield PositionReading::Position(round1(actual));
                    }
                } else if completions != seen {
                    seen = completions;
                    yield PositionReading::Completed;
                } else {
                    sleep(idle).await;
                }
            }
        }
    }
}
