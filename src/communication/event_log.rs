// src/communication/event_log.rs - Semantic events handed to the persisting collaborator
use crate::windlass::Direction;
use chrono::{Local, NaiveDateTime, TimeDelta};
use serde::Serialize;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use uuid::Uuid;

/// Event action codes. The numeric values are stored by the site log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Action {
    Undefined = 0,
    Config = 1,
    BoatSettings = 2,
    InitialValue = 10,
    AdjustTarget = 11,
    AdjustActual = 12,
    SetManualRange = 13,
    Pause = 15,
    SetTarget = 20,
    ExtendToTarget = 21,
    RetractToTarget = 22,
    TargetReached = 25,
    ExtendManual = 31,
    RetractManual = 32,
    TakeControl = 90,
    Quit = 99,
}

impl Action {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// The action moves the chain.
    pub fn is_anchor_run(&self, target_run: bool, manual_run: bool) -> bool {
        let target = target_run && matches!(self, Action::ExtendToTarget | Action::RetractToTarget);
        let manual = manual_run && matches!(self, Action::ExtendManual | Action::RetractManual);
        target || manual
    }

    /// The action is worth reporting together with chain lengths.
    pub fn is_length_relevant(&self) -> bool {
        !matches!(
            self,
            Action::Undefined | Action::Config | Action::BoatSettings | Action::TakeControl | Action::Quit
        )
    }
}

/// The action recorded when a run starts in `direction`.
pub fn run_action(direction: Direction, manual: bool) -> Action {
    match (direction, manual) {
        (Direction::Extending, false) => Action::ExtendToTarget,
        (Direction::Retracting, false) => Action::RetractToTarget,
        (Direction::Extending, true) => Action::ExtendManual,
        (Direction::Retracting, true) => Action::RetractManual,
        (Direction::Idle, _) => Action::Undefined,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WindlassEvent {
    pub id: Uuid,
    pub timestamp: NaiveDateTime,
    pub action: Action,
    pub identity: Option<String>,
    pub target_length: f64,
    pub actual_length: f64,
}

/// Sending half of the event log. Recording never blocks: when the
/// collaborator falls behind, events are dropped with a warning.
#[derive(Debug, Clone)]
pub struct EventLog {
    sender: Option<Sender<WindlassEvent>>,
    tz_hour_adjust: i64,
}

impl EventLog {
    pub fn channel(buffer: usize, tz_hour_adjust: i64) -> (Self, Receiver<WindlassEvent>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self { sender: Some(sender), tz_hour_adjust }, receiver)
    }

    /// A log that discards everything.
    pub fn disabled() -> Self {
        Self { sender: None, tz_hour_adjust: 0 }
    }

    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local() + TimeDelta::hours(self.tz_hour_adjust)
    }

    pub fn record(&self, action: Action, identity: Option<&str>, target_length: f64, actual_length: f64) {
        let Some(sender) = &self.sender else {
            return;
        };
        let event = WindlassEvent {
            id: Uuid::new_v4(),
            timestamp: self.now(),
            action,
            identity: identity.map(str::to_string),
            target_length,
            actual_length,
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!("Event log full, dropped {:?} event", event.action);
            }
            Err(TrySendError::Closed(event)) => {
                tracing::debug!("Event log closed, dropped {:?} event", event.action);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_codes() {
        assert_eq!(Action::ExtendToTarget.code(), 21);
        assert_eq!(Action::TargetReached.code(), 25);
        assert_eq!(Action::Quit.code(), 99);
    }

    #[test]
    fn test_action_classification() {
        assert!(Action::ExtendToTarget.is_anchor_run(true, false));
        assert!(!Action::ExtendToTarget.is_anchor_run(false, true));
        assert!(Action::RetractManual.is_anchor_run(false, true));
        assert!(!Action::Pause.is_anchor_run(true, true));
        assert!(Action::Pause.is_length_relevant());
        assert!(!Action::TakeControl.is_length_relevant());
        assert_eq!(run_action(Direction::Retracting, true), Action::RetractManual);
        assert_eq!(run_action(Direction::Extending, false), Action::ExtendToTarget);
    }

    #[tokio::test]
    async fn test_record_delivers_events() {
        let (log, mut rx) = EventLog::channel(4, 0);
        log.record(Action::SetTarget, Some("10.0.0.2"), 20.0, 0.0);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.action, Action::SetTarget);
        assert_eq!(event.identity.as_deref(), Some("10.0.0.2"));
        assert_eq!(event.target_length, 20.0);
    }

    #[tokio::test]
    async fn test_full_log_drops_instead_of_blocking() {
        let (log, mut rx) = EventLog::channel(1, 0);
        log.record(Action::Pause, None, 20.0, 10.0);
        log.record(Action::Quit, None, 20.0, 10.0);
        assert_eq!(rx.recv().await.unwrap().action, Action::Pause);
        assert!(rx.try_recv().is_err());
        EventLog::disabled().record(Action::Quit, None, 0.0, 0.0);
    }
}
