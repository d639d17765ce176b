pub mod event_log;

pub use event_log::{Action, EventLog, WindlassEvent, run_action};
