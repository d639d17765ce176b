// src/windlass/mod.rs - Run/pause/resume state machine driving the relay board
pub mod position;
pub mod state;

pub use position::{Direction, PositionModel, round1};
pub use state::{CompletionSignal, RunOutcome, WindlassError, WindlassState, WindlassStatus};

use crate::communication::{Action, EventLog, run_action};
use crate::config::{WindlassConfig, WindlassParameters};
use crate::hardware::{ActuatorDriver, HardwareError};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::time::{Duration, Instant, sleep};

#[derive(Debug)]
struct WindlassCore {
    model: PositionModel,
    state: WindlassState,
    driver: Box<dyn ActuatorDriver>,
}

impl WindlassCore {
    /// A pending manual target decides the direction.
    fn sync_direction(&mut self) {
        if let Some(direction) = self.model.manual_direction() {
            self.state.direction = direction;
        }
    }

    fn on_target(&mut self) -> bool {
        self.sync_direction();
        self.model.on_target(self.state.direction)
    }

    fn energize(&mut self, direction: Direction) -> Result<(), HardwareError> {
        self.driver.connect()?;
        match direction {
            Direction::Extending => self.driver.set_extend(true),
            Direction::Retracting => self.driver.set_retract(true),
            Direction::Idle => Ok(()),
        }
    }

    fn stop_outputs(&mut self) -> Result<(), HardwareError> {
        if self.driver.is_connected() {
            self.driver.all_off()
        } else {
            Ok(())
        }
    }

    fn settle(&mut self) {
        self.state.running = false;
        self.state.paused = true;
        self.state.direction = Direction::Idle;
    }

    fn snapshot(&self, completion: &CompletionSignal) -> WindlassStatus {
        WindlassStatus {
            target_length: self.model.target_length,
            actual_length: self.model.actual_length,
            running: self.state.running,
            paused: self.state.paused,
            direction: self.state.direction,
            quit: self.state.quit,
            signal_completed: completion.is_pending(),
            completions: completion.generation(),
        }
    }
}

/// Integration anchored at the start of a leg, so the position after `t`
/// seconds is `origin ± speed * t` however the ticks fell.
struct RunLeg {
    origin: f64,
    speed: f64,
    travelled: Duration,
}

impl RunLeg {
    fn start(model: &PositionModel, direction: Direction) -> Self {
        Self {
            origin: model.actual_length,
            speed: model.speed_per_second(direction),
            travelled: Duration::ZERO,
        }
    }
}

/// Shared handle onto the windlass. Clones drive the same state machine.
#[derive(Debug, Clone)]
pub struct Windlass {
    core: Arc<Mutex<WindlassCore>>,
    completion: Arc<CompletionSignal>,
    status_tx: Arc<watch::Sender<WindlassStatus>>,
    events: EventLog,
    tick: Duration,
}

impl Windlass {
    pub fn new(
        driver: Box<dyn ActuatorDriver>,
        params: WindlassParameters,
        config: &WindlassConfig,
        events: EventLog,
    ) -> Self {
        let model = PositionModel::new(params, config.on_target_threshold);
        let core = WindlassCore {
            model,
            state: WindlassState::default(),
            driver,
        };
        let completion = CompletionSignal::new();
        let (status_tx, _) = watch::channel(core.snapshot(&completion));
        Self {
            core: Arc::new(Mutex::new(core)),
            completion: Arc::new(completion),
            status_tx: Arc::new(status_tx),
            events,
            tick: config.tick_interval(),
        }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    fn publish(&self, core: &WindlassCore) {
        self.status_tx.send_replace(core.snapshot(&self.completion));
    }

    fn record(&self, core: &WindlassCore, action: Action) {
        let target = if action.is_anchor_run(false, true) {
            core.model.effective_target()
        } else {
            core.model.target_length
        };
        self.events.record(action, None, target, round1(core.model.actual_length));
    }

    pub fn subscribe_status(&self) -> watch::Receiver<WindlassStatus> {
        self.status_tx.subscribe()
    }

    pub async fn status(&self) -> WindlassStatus {
        self.core.lock().await.snapshot(&self.completion)
    }

    pub async fn status_message(&self) -> String {
        let core = self.core.lock().await;
        format!(
            "target_length={}m actual_length={}m running={} paused={} direction={}",
            core.model.target_length,
            (core.model.actual_length * 100.0).round() / 100.0,
            core.state.running,
            core.state.paused,
            core.state.direction.label(false)
        )
    }

    /// Consume the completion flag. Only one caller sees each completion.
    pub async fn take_completion(&self) -> bool {
        let core = self.core.lock().await;
        let taken = self.completion.take();
        if taken {
            self.publish(&core);
        }
        taken
    }

    pub fn completion_generation(&self) -> u64 {
        self.completion.generation()
    }

    pub async fn parameters(&self) -> WindlassParameters {
        let core = self.core.lock().await;
        let model = &core.model;
        WindlassParameters {
            chain_length: model.chain_length,
            min_length_up: model.min_length_up,
            down_speed: model.down_speed,
            up_speed: model.up_speed,
            boat_length: model.boat_length,
        }
    }

    pub async fn update_parameters(&self, params: WindlassParameters) {
        let mut core = self.core.lock().await;
        core.model.update_parameters(params);
        tracing::info!(
            "Windlass parameters updated: chain_length={} min_length_up={} down_speed={} up_speed={}",
            params.chain_length, params.min_length_up, params.down_speed, params.up_speed
        );
        self.record(&core, Action::BoatSettings);
        self.publish(&core);
    }

    /// Set the chain length to run to, clamped to the chain on board.
    pub async fn set_target_length(&self, meters: f64) -> f64 {
        self.store_target(meters, Action::SetTarget).await
    }

    /// Operator adjustment of the target. Same bounds as
    /// [`set_target_length`](Self::set_target_length), logged apart from
    /// targets computed from the depth.
    pub async fn adjust_target_length(&self, meters: f64) -> f64 {
        self.store_target(meters, Action::AdjustTarget).await
    }

    async fn store_target(&self, meters: f64, action: Action) -> f64 {
        let mut core = self.core.lock().await;
        let target = meters.clamp(0.0, core.model.chain_length);
        core.model.target_length = target;
        tracing::debug!("Target length set to {}m", target);
        self.record(&core, action);
        self.publish(&core);
        target
    }

    /// Operator correction of the estimate, e.g. after reading the chain marks.
    pub async fn set_actual_length(&self, meters: f64) -> Result<f64, WindlassError> {
        let mut core = self.core.lock().await;
        if core.state.running {
            tracing::warn!("Actual length adjustment requested while running, ignored");
            return Err(WindlassError::InvalidCommand("already running".to_string()));
        }
        let actual = round1(meters.clamp(0.0, core.model.chain_length));
        core.model.actual_length = actual;
        self.record(&core, Action::AdjustActual);
        self.publish(&core);
        Ok(actual)
    }

    /// Direction the next run or resume would take.
    pub async fn run_direction(&self) -> Direction {
        self.core.lock().await.model.run_direction()
    }

    pub async fn deploy_length(&self, depth: f64, use_safety: bool, min_remain: f64) -> f64 {
        self.core.lock().await.model.deploy_length(depth, use_safety, min_remain)
    }

    /// Run until the chain is on target, or until paused or quit.
    ///
    /// The lock is only held between ticks, so commands issued while the
    /// windlass runs are seen by the next tick.
    pub async fn run_to_target(&self) -> Result<RunOutcome, WindlassError> {
        let mut core = self.core.lock().await;
        if core.state.running {
            return Ok(RunOutcome::Busy);
        }
        if core.state.direction == Direction::Idle && !core.model.has_manual_target() {
            core.state.direction = core.model.run_direction();
            tracing::warn!(
                "Run requested without a direction, derived {}",
                core.state.direction.label(false)
            );
        }

        if core.on_target() {
            tracing::debug!("Already on target, direction={}", core.state.direction.label(false));
            let stopped = core.stop_outputs();
            core.settle();
            core.model.clear_manual();
            if self.completion.raise_once() {
                tracing::debug!("Completion signalled");
            }
            self.publish(&core);
            stopped?;
            return Ok(RunOutcome::OnTarget);
        }

        let direction = core.state.direction;
        if let Err(e) = core.energize(direction) {
            tracing::error!("Failed to start windlass {}: {}", direction.label(false), e);
            let _ = core.stop_outputs();
            core.settle();
            self.publish(&core);
            return Err(e.into());
        }
        core.state.running = true;
        let manual = core.model.has_manual_target();
        tracing::info!(
            "Windlass running {} from {:.1}m to {:.1}m",
            direction.label(false),
            core.model.actual_length,
            core.model.effective_target()
        );
        self.record(&core, run_action(direction, manual));
        self.publish(&core);
        let mut leg = RunLeg::start(&core.model, direction);
        drop(core);

        let mut previous = Instant::now();
        loop {
            sleep(self.tick).await;
            let mut core = self.core.lock().await;
            let now = Instant::now();
            let elapsed = now - previous;
            previous = now;

            if core.model.speed_per_second(direction) != leg.speed {
                leg = RunLeg::start(&core.model, direction);
            }
            leg.travelled += elapsed;
            core.model.actual_length = leg.origin;
            core.model.advance(direction, leg.travelled.as_secs_f64());
            core.model.clamp();

            core.sync_direction();
            let stopped = core.state.paused || core.state.quit;
            // Paused and resumed towards the other side within one tick.
            let heading = core.state.direction;
            let redirected = !stopped && heading != direction && heading != Direction::Idle;
            let reached = !redirected && core.model.on_target(direction);
            if stopped || redirected || reached {
                return self.finish_run(&mut core, direction, manual, reached, stopped);
            }
            self.publish(&core);
        }
    }

    fn finish_run(
        &self,
        core: &mut WindlassCore,
        direction: Direction,
        manual: bool,
        reached: bool,
        stopped: bool,
    ) -> Result<RunOutcome, WindlassError> {
        let off = core.stop_outputs();
        core.model.actual_length = round1(core.model.actual_length);
        core.model.clamp();
        if reached {
            if !manual {
                self.record(core, Action::TargetReached);
            }
            core.model.clear_manual();
        }
        core.state.running = false;

        let outcome = if !reached && !stopped {
            // Resumed in the other direction. Stay unpaused for the listener,
            // the next leg signals completion.
            tracing::debug!(
                "Run {} redirected to {}",
                direction.label(false),
                core.state.direction.label(false)
            );
            RunOutcome::Redirected
        } else {
            self.completion.raise();
            core.settle();
            if reached { RunOutcome::Reached } else { RunOutcome::Paused }
        };
        tracing::info!(
            "Windlass stopped at {:.1}m ({:?})",
            core.model.actual_length, outcome
        );
        self.publish(core);

        if let Err(e) = off {
            tracing::error!("Failed to de-energize windlass: {}", e);
            core.settle();
            self.publish(core);
            return Err(e.into());
        }
        Ok(outcome)
    }

    /// Pause the current run. Only takes effect while running.
    pub async fn pause(&self) -> bool {
        let mut core = self.core.lock().await;
        if !core.state.running {
            tracing::debug!("Pause requested but not running");
            return false;
        }
        core.state.paused = true;
        tracing::debug!("Pause requested");
        self.record(&core, Action::Pause);
        self.publish(&core);
        true
    }

    /// Continue towards the target. Manual nudges are dropped.
    pub async fn resume(&self) -> bool {
        let mut core = self.core.lock().await;
        if core.state.paused {
            core.state.paused = false;
            core.model.clear_manual();
            core.state.direction = core.model.run_direction();
            core.state.prev_was_manual = false;
            tracing::debug!("Resumed with direction {}", core.state.direction.label(false));
            self.publish(&core);
        }
        !core.state.paused
    }

    pub async fn manual_extend(&self, meters: f64) -> bool {
        self.try_manual_extend(meters).await.is_ok()
    }

    pub async fn manual_retract(&self, meters: f64) -> bool {
        self.try_manual_retract(meters).await.is_ok()
    }

    /// Deploy `meters` more chain, bounded by the chain on board.
    pub async fn try_manual_extend(&self, meters: f64) -> Result<f64, WindlassError> {
        let mut core = self.core.lock().await;
        let model = &core.model;
        let rejection = if core.state.running {
            Some("Already running, anchor-down ignored".to_string())
        } else if !meters.is_finite() || meters <= 0.0 {
            Some(format!("Invalid manual distance {}m, anchor-down ignored", meters))
        } else if model.actual_length >= model.chain_length - 1.0 {
            Some("Already at max, anchor-down ignored".to_string())
        } else {
            None
        };
        if let Some(reason) = rejection {
            tracing::warn!("{}", reason);
            return Err(WindlassError::InvalidCommand(reason));
        }
        let target = round1(model.actual_length + meters).min(model.chain_length);
        core.model.manual_retract_target = 0.0;
        core.model.manual_extend_target = target;
        core.state.direction = Direction::Extending;
        core.state.paused = false;
        core.state.prev_was_manual = true;
        self.publish(&core);
        Ok(target)
    }

    /// Retrieve `meters` of chain, never beyond the minimum length.
    pub async fn try_manual_retract(&self, meters: f64) -> Result<f64, WindlassError> {
        let mut core = self.core.lock().await;
        let model = &core.model;
        let rejection = if core.state.running {
            Some("Already running, anchor-up ignored".to_string())
        } else if !meters.is_finite() || meters <= 0.0 {
            Some(format!("Invalid manual distance {}m, anchor-up ignored", meters))
        } else if model.actual_length <= model.min_length_up {
            Some(format!("Below {}m, anchor-up ignored", model.min_length_up))
        } else {
            None
        };
        if let Some(reason) = rejection {
            tracing::warn!("{}", reason);
            return Err(WindlassError::InvalidCommand(reason));
        }
        let target = round1(model.actual_length - meters).max(model.min_length_up);
        core.model.manual_extend_target = 0.0;
        core.model.manual_retract_target = target;
        core.state.direction = Direction::Retracting;
        core.state.paused = false;
        core.state.prev_was_manual = true;
        self.publish(&core);
        Ok(target)
    }

    pub async fn quit_listener(&self) {
        let mut core = self.core.lock().await;
        if core.state.quit {
            return;
        }
        tracing::debug!("Quit requested");
        core.state.quit = true;
        self.record(&core, Action::Quit);
        self.publish(&core);
    }

    pub async fn is_quit(&self) -> bool {
        self.core.lock().await.state.quit
    }

    pub async fn anchor_is_almost_up(&self) -> bool {
        self.core.lock().await.model.anchor_is_almost_up()
    }

    /// Setting a new target is relevant to the operator.
    pub async fn set_enabled(&self) -> bool {
        let mut core = self.core.lock().await;
        let mut enabled = core.model.target_length < core.model.min_length_up;
        if !enabled && !core.state.prev_was_manual {
            enabled = core.on_target();
        }
        enabled
    }

    pub async fn pause_enabled(&self) -> bool {
        let mut core = self.core.lock().await;
        !core.state.paused && !core.on_target()
    }

    pub async fn resume_enabled(&self) -> bool {
        let core = self.core.lock().await;
        if !core.state.paused {
            return false;
        }
        let model = &core.model;
        model.actual_length < model.target_length
            || (model.actual_length > model.target_length && model.target_length >= model.min_length_up)
    }

    /// Background loop: start a run whenever the windlass is unpaused and
    /// off target, until quit. The driver is disconnected on the way out.
    pub async fn run_listener(&self) {
        tracing::info!("Windlass listener started");
        loop {
            let start_run = {
                let mut core = self.core.lock().await;
                if core.state.quit {
                    break;
                }
                if core.state.paused {
                    false
                } else if core.on_target() {
                    core.state.paused = true;
                    self.publish(&core);
                    false
                } else {
                    true
                }
            };
            if start_run {
                match self.run_to_target().await {
                    Ok(outcome) => tracing::debug!("Run finished: {:?}", outcome),
                    Err(e) => tracing::error!("Windlass run aborted: {}", e),
                }
            }
            sleep(self.tick).await;
        }
        let mut core = self.core.lock().await;
        if let Err(e) = core.driver.disconnect() {
            tracing::warn!("Relay board did not disconnect cleanly: {}", e);
        }
        tracing::info!("Windlass listener finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::RelayBoard;
    use crate::hardware::gpio::MockBank;

    fn windlass() -> (Windlass, MockBank) {
        let (board, bank) = RelayBoard::mock();
        let windlass = Windlass::new(
            Box::new(board),
            WindlassParameters::default(),
            &WindlassConfig::default(),
            EventLog::disabled(),
        );
        (windlass, bank)
    }

    #[tokio::test]
    async fn test_initial_status() {
        let (windlass, _bank) = windlass();
        let status = windlass.status().await;
        assert!(status.paused);
        assert!(!status.running);
        assert_eq!(status.direction, Direction::Idle);
        assert_eq!(
            windlass.status_message().await,
            "target_length=0m actual_length=0m running=false paused=true direction=idle"
        );
    }

    #[tokio::test]
    async fn test_target_and_actual_are_clamped() {
        let (windlass, _bank) = windlass();
        assert_eq!(windlass.set_target_length(80.0).await, 50.0);
        assert_eq!(windlass.set_actual_length(-3.0).await.unwrap(), 0.0);
        assert_eq!(windlass.set_actual_length(12.34).await.unwrap(), 12.3);
    }

    #[tokio::test]
    async fn test_on_target_run_signals_once() {
        let (windlass, bank) = windlass();
        assert_eq!(windlass.run_to_target().await.unwrap(), RunOutcome::OnTarget);
        assert_eq!(windlass.completion_generation(), 1);
        assert_eq!(windlass.run_to_target().await.unwrap(), RunOutcome::OnTarget);
        assert_eq!(windlass.completion_generation(), 1);
        assert!(windlass.take_completion().await);
        assert!(!windlass.take_completion().await);
        assert!(!bank.extend.is_active() && !bank.retract.is_active());
    }

    #[tokio::test]
    async fn test_manual_targets_are_bounded() {
        let (windlass, _bank) = windlass();
        windlass.set_actual_length(48.5).await.unwrap();
        assert_eq!(windlass.try_manual_extend(5.0).await.unwrap(), 50.0);
        windlass.set_actual_length(6.0).await.unwrap();
        assert_eq!(windlass.try_manual_retract(5.0).await.unwrap(), 5.0);
        let status = windlass.status().await;
        assert_eq!(status.direction, Direction::Retracting);
        assert!(!status.paused);
    }

    #[tokio::test]
    async fn test_resume_drops_manual_target() {
        let (windlass, _bank) = windlass();
        windlass.set_target_length(20.0).await;
        windlass.set_actual_length(30.0).await.unwrap();
        assert!(windlass.manual_extend(1.0).await);
        // Not paused any more: resume is a no-op that reports running intent.
        assert!(windlass.resume().await);
        assert_eq!(windlass.status().await.direction, Direction::Extending);
    }

    #[tokio::test]
    async fn test_button_relevance() {
        let (windlass, _bank) = windlass();
        assert!(windlass.set_enabled().await);
        assert!(!windlass.resume_enabled().await);
        windlass.set_target_length(20.0).await;
        assert!(windlass.resume_enabled().await);
        assert!(!windlass.pause_enabled().await);
        windlass.resume().await;
        assert!(windlass.pause_enabled().await);
        assert!(!windlass.set_enabled().await);
    }

    #[tokio::test]
    async fn test_anchor_is_almost_up() {
        let (windlass, _bank) = windlass();
        windlass.set_target_length(5.0).await;
        windlass.set_actual_length(6.0).await.unwrap();
        assert!(windlass.anchor_is_almost_up().await);
    }

    #[tokio::test]
    async fn test_quit_is_recorded_once() {
        let (log, mut rx) = EventLog::channel(8, 0);
        let (board, _bank) = RelayBoard::mock();
        let windlass = Windlass::new(
            Box::new(board),
            WindlassParameters::default(),
            &WindlassConfig::default(),
            log,
        );
        windlass.quit_listener().await;
        windlass.quit_listener().await;
        assert!(windlass.is_quit().await);
        assert_eq!(rx.recv().await.unwrap().action, Action::Quit);
        assert!(rx.try_recv().is_err());
    }
}
