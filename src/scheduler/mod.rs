// src/scheduler/mod.rs - Background tasks: the windlass listener and the fan monitor
use crate::config::{AppConfig, MonitorConfig};
use crate::hardware::FanSwitch;
use crate::hardware::temperature::{FanMonitor, FanThresholds, TemperatureSensor};
use crate::windlass::Windlass;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

pub struct Scheduler {
    windlass: Windlass,
    monitor: Option<FanMonitor>,
    shutdown_tx: broadcast::Sender<()>,
    thresholds_tx: watch::Sender<FanThresholds>,
    tasks: Vec<JoinHandle<()>>,
    started: bool,
}

impl Scheduler {
    pub fn new(
        windlass: Windlass,
        sensor: Arc<dyn TemperatureSensor>,
        fan: FanSwitch,
        app: &AppConfig,
        monitor: &MonitorConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (thresholds_tx, thresholds_rx) = watch::channel(FanThresholds::from_config(app));
        let monitor = FanMonitor::new(sensor, fan, thresholds_rx, monitor);
        Self {
            windlass,
            monitor: Some(monitor),
            shutdown_tx,
            thresholds_tx,
            tasks: Vec::new(),
            started: false,
        }
    }

    /// Spawn both loops. Later calls do nothing.
    pub fn start(&mut self) {
        if self.started {
            tracing::debug!("Scheduler already started");
            return;
        }
        self.started = true;
        tracing::info!("Starting background tasks");

        let windlass = self.windlass.clone();
        self.tasks.push(tokio::spawn(async move {
            windlass.run_listener().await;
        }));

        if let Some(monitor) = self.monitor.take() {
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.tasks.push(tokio::spawn(monitor.run(shutdown_rx)));
        }
    }

    pub fn is_running(&self) -> bool {
        self.started && self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Applied by the monitor on its next sample.
    pub fn update_fan_thresholds(&self, thresholds: FanThresholds) {
        self.thresholds_tx.send_replace(thresholds);
    }

    /// Quit the windlass listener, stop the monitor and wait for both.
    pub async fn shutdown(&mut self) {
        tracing::info!("Shutting down background tasks");
        self.windlass.quit_listener().await;
        let _ = self.shutdown_tx.send(());
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!("Background task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::EventLog;
    use crate::config::{WindlassConfig, WindlassParameters};
    use crate::hardware::RelayBoard;
    use crate::hardware::gpio::{MockBank, OutputSource};
    use crate::hardware::temperature::SimulatedTemperature;
    use tokio::time::{Duration, sleep};

    fn scheduler(celsius: f64) -> (Scheduler, Windlass, MockBank, MockBank) {
        let (board, relay_bank) = RelayBoard::mock();
        let windlass = Windlass::new(
            Box::new(board),
            WindlassParameters::default(),
            &WindlassConfig::default(),
            EventLog::disabled(),
        );
        let fan_bank = MockBank::default();
        let fan = FanSwitch::new(OutputSource::Mock(fan_bank.clone()), 21);
        let scheduler = Scheduler::new(
            windlass.clone(),
            Arc::new(SimulatedTemperature::new(celsius)),
            fan,
            &AppConfig::default(),
            &MonitorConfig::default(),
        );
        (scheduler, windlass, relay_bank, fan_bank)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let (mut scheduler, _windlass, _relays, _fan) = scheduler(40.0);
        assert!(!scheduler.is_running());
        scheduler.start();
        scheduler.start();
        assert_eq!(scheduler.tasks.len(), 2);
        assert!(scheduler.is_running());
        scheduler.shutdown().await;
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_runs_to_target_and_shutdown_stops_everything() {
        let (mut scheduler, windlass, relays, fan) = scheduler(65.0);
        scheduler.start();
        windlass.set_target_length(5.0).await;
        assert!(windlass.resume().await);
        sleep(Duration::from_secs(10)).await;
        assert!(fan.fan.is_active());
        sleep(Duration::from_secs(30)).await;

        let status = windlass.status().await;
        assert_eq!(status.actual_length, 5.0);
        assert!(status.paused && !status.running);

        scheduler.shutdown().await;
        assert!(windlass.is_quit().await);
        assert!(!relays.extend.is_open() && !relays.retract.is_open());
        assert!(!fan.fan.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_monitor_through_thresholds() {
        let (mut scheduler, _windlass, _relays, fan) = scheduler(65.0);
        scheduler.start();
        sleep(Duration::from_secs(1)).await;
        assert!(fan.fan.is_active());
        scheduler.update_fan_thresholds(FanThresholds { enabled: false, target: 50.0, high: 60.0 });
        sleep(Duration::from_secs(21)).await;
        assert!(!fan.fan.is_active());
        scheduler.shutdown().await;
    }
}
