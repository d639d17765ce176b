// src/hardware/temperature.rs - Board temperature sampling and fan hysteresis
use super::{FanSwitch, HardwareError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};
use tokio::time::{Duration, sleep};

#[async_trait]
pub trait TemperatureSensor: Send + Sync {
    /// Current temperature in degrees Celsius.
    async fn read_celsius(&self) -> Result<f64, HardwareError>;
}

/// Linux thermal zone, reporting millidegrees.
#[derive(Debug, Clone)]
pub struct CpuThermalZone {
    path: PathBuf,
}

impl CpuThermalZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TemperatureSensor for CpuThermalZone {
    async fn read_celsius(&self) -> Result<f64, HardwareError> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        let millis: f64 = raw
            .trim()
            .parse()
            .map_err(|_| HardwareError::Fault(format!("Invalid thermal zone reading: {:?}", raw.trim())))?;
        Ok(millis / 1000.0)
    }
}

/// Settable reading for hosts without a thermal zone.
#[derive(Debug)]
pub struct SimulatedTemperature {
    bits: AtomicU64,
}

impl SimulatedTemperature {
    pub fn new(celsius: f64) -> Self {
        Self { bits: AtomicU64::new(celsius.to_bits()) }
    }

    pub fn set(&self, celsius: f64) {
        self.bits.store(celsius.to_bits(), Ordering::SeqCst);
    }
}

#[async_trait]
impl TemperatureSensor for SimulatedTemperature {
    async fn read_celsius(&self) -> Result<f64, HardwareError> {
        Ok(f64::from_bits(self.bits.load(Ordering::SeqCst)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FanThresholds {
    pub enabled: bool,
    /// Switch off at or below this temperature.
    pub target: f64,
    /// Switch on at or above this temperature.
    pub high: f64,
}

impl FanThresholds {
    pub fn from_config(app: &crate::config::AppConfig) -> Self {
        Self {
            enabled: app.cpu_temp_monitor,
            target: app.cpu_temp_target,
            high: app.cpu_temp_high,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FanAction {
    SwitchedOn(f64),
    SwitchedOff(f64),
    Unchanged(f64),
    Disabled,
}

pub struct FanMonitor {
    sensor: Arc<dyn TemperatureSensor>,
    fan: FanSwitch,
    thresholds: watch::Receiver<FanThresholds>,
    interval: Duration,
    disabled_interval: Duration,
}

impl FanMonitor {
    pub fn new(
        sensor: Arc<dyn TemperatureSensor>,
        fan: FanSwitch,
        thresholds: watch::Receiver<FanThresholds>,
        config: &crate::config::MonitorConfig,
    ) -> Self {
        Self {
            sensor,
            fan,
            thresholds,
            interval: Duration::from_secs(config.interval_secs),
            disabled_interval: Duration::from_secs(config.disabled_interval_secs),
        }
    }

    /// Take one sample and apply the hysteresis band.
    pub async fn step(&mut self) -> Result<FanAction, HardwareError> {
        let thresholds = *self.thresholds.borrow_and_update();
        if !thresholds.enabled {
            if self.fan.is_active() {
                self.fan.set(false)?;
                tracing::debug!("Temperature monitor disabled, fan switched off");
            }
            return Ok(FanAction::Disabled);
        }
        let celsius = self.sensor.read_celsius().await?;
        if celsius >= thresholds.high && !self.fan.is_active() {
            self.fan.set(true)?;
            tracing::debug!("CPU temperature is {} with upper threshold {}, fan switched on", celsius, thresholds.high);
            Ok(FanAction::SwitchedOn(celsius))
        } else if celsius <= thresholds.target && self.fan.is_active() {
            self.fan.set(false)?;
            tracing::debug!("CPU temperature is {} with lower threshold {}, fan switched off", celsius, thresholds.target);
            Ok(FanAction::SwitchedOff(celsius))
        } else {
            Ok(FanAction::Unchanged(celsius))
        }
    }

    /// Sample until shutdown. Errors are logged and the loop keeps going.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        tracing::info!("Temperature monitor started");
        if let Err(e) = self.fan.connect() {
            tracing::error!("Fan relay unavailable, temperature monitor stopped: {}", e);
            return;
        }
        loop {
            let wait = match self.step().await {
                Ok(FanAction::Disabled) => self.disabled_interval,
                Ok(_) => self.interval,
                Err(e) => {
                    tracing::error!("Temperature monitor error: {}", e);
                    self.interval
                }
            };
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(wait) => {}
            }
        }
        if let Err(e) = self.fan.disconnect() {
            tracing::warn!("Fan relay did not close cleanly: {}", e);
        }
        tracing::info!("Temperature monitor shutting down");
    }
}
