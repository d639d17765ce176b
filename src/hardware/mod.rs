// src/hardware/mod.rs - Relay board driving the windlass solenoids and the cooling fan
pub mod gpio;
pub mod temperature;

use crate::config::{RelayBackend, RelayConfig};
use gpio::{MockBank, OutputSource, RelayOutput};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not connected to hardware")]
    NotConnected,
    #[error("Hardware fault: {0}")]
    Fault(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayChannel {
    Extend,
    Retract,
    Fan,
}

impl RelayChannel {
    pub fn name(&self) -> &'static str {
        match self {
            RelayChannel::Extend => "extend",
            RelayChannel::Retract => "retract",
            RelayChannel::Fan => "fan",
        }
    }
}

/// Two-output actuator. Implementations keep the outputs mutually exclusive,
/// callers never have to switch one off before switching the other on.
pub trait ActuatorDriver: Send + std::fmt::Debug {
    /// Open the outputs. Calling it again while connected does nothing.
    fn connect(&mut self) -> Result<(), HardwareError>;
    /// Switch both outputs off and release them.
    fn disconnect(&mut self) -> Result<(), HardwareError>;
    fn set_extend(&mut self, active: bool) -> Result<(), HardwareError>;
    fn set_retract(&mut self, active: bool) -> Result<(), HardwareError>;
    fn is_extend_active(&self) -> bool;
    fn is_retract_active(&self) -> bool;
    fn is_connected(&self) -> bool;

    /// Best-effort switch-off of both outputs, used on the fault path.
    fn all_off(&mut self) -> Result<(), HardwareError> {
        let extend = self.set_extend(false);
        let retract = self.set_retract(false);
        extend.and(retract)
    }
}

/// Relay board with the "anchor down" (extend) and "anchor up" (retract)
/// solenoid channels.
#[derive(Debug)]
pub struct RelayBoard {
    source: OutputSource,
    extend_pin: u32,
    retract_pin: u32,
    extend: Option<Box<dyn RelayOutput>>,
    retract: Option<Box<dyn RelayOutput>>,
}

impl RelayBoard {
    pub fn new(source: OutputSource, extend_pin: u32, retract_pin: u32) -> Self {
        Self {
            source,
            extend_pin,
            retract_pin,
            extend: None,
            retract: None,
        }
    }

    pub fn from_config(config: &RelayConfig, source: OutputSource) -> Self {
        Self::new(source, config.extend_pin, config.retract_pin)
    }

    /// A board on in-memory lines; the returned bank observes the outputs.
    pub fn mock() -> (Self, MockBank) {
        let bank = MockBank::default();
        let board = Self::new(OutputSource::Mock(bank.clone()), 26, 20);
        (board, bank)
    }

    fn output(slot: &mut Option<Box<dyn RelayOutput>>) -> Result<&mut Box<dyn RelayOutput>, HardwareError> {
        slot.as_mut().ok_or(HardwareError::NotConnected)
    }

    fn switch(&mut self, on: RelayChannel) -> Result<(), HardwareError> {
        let (off_slot, on_slot) = match on {
            RelayChannel::Extend => (&mut self.retract, &mut self.extend),
            _ => (&mut self.extend, &mut self.retract),
        };
        Self::output(off_slot)?.set(false)?;
        let result = Self::output(on_slot)?.set(true);
        if let Err(e) = &result {
            tracing::error!("Relay {} failed to switch on: {}", on.name(), e);
            let _ = self.all_off();
        }
        result
    }
}

impl ActuatorDriver for RelayBoard {
    fn connect(&mut self) -> Result<(), HardwareError> {
        if self.is_connected() {
            return Ok(());
        }
        tracing::info!(
            "Connecting relay board: extend=GPIO{} retract=GPIO{}",
            self.extend_pin, self.retract_pin
        );
        let mut extend = self.source.open(RelayChannel::Extend, self.extend_pin)?;
        let retract = match self.source.open(RelayChannel::Retract, self.retract_pin) {
            Ok(output) => output,
            Err(e) => {
                let _ = extend.close();
                return Err(e);
            }
        };
        self.extend = Some(extend);
        self.retract = Some(retract);
        self.all_off()
    }

    fn disconnect(&mut self) -> Result<(), HardwareError> {
        if !self.is_connected() {
            return Ok(());
        }
        tracing::info!("Disconnecting relay board");
        let off = self.all_off();
        let mut closed = Ok(());
        for slot in [&mut self.extend, &mut self.retract] {
            if let Some(mut output) = slot.take() {
                if let Err(e) = output.close() {
                    closed = Err(e);
                }
            }
        }
        off.and(closed)
    }

    fn set_extend(&mut self, active: bool) -> Result<(), HardwareError> {
        if active {
            self.switch(RelayChannel::Extend)
        } else {
            Self::output(&mut self.extend)?.set(false)
        }
    }

    fn set_retract(&mut self, active: bool) -> Result<(), HardwareError> {
        if active {
            self.switch(RelayChannel::Retract)
        } else {
            Self::output(&mut self.retract)?.set(false)
        }
    }

    fn is_extend_active(&self) -> bool {
        self.extend.as_ref().is_some_and(|o| o.is_active())
    }

    fn is_retract_active(&self) -> bool {
        self.retract.as_ref().is_some_and(|o| o.is_active())
    }

    fn is_connected(&self) -> bool {
        self.extend.is_some() && self.retract.is_some()
    }
}

/// The third relay channel, switched by the temperature monitor only.
#[derive(Debug)]
pub struct FanSwitch {
    source: OutputSource,
    pin: u32,
    output: Option<Box<dyn RelayOutput>>,
}

impl FanSwitch {
    pub fn new(source: OutputSource, pin: u32) -> Self {
        Self { source, pin, output: None }
    }

    pub fn connect(&mut self) -> Result<(), HardwareError> {
        if self.output.is_none() {
            self.output = Some(self.source.open(RelayChannel::Fan, self.pin)?);
        }
        Ok(())
    }

    pub fn set(&mut self, active: bool) -> Result<(), HardwareError> {
        self.output.as_mut().ok_or(HardwareError::NotConnected)?.set(active)
    }

    pub fn is_active(&self) -> bool {
        self.output.as_ref().is_some_and(|o| o.is_active())
    }

    pub fn disconnect(&mut self) -> Result<(), HardwareError> {
        match self.output.take() {
            Some(mut output) => output.close(),
            None => Ok(()),
        }
    }
}

/// Output source for the configured backend. `force_mock` overrides the
/// configuration for development hosts.
pub fn output_source(config: &RelayConfig, force_mock: bool) -> OutputSource {
    if force_mock || config.backend == RelayBackend::Mock {
        OutputSource::Mock(MockBank::default())
    } else {
        OutputSource::Sysfs {
            root: PathBuf::from(&config.gpio_root),
            active_low: config.active_low,
        }
    }
}
