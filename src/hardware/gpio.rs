//! Digital output lines behind the relay board.
//!
//! Two backends: a Linux sysfs GPIO line for the controller itself and an
//! in-memory line for development hosts and tests.

use super::HardwareError;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// A single relay output. `active` means the relay coil is energised,
/// independent of the electrical level needed to achieve that.
pub trait RelayOutput: Send + std::fmt::Debug {
    fn set(&mut self, active: bool) -> Result<(), HardwareError>;
    fn is_active(&self) -> bool;
    /// Release the line. The output is left inactive.
    fn close(&mut self) -> Result<(), HardwareError>;
}

#[derive(Debug, Default)]
struct MockLineState {
    active: AtomicBool,
    open: AtomicBool,
    failing: AtomicBool,
    switch_count: AtomicU32,
}

/// Shared handle onto an in-memory line. Clones observe the same line, so a
/// test can keep one while the relay board owns another.
#[derive(Debug, Clone, Default)]
pub struct MockLine {
    state: Arc<MockLineState>,
}

impl MockLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.state.active.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Number of inactive-to-active transitions seen so far.
    pub fn switch_count(&self) -> u32 {
        self.state.switch_count.load(Ordering::SeqCst)
    }

    /// Make every subsequent activation fail with a hardware fault.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockOutput {
    name: &'static str,
    line: MockLine,
}

impl MockOutput {
    pub fn open(name: &'static str, line: MockLine) -> Self {
        line.state.open.store(true, Ordering::SeqCst);
        line.state.active.store(false, Ordering::SeqCst);
        Self { name, line }
    }
}

impl RelayOutput for MockOutput {
    fn set(&mut self, active: bool) -> Result<(), HardwareError> {
        if active && self.line.state.failing.load(Ordering::SeqCst) {
            return Err(HardwareError::Fault(format!("{} line refused to switch", self.name)));
        }
        let was_active = self.line.state.active.swap(active, Ordering::SeqCst);
        if active && !was_active {
            self.line.state.switch_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.line.is_active()
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        self.line.state.active.store(false, Ordering::SeqCst);
        self.line.state.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// The three in-memory lines of a mock relay board.
#[derive(Debug, Clone, Default)]
pub struct MockBank {
    pub extend: MockLine,
    pub retract: MockLine,
    pub fan: MockLine,
}

/// A sysfs GPIO line (`/sys/class/gpio/gpioN`).
#[derive(Debug)]
pub struct SysfsOutput {
    root: PathBuf,
    pin: u32,
    active_low: bool,
    active: bool,
}

impl SysfsOutput {
    pub fn open(root: &Path, pin: u32, active_low: bool) -> Result<Self, HardwareError> {
        let line_dir = root.join(format!("gpio{}", pin));
        if !line_dir.exists() {
            fs::write(root.join("export"), pin.to_string())?;
        }
        // Setting the direction to "high"/"low" also sets the initial level
        // without a glitch through the other state.
        let initial = if active_low { "high" } else { "low" };
        fs::write(line_dir.join("direction"), initial)?;
        tracing::debug!("GPIO {} exported (active_low={})", pin, active_low);
        Ok(Self {
            root: root.to_path_buf(),
            pin,
            active_low,
            active: false,
        })
    }

    fn value_path(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin)).join("value")
    }
}

impl RelayOutput for SysfsOutput {
    fn set(&mut self, active: bool) -> Result<(), HardwareError> {
        let level = if active != self.active_low { "1" } else { "0" };
        fs::write(self.value_path(), level)?;
        self.active = active;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn close(&mut self) -> Result<(), HardwareError> {
        self.set(false)?;
        fs::write(self.root.join("unexport"), self.pin.to_string())?;
        tracing::debug!("GPIO {} unexported", self.pin);
        Ok(())
    }
}

/// Where relay outputs come from.
#[derive(Debug, Clone)]
pub enum OutputSource {
    Mock(MockBank),
    Sysfs { root: PathBuf, active_low: bool },
}

impl OutputSource {
    pub fn open(&self, channel: super::RelayChannel, pin: u32) -> Result<Box<dyn RelayOutput>, HardwareError> {
        use super::RelayChannel;
        match self {
            OutputSource::Mock(bank) => {
                let line = match channel {
                    RelayChannel::Extend => bank.extend.clone(),
                    RelayChannel::Retract => bank.retract.clone(),
                    RelayChannel::Fan => bank.fan.clone(),
                };
                Ok(Box::new(MockOutput::open(channel.name(), line)))
            }
            OutputSource::Sysfs { root, active_low } => {
                Ok(Box::new(SysfsOutput::open(root, pin, *active_low)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mock_output_tracks_line() {
        let line = MockLine::new();
        let mut output = MockOutput::open("extend", line.clone());
        assert!(line.is_open());
        output.set(true).unwrap();
        output.set(true).unwrap();
        assert!(line.is_active());
        assert_eq!(line.switch_count(), 1);
        output.close().unwrap();
        assert!(!line.is_active());
        assert!(!line.is_open());
    }

    #[test]
    fn test_mock_output_fault_injection() {
        let line = MockLine::new();
        let mut output = MockOutput::open("retract", line.clone());
        line.set_failing(true);
        assert!(matches!(output.set(true), Err(HardwareError::Fault(_))));
        assert!(!line.is_active());
        // Switching off always works so a fault can still be made safe.
        assert!(output.set(false).is_ok());
    }

    #[test]
    fn test_sysfs_output_writes_active_low_levels() {
        let dir = tempdir().unwrap();
        let line_dir = dir.path().join("gpio26");
        fs::create_dir(&line_dir).unwrap();

        let mut output = SysfsOutput::open(dir.path(), 26, true).unwrap();
        assert_eq!(fs::read_to_string(line_dir.join("direction")).unwrap(), "high");

        output.set(true).unwrap();
        assert_eq!(fs::read_to_string(line_dir.join("value")).unwrap(), "0");
        assert!(output.is_active());

        output.close().unwrap();
        assert_eq!(fs::read_to_string(line_dir.join("value")).unwrap(), "1");
        assert_eq!(fs::read_to_string(dir.path().join("unexport")).unwrap(), "26");
    }
}
