//! Application settings loaded from TOML files and the environment.
//!
//! Settings are merged from `config/default.toml`, an optional override file,
//! and `DAQ_`-prefixed environment variables (e.g. `DAQ_BUS__TIMEOUT_MS`).
//! After deserialization a semantic validation pass catches values that parse
//! fine but make no sense, and reports them separately from parse errors.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::core::ControllerMode;
use crate::error::{PluginError, PluginResult};

/// Bus-wide defaults applied to every adapter.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Substring used when discovering resources (e.g. "GPIB").
    pub resource_pattern: String,
    /// Open and read/write timeout in milliseconds.
    pub timeout_ms: u64,
    /// Line terminator appended to every command.
    pub line_terminator: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            resource_pattern: "GPIB".to_string(),
            timeout_ms: 5000,
            line_terminator: "\n".to_string(),
        }
    }
}

/// Settings for the SR830 lock-in actuator plugin.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Sr830Config {
    /// VISA resource string of the lock-in.
    pub resource: String,
    /// Whether this instance owns the connection or borrows one.
    pub mode: ControllerMode,
    /// Lower bound for the reference frequency, Hz.
    pub min_frequency_hz: f64,
    /// Upper bound for the reference frequency, Hz.
    pub max_frequency_hz: f64,
    /// Output time-constant code (0-19) committed at startup.
    pub time_constant: u8,
}

impl Default for Sr830Config {
    fn default() -> Self {
        Self {
            resource: "GPIB0::8::INSTR".to_string(),
            mode: ControllerMode::Master,
            min_frequency_hz: crate::plugins::sr830::FREQ_MIN_HZ,
            max_frequency_hz: crate::plugins::sr830::FREQ_MAX_HZ,
            time_constant: 7, // 30 ms
        }
    }
}

/// Settings for the R&S FSC spectrum-analyzer detector plugin.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FscConfig {
    /// VISA resource string of the analyzer.
    pub resource: String,
    /// Whether this instance owns the connection or borrows one.
    pub mode: ControllerMode,
    /// Sweep point count used when the instrument does not answer
    /// `SWE:POIN?`. The FSC sweeps a fixed 631 points.
    pub sweep_points: usize,
}

impl Default for FscConfig {
    fn default() -> Self {
        Self {
            resource: "TCPIP0::192.168.1.55::INSTR".to_string(),
            mode: ControllerMode::Master,
            sweep_points: crate::plugins::fsc::DEFAULT_SWEEP_POINTS,
        }
    }
}

/// Top-level settings for the plugin library.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Bus-wide defaults.
    pub bus: BusSettings,
    /// Lock-in actuator settings.
    pub sr830: Sr830Config,
    /// Spectrum-analyzer detector settings.
    pub fsc: FscConfig,
}

impl Settings {
    /// Load settings, merging defaults, an optional override file, and the
    /// environment, then validate them.
    pub fn new(override_path: Option<&Path>) -> PluginResult<Self> {
        let mut builder =
            Config::builder().add_source(File::with_name("config/default").required(false));

        if let Some(path) = override_path {
            builder = builder.add_source(File::from(path));
        }

        let settings: Settings = builder
            .add_source(Environment::with_prefix("DAQ").separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation beyond what deserialization enforces.
    pub fn validate(&self) -> PluginResult<()> {
        if self.bus.timeout_ms == 0 {
            return Err(PluginError::Configuration(
                "bus.timeout_ms must be positive".to_string(),
            ));
        }
        if self.sr830.min_frequency_hz >= self.sr830.max_frequency_hz {
            return Err(PluginError::Configuration(format!(
                "sr830 frequency bounds are inverted: [{}, {}]",
                self.sr830.min_frequency_hz, self.sr830.max_frequency_hz
            )));
        }
        if self.sr830.time_constant > 19 {
            return Err(PluginError::Configuration(format!(
                "sr830.time_constant {} out of range 0-19",
                self.sr830.time_constant
            )));
        }
        if self.fsc.sweep_points < 2 {
            return Err(PluginError::Configuration(format!(
                "fsc.sweep_points {} is too small for a frequency axis",
                self.fsc.sweep_points
            )));
        }
        Ok(())
    }
}
