//! Core traits and value types for the plugin contract.
//!
//! The host framework owns all control flow: it constructs a plugin, calls
//! its lifecycle methods one at a time, and waits for each to return. This
//! module defines that method surface ([`ActuatorPlugin`], [`DetectorPlugin`])
//! together with the values crossing it:
//!
//! - [`InitStatus`]: outcome of an initialization call. Initialization
//!   failures are caught broadly and reported through this status rather
//!   than propagated, so the host can display them.
//! - [`Identity`]: the parsed `*IDN?` identification reply.
//! - [`Trace1D`] / [`Axis`]: the 1-D detector payload.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// Outcome of `ini_stage` / `ini_detector`, reported back to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitStatus {
    /// Human-readable summary (identity on success, error text on failure).
    pub info: String,
    /// Whether the plugin is ready for use.
    pub initialized: bool,
}

impl InitStatus {
    /// Successful initialization with a summary line.
    pub fn ok(info: impl Into<String>) -> Self {
        Self {
            info: info.into(),
            initialized: true,
        }
    }

    /// Failed initialization carrying the error text.
    pub fn failed(info: impl Into<String>) -> Self {
        Self {
            info: info.into(),
            initialized: false,
        }
    }
}

/// Parsed `*IDN?` identification reply.
///
/// The reply is a comma-separated string, typically
/// `manufacturer,model,serial,firmware`. Instruments differ in how many
/// trailing fields they send, so missing fields are stored as empty strings
/// rather than rejected.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// First identification field.
    pub manufacturer: String,
    /// Second identification field.
    pub model: String,
    /// Third identification field.
    pub serial: String,
}

impl Identity {
    /// Parse a raw identification reply.
    ///
    /// Leading/trailing whitespace and the line terminator are stripped from
    /// the reply and from each field. An empty reply is an error.
    pub fn parse(reply: &str) -> Result<Self, PluginError> {
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(PluginError::Identification(reply.to_string()));
        }

        let mut fields = reply.split(',').map(str::trim);
        Ok(Self {
            manufacturer: fields.next().unwrap_or_default().to_string(),
            model: fields.next().unwrap_or_default().to_string(),
            serial: fields.next().unwrap_or_default().to_string(),
        })
    }

    /// One-line summary suitable for the host status display.
    pub fn summary(&self) -> String {
        format!("{} {} (s/n {})", self.manufacturer, self.model, self.serial)
    }
}

/// Whether a plugin owns its bus connection or borrows one from another
/// plugin instance driving the same physical controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerMode {
    /// Opens and closes its own connection.
    #[default]
    Master,
    /// Reuses a connection handed over by a master instance.
    Slave,
}

/// Axis metadata for 1-D data (sample positions, label, physical unit).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    /// Sample positions, one per data point.
    pub data: Vec<f64>,
    /// Axis label (e.g. "Frequency").
    pub label: String,
    /// Physical unit (e.g. "Hz").
    pub units: String,
}

/// One 1-D acquisition as returned to the host by a detector plugin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trace1D {
    /// Display name of the source instrument.
    pub name: String,
    /// Measured values, one per axis sample.
    pub data: Vec<f64>,
    /// Physical unit of the measured values.
    pub unit: String,
    /// Sample axis, when the instrument exposes one.
    pub x_axis: Option<Axis>,
    /// UTC timestamp of the acquisition.
    pub timestamp: DateTime<Utc>,
    /// Optional instrument-specific metadata (JSON).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Actuator plugin contract (the host's "move" interface).
///
/// Methods are invoked one at a time by the host; implementations do not
/// need internal locking beyond protecting a shared bus adapter.
#[async_trait]
pub trait ActuatorPlugin: Send {
    /// Instrument-specific settings committed from the host parameter tree.
    type Setting: Send;

    /// Stable identifier of this plugin instance.
    fn id(&self) -> &str;

    /// Unit of the controlled quantity (e.g. "Hz").
    fn units(&self) -> &str;

    /// Open the connection and identify the instrument.
    ///
    /// Errors are caught and reported through the returned status.
    async fn ini_stage(&mut self) -> InitStatus;

    /// Read the current actuator value from the hardware.
    async fn actuator_value(&mut self) -> Result<f64>;

    /// Move to an absolute target, clamped to the configured bounds.
    async fn move_abs(&mut self, target: f64) -> Result<()>;

    /// Move by a relative offset from the current value.
    async fn move_rel(&mut self, delta: f64) -> Result<()>;

    /// Move to the home position, where the hardware has one.
    async fn move_home(&mut self) -> Result<()>;

    /// Stop any ongoing motion.
    async fn stop_motion(&mut self) -> Result<()>;

    /// Apply a changed setting to the hardware.
    async fn commit_setting(&mut self, setting: Self::Setting) -> Result<()>;

    /// Release the bus connection.
    async fn close(&mut self) -> Result<()>;
}

/// 1-D detector plugin contract (the host's "viewer" interface).
#[async_trait]
pub trait DetectorPlugin: Send {
    /// Instrument-specific settings committed from the host parameter tree.
    type Setting: Send;

    /// Stable identifier of this plugin instance.
    fn id(&self) -> &str;

    /// Open the connection, identify the instrument, and prepare acquisition.
    ///
    /// Errors are caught and reported through the returned status.
    async fn ini_detector(&mut self) -> InitStatus;

    /// Acquire one averaged trace (`n_average` consecutive sweeps).
    async fn grab(&mut self, n_average: usize) -> Result<Trace1D>;

    /// Apply a changed setting to the hardware.
    async fn commit_setting(&mut self, setting: Self::Setting) -> Result<()>;

    /// Interrupt an ongoing acquisition, where the hardware supports it.
    async fn stop(&mut self) -> Result<()>;

    /// Release the bus connection.
    async fn close(&mut self) -> Result<()>;
}
