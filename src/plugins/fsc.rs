//! Rohde & Schwarz FSC spectrum analyzer driven as a 1-D detector.
//!
//! Each grab reads one sweep trace (`TRAC? TRACE1`, comma-separated ASCII)
//! and pairs it with a frequency axis derived from the sweep bounds
//! (`FREQ:STAR?` / `FREQ:STOP?`) and point count (`SWE:POIN?`). The FSC
//! family sweeps a fixed 631 points, which serves as the fallback when the
//! point-count query is unavailable.
//!
//! ## Configuration
//!
//! ```toml
//! [fsc]
//! resource = "TCPIP0::192.168.1.55::INSTR"
//! mode = "master"
//! sweep_points = 631
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};

use crate::adapters::{shared, SharedAdapter, VisaAdapter};
use crate::config::{BusSettings, FscConfig};
use crate::core::{Axis, ControllerMode, DetectorPlugin, Identity, InitStatus, Trace1D};
use crate::error::PluginError;

/// Sweep points of the FSC family when `SWE:POIN?` is unavailable.
pub const DEFAULT_SWEEP_POINTS: usize = 631;

/// Settings the host can commit to the FSC detector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FscSetting {
    /// Resolution bandwidth, Hz (`BAND`).
    ResolutionBandwidth(f64),
    /// Sweep start frequency, Hz (`FREQ:STAR`).
    StartFrequency(f64),
    /// Sweep stop frequency, Hz (`FREQ:STOP`).
    StopFrequency(f64),
}

/// R&S FSC 1-D detector plugin.
pub struct RsFsc {
    id: String,
    adapter: SharedAdapter,
    mode: ControllerMode,
    identity: Option<Identity>,
    axis: Option<Axis>,
    fallback_points: usize,
}

impl RsFsc {
    /// Create a master instance owning its bus connection.
    pub fn new(id: impl Into<String>, adapter: SharedAdapter, config: &FscConfig) -> Self {
        Self {
            id: id.into(),
            adapter,
            mode: ControllerMode::Master,
            identity: None,
            axis: None,
            fallback_points: config.sweep_points,
        }
    }

    /// Build an instance as configured: a master opens its own VISA resource
    /// unless a controller is supplied, a slave requires one.
    pub fn from_config(
        id: impl Into<String>,
        config: &FscConfig,
        bus: &BusSettings,
        controller: Option<SharedAdapter>,
    ) -> Result<Self, PluginError> {
        match config.mode {
            ControllerMode::Master => {
                let adapter = controller
                    .unwrap_or_else(|| shared(VisaAdapter::from_settings(&config.resource, bus)));
                Ok(Self::new(id, adapter, config))
            }
            ControllerMode::Slave => Self::slave(id, controller, config),
        }
    }

    /// Create a slave instance reusing a controller opened by a master.
    pub fn slave(
        id: impl Into<String>,
        controller: Option<SharedAdapter>,
        config: &FscConfig,
    ) -> Result<Self, PluginError> {
        let adapter = controller.ok_or(PluginError::SlaveWithoutController)?;
        let mut plugin = Self::new(id, adapter, config);
        plugin.mode = ControllerMode::Slave;
        Ok(plugin)
    }

    /// Identity parsed during initialization, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Frequency axis derived during initialization, if any.
    pub fn x_axis(&self) -> Option<&Axis> {
        self.axis.as_ref()
    }

    async fn query(&self, command: &str) -> Result<String> {
        self.adapter.lock().await.query(command).await
    }

    async fn send(&self, command: &str) -> Result<()> {
        self.adapter.lock().await.write(command).await
    }

    async fn query_f64(&self, command: &str) -> Result<f64> {
        let reply = self.query(command).await?;
        reply
            .parse::<f64>()
            .with_context(|| format!("Failed to parse reply to '{command}': '{reply}'"))
    }

    /// Derive the frequency axis from the current sweep settings.
    async fn frequency_axis(&self) -> Result<Axis> {
        let start = self
            .query_f64("FREQ:STAR?")
            .await
            .context("Failed to read sweep start frequency")?;
        let stop = self
            .query_f64("FREQ:STOP?")
            .await
            .context("Failed to read sweep stop frequency")?;
        if stop <= start {
            return Err(anyhow!(
                "Sweep stop frequency {stop} Hz is not above start {start} Hz"
            ));
        }

        let points = match self.query("SWE:POIN?").await {
            Ok(reply) => reply
                .trim()
                .parse::<usize>()
                .with_context(|| format!("Failed to parse sweep point count: '{reply}'"))?,
            Err(e) => {
                warn!(
                    "FSC '{}' sweep point query failed ({e:#}), assuming {} points",
                    self.id, self.fallback_points
                );
                self.fallback_points
            }
        };
        if points < 2 {
            return Err(anyhow!("Sweep point count {points} is too small"));
        }

        let step = (stop - start) / (points - 1) as f64;
        let data = (0..points).map(|i| start + step * i as f64).collect();
        Ok(Axis {
            data,
            label: "Frequency".to_string(),
            units: "Hz".to_string(),
        })
    }

    /// Read one sweep trace as comma-separated ASCII floats.
    async fn read_trace(&self) -> Result<Vec<f64>> {
        let reply = self
            .query("TRAC? TRACE1")
            .await
            .context("Failed to read trace")?;
        parse_trace(&reply)
    }

    async fn try_init(&mut self) -> Result<String> {
        match self.mode {
            ControllerMode::Master => {
                self.adapter.lock().await.connect().await?;
            }
            ControllerMode::Slave => {
                if !self.adapter.lock().await.is_connected() {
                    return Err(anyhow!(
                        "Shared controller for slave '{}' is not connected",
                        self.id
                    ));
                }
            }
        }

        let reply = self.query("*IDN?").await?;
        let identity = Identity::parse(&reply)?;
        let summary = identity.summary();
        self.identity = Some(identity);

        // Trace transfers stay in ASCII; binary blocks are not worth the
        // parsing surface at 631 points per sweep.
        self.send("FORM ASC").await?;

        self.axis = Some(self.frequency_axis().await?);
        Ok(summary)
    }
}

/// Parse a comma-separated ASCII trace reply into samples.
fn parse_trace(reply: &str) -> Result<Vec<f64>> {
    reply
        .trim()
        .split(',')
        .map(|field| {
            let field = field.trim();
            field
                .parse::<f64>()
                .with_context(|| format!("Bad trace sample: '{field}'"))
        })
        .collect()
}

#[async_trait]
impl DetectorPlugin for RsFsc {
    type Setting = FscSetting;

    fn id(&self) -> &str {
        &self.id
    }

    async fn ini_detector(&mut self) -> InitStatus {
        match self.try_init().await {
            Ok(summary) => {
                info!("FSC '{}' initialized: {}", self.id, summary);
                InitStatus::ok(summary)
            }
            Err(e) => {
                warn!("FSC '{}' initialization failed: {:#}", self.id, e);
                InitStatus::failed(format!("{e:#}"))
            }
        }
    }

    async fn grab(&mut self, n_average: usize) -> Result<Trace1D> {
        let axis = self
            .axis
            .clone()
            .ok_or_else(|| anyhow!("FSC '{}' has not been initialized", self.id))?;

        let sweeps = n_average.max(1);
        let mut accumulated = vec![0.0; axis.data.len()];
        for _ in 0..sweeps {
            let trace = self.read_trace().await?;
            if trace.len() != axis.data.len() {
                return Err(anyhow!(
                    "Trace length {} does not match {}-point frequency axis",
                    trace.len(),
                    axis.data.len()
                ));
            }
            for (sum, sample) in accumulated.iter_mut().zip(&trace) {
                *sum += sample;
            }
        }
        for sum in &mut accumulated {
            *sum /= sweeps as f64;
        }

        let metadata = serde_json::json!({
            "averages": sweeps,
            "sweep_points": axis.data.len(),
            "start_hz": axis.data.first(),
            "stop_hz": axis.data.last(),
        });

        Ok(Trace1D {
            name: "R&S FSC".to_string(),
            data: accumulated,
            unit: "dBm".to_string(),
            x_axis: Some(axis),
            timestamp: Utc::now(),
            metadata: Some(metadata),
        })
    }

    async fn commit_setting(&mut self, setting: Self::Setting) -> Result<()> {
        match setting {
            FscSetting::ResolutionBandwidth(hz) => {
                self.send(&format!("BAND {hz}"))
                    .await
                    .context("Failed to set resolution bandwidth")?;
                info!("FSC '{}' resolution bandwidth set to {} Hz", self.id, hz);
            }
            FscSetting::StartFrequency(hz) => {
                self.send(&format!("FREQ:STAR {hz}"))
                    .await
                    .context("Failed to set start frequency")?;
                self.axis = Some(self.frequency_axis().await?);
            }
            FscSetting::StopFrequency(hz) => {
                self.send(&format!("FREQ:STOP {hz}"))
                    .await
                    .context("Failed to set stop frequency")?;
                self.axis = Some(self.frequency_axis().await?);
            }
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        // Sweeps are read synchronously; there is nothing in flight to abort.
        debug!("FSC '{}' stop is a no-op", self.id);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        match self.mode {
            ControllerMode::Master => self.adapter.lock().await.disconnect().await,
            ControllerMode::Slave => {
                debug!("FSC slave '{}' leaving shared controller open", self.id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{shared, MockAdapter};

    fn scripted_mock(points: usize) -> MockAdapter {
        let trace = (0..points)
            .map(|i| format!("{:.1}", -10.0 - i as f64))
            .collect::<Vec<_>>()
            .join(",");
        MockAdapter::new()
            .with_reply("*IDN?", "Rohde&Schwarz,FSC-3,103442,2.20")
            .with_reply("FREQ:STAR?", "1.0e6")
            .with_reply("FREQ:STOP?", "2.0e6")
            .with_reply("SWE:POIN?", points.to_string())
            .with_reply("TRAC? TRACE1", trace)
    }

    fn detector(mock: &MockAdapter) -> RsFsc {
        RsFsc::new("spectrum", shared(mock.clone()), &FscConfig::default())
    }

    #[test]
    fn test_parse_trace() {
        let trace = parse_trace("-10.0, -20.5,-30.0\n").unwrap();
        assert_eq!(trace, vec![-10.0, -20.5, -30.0]);
    }

    #[test]
    fn test_parse_trace_rejects_garbage() {
        assert!(parse_trace("-10.0,oops,-30.0").is_err());
    }

    #[tokio::test]
    async fn test_init_identifies_and_derives_axis() {
        let mock = scripted_mock(11);
        let mut plugin = detector(&mock);

        let status = plugin.ini_detector().await;
        assert!(status.initialized, "{}", status.info);
        assert_eq!(plugin.identity().unwrap().model, "FSC-3");

        let axis = plugin.x_axis().unwrap();
        assert_eq!(axis.data.len(), 11);
        assert_eq!(axis.data[0], 1.0e6);
        assert_eq!(axis.data[10], 2.0e6);
        assert_eq!(axis.units, "Hz");

        // ASCII trace format selected during init.
        assert!(mock.written().contains(&"FORM ASC".to_string()));
    }

    #[tokio::test]
    async fn test_grab_returns_trace_with_axis() {
        let mock = scripted_mock(11);
        let mut plugin = detector(&mock);
        assert!(plugin.ini_detector().await.initialized);

        let trace = plugin.grab(1).await.unwrap();
        assert_eq!(trace.data.len(), 11);
        assert_eq!(trace.data[0], -10.0);
        assert_eq!(trace.unit, "dBm");
        assert_eq!(trace.x_axis.unwrap().data.len(), 11);

        let metadata = trace.metadata.unwrap();
        assert_eq!(metadata["averages"], 1);
        assert_eq!(metadata["sweep_points"], 11);
        assert_eq!(metadata["start_hz"], 1.0e6);
        assert_eq!(metadata["stop_hz"], 2.0e6);
    }

    #[tokio::test]
    async fn test_grab_averages_consecutive_sweeps() {
        let mock = MockAdapter::new()
            .with_reply("*IDN?", "Rohde&Schwarz,FSC-3,103442,2.20")
            .with_reply("FREQ:STAR?", "1.0e6")
            .with_reply("FREQ:STOP?", "2.0e6")
            .with_reply("SWE:POIN?", "3")
            .with_replies("TRAC? TRACE1", ["-10.0,-20.0,-30.0", "-20.0,-30.0,-40.0"]);
        let mut plugin = detector(&mock);
        assert!(plugin.ini_detector().await.initialized);

        let trace = plugin.grab(2).await.unwrap();
        assert_eq!(trace.data, vec![-15.0, -25.0, -35.0]);
    }

    #[tokio::test]
    async fn test_grab_before_init_fails() {
        let mock = scripted_mock(11);
        let mut plugin = detector(&mock);
        assert!(plugin.grab(1).await.is_err());
    }

    #[tokio::test]
    async fn test_trace_length_mismatch_is_an_error() {
        let mock = MockAdapter::new()
            .with_reply("*IDN?", "Rohde&Schwarz,FSC-3,103442,2.20")
            .with_reply("FREQ:STAR?", "1.0e6")
            .with_reply("FREQ:STOP?", "2.0e6")
            .with_reply("SWE:POIN?", "5")
            .with_reply("TRAC? TRACE1", "-10.0,-20.0,-30.0");
        let mut plugin = detector(&mock);
        assert!(plugin.ini_detector().await.initialized);

        let err = plugin.grab(1).await.unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[tokio::test]
    async fn test_missing_point_count_falls_back_to_default() {
        // No SWE:POIN? script entry: the query fails and the configured
        // fallback is used instead.
        let mock = MockAdapter::new()
            .with_reply("*IDN?", "Rohde&Schwarz,FSC-3,103442,2.20")
            .with_reply("FREQ:STAR?", "0.0")
            .with_reply("FREQ:STOP?", "3.0e9");
        let config = FscConfig {
            sweep_points: 7,
            ..FscConfig::default()
        };
        let mut plugin = RsFsc::new("spectrum", shared(mock.clone()), &config);

        let status = plugin.ini_detector().await;
        assert!(status.initialized, "{}", status.info);
        assert_eq!(plugin.x_axis().unwrap().data.len(), 7);
    }

    #[tokio::test]
    async fn test_inverted_sweep_bounds_fail_init() {
        let mock = MockAdapter::new()
            .with_reply("*IDN?", "Rohde&Schwarz,FSC-3,103442,2.20")
            .with_reply("FREQ:STAR?", "2.0e6")
            .with_reply("FREQ:STOP?", "1.0e6");
        let mut plugin = detector(&mock);

        let status = plugin.ini_detector().await;
        assert!(!status.initialized);
        assert!(status.info.contains("not above"));
    }

    #[tokio::test]
    async fn test_commit_start_frequency_rederives_axis() {
        let mock = MockAdapter::new()
            .with_reply("*IDN?", "Rohde&Schwarz,FSC-3,103442,2.20")
            .with_replies("FREQ:STAR?", ["1.0e6", "1.5e6"])
            .with_reply("FREQ:STOP?", "2.0e6")
            .with_reply("SWE:POIN?", "3");
        let mut plugin = detector(&mock);
        assert!(plugin.ini_detector().await.initialized);

        plugin
            .commit_setting(FscSetting::StartFrequency(1.5e6))
            .await
            .unwrap();
        assert!(mock.written().contains(&"FREQ:STAR 1500000".to_string()));
        assert_eq!(plugin.x_axis().unwrap().data[0], 1.5e6);
    }

    #[tokio::test]
    async fn test_commit_resolution_bandwidth() {
        let mock = scripted_mock(11);
        let mut plugin = detector(&mock);
        assert!(plugin.ini_detector().await.initialized);

        plugin
            .commit_setting(FscSetting::ResolutionBandwidth(30000.0))
            .await
            .unwrap();
        assert!(mock.written().contains(&"BAND 30000".to_string()));
    }

    #[test]
    fn test_slave_without_controller_is_rejected() {
        assert!(matches!(
            RsFsc::slave("spectrum2", None, &FscConfig::default()),
            Err(PluginError::SlaveWithoutController)
        ));
    }

    #[tokio::test]
    async fn test_from_config_honors_mode() {
        let slave_config = FscConfig {
            mode: ControllerMode::Slave,
            ..FscConfig::default()
        };
        assert!(matches!(
            RsFsc::from_config("spectrum2", &slave_config, &BusSettings::default(), None),
            Err(PluginError::SlaveWithoutController)
        ));

        let mock = scripted_mock(11);
        let mut master = RsFsc::from_config(
            "spectrum",
            &FscConfig::default(),
            &BusSettings::default(),
            Some(shared(mock.clone())),
        )
        .unwrap();
        assert!(master.ini_detector().await.initialized);
    }
}
