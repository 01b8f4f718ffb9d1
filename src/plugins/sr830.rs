//! Stanford Research SR830 lock-in amplifier driven as an actuator.
//!
//! The host treats the lock-in's internal reference frequency as a stage
//! position: reading the "position" queries `FREQ?`, moving writes `FREQ x`.
//! Initialization selects the GPIB output interface and identifies the
//! instrument in one shot (`OUTX1;*IDN?;`).
//!
//! ## Configuration
//!
//! ```toml
//! [sr830]
//! resource = "GPIB0::8::INSTR"
//! mode = "master"
//! min_frequency_hz = 0.001
//! max_frequency_hz = 102000.0
//! time_constant = 7  # 30 ms
//! ```
//!
//! A second plugin instance addressing the same physical unit is configured
//! as `mode = "slave"` and constructed with the master's shared adapter.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};

use crate::adapters::{shared, SharedAdapter, VisaAdapter};
use crate::config::{BusSettings, Sr830Config};
use crate::core::{ActuatorPlugin, ControllerMode, Identity, InitStatus};
use crate::error::PluginError;

/// Lowest reference frequency the SR830 accepts, Hz.
pub const FREQ_MIN_HZ: f64 = 0.001;
/// Highest reference frequency the SR830 accepts, Hz.
pub const FREQ_MAX_HZ: f64 = 102_000.0;

/// SR830 output time constant (`OFLT` codes 0-19, 10 µs to 30 ks).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeConstant(u8);

impl TimeConstant {
    /// Build a time constant from its `OFLT` code.
    pub fn from_code(code: u8) -> Result<Self, PluginError> {
        if code > 19 {
            return Err(PluginError::Configuration(format!(
                "time constant code {code} out of range 0-19"
            )));
        }
        Ok(Self(code))
    }

    /// The `OFLT` code sent to the instrument.
    pub fn code(self) -> u8 {
        self.0
    }

    /// Front-panel label for this time constant.
    pub fn label(self) -> &'static str {
        match self.0 {
            0 => "10us",
            1 => "30us",
            2 => "100us",
            3 => "300us",
            4 => "1ms",
            5 => "3ms",
            6 => "10ms",
            7 => "30ms",
            8 => "100ms",
            9 => "300ms",
            10 => "1s",
            11 => "3s",
            12 => "10s",
            13 => "30s",
            14 => "100s",
            15 => "300s",
            16 => "1ks",
            17 => "3ks",
            18 => "10ks",
            _ => "30ks",
        }
    }
}

/// Settings the host can commit to the SR830 actuator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sr830Setting {
    /// Output filter time constant.
    TimeConstant(TimeConstant),
}

/// SR830 actuator plugin.
pub struct Sr830 {
    id: String,
    adapter: SharedAdapter,
    mode: ControllerMode,
    identity: Option<Identity>,
    min_frequency_hz: f64,
    max_frequency_hz: f64,
    time_constant_code: u8,
}

impl Sr830 {
    /// Create a master instance owning its bus connection.
    pub fn new(id: impl Into<String>, adapter: SharedAdapter, config: &Sr830Config) -> Self {
        Self {
            id: id.into(),
            adapter,
            mode: ControllerMode::Master,
            identity: None,
            min_frequency_hz: config.min_frequency_hz.max(FREQ_MIN_HZ),
            max_frequency_hz: config.max_frequency_hz.min(FREQ_MAX_HZ),
            time_constant_code: config.time_constant,
        }
    }

    /// Build an instance as configured: a master opens its own VISA resource
    /// unless a controller is supplied, a slave requires one.
    pub fn from_config(
        id: impl Into<String>,
        config: &Sr830Config,
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
    ///
    /// Fails if no shared controller is provided, matching the host contract
    /// for slave plugins.
    pub fn slave(
        id: impl Into<String>,
        controller: Option<SharedAdapter>,
        config: &Sr830Config,
    ) -> Result<Self, PluginError> {
        let adapter = controller.ok_or(PluginError::SlaveWithoutController)?;
        let mut plugin = Self::new(id, adapter, config);
        plugin.mode = ControllerMode::Slave;
        Ok(plugin)
    }

    /// Handle to the bus adapter, for handing to a slave instance.
    pub fn shared_adapter(&self) -> SharedAdapter {
        self.adapter.clone()
    }

    /// Identity parsed during initialization, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    async fn query(&self, command: &str) -> Result<String> {
        self.adapter.lock().await.query(command).await
    }

    async fn send(&self, command: &str) -> Result<()> {
        self.adapter.lock().await.write(command).await
    }

    /// Clamp a target frequency to the configured bounds.
    fn check_bound(&self, target: f64) -> f64 {
        target.clamp(self.min_frequency_hz, self.max_frequency_hz)
    }

    async fn frequency(&self) -> Result<f64> {
        let reply = self
            .query("FREQ?")
            .await
            .context("Failed to query reference frequency")?;
        reply
            .parse::<f64>()
            .with_context(|| format!("Failed to parse frequency reply: '{reply}'"))
    }

    async fn set_frequency(&self, hz: f64) -> Result<()> {
        self.send(&format!("FREQ {hz:.4}"))
            .await
            .context("Failed to write reference frequency")
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

        // OUTX1 routes replies to the GPIB interface; chained with *IDN?.
        let reply = self.query("OUTX1;*IDN?;").await?;
        let identity = Identity::parse(&reply)?;
        let summary = identity.summary();
        self.identity = Some(identity);

        // Commit the configured time constant so the stored setting is live.
        let tc = TimeConstant::from_code(self.time_constant_code)?;
        self.send(&format!("OFLT {}", tc.code()))
            .await
            .context("Failed to set startup time constant")?;
        info!("SR830 '{}' time constant set to {}", self.id, tc.label());

        Ok(summary)
    }
}

#[async_trait]
impl ActuatorPlugin for Sr830 {
    type Setting = Sr830Setting;

    fn id(&self) -> &str {
        &self.id
    }

    fn units(&self) -> &str {
        "Hz"
    }

    async fn ini_stage(&mut self) -> InitStatus {
        match self.try_init().await {
            Ok(summary) => {
                info!("SR830 '{}' initialized: {}", self.id, summary);
                InitStatus::ok(summary)
            }
            Err(e) => {
                warn!("SR830 '{}' initialization failed: {:#}", self.id, e);
                InitStatus::failed(format!("{e:#}"))
            }
        }
    }

    async fn actuator_value(&mut self) -> Result<f64> {
        self.frequency().await
    }

    async fn move_abs(&mut self, target: f64) -> Result<()> {
        let clamped = self.check_bound(target);
        if clamped != target {
            debug!(
                "SR830 '{}' target {} Hz clamped to {} Hz",
                self.id, target, clamped
            );
        }
        self.set_frequency(clamped).await
    }

    async fn move_rel(&mut self, delta: f64) -> Result<()> {
        let current = self.frequency().await?;
        let target = self.check_bound(current + delta);
        self.set_frequency(target).await
    }

    async fn move_home(&mut self) -> Result<()> {
        // The lock-in has no home position; park the reference at 1 kHz.
        warn!(
            "SR830 '{}' has no home position, setting reference to 1 kHz",
            self.id
        );
        self.set_frequency(1000.0).await
    }

    async fn stop_motion(&mut self) -> Result<()> {
        // Frequency changes settle immediately; nothing to stop.
        debug!("SR830 '{}' stop_motion is a no-op", self.id);
        Ok(())
    }

    async fn commit_setting(&mut self, setting: Self::Setting) -> Result<()> {
        match setting {
            Sr830Setting::TimeConstant(tc) => {
                self.send(&format!("OFLT {}", tc.code()))
                    .await
                    .context("Failed to set time constant")?;
                info!("SR830 '{}' time constant set to {}", self.id, tc.label());
                Ok(())
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self.mode {
            ControllerMode::Master => self.adapter.lock().await.disconnect().await,
            ControllerMode::Slave => {
                // The master owns the connection; leave it open.
                debug!("SR830 slave '{}' leaving shared controller open", self.id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{BusAdapter, MockAdapter};

    fn lockin(mock: &MockAdapter) -> Sr830 {
        Sr830::new("lockin", shared(mock.clone()), &Sr830Config::default())
    }

    #[test]
    fn test_time_constant_table() {
        assert_eq!(TimeConstant::from_code(0).unwrap().label(), "10us");
        assert_eq!(TimeConstant::from_code(7).unwrap().label(), "30ms");
        assert_eq!(TimeConstant::from_code(19).unwrap().label(), "30ks");
        assert!(TimeConstant::from_code(20).is_err());
    }

    #[test]
    fn test_check_bound_clamps_to_hardware_range() {
        let mock = MockAdapter::new();
        let plugin = lockin(&mock);
        assert_eq!(plugin.check_bound(1e9), FREQ_MAX_HZ);
        assert_eq!(plugin.check_bound(0.0), FREQ_MIN_HZ);
        assert_eq!(plugin.check_bound(1000.0), 1000.0);
    }

    #[test]
    fn test_config_bounds_cannot_exceed_hardware() {
        let config = Sr830Config {
            max_frequency_hz: 1e9,
            min_frequency_hz: 0.0,
            ..Sr830Config::default()
        };
        let plugin = Sr830::new("lockin", shared(MockAdapter::new()), &config);
        assert_eq!(plugin.check_bound(f64::MAX), FREQ_MAX_HZ);
        assert_eq!(plugin.check_bound(0.0), FREQ_MIN_HZ);
    }

    #[tokio::test]
    async fn test_init_parses_identity() {
        let mock = MockAdapter::new()
            .with_reply("OUTX1;*IDN?;", "Stanford_Research_Systems,SR830,s/n12345,ver1.07");
        let mut plugin = lockin(&mock);

        let status = plugin.ini_stage().await;
        assert!(status.initialized, "{}", status.info);
        let identity = plugin.identity().unwrap();
        assert_eq!(identity.manufacturer, "Stanford_Research_Systems");
        assert_eq!(identity.model, "SR830");
        assert_eq!(identity.serial, "s/n12345");

        // The default-configured 30 ms time constant is committed at init.
        assert!(mock.written().contains(&"OFLT 7".to_string()));
    }

    #[tokio::test]
    async fn test_init_commits_configured_time_constant() {
        let mock = MockAdapter::new().with_reply("OUTX1;*IDN?;", "SRS,SR830,1,ver1.07");
        let config = Sr830Config {
            time_constant: 12,
            ..Sr830Config::default()
        };
        let mut plugin = Sr830::new("lockin", shared(mock.clone()), &config);

        assert!(plugin.ini_stage().await.initialized);
        assert!(mock.written().contains(&"OFLT 12".to_string()));
    }

    #[tokio::test]
    async fn test_init_rejects_out_of_range_time_constant() {
        let mock = MockAdapter::new().with_reply("OUTX1;*IDN?;", "SRS,SR830,1,ver1.07");
        let config = Sr830Config {
            time_constant: 20,
            ..Sr830Config::default()
        };
        let mut plugin = Sr830::new("lockin", shared(mock.clone()), &config);

        let status = plugin.ini_stage().await;
        assert!(!status.initialized);
        assert!(status.info.contains("out of range"));
    }

    #[tokio::test]
    async fn test_from_config_honors_slave_mode() {
        let config = Sr830Config {
            mode: ControllerMode::Slave,
            ..Sr830Config::default()
        };
        // Slave without a controller is rejected even through from_config.
        assert!(matches!(
            Sr830::from_config("lockin2", &config, &BusSettings::default(), None),
            Err(PluginError::SlaveWithoutController)
        ));

        // With a connected controller the slave initializes over it.
        let mock = MockAdapter::new().with_reply("OUTX1;*IDN?;", "SRS,SR830,1,ver1.07");
        let controller = shared(mock.clone());
        controller.lock().await.connect().await.unwrap();
        let mut slave =
            Sr830::from_config("lockin2", &config, &BusSettings::default(), Some(controller))
                .unwrap();
        assert!(slave.ini_stage().await.initialized);

        // A slave close leaves the shared connection open.
        slave.close().await.unwrap();
        assert!(mock.is_connected());
    }

    #[tokio::test]
    async fn test_from_config_master_uses_supplied_adapter() {
        let mock = MockAdapter::new().with_reply("OUTX1;*IDN?;", "SRS,SR830,1,ver1.07");
        let mut master = Sr830::from_config(
            "lockin",
            &Sr830Config::default(),
            &BusSettings::default(),
            Some(shared(mock.clone())),
        )
        .unwrap();

        assert!(master.ini_stage().await.initialized);
        master.close().await.unwrap();
        assert!(!mock.is_connected());
    }

    #[tokio::test]
    async fn test_init_failure_is_reported_not_raised() {
        let mock = MockAdapter::new().failing_connect("no route to instrument");
        let mut plugin = lockin(&mock);

        let status = plugin.ini_stage().await;
        assert!(!status.initialized);
        assert!(status.info.contains("no route"));
    }

    #[tokio::test]
    async fn test_move_abs_formats_four_decimals() {
        let mock = MockAdapter::new()
            .with_reply("OUTX1;*IDN?;", "SRS,SR830,1,ver1.07");
        let mut plugin = lockin(&mock);
        plugin.ini_stage().await;

        plugin.move_abs(5000.0).await.unwrap();
        assert!(mock.written().contains(&"FREQ 5000.0000".to_string()));
    }

    #[tokio::test]
    async fn test_move_rel_reads_then_writes_clamped_target() {
        let mock = MockAdapter::new()
            .with_reply("OUTX1;*IDN?;", "SRS,SR830,1,ver1.07")
            .with_reply("FREQ?", "101500.0000");
        let mut plugin = lockin(&mock);
        plugin.ini_stage().await;

        plugin.move_rel(10_000.0).await.unwrap();
        // 101.5 kHz + 10 kHz clamps to the 102 kHz hardware limit.
        assert!(mock.written().contains(&"FREQ 102000.0000".to_string()));
    }

    #[tokio::test]
    async fn test_malformed_frequency_reply_is_an_error() {
        let mock = MockAdapter::new()
            .with_reply("OUTX1;*IDN?;", "SRS,SR830,1,ver1.07")
            .with_reply("FREQ?", "garbage");
        let mut plugin = lockin(&mock);
        plugin.ini_stage().await;

        let err = plugin.actuator_value().await.unwrap_err();
        assert!(err.to_string().contains("garbage"));
    }

    #[tokio::test]
    async fn test_move_home_parks_at_one_kilohertz() {
        let mock = MockAdapter::new()
            .with_reply("OUTX1;*IDN?;", "SRS,SR830,1,ver1.07");
        let mut plugin = lockin(&mock);
        plugin.ini_stage().await;

        plugin.move_home().await.unwrap();
        assert!(mock.written().contains(&"FREQ 1000.0000".to_string()));
    }

    #[tokio::test]
    async fn test_commit_time_constant() {
        let mock = MockAdapter::new()
            .with_reply("OUTX1;*IDN?;", "SRS,SR830,1,ver1.07");
        let mut plugin = lockin(&mock);
        plugin.ini_stage().await;

        plugin
            .commit_setting(Sr830Setting::TimeConstant(
                TimeConstant::from_code(8).unwrap(),
            ))
            .await
            .unwrap();
        assert!(mock.written().contains(&"OFLT 8".to_string()));
    }

    #[test]
    fn test_slave_without_controller_is_rejected() {
        assert!(matches!(
            Sr830::slave("lockin2", None, &Sr830Config::default()),
            Err(PluginError::SlaveWithoutController)
        ));
    }

    #[tokio::test]
    async fn test_slave_reuses_master_connection_and_leaves_it_open() {
        let mock = MockAdapter::new()
            .with_reply("OUTX1;*IDN?;", "SRS,SR830,1,ver1.07");
        let mut master = lockin(&mock);
        assert!(master.ini_stage().await.initialized);

        let mut slave = Sr830::slave(
            "lockin2",
            Some(master.shared_adapter()),
            &Sr830Config::default(),
        )
        .unwrap();
        assert!(slave.ini_stage().await.initialized);

        slave.close().await.unwrap();
        assert!(mock.is_connected());
        master.close().await.unwrap();
        assert!(!mock.is_connected());
    }

    #[tokio::test]
    async fn test_slave_with_disconnected_controller_fails_init() {
        let mock = MockAdapter::new();
        let mut slave = Sr830::slave(
            "lockin2",
            Some(shared(mock.clone())),
            &Sr830Config::default(),
        )
        .unwrap();

        let status = slave.ini_stage().await;
        assert!(!status.initialized);
        assert!(status.info.contains("not connected"));
    }
}
