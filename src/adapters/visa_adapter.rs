//! VISA adapter for GPIB/USB/Ethernet instruments.
//!
//! Wraps the `visa-rs` crate behind the [`BusAdapter`] trait, executing the
//! synchronous VISA calls on Tokio's blocking executor so plugin methods stay
//! async. Supports resource strings like:
//!
//! - `GPIB0::8::INSTR` (GPIB interface)
//! - `USB0::0x1234::0x5678::SERIAL::INSTR` (USB)
//! - `TCPIP0::192.168.1.55::INSTR` (Ethernet/LXI)
//!
//! Built only with `--features instrument_visa`; without the feature every
//! I/O method reports [`PluginError::FeatureNotEnabled`].

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::adapters::BusAdapter;
use crate::config::BusSettings;
use crate::error::PluginError;

#[cfg(feature = "instrument_visa")]
use anyhow::{anyhow, Context};
#[cfg(feature = "instrument_visa")]
use log::debug;
#[cfg(feature = "instrument_visa")]
use std::ffi::CString;
#[cfg(feature = "instrument_visa")]
use std::io::{Read, Write};
#[cfg(feature = "instrument_visa")]
use std::sync::Arc;
#[cfg(feature = "instrument_visa")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// An open VISA session together with the resource manager that created it.
///
/// VISA closes child sessions when their resource manager closes, so the
/// manager must live as long as the instrument session.
#[cfg(feature = "instrument_visa")]
struct VisaSession {
    _rm: DefaultRM,
    instr: visa_rs::Instrument,
}

/// [`BusAdapter`] implementation backed by a VISA session.
pub struct VisaAdapter {
    /// VISA resource string (e.g. `GPIB0::8::INSTR`).
    pub(crate) resource_string: String,

    /// Open and read/write timeout.
    pub(crate) timeout: Duration,

    /// Line terminator appended to every command. The instruments targeted
    /// here all terminate with `\n`.
    pub(crate) line_terminator: String,

    /// The open VISA session (behind `Arc<Mutex>` for blocking-task access).
    #[cfg(feature = "instrument_visa")]
    session: Option<Arc<Mutex<VisaSession>>>,
}

impl VisaAdapter {
    /// Create a new adapter for the given resource string with default
    /// settings (5 s timeout, `\n` termination).
    pub fn new(resource_string: impl Into<String>) -> Self {
        Self {
            resource_string: resource_string.into(),
            timeout: Duration::from_secs(5),
            line_terminator: "\n".to_string(),
            #[cfg(feature = "instrument_visa")]
            session: None,
        }
    }

    /// Set the open and read/write timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the line terminator appended to commands.
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Build an adapter for `resource` honoring the bus-wide settings
    /// (timeout and line terminator).
    pub fn from_settings(resource: impl Into<String>, bus: &BusSettings) -> Self {
        Self::new(resource)
            .with_timeout(Duration::from_millis(bus.timeout_ms))
            .with_line_terminator(bus.line_terminator.clone())
    }

    /// List VISA resources whose name contains `pattern`.
    ///
    /// An empty pattern returns every resource the VISA library reports.
    #[cfg(feature = "instrument_visa")]
    pub async fn list_resources(pattern: &str) -> Result<Vec<String>> {
        let pattern = pattern.to_string();
        tokio::task::spawn_blocking(move || {
            let rm = DefaultRM::new().context("Failed to create VISA resource manager")?;
            let expr = CString::new("?*INSTR")
                .context("Failed to build VISA search expression")?
                .into();
            let list = rm
                .find_res_list(&expr)
                .context("Failed to enumerate VISA resources")?;

            let names = list
                .filter_map(|res| res.ok())
                .map(|res| res.to_string())
                .filter(|name| name.contains(&pattern))
                .collect();
            Ok(names)
        })
        .await
        .context("VISA enumeration task panicked")?
    }

    /// List VISA resources whose name contains `pattern`.
    #[cfg(not(feature = "instrument_visa"))]
    #[allow(clippy::unused_async)]
    pub async fn list_resources(_pattern: &str) -> Result<Vec<String>> {
        Err(PluginError::FeatureNotEnabled("instrument_visa".to_string()).into())
    }

    /// First resource matching `pattern`, if any.
    pub async fn first_matching(pattern: &str) -> Result<Option<String>> {
        Ok(Self::list_resources(pattern).await?.into_iter().next())
    }
}

#[async_trait]
impl BusAdapter for VisaAdapter {
    async fn connect(&mut self) -> Result<()> {
        #[cfg(feature = "instrument_visa")]
        {
            let resource = self.resource_string.clone();
            let timeout = self.timeout;

            let session = tokio::task::spawn_blocking(move || {
                let rm = DefaultRM::new().context("Failed to create VISA resource manager")?;
                let expr = CString::new(resource.as_str())
                    .context("Resource string contains an interior NUL byte")?
                    .into();
                let res = rm
                    .find_res(&expr)
                    .with_context(|| format!("VISA resource not found: {resource}"))?;
                let instr = rm
                    .open(&res, AccessMode::NO_LOCK, timeout)
                    .with_context(|| format!("Failed to open VISA resource: {resource}"))?;

                // The open timeout above does not govern reads; the session
                // timeout attribute does.
                let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
                let tmo = visa_rs::enums::attribute::AttrTmoValue::new_checked(timeout_ms)
                    .ok_or_else(|| anyhow!("Invalid VISA timeout: {timeout_ms}ms"))?;
                instr
                    .set_attr(tmo.into())
                    .with_context(|| format!("Failed to set VISA timeout on {resource}"))?;

                Ok::<_, anyhow::Error>(VisaSession { _rm: rm, instr })
            })
            .await
            .context("VISA open task panicked")??;

            self.session = Some(Arc::new(Mutex::new(session)));
            debug!(
                "VISA resource '{}' opened with {}ms timeout",
                self.resource_string,
                self.timeout.as_millis()
            );
            Ok(())
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            Err(PluginError::FeatureNotEnabled("instrument_visa".to_string()).into())
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        #[cfg(feature = "instrument_visa")]
        {
            if self.session.take().is_some() {
                debug!("VISA resource '{}' closed", self.resource_string);
            }
        }
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        #[cfg(feature = "instrument_visa")]
        {
            let session = self
                .session
                .as_ref()
                .ok_or_else(|| PluginError::NotConnected(self.resource_string.clone()))?
                .clone();
            let payload = format!("{}{}", command, self.line_terminator);
            let command = command.to_string();
            let delimiter = self.line_terminator.as_bytes().last().copied().unwrap_or(b'\n');

            tokio::task::spawn_blocking(move || {
                let guard = session.blocking_lock();
                (&guard.instr)
                    .write_all(payload.as_bytes())
                    .with_context(|| format!("VISA write failed for: {command}"))?;

                let mut raw = Vec::new();
                let mut chunk = [0u8; 256];
                loop {
                    let n = (&guard.instr)
                        .read(&mut chunk)
                        .with_context(|| format!("VISA read failed for: {command}"))?;
                    if n == 0 {
                        break;
                    }
                    raw.extend_from_slice(&chunk[..n]);
                    if chunk[..n].contains(&delimiter) {
                        break;
                    }
                }

                let reply = String::from_utf8_lossy(&raw).trim().to_string();
                debug!("VISA query '{}' -> '{}'", command, reply);
                Ok(reply)
            })
            .await
            .context("VISA I/O task panicked")?
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            let _ = command;
            Err(PluginError::FeatureNotEnabled("instrument_visa".to_string()).into())
        }
    }

    async fn write(&mut self, command: &str) -> Result<()> {
        #[cfg(feature = "instrument_visa")]
        {
            let session = self
                .session
                .as_ref()
                .ok_or_else(|| PluginError::NotConnected(self.resource_string.clone()))?
                .clone();
            let payload = format!("{}{}", command, self.line_terminator);
            let command = command.to_string();

            tokio::task::spawn_blocking(move || {
                let guard = session.blocking_lock();
                (&guard.instr)
                    .write_all(payload.as_bytes())
                    .with_context(|| format!("VISA write failed for: {command}"))?;
                debug!("VISA write sent: {}", command);
                Ok(())
            })
            .await
            .context("VISA write task panicked")?
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            let _ = command;
            Err(PluginError::FeatureNotEnabled("instrument_visa".to_string()).into())
        }
    }

    fn is_connected(&self) -> bool {
        #[cfg(feature = "instrument_visa")]
        {
            self.session.is_some()
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            false
        }
    }

    fn adapter_type(&self) -> &str {
        "visa"
    }

    fn info(&self) -> String {
        format!(
            "VisaAdapter({} @ {}ms timeout)",
            self.resource_string,
            self.timeout.as_millis()
        )
    }
}
