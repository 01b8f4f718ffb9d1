//! Instrument-bus adapter implementations.
//!
//! Adapters provide the low-level I/O abstraction between a plugin and its
//! instrument: open a named bus resource, send a short ASCII command, read a
//! short ASCII reply. Plugins hold adapters behind [`SharedAdapter`] so a
//! slave plugin can reuse the connection owned by a master instance.

pub mod mock_adapter;
pub mod visa_adapter;

pub use mock_adapter::MockAdapter;
pub use visa_adapter::VisaAdapter;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Low-level instrument-bus I/O.
///
/// `query` is for commands ending in `?` that expect a one-line reply;
/// `write` is for commands with no reply. Both fail if the adapter is not
/// connected.
#[async_trait]
pub trait BusAdapter: Send + Sync {
    /// Open the underlying bus resource.
    async fn connect(&mut self) -> Result<()>;

    /// Close the underlying bus resource.
    async fn disconnect(&mut self) -> Result<()>;

    /// Send a command and read one reply line (trimmed).
    async fn query(&mut self, command: &str) -> Result<String>;

    /// Send a command with no reply expected.
    async fn write(&mut self, command: &str) -> Result<()>;

    /// Whether the bus resource is currently open.
    fn is_connected(&self) -> bool;

    /// Short adapter kind tag (e.g. "visa", "mock").
    fn adapter_type(&self) -> &str;

    /// Human-readable adapter description for logs.
    fn info(&self) -> String;
}

/// Shared handle to a bus adapter, cloneable across master/slave plugins.
pub type SharedAdapter = Arc<Mutex<Box<dyn BusAdapter>>>;

/// Wrap an adapter into a [`SharedAdapter`] handle.
pub fn shared(adapter: impl BusAdapter + 'static) -> SharedAdapter {
    Arc::new(Mutex::new(Box::new(adapter)))
}
