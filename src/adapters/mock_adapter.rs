//! Scripted in-memory adapter for tests and offline development.
//!
//! `MockAdapter` answers queries from a table of scripted replies and records
//! every command it receives. Clones share state, so a test can keep one
//! handle for inspection while the plugin under test owns another.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use crate::adapters::BusAdapter;
use crate::error::PluginError;

#[derive(Debug, Default)]
struct MockState {
    replies: HashMap<String, VecDeque<String>>,
    written: Vec<String>,
    connected: bool,
    fail_connect: Option<String>,
}

/// Shared-state mock implementation of [`BusAdapter`].
#[derive(Clone, Debug, Default)]
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    /// Create an empty mock with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a reply for a query command.
    ///
    /// Replies for the same command queue up; the last one scripted keeps
    /// being returned once the queue is down to a single entry, so repeated
    /// polls of e.g. `FREQ?` need only one script line.
    pub fn with_reply(self, command: impl Into<String>, reply: impl Into<String>) -> Self {
        self.lock()
            .replies
            .entry(command.into())
            .or_default()
            .push_back(reply.into());
        self
    }

    /// Script several consecutive replies for the same query command.
    pub fn with_replies<I, S>(self, command: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = command.into();
        {
            let mut state = self.lock();
            let queue = state.replies.entry(command).or_default();
            for reply in replies {
                queue.push_back(reply.into());
            }
        }
        self
    }

    /// Make `connect` fail with the given message.
    pub fn failing_connect(self, message: impl Into<String>) -> Self {
        self.lock().fail_connect = Some(message.into());
        self
    }

    /// Every command written or queried so far, in order.
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BusAdapter for MockAdapter {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.lock();
        if let Some(message) = &state.fail_connect {
            return Err(anyhow!("{message}"));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.lock().connected = false;
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        let mut state = self.lock();
        if !state.connected {
            return Err(PluginError::NotConnected("mock".to_string()).into());
        }
        state.written.push(command.to_string());

        let queue = state
            .replies
            .get_mut(command)
            .ok_or_else(|| anyhow!("MockAdapter has no scripted reply for '{command}'"))?;
        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        reply.ok_or_else(|| anyhow!("MockAdapter has no scripted reply for '{command}'"))
    }

    async fn write(&mut self, command: &str) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(PluginError::NotConnected("mock".to_string()).into());
        }
        state.written.push(command.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn adapter_type(&self) -> &str {
        "mock"
    }

    fn info(&self) -> String {
        "MockAdapter".to_string()
    }
}
