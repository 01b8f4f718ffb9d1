//! VISA instrument plugins for a modular DAQ host.
//!
//! This library contains the plugin contract, the instrument-bus adapters,
//! and two concrete plugins:
//!
//! - [`plugins::Sr830`]: a Stanford Research SR830 lock-in amplifier driven
//!   as an actuator, with the reference frequency standing in for position.
//! - [`plugins::RsFsc`]: a Rohde & Schwarz FSC spectrum analyzer driven as a
//!   1-D detector, returning one sweep trace per grab.
//!
//! The host calls plugin methods one at a time (initialize, read, move/grab,
//! commit setting, close); each plugin translates those calls into the
//! instrument's ASCII command set over a [`adapters::BusAdapter`].

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;
pub mod plugins;
