//! Instrument plugin implementations.
//!
//! Each plugin is a thin translation layer between the host's lifecycle
//! calls and one instrument's ASCII command set.

pub mod fsc;
pub mod sr830;

pub use fsc::{FscSetting, RsFsc};
pub use sr830::{Sr830, Sr830Setting, TimeConstant};
