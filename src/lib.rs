//! Audio subsystem self-test: plays a reference tone, captures it back over
//! a loopback path and checks the dominant frequency of what came back.

pub mod audio;
pub mod error;
pub mod fft;
pub mod format;
pub mod loopback;
pub mod signal;

pub use error::{ConfigError, DeviceError};
