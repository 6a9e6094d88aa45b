//! Process-wide tracing setup shared by every binary and test harness.

pub mod logging;

pub use logging::{LogFormat, LogSettings, init};
