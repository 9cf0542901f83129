pub mod config;
pub mod logging;

pub const APP_NAME: &str = "latch";

pub use config::{ConfigError, LatchConfig, ReconnectConfig};

/// How the process interacts with an operator for its whole lifetime.
///
/// Fixed once at startup; it selects what happens when a server presents a
/// certificate that is not in the known-hosts file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    Interactive,
    Daemonized,
}

impl ProcessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Daemonized => "daemonized",
        }
    }

    pub fn is_daemonized(&self) -> bool {
        matches!(self, Self::Daemonized)
    }
}
