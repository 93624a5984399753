use crate::debugger::Error;
use crate::muted_error;
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::Path;
use std::time::Duration;

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Upper bound of a single wait for backend events, in milliseconds.
    /// Stopping the listener takes at most this long.
    pub listener_interval_ms: u64,
    /// Capacity of the debug event channel.
    pub event_queue_capacity: usize,
    /// Report the first exec stop of a session instead of continuing.
    pub break_on_first_exec: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            listener_interval_ms: 1000,
            event_queue_capacity: 64,
            break_on_first_exec: false,
        }
    }
}

impl EngineConfig {
    const DEFAULT_PATH: &'static str = ".config/haltpoint/engine.toml";

    /// Load configuration from file.
    ///
    /// Without an explicit path the file is looked up in the user home directory, a missing
    /// file means the default configuration. An explicit path must exist and be valid.
    pub fn from_file(path: Option<&Path>) -> Result<Self, Error> {
        let data = match path {
            None => {
                let Some(home) = home::home_dir() else {
                    return Ok(Self::default());
                };
                match muted_error!(read_to_string(home.join(Self::DEFAULT_PATH))) {
                    Some(data) => data,
                    None => return Ok(Self::default()),
                }
            }
            Some(path) => read_to_string(path)?,
        };
        Self::from_toml(&data)
    }

    pub fn from_toml(data: &str) -> Result<Self, Error> {
        Ok(toml::de::from_str(data)?)
    }

    pub fn listener_interval(&self) -> Duration {
        Duration::from_millis(self.listener_interval_ms)
    }
}
