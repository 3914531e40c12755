//! Minimal HTTP client for reading counters off a power meter.
//!
//! - Blocking client using `ureq` (no async).
//! - Meters expose a plain JSON endpoint listing the current cumulative
//!   counter of every channel they carry; filtering down to the channels
//!   enabled in the registry happens at the caller.

use serde::Deserialize;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum MeterClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_json::Error),
}

impl core::fmt::Display for MeterClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MeterClientError::Transport(s) => write!(f, "transport error: {}", s),
            MeterClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            MeterClientError::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for MeterClientError {}

impl From<serde_json::Error> for MeterClientError {
    fn from(value: serde_json::Error) -> Self {
        MeterClientError::Json(value)
    }
}

/// One channel's current counter value as reported by the meter.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelReading {
    pub channel: i32,
    pub value: f64,
}

pub struct MeterClient {
    agent: ureq::Agent,
}

impl MeterClient {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new().timeout(READ_TIMEOUT).build();
        MeterClient { agent }
    }

    /// Read the current counters of every channel on one meter.
    pub fn read_channels(&self, address: &str, port: u16) -> Result<Vec<ChannelReading>, MeterClientError> {
        let url = format!("http://{}:{}/api/readings", address, port);
        match self.agent.get(&url).set("Accept", "application/json").call() {
            Ok(res) => serde_json::from_reader(res.into_reader()).map_err(MeterClientError::Json),
            Err(ureq::Error::Transport(t)) => Err(MeterClientError::Transport(t.to_string())),
            Err(ureq::Error::Status(status, res)) => {
                let body = res.into_string().unwrap_or_else(|_| String::from("<no body>"));
                Err(MeterClientError::Http { status, message: body })
            }
        }
    }
}

impl Default for MeterClient {
    fn default() -> Self {
        Self::new()
    }
}
