//! Runtime limits and per-role configuration.
//!
//! Both roles share [`Limits`]: the message ceiling, word length and table
//! size bounds. Config structs load from JSON so a deployment can pin limits
//! without repeating flags.

use crate::encoding::CountEncoding;
use crate::error::{ConfigError, MrError, Result};
use crate::report::OutputFormat;
use crate::TAG_LEN;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MAX_MESSAGE_LEN: usize = 1500;
pub const DEFAULT_MAX_WORD_LEN: usize = 255;
pub const DEFAULT_MAX_TABLE_ENTRIES: usize = 50_000;
pub const DEFAULT_PAYLOAD_HEADROOM: usize = 20;
pub const DEFAULT_RECV_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Ceiling on a whole transport message, request or reply.
    pub max_message_len: usize,
    /// Longer alphabetic runs are truncated to this many bytes.
    pub max_word_len: usize,
    /// Distinct words a worker keeps per request; later new words are dropped.
    pub max_table_entries: usize,
    /// Bytes reserved below `max_message_len` for the tag and encoding growth.
    pub payload_headroom: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            max_word_len: DEFAULT_MAX_WORD_LEN,
            max_table_entries: DEFAULT_MAX_TABLE_ENTRIES,
            payload_headroom: DEFAULT_PAYLOAD_HEADROOM,
        }
    }
}

impl Limits {
    /// Target chunk size for both pipeline phases.
    pub fn max_payload(&self) -> usize {
        self.max_message_len.saturating_sub(self.payload_headroom).max(1)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.payload_headroom < TAG_LEN {
            return Err(ConfigError::HeadroomTooSmall(self.payload_headroom));
        }
        if self.payload_headroom >= self.max_message_len {
            return Err(ConfigError::NoPayloadRoom {
                max_message_len: self.max_message_len,
                headroom: self.payload_headroom,
            });
        }
        if self.max_word_len == 0 {
            return Err(ConfigError::ZeroWordLength);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub addresses: Vec<String>,
    /// Bounded accept wait; the stop flag is re-checked on every expiry.
    pub recv_timeout_ms: u64,
    /// Limit on reading a request or writing a reply on an accepted connection.
    pub io_timeout_ms: u64,
    pub limits: Limits,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            addresses: Vec::new(),
            recv_timeout_ms: DEFAULT_RECV_TIMEOUT_MS,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            limits: Limits::default(),
        }
    }
}

impl WorkerConfig {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms.max(1))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms.max(1))
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.addresses.is_empty() {
            return Err(ConfigError::NoWorkers);
        }
        for addr in &self.addresses {
            bind_address(addr)?;
        }
        self.limits.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    pub input: PathBuf,
    pub workers: Vec<String>,
    pub limits: Limits,
    pub format: OutputFormat,
    /// How reduce replies are parsed. Workers write decimal totals.
    pub final_encoding: CountEncoding,
    /// Unset means a request waits for its reply indefinitely.
    pub request_timeout_ms: Option<u64>,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        DistributorConfig {
            input: PathBuf::new(),
            workers: Vec::new(),
            limits: Limits::default(),
            format: OutputFormat::Csv,
            final_encoding: CountEncoding::Decimal,
            request_timeout_ms: None,
        }
    }
}

impl DistributorConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.workers.is_empty() {
            return Err(ConfigError::NoWorkers);
        }
        for addr in &self.workers {
            connect_address(addr)?;
        }
        self.limits.validate()
    }
}

/// Reads a JSON config file; absent fields keep their defaults.
pub fn load_json<T, P>(path: P) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| MrError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| MrError::ParseConfig {
        path: path.to_path_buf(),
        source,
    })
}

/// A bare port binds on every interface, like `tcp://*:<port>`.
pub fn bind_address(addr: &str) -> std::result::Result<String, ConfigError> {
    normalize(addr, "0.0.0.0")
}

/// A bare port is reached on the local host.
pub fn connect_address(addr: &str) -> std::result::Result<String, ConfigError> {
    normalize(addr, "127.0.0.1")
}

fn normalize(addr: &str, default_host: &str) -> std::result::Result<String, ConfigError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(ConfigError::InvalidAddress(addr.to_string()));
    }
    if addr.parse::<u16>().is_ok() {
        return Ok(format!("{}:{}", default_host, addr));
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(addr.to_string())
        }
        _ => Err(ConfigError::InvalidAddress(addr.to_string())),
    }
}
