use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single request/reply exchange with a worker.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("send to {addr} failed: {source}")]
    Send {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("receive from {addr} failed: {source}")]
    Receive {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("request to {addr} timed out")]
    Timeout { addr: String },
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no worker addresses configured")]
    NoWorkers,
    #[error("max message length {max_message_len} leaves no room after {headroom} bytes of headroom")]
    NoPayloadRoom {
        max_message_len: usize,
        headroom: usize,
    },
    #[error("headroom of {0} bytes cannot hold the 3-byte command tag")]
    HeadroomTooSmall(usize),
    #[error("max word length must be at least 1")]
    ZeroWordLength,
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
}

#[derive(Error, Debug)]
pub enum MrError {
    #[error("failed to load input {}: {source}", .path.display())]
    LoadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read config {}: {source}", .path.display())]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config {}: {source}", .path.display())]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write report: {0}")]
    Report(#[from] csv::Error),
    #[error("failed to write report: {0}")]
    ReportJson(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_names_the_address() {
        let err = TransportError::Timeout {
            addr: "127.0.0.1:5555".to_string(),
        };
        assert_eq!(err.to_string(), "request to 127.0.0.1:5555 timed out");
    }

    #[test]
    fn load_error_names_the_path() {
        let err = MrError::LoadInput {
            path: PathBuf::from("missing.txt"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().starts_with("failed to load input missing.txt"));
    }
}
