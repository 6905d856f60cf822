#[cfg(target_os = "linux")]
use rustix::io::Errno;
use thiserror::Error;

/// Errors that can occur while publishing and transmitting metric lines.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// A custom error with a free-form message.
    #[error("Custom error: {0}")]
    Custom(String),

    /// An I/O error from the standard library.
    #[error("Std Io error: {0}")]
    StdIo(#[from] std::io::Error),

    /// A low-level system errno.
    #[cfg(target_os = "linux")]
    #[error("Errno error: {0}")]
    Errno(#[from] Errno),

    /// The publication channel has completed and accepts no more lines.
    #[error("Publication channel is closed")]
    ChannelClosed,
}

impl From<String> for MetricsError {
    fn from(value: String) -> Self {
        Self::Custom(value)
    }
}

impl From<&str> for MetricsError {
    fn from(value: &str) -> Self {
        Self::Custom(value.to_string())
    }
}
