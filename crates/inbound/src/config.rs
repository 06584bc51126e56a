//! Configuration management

use anyhow::Context;
use byte_unit::Byte;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

// ============================================================================
// Sink Configuration Constants
// ============================================================================

/// Default local directory for staging files.
pub const DEFAULT_STAGING_DIR: &str = "/tmp/inbound";

/// Default staging file size that triggers a rotation (4 GiB).
pub const DEFAULT_TMP_FILE_MAX_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Default postfix of the table a bulk load is swapped into.
pub const DEFAULT_TRANSIENT_POSTFIX: &str = "__transient";

// ============================================================================
// Tap / Clerk Configuration Constants
// ============================================================================

/// Default number of rows fetched per round trip.
pub const DEFAULT_FETCH_SIZE: usize = 10_000;

/// Default number of jobs the clerk queue holds before `run_job` waits.
pub const DEFAULT_CLERK_QUEUE_CAPACITY: usize = 64;

/// Ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundConfig {
    pub sink: SinkConfig,
    pub tap: TapConfig,
    pub clerk: ClerkConfig,
}

/// Bulk-load sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub staging_dir: PathBuf,
    /// Staging file name; `None` derives one from the table name
    pub staging_file: Option<String>,
    pub tmp_file_max_size: u64,
    pub transient_postfix: String,
    pub quoted_identifiers: bool,
}

/// Tap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapConfig {
    pub fetch_size: usize,
}

/// Job clerk configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClerkConfig {
    pub queue_capacity: usize,
}

/// Read and parse `name`, or `default` when it is unset.
fn env_parse<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {}: {}", name, value)),
        Err(_) => Ok(default),
    }
}

/// Parse a size such as `1048576`, `512 MiB` or `4GiB` into bytes.
pub fn parse_size(value: &str) -> anyhow::Result<u64> {
    let byte = Byte::parse_str(value.trim(), true)
        .with_context(|| format!("Invalid size: {}", value))?;
    Ok(byte.as_u64())
}

impl InboundConfig {
    /// Load configuration from environment and defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            sink: SinkConfig::from_env()?,
            tap: TapConfig::from_env()?,
            clerk: ClerkConfig::from_env()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.sink.validate()?;

        if self.tap.fetch_size == 0 {
            anyhow::bail!("Fetch size must be greater than 0");
        }

        if self.clerk.queue_capacity == 0 {
            anyhow::bail!("Clerk queue capacity must be greater than 0");
        }

        Ok(())
    }
}

impl SinkConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let tmp_file_max_size = match std::env::var("INBOUND_TMP_FILE_MAX_SIZE") {
            Ok(value) => parse_size(&value).context("INBOUND_TMP_FILE_MAX_SIZE")?,
            Err(_) => DEFAULT_TMP_FILE_MAX_SIZE,
        };

        Ok(Self {
            staging_dir: std::env::var("INBOUND_STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_STAGING_DIR)),
            staging_file: std::env::var("INBOUND_STAGING_FILE").ok(),
            tmp_file_max_size,
            transient_postfix: std::env::var("INBOUND_TRANSIENT_POSTFIX")
                .unwrap_or_else(|_| DEFAULT_TRANSIENT_POSTFIX.to_string()),
            quoted_identifiers: env_parse("INBOUND_QUOTED_IDENTIFIERS", false)?,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tmp_file_max_size == 0 {
            anyhow::bail!("Staging file max size must be greater than 0");
        }

        if self.staging_file.as_deref().is_some_and(|name| name.trim().is_empty()) {
            anyhow::bail!("Staging file name cannot be empty");
        }

        if self.transient_postfix.is_empty() {
            anyhow::bail!("Transient table postfix cannot be empty");
        }

        Ok(())
    }
}

impl TapConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            fetch_size: env_parse("INBOUND_FETCH_SIZE", DEFAULT_FETCH_SIZE)?,
        })
    }
}

impl ClerkConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            queue_capacity: env_parse("INBOUND_CLERK_QUEUE_CAPACITY", DEFAULT_CLERK_QUEUE_CAPACITY)?,
        })
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            staging_file: None,
            tmp_file_max_size: DEFAULT_TMP_FILE_MAX_SIZE,
            transient_postfix: DEFAULT_TRANSIENT_POSTFIX.to_string(),
            quoted_identifiers: false,
        }
    }
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            fetch_size: DEFAULT_FETCH_SIZE,
        }
    }
}

impl Default for ClerkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_CLERK_QUEUE_CAPACITY,
        }
    }
}
