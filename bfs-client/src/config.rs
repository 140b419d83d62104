use crate::error::{FsError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 256 * 1024; // 256KiB
pub const DEFAULT_SLOW_OP_THRESHOLD_MS: u64 = 100;

/// Per-attempt timeout and attempt budget of one kind of remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallPolicy {
    pub timeout_ms: u64,
    pub attempts: u32,
}

impl CallPolicy {
    /// Name server queries and mutations.
    pub const NAMESPACE: CallPolicy = CallPolicy::from_secs(5, 3);
    /// Unlink is sent once; a lost reply would otherwise turn into NOT_FOUND on retry.
    pub const UNLINK: CallPolicy = CallPolicy::from_secs(5, 1);
    /// Large payloads: long timeout, no blind resend.
    pub const WRITE_BLOCK: CallPolicy = CallPolicy::from_secs(60, 1);
    pub const READ_BLOCK: CallPolicy = CallPolicy::from_secs(5, 3);

    pub const fn new(timeout: Duration, attempts: u32) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as u64,
            attempts,
        }
    }

    pub const fn from_secs(secs: u64, attempts: u32) -> Self {
        Self {
            timeout_ms: secs * 1000,
            attempts,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub namespace: CallPolicy,
    pub unlink: CallPolicy,
    pub write_block: CallPolicy,
    pub read_block: CallPolicy,
    /// Capacity of each write handle's staging buffer.
    pub write_buffer_size: usize,
    /// Operations slower than this are logged at warn level.
    pub slow_op_threshold_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namespace: CallPolicy::NAMESPACE,
            unlink: CallPolicy::UNLINK,
            write_block: CallPolicy::WRITE_BLOCK,
            read_block: CallPolicy::READ_BLOCK,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            slow_op_threshold_ms: DEFAULT_SLOW_OP_THRESHOLD_MS,
        }
    }
}

impl ClientConfig {
    pub fn namespace(self, namespace: CallPolicy) -> Self {
        Self { namespace, ..self }
    }

    pub fn unlink(self, unlink: CallPolicy) -> Self {
        Self { unlink, ..self }
    }

    pub fn write_block(self, write_block: CallPolicy) -> Self {
        Self {
            write_block,
            ..self
        }
    }

    pub fn read_block(self, read_block: CallPolicy) -> Self {
        Self { read_block, ..self }
    }

    pub fn write_buffer_size(self, write_buffer_size: usize) -> Self {
        Self {
            write_buffer_size,
            ..self
        }
    }

    pub fn slow_op_threshold(self, threshold: Duration) -> Self {
        Self {
            slow_op_threshold_ms: threshold.as_millis() as u64,
            ..self
        }
    }

    pub fn slow_op_threshold_duration(&self) -> Duration {
        Duration::from_millis(self.slow_op_threshold_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.write_buffer_size == 0 {
            return Err(FsError::InvalidArgument(
                "write_buffer_size must be greater than zero".into(),
            ));
        }
        let policies = [
            ("namespace", self.namespace),
            ("unlink", self.unlink),
            ("write_block", self.write_block),
            ("read_block", self.read_block),
        ];
        for (name, policy) in policies {
            if policy.attempts == 0 {
                return Err(FsError::InvalidArgument(format!(
                    "{name}.attempts must be at least 1"
                )));
            }
            if policy.timeout_ms == 0 {
                return Err(FsError::InvalidArgument(format!(
                    "{name}.timeout_ms must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

/// Load a client configuration from a YAML file. Missing keys keep their defaults.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<ClientConfig> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let cfg: ClientConfig =
        serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    cfg.validate()
        .with_context(|| format!("Invalid config in {}", path.display()))?;
    Ok(cfg)
}
