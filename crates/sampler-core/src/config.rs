use crate::{
    ConfigError, DecodeOptions, OutputFormat, RelayPolicy, RetryPolicy, SupervisorSettings,
    TimeMode,
};
use sampler_transport::Address;
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything the gateway needs to run. Loaded from YAML, then overridden from
/// the command line; every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub subscribe_host: String,
    /// Subscription port used when the handshake does not report one.
    pub subscribe_port: u16,
    /// Control-plane setup port; the subscription port is learned from the handshake.
    pub setup_port: u16,
    pub channel: String,
    pub republish: bool,
    pub publish_interface: String,
    pub publish_port: u16,
    pub quiet: bool,
    pub raw: bool,
    pub ignore_values: bool,
    pub only_numeric_values: bool,
    pub debug: bool,
    pub format: OutputFormat,
    pub time_mode: TimeMode,
    /// Pinned epoch in microseconds since the Unix epoch.
    pub start_time_us: Option<u64>,
    /// Directory holding the identifier tables.
    pub state_dir: PathBuf,
    pub command_port_min: u16,
    pub command_port_max: u16,
    pub retry: RetryPolicy,
    pub poll_interval_ms: u64,
    pub reconnect_pause_ms: u64,
    pub reply_timeout_ms: u64,
    pub reply_attempts: u32,
    pub relay_wait_ms: u64,
    pub relay_attempts: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            subscribe_host: "localhost".into(),
            subscribe_port: 5556,
            setup_port: 5555,
            channel: "SAMPLER_CHANNEL".into(),
            republish: false,
            publish_interface: "*".into(),
            publish_port: 5560,
            quiet: false,
            raw: false,
            ignore_values: false,
            only_numeric_values: false,
            debug: false,
            format: OutputFormat::Std,
            time_mode: TimeMode::OffsetMillis,
            start_time_us: None,
            state_dir: PathBuf::from("."),
            command_port_min: 10_000,
            command_port_max: 10_999,
            retry: RetryPolicy::default(),
            poll_interval_ms: 200,
            reconnect_pause_ms: 100,
            reply_timeout_ms: 200,
            reply_attempts: 3,
            relay_wait_ms: 1_000,
            relay_attempts: 3,
        }
    }
}

impl GatewayConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Self = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command_port_min > self.command_port_max {
            return Err(ConfigError::Invalid(format!(
                "command port range {}..={} is empty",
                self.command_port_min, self.command_port_max
            )));
        }
        if self.retry.attempts == 0 {
            return Err(ConfigError::Invalid("retry.attempts must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.channel.trim().is_empty() {
            return Err(ConfigError::Invalid("channel name is empty".into()));
        }
        Ok(())
    }

    pub fn setup_address(&self) -> Address {
        Address::new(self.subscribe_host.clone(), self.setup_port)
    }

    pub fn publish_address(&self) -> Address {
        Address::new(self.publish_interface.clone(), self.publish_port)
    }

    pub fn command_ports(&self) -> RangeInclusive<u16> {
        self.command_port_min..=self.command_port_max
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            raw: self.raw,
            ignore_values: self.ignore_values,
            only_numeric_values: self.only_numeric_values,
        }
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            setup: self.setup_address(),
            subscribe_host: self.subscribe_host.clone(),
            subscribe_port: self.subscribe_port,
            channel: self.channel.clone(),
            retry: self.retry,
            reply_timeout_ms: self.reply_timeout_ms,
            reply_attempts: self.reply_attempts,
        }
    }

    pub fn relay_policy(&self) -> RelayPolicy {
        RelayPolicy {
            attempts: self.relay_attempts,
            attempt_timeout: Duration::from_millis(self.relay_wait_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli_defaults() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.setup_address().to_string(), "tcp://localhost:5555");
        assert_eq!(cfg.publish_address().to_string(), "tcp://*:5560");
        assert_eq!(cfg.command_ports(), 10_000..=10_999);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_load_partial_yaml() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sampler.yaml");
        fs::write(
            &path,
            "subscribe_host: plc-gw\nchannel: LINE_3\nformat: kvq\ntime_mode: wallclock-iso8601\nretry:\n  attempts: 5\n",
        )?;
        let cfg = GatewayConfig::load(&path)?;
        assert_eq!(cfg.subscribe_host, "plc-gw");
        assert_eq!(cfg.channel, "LINE_3");
        assert_eq!(cfg.format, OutputFormat::Kvq);
        assert_eq!(cfg.time_mode, TimeMode::WallclockIso8601);
        assert_eq!(cfg.retry.attempts, 5);
        assert_eq!(cfg.retry.backoff_ms, 100);
        assert_eq!(cfg.setup_port, 5555);
        Ok(())
    }

    #[test]
    fn test_load_rejects_bad_config() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "command_port_min: 11000\ncommand_port_max: 10000\n")?;
        assert!(matches!(GatewayConfig::load(&path), Err(ConfigError::Invalid(_))));
        fs::write(&path, "format: fancy\n")?;
        assert!(matches!(GatewayConfig::load(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            GatewayConfig::load(dir.path().join("missing.yaml")),
            Err(ConfigError::Read { .. })
        ));
        Ok(())
    }
}
