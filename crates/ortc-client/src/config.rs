//! Client configuration

use ortc_core::{
    HeartbeatParams, HEARTBEAT_MAX_FAIL, HEARTBEAT_MAX_TIME, HEARTBEAT_MIN_FAIL,
    HEARTBEAT_MIN_TIME,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for one [`OrtcClient`](crate::OrtcClient).
///
/// `url` and `cluster_url` are mutually exclusive: [`set_url`](Self::set_url)
/// leaves cluster mode, [`set_cluster_url`](Self::set_cluster_url) enters it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server URL used when not in cluster mode
    #[serde(default)]
    pub url: String,
    /// Balancer URL used in cluster mode
    #[serde(default)]
    pub cluster_url: String,
    /// Resolve the server through the balancer on every connect
    #[serde(default)]
    pub is_cluster: bool,
    /// Subchannel announced to the server in the validate frame
    #[serde(default)]
    pub announcement_sub_channel: String,
    /// Free-form metadata, at most 256 bytes
    #[serde(default)]
    pub connection_metadata: String,
    /// Send heartbeat frames and announce the heartbeat settings
    #[serde(default)]
    pub heartbeat_active: bool,
    /// Heartbeat period in seconds, clamped to 10..=60
    #[serde(default = "default_heartbeat_time")]
    pub heartbeat_time: u32,
    /// Missed heartbeats before the server drops the connection, clamped to 1..=6
    #[serde(default = "default_heartbeat_fails")]
    pub heartbeat_fails: u32,
    /// Bound on the socket open plus validation round-trip
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_ms: u64,
    /// Reconnect automatically when the socket drops
    #[serde(default = "default_true")]
    pub enable_reconnect: bool,
    /// Delay before each reconnect attempt
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
    /// Balancer attempts made by retrying lookups
    #[serde(default = "default_cluster_attempts")]
    pub cluster_max_attempts: u32,
    /// Delay between balancer attempts
    #[serde(default = "default_cluster_retry_delay")]
    pub cluster_retry_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_time() -> u32 {
    15
}

fn default_heartbeat_fails() -> u32 {
    3
}

fn default_connection_timeout() -> u64 {
    11_000
}

fn default_reconnect_interval() -> u64 {
    2_000
}

fn default_cluster_attempts() -> u32 {
    10
}

fn default_cluster_retry_delay() -> u64 {
    5_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            cluster_url: String::new(),
            is_cluster: false,
            announcement_sub_channel: String::new(),
            connection_metadata: String::new(),
            heartbeat_active: false,
            heartbeat_time: default_heartbeat_time(),
            heartbeat_fails: default_heartbeat_fails(),
            connection_timeout_ms: default_connection_timeout(),
            enable_reconnect: true,
            reconnect_interval_ms: default_reconnect_interval(),
            cluster_max_attempts: default_cluster_attempts(),
            cluster_retry_delay_ms: default_cluster_retry_delay(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed server URL and leave cluster mode
    pub fn set_url(&mut self, url: &str) {
        self.url = url.trim().to_string();
        self.is_cluster = false;
    }

    /// Resolve the server through a balancer
    pub fn set_cluster_url(&mut self, url: &str) {
        self.cluster_url = url.trim().to_string();
        self.is_cluster = true;
    }

    pub fn set_heartbeat_time(&mut self, seconds: u32) {
        self.heartbeat_time = seconds.clamp(HEARTBEAT_MIN_TIME, HEARTBEAT_MAX_TIME);
    }

    pub fn set_heartbeat_fails(&mut self, fails: u32) {
        self.heartbeat_fails = fails.clamp(HEARTBEAT_MIN_FAIL, HEARTBEAT_MAX_FAIL);
    }

    /// Heartbeat settings to announce, `None` while heartbeats are off.
    ///
    /// Values are clamped here too, since deserialized configs skip the
    /// setters.
    pub fn heartbeat(&self) -> Option<HeartbeatParams> {
        self.heartbeat_active.then(|| HeartbeatParams {
            time: self.heartbeat_time.clamp(HEARTBEAT_MIN_TIME, HEARTBEAT_MAX_TIME),
            fails: self
                .heartbeat_fails
                .clamp(HEARTBEAT_MIN_FAIL, HEARTBEAT_MAX_FAIL),
        })
    }

    /// Heartbeat period
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(
            self.heartbeat_time
                .clamp(HEARTBEAT_MIN_TIME, HEARTBEAT_MAX_TIME) as u64,
        )
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn cluster_retry_delay(&self) -> Duration {
        Duration::from_millis(self.cluster_retry_delay_ms)
    }

    /// The URL the client dials or resolves, whichever mode is active
    pub fn target_url(&self) -> &str {
        if self.is_cluster {
            &self.cluster_url
        } else {
            &self.url
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert!(!config.heartbeat_active);
        assert_eq!(config.heartbeat_time, 15);
        assert_eq!(config.heartbeat_fails, 3);
        assert_eq!(config.connection_timeout(), Duration::from_secs(11));
        assert_eq!(config.reconnect_interval(), Duration::from_secs(2));
        assert_eq!(config.cluster_max_attempts, 10);
        assert_eq!(config.cluster_retry_delay(), Duration::from_secs(5));
        assert!(config.enable_reconnect);
        assert!(config.heartbeat().is_none());
    }

    #[test]
    fn test_url_modes_are_exclusive() {
        let mut config = ClientConfig::new();
        config.set_cluster_url("https://balancer.example.com/server/2.1");
        assert!(config.is_cluster);
        assert_eq!(config.target_url(), "https://balancer.example.com/server/2.1");

        config.set_url("ws://host/x");
        assert!(!config.is_cluster);
        assert_eq!(config.target_url(), "ws://host/x");
    }

    #[test]
    fn test_heartbeat_clamping() {
        let mut config = ClientConfig::new();
        config.set_heartbeat_time(5);
        assert_eq!(config.heartbeat_time, 10);
        config.set_heartbeat_time(300);
        assert_eq!(config.heartbeat_time, 60);
        config.set_heartbeat_fails(0);
        assert_eq!(config.heartbeat_fails, 1);
        config.set_heartbeat_fails(9);
        assert_eq!(config.heartbeat_fails, 6);

        config.heartbeat_active = true;
        assert_eq!(config.heartbeat(), Some(HeartbeatParams { time: 60, fails: 6 }));
    }

    #[test]
    fn test_heartbeat_clamped_when_set_directly() {
        let config = ClientConfig {
            heartbeat_active: true,
            heartbeat_time: 1,
            heartbeat_fails: 100,
            ..Default::default()
        };
        assert_eq!(config.heartbeat(), Some(HeartbeatParams { time: 10, fails: 6 }));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_deserialize_partial_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            cluster_url = "https://balancer.example.com/server/2.1"
            is_cluster = true
            heartbeat_active = true
            reconnect_interval_ms = 500
            "#,
        )
        .unwrap();

        assert!(config.is_cluster);
        assert_eq!(config.target_url(), "https://balancer.example.com/server/2.1");
        assert_eq!(config.reconnect_interval(), Duration::from_millis(500));
        assert_eq!(config.heartbeat(), Some(HeartbeatParams { time: 15, fails: 3 }));
        assert_eq!(config.connection_timeout_ms, 11_000);
    }
}
