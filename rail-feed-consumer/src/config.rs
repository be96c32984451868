use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

use crate::connection::RetryPolicy;
use crate::transport::{StompSettings, Subscription};

#[derive(Envconfig, Clone)]
pub struct FeedConfig {
    #[envconfig(from = "FEED_HOST", default = "datafeeds.networkrail.co.uk")]
    pub host: String,

    #[envconfig(from = "FEED_PORT", default = "61618")]
    pub port: u16,

    #[envconfig(from = "FEED_USERNAME")]
    pub username: String,

    #[envconfig(from = "FEED_PASSWORD")]
    pub password: String,

    // Falls back to the username, which is what the broker expects for durable subscriptions
    #[envconfig(from = "FEED_CLIENT_ID")]
    pub client_id: Option<String>,

    #[envconfig(from = "FEED_DESTINATION", default = "/topic/TRAIN_MVT_ALL_TOC")]
    pub destination: String,

    #[envconfig(from = "FEED_SUBSCRIPTION_NAME", default = "rail-feed-consumer")]
    pub subscription_name: String,

    #[envconfig(from = "FEED_HEARTBEAT_SEND_MS", default = "10000")]
    pub heartbeat_send_ms: u64,

    #[envconfig(from = "FEED_HEARTBEAT_RECEIVE_MS", default = "5000")]
    pub heartbeat_receive_ms: u64,

    #[envconfig(from = "FEED_CONNECT_TIMEOUT_MS", default = "10000")]
    pub connect_timeout_ms: u64,
}

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(nested = true)]
    pub feed: FeedConfig,

    #[envconfig(from = "CONNECT_MAX_ATTEMPTS", default = "30")]
    pub connect_max_attempts: u32,

    #[envconfig(from = "CONNECT_RETRY_DELAY_MS", default = "2000")]
    pub connect_retry_delay_ms: u64,

    #[envconfig(from = "CONNECT_BACKOFF_MULTIPLIER", default = "1.0")]
    pub connect_backoff_multiplier: f64,

    #[envconfig(from = "CONNECT_MAX_DELAY_MS", default = "60000")]
    pub connect_max_delay_ms: u64,

    #[envconfig(from = "FLUSH_WINDOW_SECONDS", default = "300")]
    pub flush_window_seconds: u64,

    #[envconfig(from = "OPERATOR_TABLE_PATH", default = "tocs.json")]
    pub operator_table_path: String,

    #[envconfig(from = "SINK_KIND", default = "file")]
    pub sink_kind: SinkKind,

    #[envconfig(from = "RECORDS_DIR", default = "records")]
    pub records_dir: String,

    #[envconfig(from = "S3_BUCKET", default = "")]
    pub s3_bucket: String,

    #[envconfig(from = "S3_PREFIX", default = "records/")]
    pub s3_prefix: String,

    #[envconfig(from = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[envconfig(from = "BIND_HOST", default = "::")]
    pub bind_host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub bind_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    File,
    S3,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(SinkKind::File),
            "s3" => Ok(SinkKind::S3),
            other => Err(format!("unknown sink kind {other:?}, expected file or s3")),
        }
    }
}

impl Config {
    pub fn client_id(&self) -> &str {
        self.feed
            .client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.feed.username)
    }

    pub fn stomp_settings(&self) -> StompSettings {
        StompSettings {
            host: self.feed.host.clone(),
            port: self.feed.port,
            login: self.feed.username.clone(),
            passcode: self.feed.password.clone(),
            client_id: self.client_id().to_owned(),
            heartbeat_send: Duration::from_millis(self.feed.heartbeat_send_ms),
            heartbeat_receive: Duration::from_millis(self.feed.heartbeat_receive_ms),
            connect_timeout: Duration::from_millis(self.feed.connect_timeout_ms),
        }
    }

    pub fn subscription(&self) -> Subscription {
        Subscription {
            id: "1".to_string(),
            destination: self.feed.destination.clone(),
                durable_name: self.feed.subscription_name.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connect_max_attempts,
            Duration::from_millis(self.connect_retry_delay_ms),
            self.connect_backoff_multiplier,
            Duration::from_millis(self.connect_max_delay_ms),
        )
    }

    pub fn flush_window(&self) -> Duration {
        Duration::from_secs(self.flush_window_seconds)
    }

    pub fn bind(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::init_from_hashmap(&env(&[
            ("FEED_USERNAME", "me@example.com"),
            ("FEED_PASSWORD", "pw"),
        ]))
        .unwrap();

        assert_eq!(config.feed.port, 61618);
        assert_eq!(config.client_id(), "me@example.com");
        assert_eq!(config.sink_kind, SinkKind::File);
        assert_eq!(config.flush_window(), Duration::from_secs(300));
        assert_eq!(
            config.retry_policy(),
            RetryPolicy::new(30, Duration::from_secs(2), 1.0, Duration::from_secs(60))
        );
        assert_eq!(config.bind(), ":::3302");

        let subscription = config.subscription();
        assert_eq!(subscription.destination, "/topic/TRAIN_MVT_ALL_TOC");

        let stomp = config.stomp_settings();
        assert_eq!(stomp.heartbeat_send, Duration::from_millis(10_000));
        assert_eq!(stomp.heartbeat_receive, Duration::from_millis(5_000));
    }

    #[test]
    fn test_credentials_are_required() {
        assert!(Config::init_from_hashmap(&env(&[("FEED_USERNAME", "me")])).is_err());
    }

    #[test]
    fn test_explicit_client_id_and_sink() {
        let config = Config::init_from_hashmap(&env(&[
            ("FEED_USERNAME", "me"),
            ("FEED_PASSWORD", "pw"),
            ("FEED_CLIENT_ID", "collector-1"),
            ("SINK_KIND", "S3"),
            ("S3_BUCKET", "rail"),
        ]))
        .unwrap();

        assert_eq!(config.client_id(), "collector-1");
        assert_eq!(config.stomp_settings().client_id, "collector-1");
        assert_eq!(config.sink_kind, SinkKind::S3);
    }

    #[test]
    fn test_unknown_sink_kind() {
        assert!("postgres".parse::<SinkKind>().is_err());
    }
}
