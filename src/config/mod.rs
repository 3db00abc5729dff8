//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sip: SipConfig,
    pub media: MediaConfig,
    pub user: UserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SipConfig {
    pub local_address: String,
    pub local_port: u16,
    /// Transport advertised in Via/Contact ("UDP", "TCP", "TLS")
    pub transport: String,
    pub user_agent: String,
    /// SIP transaction timeout in milliseconds
    pub transaction_timeout_ms: u64,
    /// Time the remote side is given to answer an invitation, in milliseconds
    pub ringing_period_ms: u64,
    /// Session-Expires value proposed in INVITEs (seconds, 0 disables)
    pub session_expire: u32,
    /// Lower bound below which session timers are not negotiated (seconds)
    pub min_session_expire: u32,
    /// Registration period requested in REGISTER (seconds)
    pub register_expire: u32,
    /// Fraction of the granted period after which registration is refreshed
    pub register_refresh_ratio: f64,
    /// Default route set used for out-of-dialog requests (outbound proxy)
    pub default_route: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub msrp_port_base: u16,
    pub msrp_port_count: u16,
    pub rtp_port_base: u16,
    pub rtp_port_count: u16,
    /// MSRP chunk size in bytes
    pub chunk_size: usize,
    /// Value of the a=max-size attribute, 0 for no limit
    pub max_content_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub username: String,
    pub display_name: String,
    pub private_id: String,
    pub password: String,
    pub home_domain: String,
    pub realm: Option<String>,
    pub preferred_uri: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file, then apply `RCS_` environment overrides
    /// (e.g. `RCS_SIP__LOCAL_PORT=5070`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix("RCS").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Parse configuration from TOML text; missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

impl SipConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }

    pub fn ringing_period(&self) -> Duration {
        Duration::from_millis(self.ringing_period_ms)
    }

    /// Bound applied when waiting for the final response to an INVITE
    pub fn invite_response_timeout(&self) -> Duration {
        self.ringing_period() + self.transaction_timeout()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sip: SipConfig::default(),
            media: MediaConfig::default(),
            user: UserConfig::default(),
        }
    }
}

impl Default for SipConfig {
    fn default() -> Self {
        Self {
            local_address: "127.0.0.1".to_string(),
            local_port: 5060,
            transport: "UDP".to_string(),
            user_agent: "IM-client/OMA1.0 rcs-ims/0.1".to_string(),
            transaction_timeout_ms: 30_000,
            ringing_period_ms: 30_000,
            session_expire: 1800,
            min_session_expire: 90,
            register_expire: 3600,
            register_refresh_ratio: 0.5,
            default_route: Vec::new(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            msrp_port_base: 20000,
            msrp_port_count: 1000,
            rtp_port_base: 10000,
            rtp_port_count: 1000,
            chunk_size: 10 * 1024,
            max_content_size: 10 * 1024 * 1024,
        }
    }
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            username: "anonymous".to_string(),
            display_name: "Anonymous".to_string(),
            private_id: "anonymous@localhost".to_string(),
            password: String::new(),
            home_domain: "localhost".to_string(),
            realm: None,
            preferred_uri: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sip.local_port, 5060);
        assert_eq!(config.sip.invite_response_timeout(), Duration::from_secs(60));
        assert_eq!(config.media.msrp_port_base, 20000);
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
            [sip]
            local_address = "10.0.0.1"
            ringing_period_ms = 500

            [user]
            username = "alice"
            home_domain = "example.com"
            "#,
        )
        .unwrap();

        assert_eq!(config.sip.local_address, "10.0.0.1");
        assert_eq!(config.sip.ringing_period(), Duration::from_millis(500));
        assert_eq!(config.sip.transaction_timeout_ms, 30_000);
        assert_eq!(config.user.username, "alice");
        assert_eq!(config.media.chunk_size, 10 * 1024);
    }
}
