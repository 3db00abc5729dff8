//! IMS user profile

use crate::config::UserConfig;
use std::fmt;

/// Identity and credentials of the local IMS user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    username: String,
    display_name: String,
    private_id: String,
    password: String,
    home_domain: String,
    realm: Option<String>,
    preferred_uri: Option<String>,
}

impl UserProfile {
    pub fn new(
        username: impl Into<String>,
        display_name: impl Into<String>,
        private_id: impl Into<String>,
        password: impl Into<String>,
        home_domain: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.into(),
            private_id: private_id.into(),
            password: password.into(),
            home_domain: home_domain.into(),
            realm: None,
            preferred_uri: None,
        }
    }

    pub fn from_config(config: &UserConfig) -> Self {
        Self {
            username: config.username.clone(),
            display_name: config.display_name.clone(),
            private_id: config.private_id.clone(),
            password: config.password.clone(),
            home_domain: config.home_domain.clone(),
            realm: config.realm.clone(),
            preferred_uri: config.preferred_uri.clone(),
        }
    }

    /// Expected authentication realm; challenges for another realm are refused
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// URI sent in P-Preferred-Identity
    pub fn with_preferred_uri(mut self, uri: impl Into<String>) -> Self {
        self.preferred_uri = Some(uri.into());
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn private_id(&self) -> &str {
        &self.private_id
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn home_domain(&self) -> &str {
        &self.home_domain
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    pub fn preferred_uri(&self) -> Option<&str> {
        self.preferred_uri.as_deref()
    }

    /// `sip:<username>@<home domain>`
    pub fn public_uri(&self) -> String {
        format!("sip:{}@{}", self.username, self.home_domain)
    }

    /// `"<display name>" <sip:<username>@<home domain>>`
    pub fn name_address(&self) -> String {
        format!("\"{}\" <{}>", self.display_name, self.public_uri())
    }
}

impl fmt::Display for UserProfile {
    // Password deliberately left out
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IMS username={}, IMS private ID={}, IMS display name={}, IMS home domain={}",
            self.username, self.private_id, self.display_name, self.home_domain
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_uri() {
        let profile = UserProfile::new("+33600000001", "Alice", "alice@ims.test", "secret", "ims.test");
        assert_eq!(profile.public_uri(), "sip:+33600000001@ims.test");
        assert_eq!(profile.name_address(), "\"Alice\" <sip:+33600000001@ims.test>");
        assert!(profile.preferred_uri().is_none());
    }

    #[test]
    fn test_from_config() {
        let mut config = UserConfig::default();
        config.username = "bob".to_string();
        config.realm = Some("ims.test".to_string());

        let profile = UserProfile::from_config(&config);
        assert_eq!(profile.username(), "bob");
        assert_eq!(profile.realm(), Some("ims.test"));
        assert!(!profile.to_string().contains("password"));
    }
}
