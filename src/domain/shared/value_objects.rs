//! Shared value objects used across multiple bounded contexts

use super::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// SIP URI value object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SipUri {
    user: String,
    host: String,
    port: Option<u16>,
}

impl SipUri {
    pub fn new(user: String, host: String, port: Option<u16>) -> Self {
        Self { user, host, port }
    }

    pub fn parse(uri: &str) -> Result<Self, DomainError> {
        let invalid = || DomainError::InvalidContact(uri.to_string());
        let uri = uri.trim().trim_start_matches('<').trim_end_matches('>');
        let uri = uri
            .strip_prefix("sip:")
            .or_else(|| uri.strip_prefix("sips:"))
            .ok_or_else(invalid)?;

        // Drop URI parameters
        let uri = uri.split(';').next().unwrap_or(uri);

        let (user, host_port) = uri
            .split_once('@')
            .ok_or_else(invalid)?;
        if user.is_empty() || host_port.is_empty() {
            return Err(invalid());
        }

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => (
                host.to_string(),
                Some(port.parse().map_err(|_| invalid())?),
            ),
            None => (host_port.to_string(), None),
        };

        Ok(Self {
            user: user.to_string(),
            host,
            port,
        })
    }

    /// Normalize a contact (SIP URI, tel URI or bare number) into a SIP URI
    /// in the given home domain.
    pub fn from_contact(contact: &str, home_domain: &str) -> Result<Self, DomainError> {
        let contact = contact.trim();
        if contact.starts_with("sip:") || contact.starts_with("sips:") || contact.starts_with('<') {
            return Self::parse(contact);
        }

        let number = contact.strip_prefix("tel:").unwrap_or(contact);
        let number: String = number
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '+')
            .collect();
        if number.is_empty() {
            return Err(DomainError::InvalidContact(contact.to_string()));
        }

        Ok(Self::new(number, home_domain.to_string(), None))
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(port) = self.port {
            write!(f, "sip:{}@{}:{}", self.user, self.host, port)
        } else {
            write!(f, "sip:{}@{}", self.user, self.host)
        }
    }
}
