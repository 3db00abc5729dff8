//! SIP Digest Authentication, client side (RFC 2617, RFC 3261)
//!
//! One agent per session or registration. It remembers the last challenge
//! received in a 401 or 407 and answers it once.

use super::message::{split_header_list, SipError, SipHeaders, SipRequest, SipResponse};
use crate::domain::UserProfile;
use rand::Rng;
use rsip::Header;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Authentication challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: String,
    pub qop: Option<String>,
}

impl AuthChallenge {
    /// Parse a `WWW-Authenticate` / `Proxy-Authenticate` value
    pub fn parse(header_value: &str) -> Result<Self, SipError> {
        let trimmed = header_value.trim();
        let scheme_ok = trimmed
            .get(..6)
            .is_some_and(|s| s.eq_ignore_ascii_case("Digest"));
        if !scheme_ok {
            return Err(SipError::Authentication(format!(
                "Unsupported authentication scheme: {}",
                trimmed
            )));
        }

        let params = parse_digest_params(trimmed);
        let required = |name: &str| {
            params
                .get(name)
                .cloned()
                .ok_or_else(|| SipError::Authentication(format!("Missing {} in challenge", name)))
        };

        Ok(Self {
            realm: required("realm")?,
            nonce: required("nonce")?,
            opaque: params.get("opaque").cloned(),
            algorithm: params.get("algorithm").cloned().unwrap_or_else(|| "MD5".to_string()),
            qop: params.get("qop").cloned(),
        })
    }

    /// qop=auth offered, possibly among other options
    pub fn offers_auth_qop(&self) -> bool {
        self.qop
            .as_deref()
            .map(|q| q.split(',').any(|v| v.trim().eq_ignore_ascii_case("auth")))
            .unwrap_or(false)
    }
}

/// Parse Digest authentication parameters
pub fn parse_digest_params(auth_value: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    // Remove "Digest " prefix
    let trimmed = auth_value.trim();
    let digest_str = match trimmed.get(..6) {
        Some(scheme) if scheme.eq_ignore_ascii_case("Digest") => trimmed[6..].trim(),
        _ => trimmed,
    };

    // key=value pairs; quoted values may contain commas
    for part in split_header_list(digest_str) {
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim().trim_matches('"');
            params.insert(key, value.to_string());
        }
    }

    params
}

/// Calculate digest response
#[allow(clippy::too_many_arguments)]
pub fn calculate_response(
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    method: &str,
    uri: &str,
    qop: Option<&str>,
    nc: Option<&str>,
    cnonce: Option<&str>,
) -> String {
    // HA1 = MD5(username:realm:password)
    let ha1 = format!("{:x}", md5::compute(format!("{}:{}:{}", username, realm, password)));

    // HA2 = MD5(method:uri)
    let ha2 = format!("{:x}", md5::compute(format!("{}:{}", method, uri)));

    // Response = MD5(HA1:nonce:HA2) or MD5(HA1:nonce:nc:cnonce:qop:HA2)
    let digest = match qop {
        Some(qop_value) => md5::compute(format!(
            "{}:{}:{}:{}:{}:{}",
            ha1,
            nonce,
            nc.unwrap_or("00000001"),
            cnonce.unwrap_or(""),
            qop_value,
            ha2
        )),
        None => md5::compute(format!("{}:{}:{}", ha1, nonce, ha2)),
    };
    format!("{:x}", digest)
}

fn generate_cnonce() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Digest state of one session or registration
#[derive(Debug, Clone)]
pub struct AuthenticationAgent {
    profile: UserProfile,
    challenge: Option<AuthChallenge>,
    nonce_count: u32,
    answered: bool,
}

impl AuthenticationAgent {
    pub fn new(profile: UserProfile) -> Self {
        Self {
            profile,
            challenge: None,
            nonce_count: 0,
            answered: false,
        }
    }

    pub fn challenge(&self) -> Option<&AuthChallenge> {
        self.challenge.as_ref()
    }

    /// Whether the stored challenge has already been answered
    pub fn is_answered(&self) -> bool {
        self.answered
    }

    /// Store the challenge of a 407 response
    pub fn read_proxy_authenticate_header(&mut self, response: &SipResponse) -> Result<(), SipError> {
        self.read_challenge(response, "Proxy-Authenticate")
    }

    /// Store the challenge of a 401 response
    pub fn read_www_authenticate_header(&mut self, response: &SipResponse) -> Result<(), SipError> {
        self.read_challenge(response, "WWW-Authenticate")
    }

    /// Answer the stored challenge in `Proxy-Authorization`
    pub fn set_proxy_authorization_header(&mut self, request: &mut SipRequest) -> Result<(), SipError> {
        self.authorize(request, "Proxy-Authorization")
    }

    /// Answer the stored challenge in `Authorization`
    pub fn set_authorization_header(&mut self, request: &mut SipRequest) -> Result<(), SipError> {
        self.authorize(request, "Authorization")
    }

    fn read_challenge(&mut self, response: &SipResponse, header_name: &str) -> Result<(), SipError> {
        let value = response.header(header_name).ok_or_else(|| {
            SipError::Authentication(format!("No {} header in {}", header_name, response.status_code()))
        })?;
        let challenge = AuthChallenge::parse(&value)?;

        if let Some(expected) = self.profile.realm() {
            if !expected.eq_ignore_ascii_case(&challenge.realm) {
                warn!("Realm mismatch: expected {}, got {}", expected, challenge.realm);
                return Err(SipError::Authentication(format!(
                    "Unexpected realm {}",
                    challenge.realm
                )));
            }
        }

        let same_nonce = self
            .challenge
            .as_ref()
            .map(|c| c.nonce == challenge.nonce)
            .unwrap_or(false);
        if !same_nonce {
            self.nonce_count = 0;
            self.answered = false;
        }

        debug!("Stored {} challenge for realm {}", header_name, challenge.realm);
        self.challenge = Some(challenge);
        Ok(())
    }

    fn authorize(&mut self, request: &mut SipRequest, header_name: &str) -> Result<(), SipError> {
        let challenge = self
            .challenge
            .as_ref()
            .ok_or_else(|| SipError::Authentication("No challenge received".to_string()))?;
        if self.answered {
            return Err(SipError::Authentication(format!(
                "Challenge for realm {} already answered",
                challenge.realm
            )));
        }

        let method = request
            .method()
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| request.inner.method.to_string());
        let uri = request.request_uri();
        let username = self.profile.private_id().to_string();

        let mut value = String::new();
        if challenge.offers_auth_qop() {
            let nc = format!("{:08x}", self.nonce_count + 1);
            let cnonce = generate_cnonce();
            let response = calculate_response(
                &username,
                self.profile.password(),
                &challenge.realm,
                &challenge.nonce,
                &method,
                &uri,
                Some("auth"),
                Some(&nc),
                Some(&cnonce),
            );
            value.push_str(&format!(
                r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}", algorithm={}, cnonce="{}", nc={}, qop=auth"#,
                username, challenge.realm, challenge.nonce, uri, response, challenge.algorithm, cnonce, nc
            ));
        } else {
            let response = calculate_response(
                &username,
                self.profile.password(),
                &challenge.realm,
                &challenge.nonce,
                &method,
                &uri,
                None,
                None,
                None,
            );
            value.push_str(&format!(
                r#"Digest username="{}", realm="{}", nonce="{}", uri="{}", response="{}", algorithm={}"#,
                username, challenge.realm, challenge.nonce, uri, response, challenge.algorithm
            ));
        }
        if let Some(opaque) = &challenge.opaque {
            value.push_str(&format!(r#", opaque="{}""#, opaque));
        }

        request.remove_header(header_name);
        request.add_header(Header::Other(header_name.to_string(), value));
        self.nonce_count += 1;
        self.answered = true;

        info!("{} set for {} {}", header_name, method, uri);
        Ok(())
    }
}
