//! Chat messages, CPIM wrapping and resource lists

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const MIME_TEXT_PLAIN: &str = "text/plain";
pub const MIME_CPIM: &str = "message/cpim";
pub const MIME_RESOURCE_LISTS: &str = "application/resource-lists+xml";

const CRLF: &str = "\r\n";

/// Instant message exchanged in a chat session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantMessage {
    pub message_id: String,
    pub remote: String,
    pub text: String,
    pub date: DateTime<Utc>,
}

impl InstantMessage {
    pub fn new(remote: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_id: generate_message_id(),
            remote: remote.into(),
            text: text.into(),
            date: Utc::now(),
        }
    }

    /// Decode a received chunk: plain text is taken as is, CPIM is unwrapped
    pub fn from_received(remote: &str, data: &[u8], mime_type: &str) -> Option<Self> {
        let body = String::from_utf8_lossy(data);
        if mime_type.eq_ignore_ascii_case(MIME_TEXT_PLAIN) {
            return Some(Self::new(remote, body.into_owned()));
        }
        if mime_type.eq_ignore_ascii_case(MIME_CPIM) {
            let cpim = CpimMessage::parse(&body)?;
            if !cpim.content_type.eq_ignore_ascii_case(MIME_TEXT_PLAIN) {
                return None;
            }
            let sender = cpim.from.unwrap_or_else(|| remote.to_string());
            return Some(Self::new(sender, cpim.content));
        }
        None
    }
}

/// Fresh message identifier
pub fn generate_message_id() -> String {
    format!("Msg{}", uuid::Uuid::new_v4().simple())
}

/// Minimal CPIM (RFC 3862) message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpimMessage {
    pub from: Option<String>,
    pub to: Option<String>,
    pub content_type: String,
    pub content: String,
}

impl CpimMessage {
    /// Wrap `content` with the message headers and a DateTime stamp
    pub fn build(from: &str, to: &str, content: &str, content_type: &str) -> String {
        Self::build_at(from, to, content, content_type, Utc::now())
    }

    pub fn build_at(from: &str, to: &str, content: &str, content_type: &str, date: DateTime<Utc>) -> String {
        format!(
            "From: {from}{CRLF}To: {to}{CRLF}DateTime: {date}{CRLF}{CRLF}Content-Type: {content_type}{CRLF}{CRLF}{content}",
            date = date.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }

    /// Split the message headers, the MIME headers and the content
    pub fn parse(text: &str) -> Option<Self> {
        let (message_headers, rest) = split_block(text)?;
        let (mime_headers, content) = split_block(rest)?;

        let mut from = None;
        let mut to = None;
        for line in message_headers.lines() {
            if let Some((name, value)) = line.split_once(':') {
                match name.trim() {
                    "From" => from = Some(value.trim().to_string()),
                    "To" => to = Some(value.trim().to_string()),
                    _ => {}
                }
            }
        }

        let content_type = mime_headers
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("Content-Type"))
            .map(|(_, value)| value.trim().to_string())?;

        Some(Self {
            from,
            to,
            content_type,
            content: content.to_string(),
        })
    }
}

fn split_block(text: &str) -> Option<(&str, &str)> {
    text.split_once("\r\n\r\n").or_else(|| text.split_once("\n\n"))
}

/// Resource list body listing the participants of an ad-hoc group
pub fn generate_resource_list(participants: &[String]) -> String {
    let entries: String = participants
        .iter()
        .map(|uri| format!(" <entry uri=\"{}\"/>{}", uri, CRLF))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>{CRLF}<resource-lists xmlns=\"urn:ietf:params:xml:ns:resource-lists\"><list>{CRLF}{entries}</list></resource-lists>"
    )
}
