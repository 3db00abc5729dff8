//! SIP message types and header access

use bytes::Bytes;
use rsip::{Header, Headers, Method, Request, Response, Uri};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SipError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Construction error: {0}")]
    Construction(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rsip::Error> for SipError {
    fn from(err: rsip::Error) -> Self {
        SipError::ParseError(err.to_string())
    }
}

/// SIP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SipMethod {
    Register,
    Invite,
    Ack,
    Cancel,
    Bye,
    Options,
    Info,
    Update,
    Subscribe,
    Notify,
    Refer,
    Message,
    Publish,
}

impl SipMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SipMethod::Register => "REGISTER",
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Bye => "BYE",
            SipMethod::Options => "OPTIONS",
            SipMethod::Info => "INFO",
            SipMethod::Update => "UPDATE",
            SipMethod::Subscribe => "SUBSCRIBE",
            SipMethod::Notify => "NOTIFY",
            SipMethod::Refer => "REFER",
            SipMethod::Message => "MESSAGE",
            SipMethod::Publish => "PUBLISH",
        }
    }

    pub fn from_rsip(method: &Method) -> Option<Self> {
        match method {
            Method::Register => Some(SipMethod::Register),
            Method::Invite => Some(SipMethod::Invite),
            Method::Ack => Some(SipMethod::Ack),
            Method::Cancel => Some(SipMethod::Cancel),
            Method::Bye => Some(SipMethod::Bye),
            Method::Options => Some(SipMethod::Options),
            Method::Info => Some(SipMethod::Info),
            Method::Update => Some(SipMethod::Update),
            Method::Subscribe => Some(SipMethod::Subscribe),
            Method::Notify => Some(SipMethod::Notify),
            Method::Refer => Some(SipMethod::Refer),
            Method::Message => Some(SipMethod::Message),
            Method::Publish => Some(SipMethod::Publish),
            _ => None,
        }
    }

    pub fn to_rsip(&self) -> Method {
        match self {
            SipMethod::Register => Method::Register,
            SipMethod::Invite => Method::Invite,
            SipMethod::Ack => Method::Ack,
            SipMethod::Cancel => Method::Cancel,
            SipMethod::Bye => Method::Bye,
            SipMethod::Options => Method::Options,
            SipMethod::Info => Method::Info,
            SipMethod::Update => Method::Update,
            SipMethod::Subscribe => Method::Subscribe,
            SipMethod::Notify => Method::Notify,
            SipMethod::Refer => Method::Refer,
            SipMethod::Message => Method::Message,
            SipMethod::Publish => Method::Publish,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let method = match name.trim().to_ascii_uppercase().as_str() {
            "REGISTER" => SipMethod::Register,
            "INVITE" => SipMethod::Invite,
            "ACK" => SipMethod::Ack,
            "CANCEL" => SipMethod::Cancel,
            "BYE" => SipMethod::Bye,
            "OPTIONS" => SipMethod::Options,
            "INFO" => SipMethod::Info,
            "UPDATE" => SipMethod::Update,
            "SUBSCRIBE" => SipMethod::Subscribe,
            "NOTIFY" => SipMethod::Notify,
            "REFER" => SipMethod::Refer,
            "MESSAGE" => SipMethod::Message,
            "PUBLISH" => SipMethod::Publish,
            _ => return None,
        };
        Some(method)
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compact header forms (RFC 3261 section 7.3.3)
const COMPACT_NAMES: &[(&str, &str)] = &[
    ("i", "Call-ID"),
    ("m", "Contact"),
    ("f", "From"),
    ("t", "To"),
    ("v", "Via"),
    ("c", "Content-Type"),
    ("l", "Content-Length"),
    ("k", "Supported"),
    ("x", "Session-Expires"),
    ("r", "Refer-To"),
    ("a", "Accept-Contact"),
];

fn same_header_name(found: &str, wanted: &str) -> bool {
    if found.eq_ignore_ascii_case(wanted) {
        return true;
    }
    COMPACT_NAMES
        .iter()
        .any(|(short, long)| found.eq_ignore_ascii_case(short) && wanted.eq_ignore_ascii_case(long))
}

/// Split a header into its name and value
///
/// rsip renders every header as `Name: value`, typed or not.
pub fn header_name_value(header: &Header) -> (String, String) {
    let line = header.to_string();
    match line.split_once(':') {
        Some((name, value)) => (name.trim().to_string(), value.trim().to_string()),
        None => (String::new(), line.trim().to_string()),
    }
}

/// All values of the named header, in message order
pub fn header_values(headers: &Headers, name: &str) -> Vec<String> {
    headers
        .iter()
        .map(header_name_value)
        .filter(|(found, _)| same_header_name(found, name))
        .map(|(_, value)| value)
        .collect()
}

/// Split a comma separated header value, ignoring commas inside `<>` or quotes
pub fn split_header_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_angle = false;
    let mut in_quotes = false;

    for c in value.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_angle && !in_quotes => {
                if !current.trim().is_empty() {
                    items.push(current.trim().to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

/// URI part of a name-addr (`"Bob" <sip:bob@host>;tag=x` gives `sip:bob@host`)
pub fn name_addr_uri(value: &str) -> String {
    if let (Some(start), Some(end)) = (value.find('<'), value.find('>')) {
        if start < end {
            return value[start + 1..end].trim().to_string();
        }
    }
    value.split(';').next().unwrap_or(value).trim().to_string()
}

/// Header parameter of a name-addr, outside the angle brackets
pub fn name_addr_param(value: &str, param: &str) -> Option<String> {
    let params = match value.rfind('>') {
        Some(end) => &value[end + 1..],
        None => value.split_once(';').map(|(_, rest)| rest).unwrap_or(""),
    };
    params
        .split(';')
        .filter_map(|p| {
            let p = p.trim();
            match p.split_once('=') {
                Some((key, val)) => Some((key.trim(), Some(val.trim()))),
                None if !p.is_empty() => Some((p, None)),
                None => None,
            }
        })
        .find(|(key, _)| key.eq_ignore_ascii_case(param))
        .map(|(_, val)| val.unwrap_or("").trim_matches('"').to_string())
}

/// Read access shared by requests and responses
pub trait SipHeaders {
    fn headers(&self) -> &Headers;

    fn body(&self) -> &[u8];

    fn header(&self, name: &str) -> Option<String> {
        header_values(self.headers(), name).into_iter().next()
    }

    fn header_all(&self, name: &str) -> Vec<String> {
        header_values(self.headers(), name)
    }

    fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    fn call_id(&self) -> Option<String> {
        self.header("Call-ID")
    }

    fn from_header(&self) -> Option<String> {
        self.header("From")
    }

    fn to_header(&self) -> Option<String> {
        self.header("To")
    }

    fn from_tag(&self) -> Option<String> {
        self.from_header().and_then(|v| name_addr_param(&v, "tag"))
    }

    fn to_tag(&self) -> Option<String> {
        self.to_header().and_then(|v| name_addr_param(&v, "tag"))
    }

    fn from_uri(&self) -> Option<String> {
        self.from_header().map(|v| name_addr_uri(&v))
    }

    fn to_uri(&self) -> Option<String> {
        self.to_header().map(|v| name_addr_uri(&v))
    }

    /// CSeq number
    fn cseq(&self) -> Option<u32> {
        self.header("CSeq")
            .and_then(|v| v.split_whitespace().next().and_then(|n| n.parse().ok()))
    }

    /// CSeq method
    fn cseq_method(&self) -> Option<SipMethod> {
        self.header("CSeq")
            .and_then(|v| v.split_whitespace().nth(1).and_then(SipMethod::parse))
    }

    /// First Contact URI
    fn contact_uri(&self) -> Option<String> {
        self.header("Contact")
            .and_then(|v| split_header_list(&v).into_iter().next())
            .map(|v| name_addr_uri(&v))
    }

    /// Record-Route entries in message order, comma lists expanded
    fn record_route(&self) -> Vec<String> {
        self.header_all("Record-Route")
            .iter()
            .flat_map(|v| split_header_list(v))
            .collect()
    }

    /// Via entries in message order
    fn vias(&self) -> Vec<String> {
        self.header_all("Via")
            .iter()
            .flat_map(|v| split_header_list(v))
            .collect()
    }

    fn content_type(&self) -> Option<String> {
        self.header("Content-Type")
    }

    /// Body as text, lossy for non UTF-8 content
    fn body_str(&self) -> String {
        String::from_utf8_lossy(self.body()).into_owned()
    }

    /// Session-Expires period and refresher role
    fn session_expires(&self) -> Option<(u32, Option<String>)> {
        let value = self.header("Session-Expires")?;
        let period = value.split(';').next()?.trim().parse().ok()?;
        let refresher = value
            .split(';')
            .skip(1)
            .filter_map(|p| p.trim().split_once('='))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("refresher"))
            .map(|(_, v)| v.trim().to_ascii_lowercase());
        Some((period, refresher))
    }

    /// Feature tags carried in Contact and Accept-Contact parameters
    fn feature_tags(&self) -> Vec<String> {
        let mut tags = Vec::new();
        for value in self.header_all("Contact").into_iter().chain(self.header_all("Accept-Contact")) {
            let params = match value.rfind('>') {
                Some(end) => value[end + 1..].to_string(),
                None => value.clone(),
            };
            for param in params.split(';').map(str::trim) {
                if param.starts_with('+') && !tags.iter().any(|t: &String| t == param) {
                    tags.push(param.to_string());
                }
            }
        }
        tags
    }
}

/// SIP Request wrapper
#[derive(Debug, Clone)]
pub struct SipRequest {
    pub inner: Request,
}

impl SipRequest {
    pub fn new(inner: Request) -> Self {
        Self { inner }
    }

    pub fn parse(data: &[u8]) -> Result<Self, SipError> {
        let request = rsip::Request::try_from(data)?;
        Ok(Self::new(request))
    }

    pub fn method(&self) -> Option<SipMethod> {
        SipMethod::from_rsip(&self.inner.method)
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn request_uri(&self) -> String {
        self.inner.uri.to_string()
    }

    /// Append a header
    pub fn add_header(&mut self, header: Header) {
        self.inner.headers.push(header);
    }

    /// Drop every header with the given name
    pub fn remove_header(&mut self, name: &str) {
        self.inner.headers.retain(|h| {
            let (found, _) = header_name_value(h);
            !same_header_name(&found, name)
        });
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.inner.to_string())
    }
}

impl SipHeaders for SipRequest {
    fn headers(&self) -> &Headers {
        &self.inner.headers
    }

    fn body(&self) -> &[u8] {
        &self.inner.body
    }
}

/// SIP Response wrapper
#[derive(Debug, Clone)]
pub struct SipResponse {
    pub inner: Response,
}

impl SipResponse {
    pub fn new(inner: Response) -> Self {
        Self { inner }
    }

    pub fn parse(data: &[u8]) -> Result<Self, SipError> {
        let response = rsip::Response::try_from(data)?;
        Ok(Self::new(response))
    }

    pub fn status_code(&self) -> u16 {
        self.inner.status_code.clone().into()
    }

    /// Reason phrase of the status line
    pub fn reason_phrase(&self) -> String {
        let rendered = self.inner.status_code.to_string();
        let reason = rendered
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_digit())
            .trim();
        if reason.is_empty() {
            default_reason_phrase(self.status_code()).to_string()
        } else {
            reason.to_string()
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code())
    }

    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.status_code())
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.inner.to_string())
    }
}

impl SipHeaders for SipResponse {
    fn headers(&self) -> &Headers {
        &self.inner.headers
    }

    fn body(&self) -> &[u8] {
        &self.inner.body
    }
}

/// Reason phrases for the status codes this stack emits
pub fn default_reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        183 => "Session Progress",
        200 => "OK",
        202 => "Accepted",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        415 => "Unsupported Media Type",
        423 => "Interval Too Brief",
        480 => "Temporarily Unavailable",
        481 => "Call/Transaction Does Not Exist",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        500 => "Server Internal Error",
        603 => "Decline",
        _ => "",
    }
}

/// SIP Message (either request or response)
#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipMessage {
    pub fn parse(data: &[u8]) -> Result<Self, SipError> {
        // Try parsing as request first
        if let Ok(request) = SipRequest::parse(data) {
            return Ok(SipMessage::Request(request));
        }

        // Try parsing as response
        if let Ok(response) = SipResponse::parse(data) {
            return Ok(SipMessage::Response(response));
        }

        Err(SipError::ParseError(
            "Could not parse as SIP request or response".to_string(),
        ))
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            SipMessage::Request(req) => req.to_bytes(),
            SipMessage::Response(resp) => resp.to_bytes(),
        }
    }
}

impl From<SipRequest> for SipMessage {
    fn from(request: SipRequest) -> Self {
        SipMessage::Request(request)
    }
}

impl From<SipResponse> for SipMessage {
    fn from(response: SipResponse) -> Self {
        SipMessage::Response(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_invite_request() {
        let data = b"INVITE sip:bob@ims.test SIP/2.0\r\n\
                     Via: SIP/2.0/UDP 192.168.1.100:5060;branch=z9hG4bK776asdhds\r\n\
                     Max-Forwards: 70\r\n\
                     From: \"Alice\" <sip:alice@ims.test>;tag=1928301774\r\n\
                     To: <sip:bob@ims.test>\r\n\
                     Call-ID: a84b4c76e66710@pc33.ims.test\r\n\
                     CSeq: 314159 INVITE\r\n\
                     Contact: <sip:alice@192.168.1.100:5060>;+g.oma.sip-im\r\n\
                     Record-Route: <sip:p1.ims.test;lr>, <sip:p2.ims.test;lr>\r\n\
                     Record-Route: <sip:p3.ims.test;lr>\r\n\
                     Session-Expires: 1800;refresher=uac\r\n\
                     Content-Length: 0\r\n\r\n";

        let req = match SipMessage::parse(data).unwrap() {
            SipMessage::Request(req) => req,
            other => panic!("expected a request, got {:?}", other),
        };
        assert_eq!(req.method(), Some(SipMethod::Invite));
        assert_eq!(req.call_id(), Some("a84b4c76e66710@pc33.ims.test".to_string()));
        assert_eq!(req.cseq(), Some(314159));
        assert_eq!(req.cseq_method(), Some(SipMethod::Invite));
        assert_eq!(req.from_tag(), Some("1928301774".to_string()));
        assert_eq!(req.to_tag(), None);
        assert_eq!(req.from_uri(), Some("sip:alice@ims.test".to_string()));
        assert_eq!(req.contact_uri(), Some("sip:alice@192.168.1.100:5060".to_string()));
        assert_eq!(
            req.record_route(),
            vec![
                "<sip:p1.ims.test;lr>".to_string(),
                "<sip:p2.ims.test;lr>".to_string(),
                "<sip:p3.ims.test;lr>".to_string()
            ]
        );
        assert_eq!(req.session_expires(), Some((1800, Some("uac".to_string()))));
        assert_eq!(req.feature_tags(), vec!["+g.oma.sip-im".to_string()]);
    }

    #[test]
    fn test_parse_response() {
        let data = b"SIP/2.0 200 OK\r\n\
                     Via: SIP/2.0/UDP 192.168.1.100:5060;branch=z9hG4bK776asdhds\r\n\
                     From: Alice <sip:alice@ims.test>;tag=1928301774\r\n\
                     To: Bob <sip:bob@ims.test>;tag=a6c85cf\r\n\
                     Call-ID: a84b4c76e66710@pc33.ims.test\r\n\
                     CSeq: 314159 INVITE\r\n\
                     Contact: <sip:bob@192.168.1.200:5060>\r\n\
                     Content-Length: 0\r\n\r\n";

        let resp = match SipMessage::parse(data).unwrap() {
            SipMessage::Response(resp) => resp,
            other => panic!("expected a response, got {:?}", other),
        };
        assert_eq!(resp.status_code(), 200);
        assert!(resp.is_success());
        assert_eq!(resp.to_tag(), Some("a6c85cf".to_string()));
        assert_eq!(resp.reason_phrase(), "OK");
    }

    #[test]
    fn test_name_addr_helpers() {
        assert_eq!(name_addr_uri("\"Bob\" <sip:bob@host>;tag=x"), "sip:bob@host");
        assert_eq!(name_addr_uri("sip:bob@host;tag=x"), "sip:bob@host");
        assert_eq!(name_addr_param("<sip:bob@host;lr>;tag=x", "tag"), Some("x".to_string()));
        assert_eq!(name_addr_param("<sip:bob@host;tag=inner>", "tag"), None);
        assert_eq!(name_addr_param("sip:bob@host;tag=y", "tag"), Some("y".to_string()));
    }

    #[test]
    fn test_split_header_list() {
        let items = split_header_list("<sip:a;lr>, \"x, y\" <sip:b>,<sip:c>");
        assert_eq!(items, vec!["<sip:a;lr>", "\"x, y\" <sip:b>", "<sip:c>"]);
    }

    #[test]
    fn test_remove_header() {
        let data = b"BYE sip:bob@ims.test SIP/2.0\r\n\
                     Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK1\r\n\
                     From: <sip:alice@ims.test>;tag=1\r\n\
                     To: <sip:bob@ims.test>;tag=2\r\n\
                     Call-ID: c1\r\n\
                     CSeq: 2 BYE\r\n\
                     Route: <sip:p1.ims.test;lr>\r\n\
                     Content-Length: 0\r\n\r\n";
        let mut req = SipRequest::parse(data).unwrap();
        assert!(req.has_header("Route"));
        req.remove_header("route");
        assert!(!req.has_header("Route"));
        assert_eq!(req.call_id(), Some("c1".to_string()));
    }
}
