//! SDP (Session Description Protocol) handling for MSRP and RTP media

use std::fmt;
use thiserror::Error;

const CRLF: &str = "\r\n";

/// Seconds between the NTP epoch (1900) and the Unix epoch
const NTP_EPOCH_OFFSET: i64 = 2_208_988_800;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SdpError {
    #[error("Malformed SDP line: {0}")]
    MalformedLine(String),

    #[error("No {0} media description")]
    MissingMedia(String),

    #[error("No connection address for {0} media")]
    MissingConnection(String),

    #[error("Missing MSRP path attribute")]
    MissingPath,

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// SDP session
#[derive(Debug, Clone, PartialEq)]
pub struct SdpSession {
    pub version: u32,
    pub origin: Option<SdpOrigin>,
    pub session_name: String,
    pub connection: Option<SdpConnection>,
    pub media: Vec<SdpMedia>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SdpOrigin {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub network_type: String,
    pub address_type: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SdpConnection {
    pub network_type: String,
    pub address_type: String,
    pub address: String,
}

impl SdpConnection {
    fn parse(value: &str) -> Result<Self, SdpError> {
        let parts: Vec<&str> = value.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(SdpError::MalformedLine(format!("c={}", value)));
        }
        Ok(Self {
            network_type: parts[0].to_string(),
            address_type: parts[1].to_string(),
            // Strip a multicast TTL suffix
            address: parts[2].split('/').next().unwrap_or(parts[2]).to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SdpMedia {
    pub media_type: String,    // "message", "audio", "video"
    pub port: u16,
    pub protocol: String,      // "TCP/MSRP", "RTP/AVP"
    pub formats: Vec<String>,  // "*" for MSRP, payload types for RTP
    pub connection: Option<SdpConnection>,
    /// Attributes in order, `a=name:value` or flag `a=name`
    pub attributes: Vec<(String, Option<String>)>,
}

impl SdpMedia {
    /// Value of the first attribute with this name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn attributes_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.attributes
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .filter_map(|(_, v)| v.as_deref())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn direction(&self) -> Option<MediaDirection> {
        self.attributes
            .iter()
            .find_map(|(n, v)| if v.is_none() { MediaDirection::parse(n) } else { None })
    }
}

/// Media stream direction attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDirection {
    SendOnly,
    RecvOnly,
    SendRecv,
    Inactive,
}

impl MediaDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaDirection::SendOnly => "sendonly",
            MediaDirection::RecvOnly => "recvonly",
            MediaDirection::SendRecv => "sendrecv",
            MediaDirection::Inactive => "inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sendonly" => Some(MediaDirection::SendOnly),
            "recvonly" => Some(MediaDirection::RecvOnly),
            "sendrecv" => Some(MediaDirection::SendRecv),
            "inactive" => Some(MediaDirection::Inactive),
            _ => None,
        }
    }

    /// Direction of the answer to an offer with this direction
    pub fn reverse(&self) -> Self {
        match self {
            MediaDirection::SendOnly => MediaDirection::RecvOnly,
            MediaDirection::RecvOnly => MediaDirection::SendOnly,
            other => *other,
        }
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn address_type(address: &str) -> &'static str {
    if address.contains(':') {
        "IP6"
    } else {
        "IP4"
    }
}

/// Session-level lines shared by every offer and answer
pub fn session_header(local_address: &str) -> String {
    let ntp = chrono::Utc::now().timestamp() + NTP_EPOCH_OFFSET;
    let addr_type = address_type(local_address);
    format!(
        "v=0{CRLF}o=- {ntp} {ntp} IN {addr_type} {local_address}{CRLF}s=-{CRLF}c=IN {addr_type} {local_address}{CRLF}t=0 0{CRLF}"
    )
}

impl SdpSession {
    /// Parse SDP from string; malformed lines are errors, unknown lines are skipped
    pub fn parse(sdp_body: &str) -> Result<Self, SdpError> {
        let mut version = 0;
        let mut origin: Option<SdpOrigin> = None;
        let mut session_name = String::new();
        let mut connection: Option<SdpConnection> = None;
        let mut media: Vec<SdpMedia> = Vec::new();

        for line in sdp_body.lines() {
            let line = line.trim_end_matches('\r').trim();
            if line.is_empty() {
                continue;
            }

            let (field_type, value) = line
                .split_once('=')
                .ok_or_else(|| SdpError::MalformedLine(line.to_string()))?;
            let value = value.trim();

            match field_type {
                "v" => {
                    version = value
                        .parse()
                        .map_err(|_| SdpError::InvalidValue("v".to_string(), value.to_string()))?;
                }
                "o" => {
                    let parts: Vec<&str> = value.split_whitespace().collect();
                    if parts.len() < 6 {
                        return Err(SdpError::MalformedLine(line.to_string()));
                    }
                    origin = Some(SdpOrigin {
                        username: parts[0].to_string(),
                        session_id: parts[1].to_string(),
                        session_version: parts[2].to_string(),
                        network_type: parts[3].to_string(),
                        address_type: parts[4].to_string(),
                        address: parts[5].to_string(),
                    });
                }
                "s" => {
                    session_name = value.to_string();
                }
                "c" => {
                    let conn = SdpConnection::parse(value)?;
                    match media.last_mut() {
                        Some(current) => current.connection = Some(conn),
                        None => connection = Some(conn),
                    }
                }
                "m" => {
                    let parts: Vec<&str> = value.split_whitespace().collect();
                    if parts.len() < 3 {
                        return Err(SdpError::MalformedLine(line.to_string()));
                    }
                    // "port/count" keeps the base port
                    let port_text = parts[1].split('/').next().unwrap_or(parts[1]);
                    let port = port_text
                        .parse()
                        .map_err(|_| SdpError::InvalidValue("port".to_string(), parts[1].to_string()))?;

                    media.push(SdpMedia {
                        media_type: parts[0].to_string(),
                        port,
                        protocol: parts[2].to_string(),
                        formats: parts[3..].iter().map(|s| s.to_string()).collect(),
                        connection: None,
                        attributes: Vec::new(),
                    });
                }
                "a" => {
                    // Session-level attributes are not used by any media kind here
                    if let Some(current) = media.last_mut() {
                        let attribute = match value.split_once(':') {
                            Some((name, val)) => (name.to_string(), Some(val.trim().to_string())),
                            None => (value.to_string(), None),
                        };
                        current.attributes.push(attribute);
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            version,
            origin,
            session_name,
            connection,
            media,
        })
    }

    /// First media description of the given type
    pub fn media_of_type(&self, media_type: &str) -> Result<&SdpMedia, SdpError> {
        self.media
            .iter()
            .find(|m| m.media_type.eq_ignore_ascii_case(media_type))
            .ok_or_else(|| SdpError::MissingMedia(media_type.to_string()))
    }

    /// Connection address of a media; media-level `c=` overrides session-level
    pub fn connection_for<'a>(&'a self, media: &'a SdpMedia) -> Result<&'a SdpConnection, SdpError> {
        media
            .connection
            .as_ref()
            .or(self.connection.as_ref())
            .ok_or_else(|| SdpError::MissingConnection(media.media_type.clone()))
    }
}

/// MSRP media description (RFC 4975 / RFC 5547), used both to build the
/// local offer or answer and to read the remote one
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MsrpMediaDescription {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub setup: Option<String>,
    pub accept_types: Vec<String>,
    pub accept_wrapped_types: Vec<String>,
    pub max_size: Option<u64>,
    pub file_transfer_id: Option<String>,
    pub file_disposition: Option<String>,
    pub direction: Option<MediaDirection>,
    pub x_type: Option<String>,
    pub file_selector: Option<String>,
    pub file_location: Option<String>,
}

impl MsrpMediaDescription {
    /// Extract the `m=message` description; host, port and path are mandatory
    pub fn parse(sdp: &str) -> Result<Self, SdpError> {
        let session = SdpSession::parse(sdp)?;
        let media = session.media_of_type("message")?;
        let connection = session.connection_for(media)?;
        let path = media
            .attribute("path")
            .filter(|p| !p.is_empty())
            .ok_or(SdpError::MissingPath)?;

        let max_size = match media.attribute("max-size") {
            Some(value) => Some(
                value
                    .parse()
                    .map_err(|_| SdpError::InvalidValue("max-size".to_string(), value.to_string()))?,
            ),
            None => None,
        };

        let list = |name: &str| -> Vec<String> {
            media
                .attribute(name)
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default()
        };

        Ok(Self {
            host: connection.address.clone(),
            port: media.port,
            path: path.to_string(),
            setup: media.attribute("setup").map(str::to_string),
            accept_types: list("accept-types"),
            accept_wrapped_types: list("accept-wrapped-types"),
            max_size,
            file_transfer_id: media.attribute("file-transfer-id").map(str::to_string),
            file_disposition: media.attribute("file-disposition").map(str::to_string),
            direction: media.direction(),
            x_type: media.attribute("X-type").map(str::to_string),
            file_selector: media.attribute("file-selector").map(str::to_string),
            file_location: media.attribute("file-location").map(str::to_string),
        })
    }

    /// Render a complete SDP body; attribute order is fixed
    pub fn to_sdp(&self) -> String {
        let mut sdp = session_header(&self.host);
        sdp.push_str(&format!("m=message {} TCP/MSRP *{CRLF}", self.port));
        sdp.push_str(&format!("a=path:{}{CRLF}", self.path));
        sdp.push_str(&format!("a=connection:new{CRLF}"));
        if let Some(setup) = &self.setup {
            sdp.push_str(&format!("a=setup:{}{CRLF}", setup));
        }
        if !self.accept_types.is_empty() {
            sdp.push_str(&format!("a=accept-types:{}{CRLF}", self.accept_types.join(" ")));
        }
        if !self.accept_wrapped_types.is_empty() {
            sdp.push_str(&format!(
                "a=accept-wrapped-types:{}{CRLF}",
                self.accept_wrapped_types.join(" ")
            ));
        }
        if let Some(max_size) = self.max_size {
            sdp.push_str(&format!("a=max-size:{}{CRLF}", max_size));
        }
        if let Some(id) = &self.file_transfer_id {
            sdp.push_str(&format!("a=file-transfer-id:{}{CRLF}", id));
        }
        if let Some(disposition) = &self.file_disposition {
            sdp.push_str(&format!("a=file-disposition:{}{CRLF}", disposition));
        }
        if let Some(direction) = self.direction {
            sdp.push_str(&format!("a={}{CRLF}", direction));
        }
        if let Some(x_type) = &self.x_type {
            sdp.push_str(&format!("a=X-type:{}{CRLF}", x_type));
        }
        if let Some(selector) = &self.file_selector {
            sdp.push_str(&format!("a=file-selector:{}{CRLF}", selector));
        }
        if let Some(location) = &self.file_location {
            sdp.push_str(&format!("a=file-location:{}{CRLF}", location));
        }
        sdp
    }
}

/// Local MSRP path for a session: `msrp://<host>:<port>/<id>;tcp`
pub fn msrp_path(host: &str, port: u16, session_id: &str) -> String {
    if host.contains(':') {
        format!("msrp://[{}]:{}/{};tcp", host, port, session_id)
    } else {
        format!("msrp://{}:{}/{};tcp", host, port, session_id)
    }
}

/// `file-selector` attribute value (RFC 5547)
pub fn file_selector(name: &str, encoding: &str, size: i64) -> String {
    format!("name:\"{}\" type:{} size:{}", name, encoding, size)
}

/// Fields of a `file-selector` value: name, type and size when known
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileSelector {
    pub name: Option<String>,
    pub content_type: Option<String>,
    pub size: Option<u64>,
}

impl FileSelector {
    pub fn parse(value: &str) -> Self {
        let mut selector = FileSelector::default();
        let mut rest = value.trim();
        while !rest.is_empty() {
            let Some((key, after)) = rest.split_once(':') else {
                break;
            };
            let (item, next) = match after.strip_prefix('"') {
                Some(quoted) => match quoted.split_once('"') {
                    Some((item, next)) => (item, next),
                    None => (quoted, ""),
                },
                None => after.split_once(' ').unwrap_or((after, "")),
            };
            match key.trim() {
                "name" => selector.name = Some(item.to_string()),
                "type" => selector.content_type = Some(item.to_string()),
                // negative sizes mean unknown
                "size" => selector.size = item.parse().ok(),
                _ => {}
            }
            rest = next.trim_start();
        }
        selector
    }
}

/// RTP payload format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpCodec {
    pub payload_type: u8,
    pub encoding: String,
    pub clock_rate: u32,
    pub fmtp: Option<String>,
}

impl RtpCodec {
    pub fn new(payload_type: u8, encoding: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            payload_type,
            encoding: encoding.into(),
            clock_rate,
            fmtp: None,
        }
    }

    pub fn with_fmtp(mut self, fmtp: impl Into<String>) -> Self {
        self.fmtp = Some(fmtp.into());
        self
    }
}

/// RTP media description (audio or video streaming)
#[derive(Debug, Clone, PartialEq)]
pub struct RtpMediaDescription {
    pub host: String,
    pub port: u16,
    pub media_type: String,
    pub codecs: Vec<RtpCodec>,
    pub direction: Option<MediaDirection>,
}

impl RtpMediaDescription {
    /// Extract the RTP description of the given media type ("audio" or "video")
    pub fn parse(sdp: &str, media_type: &str) -> Result<Self, SdpError> {
        let session = SdpSession::parse(sdp)?;
        let media = session.media_of_type(media_type)?;
        let connection = session.connection_for(media)?;

        let mut codecs = Vec::new();
        for format in &media.formats {
            let payload_type: u8 = format
                .parse()
                .map_err(|_| SdpError::InvalidValue("payload type".to_string(), format.clone()))?;

            let rtpmap = media.attributes_named("rtpmap").find_map(|value| {
                let (pt, encoding) = value.split_once(' ')?;
                (pt.trim() == format).then(|| encoding.trim().to_string())
            });
            let (encoding, clock_rate) = match rtpmap {
                Some(map) => {
                    let mut parts = map.split('/');
                    let name = parts.next().unwrap_or_default().to_string();
                    let rate = parts.next().and_then(|r| r.parse().ok()).unwrap_or(90000);
                    (name, rate)
                }
                // Static payload types without rtpmap
                None => match payload_type {
                    0 => ("PCMU".to_string(), 8000),
                    8 => ("PCMA".to_string(), 8000),
                    _ => (String::new(), 90000),
                },
            };
            let fmtp = media.attributes_named("fmtp").find_map(|value| {
                let (pt, params) = value.split_once(' ')?;
                (pt.trim() == format).then(|| params.trim().to_string())
            });

            codecs.push(RtpCodec {
                payload_type,
                encoding,
                clock_rate,
                fmtp,
            });
        }

        Ok(Self {
            host: connection.address.clone(),
            port: media.port,
            media_type: media.media_type.clone(),
            codecs,
            direction: media.direction(),
        })
    }

    /// Render a complete SDP body
    pub fn to_sdp(&self) -> String {
        let mut sdp = session_header(&self.host);
        let formats: Vec<String> = self.codecs.iter().map(|c| c.payload_type.to_string()).collect();
        sdp.push_str(&format!(
            "m={} {} RTP/AVP {}{CRLF}",
            self.media_type,
            self.port,
            formats.join(" ")
        ));
        for codec in &self.codecs {
            sdp.push_str(&format!(
                "a=rtpmap:{} {}/{}{CRLF}",
                codec.payload_type, codec.encoding, codec.clock_rate
            ));
            if let Some(fmtp) = &codec.fmtp {
                sdp.push_str(&format!("a=fmtp:{} {}{CRLF}", codec.payload_type, fmtp));
            }
        }
        if let Some(direction) = self.direction {
            sdp.push_str(&format!("a={}{CRLF}", direction));
        }
        sdp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_offer() -> MsrpMediaDescription {
        MsrpMediaDescription {
            host: "192.168.1.10".to_string(),
            port: 20000,
            path: msrp_path("192.168.1.10", 20000, "s1"),
            setup: Some("active".to_string()),
            accept_types: vec!["image/jpeg".to_string()],
            max_size: Some(10 * 1024 * 1024),
            file_transfer_id: Some("ft-42".to_string()),
            file_disposition: Some("render".to_string()),
            direction: Some(MediaDirection::SendOnly),
            file_selector: Some(file_selector("photo.jpg", "image/jpeg", 2048)),
            ..Default::default()
        }
    }

    #[test]
    fn test_msrp_offer_field_order() {
        let sdp = file_offer().to_sdp();
        let lines: Vec<&str> = sdp.split("\r\n").filter(|l| !l.is_empty()).collect();

        assert_eq!(lines[0], "v=0");
        assert!(lines[1].starts_with("o=- "));
        assert_eq!(lines[2], "s=-");
        assert_eq!(lines[3], "c=IN IP4 192.168.1.10");
        assert_eq!(lines[4], "t=0 0");
        assert_eq!(
            &lines[5..],
            &[
                "m=message 20000 TCP/MSRP *",
                "a=path:msrp://192.168.1.10:20000/s1;tcp",
                "a=connection:new",
                "a=setup:active",
                "a=accept-types:image/jpeg",
                "a=max-size:10485760",
                "a=file-transfer-id:ft-42",
                "a=file-disposition:render",
                "a=sendonly",
                "a=file-selector:name:\"photo.jpg\" type:image/jpeg size:2048",
            ]
        );
        assert!(sdp.ends_with("\r\n"));
        assert!(!sdp.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_msrp_round_trip() {
        let offer = file_offer();
        let parsed = MsrpMediaDescription::parse(&offer.to_sdp()).unwrap();

        assert_eq!(parsed.path, offer.path);
        assert_eq!(parsed.port, offer.port);
        assert_eq!(parsed.host, offer.host);
        assert_eq!(parsed.accept_types, offer.accept_types);
        assert_eq!(parsed.file_transfer_id, offer.file_transfer_id);
        assert_eq!(parsed.file_selector, offer.file_selector);
        assert_eq!(parsed.direction, Some(MediaDirection::SendOnly));
    }

    #[test]
    fn test_media_connection_overrides_session() {
        let sdp = "v=0\r\n\
                   o=- 1 1 IN IP4 1.1.1.1\r\n\
                   s=-\r\n\
                   c=IN IP4 1.1.1.1\r\n\
                   t=0 0\r\n\
                   m=message 5000 TCP/MSRP *\r\n\
                   c=IN IP4 10.0.0.5\r\n\
                   a=path:msrp://10.0.0.5:5000/relay;tcp\r\n";
        let media = MsrpMediaDescription::parse(sdp).unwrap();
        assert_eq!(media.host, "10.0.0.5");
        assert_eq!(media.port, 5000);
    }

    #[test]
    fn test_missing_mandatory_fields() {
        let no_media = "v=0\r\nc=IN IP4 1.1.1.1\r\nt=0 0\r\n";
        assert_eq!(
            MsrpMediaDescription::parse(no_media),
            Err(SdpError::MissingMedia("message".to_string()))
        );

        let no_connection = "v=0\r\nt=0 0\r\nm=message 5000 TCP/MSRP *\r\na=path:msrp://h:1/x;tcp\r\n";
        assert_eq!(
            MsrpMediaDescription::parse(no_connection),
            Err(SdpError::MissingConnection("message".to_string()))
        );

        let no_path = "v=0\r\nc=IN IP4 1.1.1.1\r\nm=message 5000 TCP/MSRP *\r\na=accept-types:text/plain\r\n";
        assert_eq!(MsrpMediaDescription::parse(no_path), Err(SdpError::MissingPath));

        assert!(matches!(
            SdpSession::parse("v=0\r\ngarbage\r\n"),
            Err(SdpError::MalformedLine(_))
        ));
    }

    #[test]
    fn test_parse_rtp() {
        let sdp = "v=0\n\
                   o=user1 123456 7890 IN IP4 192.168.1.100\n\
                   s=Test Session\n\
                   c=IN IP4 192.168.1.100\n\
                   t=0 0\n\
                   m=video 10000 RTP/AVP 96 0\n\
                   a=rtpmap:96 H264/90000\n\
                   a=fmtp:96 profile-level-id=42e00a\n\
                   a=recvonly\n";

        let media = RtpMediaDescription::parse(sdp, "video").unwrap();
        assert_eq!(media.host, "192.168.1.100");
        assert_eq!(media.port, 10000);
        assert_eq!(media.codecs.len(), 2);
        assert_eq!(media.codecs[0].encoding, "H264");
        assert_eq!(media.codecs[0].fmtp.as_deref(), Some("profile-level-id=42e00a"));
        assert_eq!(media.codecs[1].encoding, "PCMU");
        assert_eq!(media.direction, Some(MediaDirection::RecvOnly));

        assert!(RtpMediaDescription::parse(sdp, "audio").is_err());
    }

    #[test]
    fn test_rtp_round_trip() {
        let offer = RtpMediaDescription {
            host: "10.0.0.5".to_string(),
            port: 20000,
            media_type: "video".to_string(),
            codecs: vec![RtpCodec::new(96, "H264", 90000).with_fmtp("profile-level-id=42e00a")],
            direction: Some(MediaDirection::SendOnly),
        };
        let parsed = RtpMediaDescription::parse(&offer.to_sdp(), "video").unwrap();
        assert_eq!(parsed, offer);
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(MediaDirection::SendOnly.reverse(), MediaDirection::RecvOnly);
        assert_eq!(MediaDirection::SendRecv.reverse(), MediaDirection::SendRecv);
    }

    #[test]
    fn test_file_selector() {
        let value = file_selector("my photo.jpg", "image/jpeg", 2048);
        let selector = FileSelector::parse(&value);
        assert_eq!(selector.name.as_deref(), Some("my photo.jpg"));
        assert_eq!(selector.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(selector.size, Some(2048));

        assert_eq!(FileSelector::parse("name:\"a.png\" size:-1").size, None);
    }
}
