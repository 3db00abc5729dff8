//! SIP message builder utilities

use super::message::{
    header_name_value, name_addr_param, name_addr_uri, SipError, SipHeaders, SipMethod, SipRequest,
    SipResponse,
};
use rsip::{Header, Headers, Request, Response, StatusCode, Uri, Version};

/// Parse a URI, mapping failures to a construction error
pub fn parse_uri(value: &str) -> Result<Uri, SipError> {
    let bare = name_addr_uri(value);
    if bare.is_empty() {
        return Err(SipError::Construction("empty URI".to_string()));
    }
    Uri::try_from(bare.as_str())
        .map_err(|e| SipError::Construction(format!("invalid URI {}: {}", value, e)))
}

/// Wrap a URI in angle brackets unless it already is a name-addr
pub fn angle(uri: &str) -> String {
    if uri.contains('<') {
        uri.to_string()
    } else {
        format!("<{}>", uri)
    }
}

/// Build a SIP request header by header
pub struct RequestBuilder {
    method: SipMethod,
    uri: Uri,
    headers: Vec<Header>,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl RequestBuilder {
    pub fn new(method: SipMethod, uri: &str) -> Result<Self, SipError> {
        Ok(Self {
            method,
            uri: parse_uri(uri)?,
            headers: Vec::new(),
            content_type: None,
            body: Vec::new(),
        })
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push(Header::Other(name.to_string(), value.into()));
        self
    }

    pub fn header_opt(self, name: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(value) => self.header(name, value),
            None => self,
        }
    }

    /// Copy a header unchanged
    pub fn raw(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    pub fn body(mut self, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = body.into();
        self
    }

    pub fn build(mut self) -> SipRequest {
        if let Some(content_type) = self.content_type.take() {
            self.headers.push(Header::Other("Content-Type".to_string(), content_type));
        }
        self.headers
            .push(Header::ContentLength(self.body.len().to_string().into()));

        SipRequest::new(Request {
            method: self.method.to_rsip(),
            uri: self.uri,
            version: Version::V2,
            headers: Headers::from(self.headers),
            body: self.body,
        })
    }
}

/// Build a SIP response from a request
pub struct ResponseBuilder {
    status_code: u16,
    to_tag: Option<String>,
    headers: Vec<Header>,
    content_type: Option<String>,
    body: Vec<u8>,
}

impl ResponseBuilder {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            to_tag: None,
            headers: Vec::new(),
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    /// Tag added to the To header when the request carried none
    pub fn to_tag(mut self, tag: impl Into<String>) -> Self {
        self.to_tag = Some(tag.into());
        self
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push(Header::Other(name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = body.into();
        self
    }

    pub fn build_for_request(self, request: &SipRequest) -> SipResponse {
        let mut headers = Vec::new();

        // Copy essential headers from request
        for header in request.headers().iter() {
            let (name, value) = header_name_value(header);
            let is_to = name.eq_ignore_ascii_case("To") || name.eq_ignore_ascii_case("t");
            if is_to {
                match &self.to_tag {
                    Some(tag) if name_addr_param(&value, "tag").is_none() => {
                        headers.push(Header::Other("To".to_string(), format!("{};tag={}", value, tag)));
                    }
                    _ => headers.push(header.clone()),
                }
                continue;
            }
            let copied = ["Via", "v", "From", "f", "Call-ID", "i", "CSeq", "Record-Route"]
                .iter()
                .any(|n| name.eq_ignore_ascii_case(n));
            if copied {
                headers.push(header.clone());
            }
        }

        headers.extend(self.headers);
        if let Some(content_type) = self.content_type {
            headers.push(Header::Other("Content-Type".to_string(), content_type));
        }

        // Add Content-Length
        headers.push(Header::ContentLength(self.body.len().to_string().into()));

        SipResponse::new(Response {
            status_code: StatusCode::from(self.status_code),
            headers: Headers::from(headers),
            body: self.body,
            version: Version::V2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> SipRequest {
        SipRequest::parse(
            b"INVITE sip:bob@ims.test SIP/2.0\r\n\
              Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK1\r\n\
              From: <sip:alice@ims.test>;tag=a1\r\n\
              To: <sip:bob@ims.test>\r\n\
              Call-ID: c1\r\n\
              CSeq: 1 INVITE\r\n\
              Max-Forwards: 70\r\n\
              Content-Length: 0\r\n\r\n",
        )
        .unwrap()
    }

    #[test]
    fn test_response_copies_dialog_headers() {
        let response = ResponseBuilder::new(180).to_tag("b2").build_for_request(&invite());
        assert_eq!(response.status_code(), 180);
        assert_eq!(response.call_id(), Some("c1".to_string()));
        assert_eq!(response.cseq(), Some(1));
        assert_eq!(response.from_tag(), Some("a1".to_string()));
        assert_eq!(response.to_tag(), Some("b2".to_string()));
        assert!(!response.has_header("Max-Forwards"));
    }

    #[test]
    fn test_request_builder_content_length() {
        let request = RequestBuilder::new(SipMethod::Message, "sip:bob@ims.test")
            .unwrap()
            .header("Call-ID", "c2")
            .body("text/plain", b"hello".to_vec())
            .build();
        assert_eq!(request.method(), Some(SipMethod::Message));
        assert_eq!(request.content_type(), Some("text/plain".to_string()));
        assert_eq!(request.header("Content-Length"), Some("5".to_string()));
        assert_eq!(request.body(), b"hello");
    }

    #[test]
    fn test_invalid_uri_is_construction_error() {
        assert!(matches!(
            RequestBuilder::new(SipMethod::Invite, ""),
            Err(SipError::Construction(_))
        ));
        assert!(matches!(parse_uri("<>"), Err(SipError::Construction(_))));
    }
}
