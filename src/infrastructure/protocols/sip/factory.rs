//! SIP message factory
//!
//! Builds every request and response the client sends from the current
//! state of a [`DialogPath`]. The factory never mutates the dialog.

use super::builder::{angle, parse_uri, RequestBuilder, ResponseBuilder};
use super::dialog::{generate_branch, generate_tag, DialogPath};
use super::message::{SipError, SipHeaders, SipMethod, SipRequest, SipResponse};
use crate::config::SipConfig;
use crate::domain::instant_messaging::{generate_resource_list, MIME_RESOURCE_LISTS};
use crate::domain::UserProfile;
use tracing::debug;

pub const MAX_FORWARDS: u32 = 70;

/// Methods announced in the Allow header
pub const ALLOWED_METHODS: &str = "INVITE, UPDATE, ACK, CANCEL, BYE, NOTIFY, OPTIONS, MESSAGE, REFER";

pub const MIME_SDP: &str = "application/sdp";

/// Assemble a `multipart/mixed` body from `(content type, content)` parts
pub fn multipart_body(boundary: &str, parts: &[(&str, &str)]) -> String {
    let mut body = String::new();
    for (content_type, content) in parts {
        body.push_str(&format!(
            "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n{}\r\n",
            boundary,
            content_type,
            content.len(),
            content
        ));
    }
    body.push_str(&format!("--{}--", boundary));
    body
}

/// Fresh multipart boundary
pub fn generate_boundary() -> String {
    format!("boundary{}", generate_tag())
}

/// `boundary` parameter of a `multipart/*` Content-Type value
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    if !content_type.trim_start().to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }
    content_type
        .split(';')
        .skip(1)
        .find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| value.trim().trim_matches('"').to_string())
        })
}

/// Split a multipart body into `(content type, content)` parts
pub fn split_multipart(body: &str, boundary: &str) -> Vec<(String, String)> {
    let delimiter = format!("--{}", boundary);
    body.split(delimiter.as_str())
        .filter_map(|part| {
            let part = part.strip_prefix("\r\n")?;
            let (head, content) = part.split_once("\r\n\r\n")?;
            let content_type = head.lines().find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.trim()
                    .eq_ignore_ascii_case("Content-Type")
                    .then(|| value.trim().to_string())
            })?;
            let content = content.strip_suffix("\r\n").unwrap_or(content);
            Some((content_type, content.to_string()))
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct SipMessageFactory {
    local_address: String,
    local_port: u16,
    transport: String,
    user_agent: String,
    min_session_expire: u32,
    profile: UserProfile,
}

impl SipMessageFactory {
    pub fn new(config: &SipConfig, profile: UserProfile) -> Self {
        Self {
            local_address: config.local_address.clone(),
            local_port: config.local_port,
            transport: config.transport.to_ascii_uppercase(),
            user_agent: config.user_agent.clone(),
            min_session_expire: config.min_session_expire,
            profile,
        }
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn local_address(&self) -> &str {
        &self.local_address
    }

    /// `<sip:user@ip:port;transport=x>`
    pub fn local_contact(&self) -> String {
        format!(
            "<sip:{}@{}:{};transport={}>",
            self.profile.username(),
            self.local_address,
            self.local_port,
            self.transport.to_ascii_lowercase()
        )
    }

    fn contact_with_tags(&self, feature_tags: &[String]) -> String {
        let mut contact = self.local_contact();
        for tag in feature_tags {
            contact.push(';');
            contact.push_str(tag);
        }
        contact
    }

    fn via(&self) -> String {
        format!(
            "SIP/2.0/{} {}:{};branch={};rport",
            self.transport,
            self.local_address,
            self.local_port,
            generate_branch()
        )
    }

    fn session_timer_enabled(&self, dialog: &DialogPath) -> bool {
        dialog.session_expire() > 0 && dialog.session_expire() >= self.min_session_expire
    }

    /// Request line plus the dialog identifying headers
    fn dialog_request(
        &self,
        method: SipMethod,
        dialog: &DialogPath,
        cseq: u32,
        with_remote_tag: bool,
    ) -> Result<RequestBuilder, SipError> {
        parse_uri(dialog.local_party())?;
        parse_uri(dialog.remote_party())?;

        let to = match dialog.remote_tag() {
            Some(tag) if with_remote_tag => format!("{};tag={}", angle(dialog.remote_party()), tag),
            _ => angle(dialog.remote_party()),
        };

        let mut builder = RequestBuilder::new(method, dialog.target())?
            .header("Via", self.via())
            .header("Max-Forwards", MAX_FORWARDS.to_string())
            .header("From", format!("{};tag={}", angle(dialog.local_party()), dialog.local_tag()))
            .header("To", to)
            .header("Call-ID", dialog.call_id())
            .header("CSeq", format!("{} {}", cseq, method));
        for route in dialog.route() {
            builder = builder.header("Route", route.clone());
        }
        Ok(builder)
    }

    fn with_feature_tags(&self, builder: RequestBuilder, feature_tags: &[String]) -> RequestBuilder {
        let builder = builder.header("Contact", self.contact_with_tags(feature_tags));
        if feature_tags.is_empty() {
            builder
        } else {
            builder.header("Accept-Contact", format!("*;{}", feature_tags.join(";")))
        }
    }

    fn with_identity(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header_opt("P-Preferred-Identity", self.profile.preferred_uri().map(angle))
            .header("User-Agent", self.user_agent.clone())
    }

    /// REGISTER; `instance_id` adds `+sip.instance` and GRUU support
    pub fn create_register(
        &self,
        dialog: &DialogPath,
        feature_tags: &[String],
        expire: u32,
        instance_id: Option<&str>,
    ) -> Result<SipRequest, SipError> {
        let mut contact = self.local_contact();
        if let Some(instance) = instance_id {
            contact.push_str(&format!(";+sip.instance=\"<urn:uuid:{}>\"", instance));
        }
        for tag in feature_tags {
            contact.push(';');
            contact.push_str(tag);
        }
        let supported = if instance_id.is_some() { "path, gruu" } else { "path" };

        let builder = self
            .dialog_request(SipMethod::Register, dialog, dialog.cseq(), false)?
            .header("Contact", contact)
            .header("Supported", supported)
            .header("Allow", ALLOWED_METHODS)
            .header("Expires", expire.to_string())
            .header("User-Agent", self.user_agent.clone());

        debug!("Create REGISTER (expires {}) for {}", expire, dialog.remote_party());
        Ok(builder.build())
    }

    /// Initial INVITE with an SDP offer
    pub fn create_invite(
        &self,
        dialog: &DialogPath,
        feature_tags: &[String],
        sdp: &str,
    ) -> Result<SipRequest, SipError> {
        self.invite(dialog, feature_tags, MIME_SDP.to_string(), sdp)
    }

    /// Initial INVITE carrying several bodies (chat: SDP plus first message)
    pub fn create_multipart_invite(
        &self,
        dialog: &DialogPath,
        feature_tags: &[String],
        multipart: &str,
        boundary: &str,
    ) -> Result<SipRequest, SipError> {
        self.invite(
            dialog,
            feature_tags,
            format!("multipart/mixed; boundary={}", boundary),
            multipart,
        )
    }

    fn invite(
        &self,
        dialog: &DialogPath,
        feature_tags: &[String],
        content_type: String,
        content: &str,
    ) -> Result<SipRequest, SipError> {
        let mut builder = self.dialog_request(SipMethod::Invite, dialog, dialog.cseq(), false)?;
        builder = self.with_feature_tags(builder, feature_tags);
        builder = builder.header("Allow", ALLOWED_METHODS);
        builder = self.with_identity(builder);
        if self.session_timer_enabled(dialog) {
            builder = builder
                .header("Supported", "timer")
                .header("Session-Expires", dialog.session_expire().to_string());
        }
        Ok(builder.body(content_type, content.as_bytes().to_vec()).build())
    }

    /// re-INVITE reusing Contact, Accept-Contact and identity of the initial INVITE
    pub fn create_reinvite(&self, dialog: &DialogPath) -> Result<SipRequest, SipError> {
        let invite = dialog
            .invite()
            .ok_or_else(|| SipError::Construction("no initial INVITE in dialog".to_string()))?;

        let mut builder = self
            .dialog_request(SipMethod::Invite, dialog, dialog.cseq(), true)?
            .header_opt("Contact", invite.header("Contact"))
            .header_opt("Accept-Contact", invite.header("Accept-Contact"))
            .header("Allow", ALLOWED_METHODS)
            .header_opt("P-Preferred-Identity", invite.header("P-Preferred-Identity"))
            .header("User-Agent", self.user_agent.clone());
        if self.session_timer_enabled(dialog) {
            builder = builder
                .header("Supported", "timer")
                .header("Session-Expires", dialog.session_expire().to_string());
        }
        Ok(match dialog.local_sdp() {
            Some(sdp) => builder.body(MIME_SDP, sdp.as_bytes().to_vec()).build(),
            None => builder.build(),
        })
    }

    /// Pager-mode MESSAGE (RFC 3428)
    pub fn create_message(
        &self,
        dialog: &DialogPath,
        content_type: &str,
        content: &str,
    ) -> Result<SipRequest, SipError> {
        let mut builder = self.dialog_request(SipMethod::Message, dialog, dialog.cseq(), true)?;
        builder = self.with_feature_tags(builder, &super::feature_tags::chat_tags());
        builder = self.with_identity(builder);
        Ok(builder.body(content_type, content.as_bytes().to_vec()).build())
    }

    pub fn create_subscribe(
        &self,
        dialog: &DialogPath,
        event: &str,
        expire: u32,
    ) -> Result<SipRequest, SipError> {
        let builder = self
            .dialog_request(SipMethod::Subscribe, dialog, dialog.cseq(), true)?
            .header("Event", event)
            .header("Expires", expire.to_string())
            .header("User-Agent", self.user_agent.clone())
            .header("Contact", self.local_contact())
            .header("Allow", ALLOWED_METHODS);
        Ok(builder.build())
    }

    /// Presence PUBLISH (RFC 3903)
    pub fn create_publish(
        &self,
        dialog: &DialogPath,
        expire: u32,
        entity_tag: Option<&str>,
        pidf: Option<&str>,
    ) -> Result<SipRequest, SipError> {
        let builder = self
            .dialog_request(SipMethod::Publish, dialog, dialog.cseq(), true)?
            .header("Expires", expire.to_string())
            .header_opt("SIP-If-Match", entity_tag)
            .header("User-Agent", self.user_agent.clone())
            .header("Event", "presence");
        Ok(match pidf {
            Some(body) => builder
                .body("application/pidf+xml", body.as_bytes().to_vec())
                .build(),
            None => builder.build(),
        })
    }

    /// In-dialog REFER to a single target
    pub fn create_refer(
        &self,
        dialog: &DialogPath,
        refer_to: &str,
        subject: &str,
    ) -> Result<SipRequest, SipError> {
        parse_uri(refer_to)?;
        let mut builder = self.dialog_request(SipMethod::Refer, dialog, dialog.cseq(), true)?;
        builder = self.with_feature_tags(builder, &super::feature_tags::chat_tags());
        builder = builder
            .header("Refer-To", angle(refer_to))
            .header("Refer-Sub", "false");
        builder = self.with_identity(builder).header("Subject", subject);
        Ok(builder.build())
    }

    /// In-dialog REFER inviting several participants through a resource list (RFC 5368)
    pub fn create_group_refer(
        &self,
        dialog: &DialogPath,
        participants: &[String],
        subject: &str,
    ) -> Result<SipRequest, SipError> {
        if participants.is_empty() {
            return Err(SipError::Construction("REFER without participants".to_string()));
        }
        let list_id = format!("Id_{}@{}", chrono::Utc::now().timestamp_millis(), self.profile.home_domain());

        let mut builder = self.dialog_request(SipMethod::Refer, dialog, dialog.cseq(), true)?;
        builder = self.with_feature_tags(builder, &super::feature_tags::chat_tags());
        builder = builder
            .header("Require", "multiple-refer")
            .header("Require", "norefersub")
            .header("Refer-To", format!("<cid:{}>", list_id))
            .header("Refer-Sub", "false");
        builder = self
            .with_identity(builder)
            .header("Subject", subject)
            .header("Content-ID", format!("<{}>", list_id))
            .header("Content-Disposition", "recipient-list");

        let resource_list = generate_resource_list(participants);
        Ok(builder
            .body(MIME_RESOURCE_LISTS, resource_list.into_bytes())
            .build())
    }

    pub fn create_bye(&self, dialog: &DialogPath) -> Result<SipRequest, SipError> {
        let builder = self
            .dialog_request(SipMethod::Bye, dialog, dialog.cseq(), true)?
            .header("User-Agent", self.user_agent.clone());
        Ok(builder.build())
    }

    /// CANCEL for the pending initial INVITE (RFC 3261 section 9.1)
    pub fn create_cancel(&self, dialog: &DialogPath) -> Result<SipRequest, SipError> {
        let invite = dialog
            .invite()
            .ok_or_else(|| SipError::Construction("no INVITE to cancel".to_string()))?;
        let cseq = invite.cseq().unwrap_or_else(|| dialog.cseq());

        let mut builder = RequestBuilder::new(SipMethod::Cancel, &invite.request_uri())?;
        for via in invite.header_all("Via").into_iter().take(1) {
            builder = builder.header("Via", via);
        }
        builder = builder
            .header("Max-Forwards", MAX_FORWARDS.to_string())
            .header_opt("From", invite.from_header())
            .header_opt("To", invite.to_header())
            .header("Call-ID", dialog.call_id())
            .header("CSeq", format!("{} CANCEL", cseq));
        for route in invite.header_all("Route") {
            builder = builder.header("Route", route);
        }
        Ok(builder.header("User-Agent", self.user_agent.clone()).build())
    }

    /// Session refresh UPDATE (RFC 3311 / 4028)
    pub fn create_update(&self, dialog: &DialogPath) -> Result<SipRequest, SipError> {
        let builder = self
            .dialog_request(SipMethod::Update, dialog, dialog.cseq(), true)?
            .header("Contact", self.local_contact())
            .header("Supported", "timer")
            .header(
                "Session-Expires",
                format!("{};refresher={}", dialog.session_expire(), dialog.refresher()),
            )
            .header("User-Agent", self.user_agent.clone());
        Ok(builder.build())
    }

    /// ACK with a fresh branch and the CSeq number of the INVITE
    pub fn create_ack(&self, dialog: &DialogPath) -> Result<SipRequest, SipError> {
        let cseq = dialog
            .invite()
            .and_then(|invite| invite.cseq())
            .unwrap_or_else(|| dialog.cseq());
        let builder = self
            .dialog_request(SipMethod::Ack, dialog, cseq, true)?
            .header("Contact", self.local_contact())
            .header("User-Agent", self.user_agent.clone())
            .header("Allow", ALLOWED_METHODS);
        Ok(builder.build())
    }

    /// Capability query (RFC 3261 section 11)
    pub fn create_options(
        &self,
        dialog: &DialogPath,
        feature_tags: &[String],
    ) -> Result<SipRequest, SipError> {
        let mut builder = self.dialog_request(SipMethod::Options, dialog, dialog.cseq(), false)?;
        builder = self
            .with_feature_tags(builder, feature_tags)
            .header("Accept", MIME_SDP)
            .header("Allow", ALLOWED_METHODS);
        Ok(self.with_identity(builder).build())
    }

    /// Response copying the transaction headers of the request
    pub fn create_response(&self, request: &SipRequest, code: u16) -> SipResponse {
        ResponseBuilder::new(code).build_for_request(request)
    }

    /// Response that also sets the local tag in To
    pub fn create_response_with_tag(
        &self,
        request: &SipRequest,
        local_tag: &str,
        code: u16,
    ) -> SipResponse {
        ResponseBuilder::new(code)
            .to_tag(local_tag)
            .build_for_request(request)
    }

    /// 200 OK answering the dialog's initial INVITE
    pub fn create_200_ok_invite(
        &self,
        dialog: &DialogPath,
        feature_tags: &[String],
        sdp: &str,
    ) -> Result<SipResponse, SipError> {
        let invite = dialog
            .invite()
            .ok_or_else(|| SipError::Construction("no INVITE to answer".to_string()))?;

        let mut builder = ResponseBuilder::ok()
            .to_tag(dialog.local_tag())
            .header("Contact", self.contact_with_tags(feature_tags))
            .header("Allow", ALLOWED_METHODS)
            .header("Server", self.user_agent.clone());
        if !feature_tags.is_empty() {
            builder = builder.header("Accept-Contact", format!("*;{}", feature_tags.join(";")));
        }
        if self.session_timer_enabled(dialog) {
            builder = builder.header("Require", "timer").header(
                "Session-Expires",
                format!("{};refresher={}", dialog.session_expire(), dialog.refresher()),
            );
        }
        Ok(builder
            .body(MIME_SDP, sdp.as_bytes().to_vec())
            .build_for_request(invite))
    }

    /// 200 OK to a session refresh re-INVITE
    pub fn create_200_ok_reinvite(&self, dialog: &DialogPath, request: &SipRequest) -> SipResponse {
        let mut builder = ResponseBuilder::ok()
            .to_tag(dialog.local_tag())
            .header("Contact", self.local_contact())
            .header("Server", self.user_agent.clone())
            .header("Require", "timer");
        if let Some(expires) = request.header("Session-Expires") {
            builder = builder.header("Session-Expires", expires);
        }
        if let Some(sdp) = dialog.local_sdp() {
            builder = builder.body(MIME_SDP, sdp.as_bytes().to_vec());
        }
        builder.build_for_request(request)
    }

    /// 200 OK to a session refresh UPDATE
    pub fn create_200_ok_update(&self, dialog: &DialogPath, request: &SipRequest) -> SipResponse {
        let mut builder = ResponseBuilder::ok()
            .to_tag(dialog.local_tag())
            .header("Contact", self.local_contact())
            .header("Require", "timer");
        if let Some(expires) = request.header("Session-Expires") {
            builder = builder.header("Session-Expires", expires);
        }
        builder.build_for_request(request)
    }

    /// 200 OK to OPTIONS advertising our capabilities
    pub fn create_200_ok_options(
        &self,
        request: &SipRequest,
        feature_tags: &[String],
        sdp: Option<&str>,
    ) -> SipResponse {
        let mut builder = ResponseBuilder::ok()
            .to_tag(generate_tag())
            .header("Contact", self.contact_with_tags(feature_tags))
            .header("Allow", ALLOWED_METHODS)
            .header("Server", self.user_agent.clone());
        if let Some(sdp) = sdp {
            builder = builder.body(MIME_SDP, sdp.as_bytes().to_vec());
        }
        builder.build_for_request(request)
    }
}
