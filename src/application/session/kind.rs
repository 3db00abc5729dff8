//! Session kinds and their SDP offer/answer rules

use crate::application::context::ImsContext;
use crate::domain::instant_messaging::{InstantMessage, MIME_CPIM, MIME_TEXT_PLAIN};
use crate::domain::MmContent;
use crate::infrastructure::media::RemoteMedia;
use crate::infrastructure::protocols::sip::factory::{multipart_boundary, split_multipart, MIME_SDP};
use crate::infrastructure::protocols::sip::feature_tags::{self, FEATURE_IMAGE_SHARE, FEATURE_OMA_IM};
use crate::infrastructure::protocols::sip::sdp::{
    file_selector, msrp_path, session_header, FileSelector, MediaDirection, MsrpMediaDescription,
    RtpMediaDescription, SdpError, SdpSession,
};
use crate::infrastructure::protocols::sip::{SipHeaders, SipRequest};
use std::fmt;

const STREAMING_MEDIA: &str = "video";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    ContentSharing,
    Chat,
    Streaming,
    GenericSip,
}

impl SessionKind {
    pub fn name(&self) -> &'static str {
        match self {
            SessionKind::ContentSharing => "content-sharing",
            SessionKind::Chat => "chat",
            SessionKind::Streaming => "streaming",
            SessionKind::GenericSip => "generic-sip",
        }
    }

    /// Uses an MSRP channel
    pub fn is_msrp(&self) -> bool {
        matches!(self, SessionKind::ContentSharing | SessionKind::Chat)
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Originating,
    Terminating,
}

/// Kind specific data carried by a session
#[derive(Debug, Clone)]
pub enum SessionPayload {
    /// Content to send (originating) or being received (terminating)
    ContentSharing(MmContent),
    /// First message carried by the INVITE, if any
    Chat { first_message: Option<InstantMessage> },
    Streaming,
    /// Application defined session; `sdp` is the local offer or answer
    GenericSip { feature_tag: String, sdp: Option<String> },
}

impl SessionPayload {
    pub fn kind(&self) -> SessionKind {
        match self {
            SessionPayload::ContentSharing(_) => SessionKind::ContentSharing,
            SessionPayload::Chat { .. } => SessionKind::Chat,
            SessionPayload::Streaming => SessionKind::Streaming,
            SessionPayload::GenericSip { .. } => SessionKind::GenericSip,
        }
    }

    pub fn feature_tags(&self) -> Vec<String> {
        match self {
            SessionPayload::ContentSharing(_) => feature_tags::content_sharing_tags(),
            SessionPayload::Chat { .. } => feature_tags::chat_tags(),
            SessionPayload::Streaming => feature_tags::streaming_tags(),
            SessionPayload::GenericSip { feature_tag, .. } if feature_tag.is_empty() => Vec::new(),
            SessionPayload::GenericSip { feature_tag, .. } => vec![feature_tag.clone()],
        }
    }

    pub fn content(&self) -> Option<&MmContent> {
        match self {
            SessionPayload::ContentSharing(content) => Some(content),
            _ => None,
        }
    }
}

/// Where our side of the media is
#[derive(Debug, Clone)]
pub(crate) struct LocalMedia {
    pub host: String,
    pub port: u16,
    /// Last segment of the local MSRP path
    pub path_id: String,
}

impl LocalMedia {
    fn msrp_path(&self) -> String {
        msrp_path(&self.host, self.port, &self.path_id)
    }
}

/// a=max-size value, absent when the size is not limited (0)
fn advertised_max_size(ctx: &ImsContext) -> Option<u64> {
    Some(ctx.config().media.max_content_size).filter(|size| *size > 0)
}

/// SDP offer sent in the initial INVITE
pub(crate) fn build_offer(payload: &SessionPayload, local: &LocalMedia, ctx: &ImsContext) -> String {
    let max_size = advertised_max_size(ctx);
    match payload {
        SessionPayload::ContentSharing(content) => MsrpMediaDescription {
            host: local.host.clone(),
            port: local.port,
            path: local.msrp_path(),
            setup: Some("active".to_string()),
            accept_types: vec![content.encoding().to_string()],
            max_size,
            file_transfer_id: Some(local.path_id.clone()),
            file_disposition: Some("render".to_string()),
            direction: Some(MediaDirection::SendOnly),
            file_selector: Some(file_selector(
                content.name(),
                content.encoding(),
                content.size_or_unknown(),
            )),
            ..MsrpMediaDescription::default()
        }
        .to_sdp(),
        SessionPayload::Chat { .. } => MsrpMediaDescription {
            host: local.host.clone(),
            port: local.port,
            path: local.msrp_path(),
            setup: Some("active".to_string()),
            accept_types: vec![MIME_CPIM.to_string()],
            accept_wrapped_types: vec![MIME_TEXT_PLAIN.to_string()],
            max_size,
            direction: Some(MediaDirection::SendRecv),
            ..MsrpMediaDescription::default()
        }
        .to_sdp(),
        SessionPayload::Streaming => RtpMediaDescription {
            host: local.host.clone(),
            port: local.port,
            media_type: STREAMING_MEDIA.to_string(),
            codecs: ctx.codecs().supported_codecs().to_vec(),
            direction: Some(MediaDirection::SendOnly),
        }
        .to_sdp(),
        SessionPayload::GenericSip { sdp, .. } => sdp
            .clone()
            .unwrap_or_else(|| session_header(&local.host)),
    }
}

/// SDP answer to the offer received in the INVITE
pub(crate) fn build_answer(
    payload: &SessionPayload,
    local: &LocalMedia,
    remote_sdp: &str,
    ctx: &ImsContext,
) -> Result<String, SdpError> {
    match payload {
        SessionPayload::ContentSharing(_) | SessionPayload::Chat { .. } => {
            let offer = MsrpMediaDescription::parse(remote_sdp)?;
            let setup = match offer.setup.as_deref() {
                Some("passive") => "active",
                _ => "passive",
            };
            Ok(MsrpMediaDescription {
                host: local.host.clone(),
                port: local.port,
                path: local.msrp_path(),
                setup: Some(setup.to_string()),
                accept_types: offer.accept_types.clone(),
                accept_wrapped_types: offer.accept_wrapped_types.clone(),
                max_size: advertised_max_size(ctx),
                file_transfer_id: offer.file_transfer_id.clone(),
                file_disposition: offer.file_disposition.clone(),
                direction: offer.direction.map(|d| d.reverse()),
                file_selector: offer.file_selector.clone(),
                ..MsrpMediaDescription::default()
            }
            .to_sdp())
        }
        SessionPayload::Streaming => {
            let offer = RtpMediaDescription::parse(remote_sdp, STREAMING_MEDIA)?;
            let negotiated = ctx.codecs().negotiate(&offer.codecs);
            let codec = ctx
                .codecs()
                .select_best(&negotiated)
                .ok_or_else(|| no_common_codec(&offer))?;
            Ok(RtpMediaDescription {
                host: local.host.clone(),
                port: local.port,
                media_type: STREAMING_MEDIA.to_string(),
                codecs: vec![codec.clone()],
                direction: offer.direction.map(|d| d.reverse()),
            }
            .to_sdp())
        }
        SessionPayload::GenericSip { sdp, .. } => Ok(sdp
            .clone()
            .unwrap_or_else(|| session_header(&local.host))),
    }
}

fn no_common_codec(offer: &RtpMediaDescription) -> SdpError {
    let offered: Vec<String> = offer.codecs.iter().map(|c| c.encoding.clone()).collect();
    SdpError::InvalidValue("codec".to_string(), offered.join(","))
}

/// Remote media endpoint read from the peer's SDP.
///
/// `None` for generic SIP sessions, which have no media of their own.
pub(crate) fn remote_media(
    kind: SessionKind,
    direction: Direction,
    remote_sdp: &str,
    ctx: &ImsContext,
) -> Result<Option<RemoteMedia>, SdpError> {
    match kind {
        SessionKind::ContentSharing | SessionKind::Chat => {
            let remote = MsrpMediaDescription::parse(remote_sdp)?;
            let active = match direction {
                Direction::Originating => remote.setup.as_deref() != Some("active"),
                Direction::Terminating => remote.setup.as_deref() == Some("passive"),
            };
            Ok(Some(RemoteMedia::Msrp {
                host: remote.host,
                port: remote.port,
                path: remote.path,
                active,
            }))
        }
        SessionKind::Streaming => {
            let remote = RtpMediaDescription::parse(remote_sdp, STREAMING_MEDIA)?;
            let negotiated = ctx.codecs().negotiate(&remote.codecs);
            let codec = ctx
                .codecs()
                .select_best(&negotiated)
                .cloned()
                .ok_or_else(|| no_common_codec(&remote))?;
            Ok(Some(RemoteMedia::Rtp {
                host: remote.host,
                port: remote.port,
                codec,
            }))
        }
        SessionKind::GenericSip => Ok(None),
    }
}

/// SDP and the optional other part of a received INVITE body
pub(crate) struct InviteBody {
    pub sdp: Option<String>,
    pub extra: Option<(String, String)>,
}

pub(crate) fn invite_body(invite: &SipRequest) -> InviteBody {
    let body = invite.body_str();
    let content_type = invite.content_type().unwrap_or_default();

    if let Some(boundary) = multipart_boundary(&content_type) {
        let mut sdp = None;
        let mut extra = None;
        for (part_type, content) in split_multipart(&body, &boundary) {
            if part_type.eq_ignore_ascii_case(MIME_SDP) {
                sdp.get_or_insert(content);
            } else {
                extra.get_or_insert((part_type, content));
            }
        }
        return InviteBody { sdp, extra };
    }

    let sdp = if body.trim().is_empty() { None } else { Some(body) };
    InviteBody { sdp, extra: None }
}

/// Pick the payload of a terminating session from the INVITE's feature tags and SDP
pub(crate) fn classify(invite: &SipRequest, body: &InviteBody) -> SessionPayload {
    let tags = invite.feature_tags();
    let sdp = body.sdp.as_deref().unwrap_or_default();
    let session = SdpSession::parse(sdp).ok();
    let has_media = |media_type: &str| {
        session
            .as_ref()
            .is_some_and(|s| s.media_of_type(media_type).is_ok())
    };
    let msrp = MsrpMediaDescription::parse(sdp).ok();
    let remote = invite.from_uri().unwrap_or_default();

    let is_file = msrp.as_ref().is_some_and(|m| m.file_selector.is_some());
    if feature_tags::contains(&tags, FEATURE_IMAGE_SHARE) || is_file {
        return SessionPayload::ContentSharing(incoming_content(msrp.as_ref(), invite));
    }

    if feature_tags::contains(&tags, FEATURE_OMA_IM) || has_media("message") {
        let first_message = body
            .extra
            .as_ref()
            .and_then(|(content_type, content)| {
                InstantMessage::from_received(&remote, content.as_bytes(), content_type)
            });
        return SessionPayload::Chat { first_message };
    }

    if has_media(STREAMING_MEDIA) {
        return SessionPayload::Streaming;
    }

    SessionPayload::GenericSip {
        feature_tag: tags.into_iter().next().unwrap_or_default(),
        sdp: None,
    }
}

/// Descriptor of the content announced in a file transfer offer
fn incoming_content(offer: Option<&MsrpMediaDescription>, invite: &SipRequest) -> MmContent {
    let selector = offer
        .and_then(|m| m.file_selector.as_deref())
        .map(FileSelector::parse)
        .unwrap_or_default();
    let name = selector
        .name
        .or_else(|| offer.and_then(|m| m.file_transfer_id.clone()))
        .unwrap_or_else(|| invite.call_id().unwrap_or_default());
    let encoding = selector
        .content_type
        .or_else(|| offer.and_then(|m| m.accept_types.first().cloned()))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    match selector.size {
        Some(size) => MmContent::from_url_with_size(name, encoding, size),
        None => MmContent::from_url(name, encoding),
    }
}
