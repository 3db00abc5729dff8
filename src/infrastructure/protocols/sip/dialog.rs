//! Per-session SIP dialog state
//!
//! Holds everything a session needs to build requests inside one dialog:
//! identifiers, tags, CSeq, route set, target and the offer/answer bodies.
//! The type performs no I/O. Remote tag and route set are captured once and
//! lifecycle flags only move forward.

use super::message::{name_addr_uri, SipHeaders, SipRequest};
use rand::Rng;
use std::fmt;
use tracing::{debug, warn};

/// Initial CSeq of dialogs we originate
pub const INITIAL_CSEQ: u32 = 1;

/// Which side refreshes the session (RFC 4028)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresher {
    Uac,
    Uas,
}

impl Refresher {
    pub fn as_str(&self) -> &'static str {
        match self {
            Refresher::Uac => "uac",
            Refresher::Uas => "uas",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "uac" => Some(Refresher::Uac),
            "uas" => Some(Refresher::Uas),
            _ => None,
        }
    }
}

impl fmt::Display for Refresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Random token used for tags
pub fn generate_tag() -> String {
    let value: u64 = rand::thread_rng().gen();
    format!("{:x}", value)
}

/// Via branch with the RFC 3261 magic cookie
pub fn generate_branch() -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..8).map(|_| rng.gen()).collect();
    format!("z9hG4bK{}", hex::encode(bytes))
}

/// Globally unique Call-ID
pub fn generate_call_id(host: &str) -> String {
    format!("{}@{}", uuid::Uuid::new_v4().simple(), host)
}

#[derive(Debug, Clone)]
pub struct DialogPath {
    call_id: String,
    cseq: u32,
    local_tag: String,
    remote_tag: Option<String>,
    local_party: String,
    remote_party: String,
    target: String,
    route: Vec<String>,
    route_captured: bool,
    local_sdp: Option<String>,
    remote_sdp: Option<String>,
    invite: Option<SipRequest>,
    session_expire: u32,
    refresher: Refresher,
    originating: bool,
    sig_established: bool,
    session_established: bool,
    session_terminated: bool,
    session_cancelled: bool,
}

impl DialogPath {
    /// Dialog for a request we send: fresh Call-ID and local tag, CSeq 1.
    ///
    /// `default_route` is used until the remote side answers with its
    /// Record-Route.
    pub fn originating(
        call_id: impl Into<String>,
        target: impl Into<String>,
        local_party: impl Into<String>,
        remote_party: impl Into<String>,
        default_route: Vec<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            cseq: INITIAL_CSEQ,
            local_tag: generate_tag(),
            remote_tag: None,
            local_party: local_party.into(),
            remote_party: remote_party.into(),
            target: target.into(),
            route: default_route,
            route_captured: false,
            local_sdp: None,
            remote_sdp: None,
            invite: None,
            session_expire: 0,
            refresher: Refresher::Uac,
            originating: true,
            sig_established: false,
            session_established: false,
            session_terminated: false,
            session_cancelled: false,
        }
    }

    /// Dialog for a received INVITE.
    ///
    /// Route set is taken from Record-Route in received order, target from
    /// Contact, remote SDP from the body.
    pub fn terminating(invite: &SipRequest) -> Self {
        let remote_party = invite.from_uri().unwrap_or_default();
        let target = invite.contact_uri().unwrap_or_else(|| remote_party.clone());
        let body = invite.body_str();
        let (session_expire, refresher) = match invite.session_expires() {
            Some((period, refresher)) => (
                period,
                refresher
                    .as_deref()
                    .and_then(Refresher::parse)
                    .unwrap_or(Refresher::Uac),
            ),
            None => (0, Refresher::Uac),
        };

        Self {
            call_id: invite.call_id().unwrap_or_default(),
            cseq: invite.cseq().unwrap_or(INITIAL_CSEQ),
            local_tag: generate_tag(),
            remote_tag: invite.from_tag(),
            local_party: invite.to_header().map(|v| name_addr_uri(&v)).unwrap_or_default(),
            remote_party,
            target,
            route: invite.record_route(),
            route_captured: true,
            local_sdp: None,
            remote_sdp: if body.trim().is_empty() { None } else { Some(body) },
            invite: Some(invite.clone()),
            session_expire,
            refresher,
            originating: false,
            sig_established: false,
            session_established: false,
            session_terminated: false,
            session_cancelled: false,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    /// Called once before each new non-ACK request after the first
    pub fn increment_cseq(&mut self) -> u32 {
        self.cseq += 1;
        self.cseq
    }

    /// Track a CSeq seen on an in-dialog request from the peer
    pub fn observe_remote_cseq(&mut self, cseq: u32) {
        if cseq > self.cseq {
            self.cseq = cseq;
        }
    }

    pub fn local_tag(&self) -> &str {
        &self.local_tag
    }

    pub fn remote_tag(&self) -> Option<&str> {
        self.remote_tag.as_deref()
    }

    /// First value wins; a different value later is logged and ignored
    pub fn set_remote_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        match &self.remote_tag {
            None => {
                debug!("Dialog {} remote tag set to {}", self.call_id, tag);
                self.remote_tag = Some(tag);
            }
            Some(current) if *current == tag => {}
            Some(current) => {
                warn!(
                    "Dialog {} ignoring remote tag {} (already {})",
                    self.call_id, tag, current
                );
            }
        }
    }

    pub fn local_party(&self) -> &str {
        &self.local_party
    }

    pub fn remote_party(&self) -> &str {
        &self.remote_party
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }

    pub fn route(&self) -> &[String] {
        &self.route
    }

    /// First call wins; the route set is immutable once captured
    pub fn set_route(&mut self, route: Vec<String>) {
        if self.route_captured {
            debug!("Dialog {} route set already captured", self.call_id);
            return;
        }
        self.route = route;
        self.route_captured = true;
    }

    pub fn local_sdp(&self) -> Option<&str> {
        self.local_sdp.as_deref()
    }

    pub fn set_local_sdp(&mut self, sdp: impl Into<String>) {
        self.local_sdp = Some(sdp.into());
    }

    pub fn remote_sdp(&self) -> Option<&str> {
        self.remote_sdp.as_deref()
    }

    pub fn set_remote_sdp(&mut self, sdp: impl Into<String>) {
        self.remote_sdp = Some(sdp.into());
    }

    /// Initial INVITE, needed to build CANCEL and ACK
    pub fn invite(&self) -> Option<&SipRequest> {
        self.invite.as_ref()
    }

    pub fn set_invite(&mut self, invite: SipRequest) {
        self.invite = Some(invite);
    }

    pub fn session_expire(&self) -> u32 {
        self.session_expire
    }

    pub fn refresher(&self) -> Refresher {
        self.refresher
    }

    pub fn set_session_expire(&mut self, period: u32, refresher: Refresher) {
        self.session_expire = period;
        self.refresher = refresher;
    }

    pub fn is_originating(&self) -> bool {
        self.originating
    }

    /// Whether this side sends the session refreshes
    pub fn is_local_refresher(&self) -> bool {
        match self.refresher {
            Refresher::Uac => self.originating,
            Refresher::Uas => !self.originating,
        }
    }

    pub fn sig_established(&mut self) {
        self.sig_established = true;
    }

    pub fn session_established(&mut self) {
        self.sig_established = true;
        self.session_established = true;
    }

    pub fn session_terminated(&mut self) {
        self.session_terminated = true;
    }

    pub fn session_cancelled(&mut self) {
        self.session_cancelled = true;
    }

    pub fn is_sig_established(&self) -> bool {
        self.sig_established
    }

    pub fn is_session_established(&self) -> bool {
        self.session_established
    }

    pub fn is_session_terminated(&self) -> bool {
        self.session_terminated
    }

    pub fn is_session_cancelled(&self) -> bool {
        self.session_cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialog() -> DialogPath {
        DialogPath::originating(
            "call-1@10.0.0.1",
            "sip:bob@ims.test",
            "sip:alice@ims.test",
            "sip:bob@ims.test",
            vec!["<sip:pcscf.ims.test;lr>".to_string()],
        )
    }

    #[test]
    fn test_originating_defaults() {
        let dialog = dialog();
        assert_eq!(dialog.cseq(), INITIAL_CSEQ);
        assert!(!dialog.local_tag().is_empty());
        assert_eq!(dialog.remote_tag(), None);
        assert_eq!(dialog.route(), &["<sip:pcscf.ims.test;lr>".to_string()]);
        assert!(dialog.is_originating());
        assert!(!dialog.is_sig_established());
    }

    #[test]
    fn test_remote_tag_first_value_wins() {
        let mut dialog = dialog();
        dialog.set_remote_tag("abc123");
        dialog.set_remote_tag("other");
        assert_eq!(dialog.remote_tag(), Some("abc123"));
    }

    #[test]
    fn test_route_first_call_wins() {
        let mut dialog = dialog();
        dialog.set_route(vec!["<sip:p2;lr>".to_string(), "<sip:p1;lr>".to_string()]);
        dialog.set_route(vec!["<sip:evil;lr>".to_string()]);
        assert_eq!(dialog.route(), &["<sip:p2;lr>".to_string(), "<sip:p1;lr>".to_string()]);
    }

    #[test]
    fn test_cseq_monotonic() {
        let mut dialog = dialog();
        let mut last = dialog.cseq();
        for _ in 0..5 {
            let next = dialog.increment_cseq();
            assert!(next > last);
            last = next;
        }
        dialog.observe_remote_cseq(2);
        assert_eq!(dialog.cseq(), last);
    }

    #[test]
    fn test_lifecycle_flags_forward_only() {
        let mut dialog = dialog();
        dialog.sig_established();
        dialog.session_established();
        dialog.session_terminated();
        assert!(dialog.is_sig_established());
        assert!(dialog.is_session_established());
        assert!(dialog.is_session_terminated());
        assert!(!dialog.is_session_cancelled());
    }

    #[test]
    fn test_terminating_from_invite() {
        let data = b"INVITE sip:bob@10.0.0.2:5060 SIP/2.0\r\n\
                     Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bKabc\r\n\
                     From: <sip:alice@ims.test>;tag=remote1\r\n\
                     To: <sip:bob@ims.test>\r\n\
                     Call-ID: inbound-1\r\n\
                     CSeq: 7 INVITE\r\n\
                     Contact: <sip:alice@10.0.0.1:5060>\r\n\
                     Record-Route: <sip:p1;lr>\r\n\
                     Record-Route: <sip:p2;lr>\r\n\
                     Session-Expires: 1800;refresher=uas\r\n\
                     Content-Type: application/sdp\r\n\
                     Content-Length: 4\r\n\r\n\
                     v=0\n";
        let invite = SipRequest::parse(data).unwrap();
        let mut dialog = DialogPath::terminating(&invite);

        assert_eq!(dialog.call_id(), "inbound-1");
        assert_eq!(dialog.cseq(), 7);
        assert_eq!(dialog.remote_tag(), Some("remote1"));
        assert_eq!(dialog.target(), "sip:alice@10.0.0.1:5060");
        assert_eq!(dialog.local_party(), "sip:bob@ims.test");
        assert_eq!(dialog.route(), &["<sip:p1;lr>".to_string(), "<sip:p2;lr>".to_string()]);
        assert_eq!(dialog.remote_sdp(), Some("v=0\n"));
        assert_eq!(dialog.session_expire(), 1800);
        assert!(dialog.is_local_refresher());

        dialog.set_route(vec![]);
        assert_eq!(dialog.route().len(), 2);
    }

    #[test]
    fn test_generators() {
        assert!(generate_branch().starts_with("z9hG4bK"));
        assert_ne!(generate_tag(), generate_tag());
        assert!(generate_call_id("10.0.0.1").ends_with("@10.0.0.1"));
    }
}
