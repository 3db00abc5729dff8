//! Originating side: INVITE, authentication retry and answer handling

use super::kind::{self, Direction, SessionPayload};
use super::{End, ImsServiceSession, MediaEvents, SessionCommand, SessionInner, Teardown};
use crate::domain::instant_messaging::{CpimMessage, MIME_CPIM, MIME_TEXT_PLAIN};
use crate::domain::session::{SessionErrorKind, SessionEvent};
use crate::infrastructure::protocols::sip::factory::{generate_boundary, multipart_body, MIME_SDP};
use crate::infrastructure::protocols::sip::{
    Refresher, SipError, SipHeaders, SipMessage, SipRequest, SipResponse,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Resolves once the session abort signal is raised
pub(super) async fn aborted(abort: &mut watch::Receiver<bool>) {
    // The sender lives in the session, an error only means it is gone
    let _ = abort.wait_for(|aborted| *aborted).await;
}

impl ImsServiceSession {
    pub(super) async fn run_originating(
        self: &Arc<Self>,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
        abort: &mut watch::Receiver<bool>,
    ) -> Result<Option<MediaEvents>, End> {
        info!(
            "Initiate {} session {} with {}",
            self.kind,
            self.id,
            self.remote_contact
        );

        let mut request = self.prepare_invite().map_err(End::unexpected)?;
        let mut challenged = false;

        loop {
            self.transition(SessionEvent::InviteSent);
            let response = self.wait_invite_response(request, commands, abort).await?;
            debug!(
                "Session {}: INVITE response {}",
                self.id,
                response.status_code()
            );

            if self.is_interrupted() {
                return Err(self.interrupted_response(&response).await);
            }

            match response.status_code() {
                200..=299 => return self.handle_200_ok(&response).await,
                407 if !challenged => {
                    challenged = true;
                    request = self.handle_407(&response).await?;
                }
                code => {
                    info!(
                        "Session {}: INVITE failed with {} {}",
                        self.id,
                        code,
                        response.reason_phrase()
                    );
                    self.send_ack().await?;
                    return Err(End::failed(
                        SessionErrorKind::from_status(code),
                        Some(response.reason_phrase()),
                    ));
                }
            }
        }
    }

    /// Reserve the port, build the offer and the first INVITE
    fn prepare_invite(&self) -> Result<SipRequest, String> {
        let port = self.reserve_port().map_err(|e| e.to_string())?;
        let local = self.local_media(port);

        let mut inner = self.inner();
        let sdp = kind::build_offer(&inner.payload, &local, self.context());
        inner.dialog.set_local_sdp(sdp.clone());

        if let SessionPayload::Chat {
            first_message: Some(message),
        } = &inner.payload
        {
            let cpim = CpimMessage::build(
                inner.dialog.local_party(),
                inner.dialog.remote_party(),
                &message.text,
                MIME_TEXT_PLAIN,
            );
            let boundary = generate_boundary();
            let body = multipart_body(&boundary, &[(MIME_SDP, &sdp), (MIME_CPIM, &cpim)]);
            inner.multipart = Some((body, boundary));
        }

        let invite = self.build_invite(&inner).map_err(|e| e.to_string())?;
        inner.dialog.set_invite(invite.clone());
        Ok(invite)
    }

    fn build_invite(&self, inner: &SessionInner) -> Result<SipRequest, SipError> {
        let factory = self.context().factory();
        let tags = inner.payload.feature_tags();
        match &inner.multipart {
            Some((body, boundary)) => factory.create_multipart_invite(&inner.dialog, &tags, body, boundary),
            None => factory.create_invite(
                &inner.dialog,
                &tags,
                inner.dialog.local_sdp().unwrap_or_default(),
            ),
        }
    }

    /// Send the INVITE and wait for its final response, bounded and abortable.
    /// Requests of the remote (BYE in particular) are served while waiting.
    async fn wait_invite_response(
        &self,
        request: SipRequest,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
        abort: &mut watch::Receiver<bool>,
    ) -> Result<SipResponse, End> {
        let transport = self.context().transport().clone();
        let timeout = self.context().config().sip.invite_response_timeout();
        let transaction = transport.send_request_and_wait(request, timeout);
        tokio::pin!(transaction);

        loop {
            tokio::select! {
                biased;
                _ = aborted(abort) => return Err(End::aborted()),
                command = commands.recv() => match command {
                    Some(SessionCommand::Request(request)) => {
                        if let Some(end) = self.handle_request(request).await {
                            info!("Session {}: ended by the remote during negotiation", self.id);
                            return Err(end);
                        }
                    }
                    Some(other) => debug!("Session {}: {:?} ignored while inviting", self.id, other),
                    None => return Err(End::aborted()),
                },
                result = &mut transaction => return match result {
                    Ok(Some(response)) => Ok(response),
                    Ok(None) => {
                        info!("Session {}: no response received for INVITE", self.id);
                        Err(End::failed(SessionErrorKind::SessionInitiationFailed, None))
                    }
                    Err(e) => Err(End::unexpected(e)),
                },
            }
        }
    }

    /// Response that arrived after a local abort
    async fn interrupted_response(&self, response: &SipResponse) -> End {
        if response.is_success() {
            {
                let mut inner = self.inner();
                inner.dialog.sig_established();
                if let Some(tag) = response.to_tag() {
                    inner.dialog.set_remote_tag(tag);
                }
            }
            if self.send_ack().await.is_err() {
                return End::aborted().with_teardown(Teardown::Silent);
            }
            return End::aborted();
        }
        if let Err(end) = self.send_ack().await {
            warn!("Session {}: cannot acknowledge {}: {:?}", self.id, response.status_code(), end);
        }
        End::aborted().with_teardown(Teardown::Silent)
    }

    async fn handle_407(&self, response: &SipResponse) -> Result<SipRequest, End> {
        info!("Session {}: 407 response received", self.id);
        {
            let mut inner = self.inner();
            if let Some(tag) = response.to_tag() {
                inner.dialog.set_remote_tag(tag);
            }
        }
        self.send_ack().await?;

        let mut guard = self.inner();
        let inner = &mut *guard;
        if let Err(e) = inner.state.process_event(SessionEvent::AuthChallenge) {
            debug!("Session {}: {}", self.id, e);
        }
        inner
            .auth
            .read_proxy_authenticate_header(response)
            .map_err(End::unexpected)?;
        inner.dialog.increment_cseq();

        let mut invite = self.build_invite(inner).map_err(End::unexpected)?;
        inner
            .auth
            .set_proxy_authorization_header(&mut invite)
            .map_err(End::unexpected)?;
        inner.dialog.set_invite(invite.clone());
        info!("Session {}: send authenticated INVITE", self.id);
        Ok(invite)
    }

    /// ACK for the final response to the current INVITE
    pub(super) async fn send_ack(&self) -> Result<(), End> {
        let ack = {
            let inner = self.inner();
            self.context()
                .factory()
                .create_ack(&inner.dialog)
                .map_err(End::unexpected)?
        };
        debug!("Session {}: send ACK", self.id);
        self.context()
            .transport()
            .send_message(SipMessage::Request(ack))
            .await
            .map_err(End::unexpected)
    }

    async fn handle_200_ok(
        self: &Arc<Self>,
        response: &SipResponse,
    ) -> Result<Option<MediaEvents>, End> {
        info!("Session {}: 200 OK response received", self.id);
        let remote_sdp = {
            let mut inner = self.inner();
            let dialog = &mut inner.dialog;
            dialog.sig_established();
            if let Some(tag) = response.to_tag() {
                dialog.set_remote_tag(tag);
            }
            if let Some(contact) = response.contact_uri() {
                dialog.set_target(contact);
            }
            let mut route = response.record_route();
            if !route.is_empty() {
                route.reverse();
                dialog.set_route(route);
            }
            let sdp = response.body_str();
            dialog.set_remote_sdp(sdp.clone());
            if let Some((period, refresher)) = response.session_expires() {
                let refresher = refresher
                    .as_deref()
                    .and_then(Refresher::parse)
                    .unwrap_or(Refresher::Uac);
                dialog.set_session_expire(period, refresher);
            }
            sdp
        };

        let remote = kind::remote_media(self.kind, Direction::Originating, &remote_sdp, self.context());
        self.send_ack().await?;
        let remote = remote.map_err(|e| End::unexpected(e).with_teardown(Teardown::Hangup))?;

        self.inner().dialog.session_established();
        self.transition(SessionEvent::Answer);

        let events = self
            .open_media(remote)
            .await
            .map_err(|e| End::unexpected(e).with_teardown(Teardown::Hangup))?;
        self.on_established(events).await
    }
}
