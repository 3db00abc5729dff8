//! Terminating side: ringing, local answer and ACK

use super::kind::{self, Direction};
use super::originating::aborted;
use super::{End, Ending, ImsServiceSession, InvitationAnswer, MediaEvents, SessionCommand, Teardown};
use crate::application::listener::ServiceListener;
use crate::domain::session::{SessionErrorKind, SessionEvent};
use crate::infrastructure::protocols::sip::{SipHeaders, SipMethod, SipRequest, SipResponse};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Outcome of the ringing phase
enum Ringing {
    Accepted,
    Ended(End),
}

impl ImsServiceSession {
    pub(super) async fn run_terminating(
        self: &Arc<Self>,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
        abort: &mut watch::Receiver<bool>,
        service_listener: Option<Arc<dyn ServiceListener>>,
    ) -> Result<Option<MediaEvents>, End> {
        info!(
            "Incoming {} session {} from {}",
            self.kind,
            self.id,
            self.remote_contact
        );

        let ringing = self.invite_response(180).map_err(End::unexpected)?;
        self.send_response(ringing).await.map_err(End::unexpected)?;
        self.transition(SessionEvent::Ringing);

        if let Some(listener) = service_listener {
            listener.handle_incoming_session(self.clone());
        }

        match self.wait_invitation_answer(commands, abort).await {
            Ringing::Accepted => {}
            Ringing::Ended(end) => return Err(end),
        }

        self.send_answer().await?;
        self.wait_ack(commands, abort).await?;

        self.inner().dialog.session_established();
        self.transition(SessionEvent::Answer);

        let remote_sdp = self.inner().dialog.remote_sdp().unwrap_or_default().to_string();
        let remote = kind::remote_media(self.kind, Direction::Terminating, &remote_sdp, self.context())
            .map_err(|e| End::unexpected(e).with_teardown(Teardown::Hangup))?;
        let events = self
            .open_media(remote)
            .await
            .map_err(|e| End::unexpected(e).with_teardown(Teardown::Hangup))?;
        self.on_established(events).await
    }

    /// Response to the received INVITE carrying our tag
    fn invite_response(&self, code: u16) -> Result<SipResponse, String> {
        let inner = self.inner();
        let invite = inner
            .dialog
            .invite()
            .ok_or_else(|| "no INVITE in dialog".to_string())?;
        Ok(self
            .context()
            .factory()
            .create_response_with_tag(invite, inner.dialog.local_tag(), code))
    }

    fn final_response(&self, code: u16) -> Teardown {
        match self.invite_response(code) {
            Ok(response) => Teardown::Reply(vec![response]),
            Err(e) => {
                warn!("Session {}: {}", self.id, e);
                Teardown::Silent
            }
        }
    }

    async fn wait_invitation_answer(
        &self,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
        abort: &mut watch::Receiver<bool>,
    ) -> Ringing {
        let deadline = sleep(self.context().config().sip.ringing_period());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = aborted(abort) => return Ringing::Ended(End::aborted()),
                _ = &mut deadline => {
                    info!("Session {}: invitation not answered", self.id);
                    return Ringing::Ended(
                        End::failed(
                            SessionErrorKind::SessionInitiationFailed,
                            Some("invitation not answered".to_string()),
                        )
                        .with_teardown(self.final_response(486)),
                    );
                }
                command = commands.recv() => match command {
                    Some(SessionCommand::Answer(InvitationAnswer::Accept)) => return Ringing::Accepted,
                    Some(SessionCommand::Answer(InvitationAnswer::Reject)) => {
                        info!("Session {}: invitation rejected", self.id);
                        return Ringing::Ended(End::new(Ending::Aborted, self.final_response(603)));
                    }
                    Some(SessionCommand::Request(request)) => match request.method() {
                        Some(SipMethod::Cancel) => return Ringing::Ended(self.cancelled(&request)),
                        Some(SipMethod::Bye) => return Ringing::Ended(self.hung_up(&request)),
                        _ => {
                            if let Some(end) = self.handle_request(request).await {
                                return Ringing::Ended(end);
                            }
                        }
                    },
                    Some(other) => debug!("Session {}: {:?} ignored while ringing", self.id, other),
                    None => return Ringing::Ended(End::aborted()),
                },
            }
        }
    }

    /// CANCEL before the invitation was answered: 200 for the CANCEL, 487 for the INVITE
    fn cancelled(&self, cancel: &SipRequest) -> End {
        info!("Session {}: invitation cancelled by the remote", self.id);
        self.inner().dialog.session_cancelled();
        self.ended_while_ringing(cancel)
    }

    /// BYE before the invitation was answered, same answers as a CANCEL
    fn hung_up(&self, bye: &SipRequest) -> End {
        info!("Session {}: BYE received while ringing", self.id);
        if let Some(cseq) = bye.cseq() {
            self.inner().dialog.observe_remote_cseq(cseq);
        }
        self.ended_while_ringing(bye)
    }

    fn ended_while_ringing(&self, request: &SipRequest) -> End {
        self.interrupted.store(true, Ordering::SeqCst);
        let ok = self.context().factory().create_response(request, 200);
        let mut responses = vec![ok];
        if let Ok(terminated) = self.invite_response(487) {
            responses.push(terminated);
        }
        End::new(Ending::ByRemote, Teardown::Reply(responses))
    }

    /// Build the SDP answer and send the 200 OK
    async fn send_answer(&self) -> Result<(), End> {
        let port = self
            .reserve_port()
            .map_err(|e| End::unexpected(e).with_teardown(self.final_response(480)))?;
        let local = self.local_media(port);

        let response = {
            let mut inner = self.inner();
            let remote_sdp = inner.dialog.remote_sdp().unwrap_or_default().to_string();
            let answer = kind::build_answer(&inner.payload, &local, &remote_sdp, self.context());
            let answer = match answer {
                Ok(answer) => answer,
                Err(e) => {
                    drop(inner);
                    warn!("Session {}: cannot answer offer: {}", self.id, e);
                    return Err(End::unexpected(e).with_teardown(self.final_response(488)));
                }
            };
            inner.dialog.set_local_sdp(answer.clone());
            let tags = inner.payload.feature_tags();
            let response = self
                .context()
                .factory()
                .create_200_ok_invite(&inner.dialog, &tags, &answer)
                .map_err(End::unexpected)?;
            inner.dialog.sig_established();
            response
        };

        info!("Session {}: send 200 OK", self.id);
        self.send_response(response)
            .await
            .map_err(|e| End::unexpected(e).with_teardown(Teardown::Hangup))
    }

    async fn wait_ack(
        &self,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
        abort: &mut watch::Receiver<bool>,
    ) -> Result<(), End> {
        let deadline = sleep(self.context().config().sip.transaction_timeout());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = aborted(abort) => return Err(End::aborted()),
                _ = &mut deadline => {
                    info!("Session {}: no ACK received", self.id);
                    return Err(End::failed(
                        SessionErrorKind::SessionInitiationFailed,
                        Some("no ACK received".to_string()),
                    )
                    .with_teardown(Teardown::Hangup));
                }
                command = commands.recv() => match command {
                    Some(SessionCommand::Request(request)) => match request.method() {
                        Some(SipMethod::Ack) => {
                            debug!("Session {}: ACK received", self.id);
                            return Ok(());
                        }
                        Some(SipMethod::Bye) => {
                            let ok = self.context().factory().create_response(&request, 200);
                            return Err(End::new(Ending::ByRemote, Teardown::Reply(vec![ok])));
                        }
                        _ => {
                            if let Some(end) = self.handle_request(request).await {
                                return Err(end);
                            }
                        }
                    },
                    Some(other) => debug!("Session {}: {:?} ignored while waiting ACK", self.id, other),
                    None => return Err(End::aborted()),
                },
            }
        }
    }
}
