//! Established dialog: media events, in-dialog requests and session refresh

use super::kind::{Direction, SessionKind, SessionPayload};
use super::originating::aborted;
use super::{End, Ending, ImsServiceSession, MediaEvents, SessionCommand, Teardown};
use crate::application::metrics;
use crate::domain::instant_messaging::InstantMessage;
use crate::domain::session::SessionErrorKind;
use crate::infrastructure::media::{open_content, MediaEvent};
use crate::infrastructure::protocols::sip::{
    SessionRefreshHandler, SipError, SipHeaders, SipMethod, SipRequest, SipResponse,
};
use async_trait::async_trait;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Session timer callbacks bound to one session
struct RefreshHandler {
    session: Weak<ImsServiceSession>,
}

#[async_trait]
impl SessionRefreshHandler for RefreshHandler {
    async fn send_refresh(&self) -> Result<(), SipError> {
        let session = self
            .session
            .upgrade()
            .ok_or_else(|| SipError::Internal("session dropped".to_string()))?;
        session.send_session_refresh().await
    }

    fn session_expired(&self) {
        if let Some(session) = self.session.upgrade() {
            // Teardown runs on the session task, never on the timer task
            let _ = session.commands_tx.send(SessionCommand::TimerExpired);
        }
    }
}

async fn next_event(events: &mut Option<MediaEvents>) -> Option<MediaEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

impl ImsServiceSession {
    /// Notify, run the kind specific start and arm the session timer
    pub(super) async fn on_established(
        self: &Arc<Self>,
        events: Option<MediaEvents>,
    ) -> Result<Option<MediaEvents>, End> {
        info!("Session {} established", self.id);
        metrics::record_session_started(self.kind.name());
        if let Some(listener) = self.listener() {
            listener.handle_session_started();
        }

        let payload = self.inner().payload.clone();
        match (self.direction, payload) {
            (Direction::Originating, SessionPayload::ContentSharing(content)) => {
                let reader = open_content(self.context().content().as_ref(), &content)
                    .await
                    .map_err(|e| End::unexpected(e).with_teardown(Teardown::Hangup))?;
                let (channel, sink) = {
                    let inner = self.inner();
                    (inner.channel.clone(), inner.sink.clone())
                };
                if let (Some(channel), Some(sink)) = (channel, sink) {
                    let encoding = content.encoding().to_string();
                    // 0 stands for an unknown size, see MediaChannel::send_chunks
                    let total = content.size().unwrap_or(0);
                    debug!("Session {}: send {} bytes of {}", self.id, total, encoding);
                    tokio::spawn(async move {
                        if let Err(e) = channel.send_chunks(reader, encoding, total).await {
                            let _ = sink.send(MediaEvent::TransferError(e.to_string()));
                        }
                    });
                }
            }
            (
                Direction::Terminating,
                SessionPayload::Chat {
                    first_message: Some(message),
                },
            ) => {
                if let Some(listener) = self.listener() {
                    listener.handle_message_received(&message);
                }
            }
            _ => {}
        }

        let (expire, local_refresher) = {
            let inner = self.inner();
            (inner.dialog.session_expire(), inner.dialog.is_local_refresher())
        };
        let min = self.context().config().sip.min_session_expire;
        if expire > 0 && expire >= min {
            let handler = Arc::new(RefreshHandler {
                session: self.this.clone(),
            });
            self.timer.start(handler, expire, local_refresher);
        }

        Ok(events)
    }

    pub(super) async fn run_established(
        &self,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
        mut events: Option<MediaEvents>,
        abort: &mut watch::Receiver<bool>,
    ) -> End {
        loop {
            tokio::select! {
                biased;
                _ = aborted(abort) => return End::aborted(),
                command = commands.recv() => match command {
                    Some(SessionCommand::Request(request)) => {
                        if let Some(end) = self.handle_request(request).await {
                            return end;
                        }
                    }
                    Some(SessionCommand::TimerExpired) => {
                        info!("Session {}: session timer expired", self.id);
                        return End::new(Ending::ByRemote, Teardown::Hangup);
                    }
                    Some(SessionCommand::Answer(answer)) => {
                        debug!("Session {}: {:?} ignored, already answered", self.id, answer);
                    }
                    None => return End::aborted(),
                },
                event = next_event(&mut events) => match event {
                    Some(event) => {
                        if let Some(end) = self.handle_media_event(event).await {
                            return end;
                        }
                    }
                    None => {
                        debug!("Session {}: media events closed", self.id);
                        events = None;
                    }
                },
            }
        }
    }

    /// In-dialog request; `Some` ends the session
    pub(super) async fn handle_request(&self, request: SipRequest) -> Option<End> {
        let method = request.method();
        if let Some(cseq) = request.cseq() {
            if method != Some(SipMethod::Ack) && method != Some(SipMethod::Cancel) {
                self.inner().dialog.observe_remote_cseq(cseq);
            }
        }

        match method {
            Some(SipMethod::Bye) => {
                info!("Session {}: BYE received from the remote", self.id);
                self.interrupted.store(true, Ordering::SeqCst);
                let ok = self.context().factory().create_response(&request, 200);
                Some(End::new(Ending::ByRemote, Teardown::Reply(vec![ok])))
            }
            Some(SipMethod::Cancel) => {
                if self.inner().dialog.is_sig_established() {
                    info!(
                        "Session {}: CANCEL ignored, session already established",
                        self.id
                    );
                    return None;
                }
                self.interrupted.store(true, Ordering::SeqCst);
                let ok = self.context().factory().create_response(&request, 200);
                self.inner().dialog.session_cancelled();
                Some(End::new(Ending::ByRemote, Teardown::Reply(vec![ok])))
            }
            Some(SipMethod::Ack) => {
                debug!("Session {}: ACK received", self.id);
                None
            }
            Some(SipMethod::Update) => {
                self.timer.receive_refresh();
                let ok = {
                    let inner = self.inner();
                    self.context()
                        .factory()
                        .create_200_ok_update(&inner.dialog, &request)
                };
                debug!("Session {}: session refreshed by UPDATE", self.id);
                self.reply(ok).await;
                None
            }
            Some(SipMethod::Invite) => {
                self.timer.receive_refresh();
                let ok = {
                    let inner = self.inner();
                    self.context()
                        .factory()
                        .create_200_ok_reinvite(&inner.dialog, &request)
                };
                debug!("Session {}: session refreshed by re-INVITE", self.id);
                self.reply(ok).await;
                None
            }
            Some(SipMethod::Refer) => {
                let refer_to = request.header("Refer-To").unwrap_or_default();
                info!("Session {}: REFER to {}", self.id, refer_to);
                let accepted = self.context().factory().create_response(&request, 202);
                self.reply(accepted).await;
                if let Some(listener) = self.listener() {
                    listener.handle_refer_received(&refer_to);
                }
                None
            }
            _ => {
                let not_allowed = self.context().factory().create_response(&request, 405);
                self.reply(not_allowed).await;
                None
            }
        }
    }

    async fn reply(&self, response: SipResponse) {
        if let Err(e) = self.send_response(response).await {
            warn!("Session {}: cannot send response: {}", self.id, e);
        }
    }

    /// Media channel event; `Some` ends the session
    async fn handle_media_event(&self, event: MediaEvent) -> Option<End> {
        match event {
            MediaEvent::DataReceived { data, content_type } => match self.kind {
                SessionKind::Chat => {
                    match InstantMessage::from_received(&self.remote_contact, &data, &content_type) {
                        Some(message) => {
                            if let Some(listener) = self.listener() {
                                listener.handle_message_received(&message);
                            }
                        }
                        None => debug!("Session {}: {} data ignored", self.id, content_type),
                    }
                    None
                }
                SessionKind::ContentSharing if self.direction == Direction::Terminating => {
                    self.store_content(data).await
                }
                _ => {
                    debug!("Session {}: unexpected data received", self.id);
                    None
                }
            },
            MediaEvent::DataTransferred => {
                if self.kind == SessionKind::ContentSharing && self.direction == Direction::Originating {
                    info!("Session {}: content transferred", self.id);
                    return Some(End::new(Ending::Transferred, Teardown::Hangup));
                }
                None
            }
            MediaEvent::Progress { current, total } => {
                if let Some(listener) = self.listener() {
                    listener.handle_sharing_progress(current, total);
                }
                None
            }
            MediaEvent::TransferAborted => {
                info!("Session {}: transfer aborted by the remote", self.id);
                None
            }
            MediaEvent::TransferError(error) => {
                if self.is_interrupted() {
                    return None;
                }
                info!("Session {}: transfer error: {}", self.id, error);
                Some(
                    End::failed(SessionErrorKind::MediaTransferFailed, Some(error))
                        .with_teardown(Teardown::Hangup),
                )
            }
        }
    }

    /// Persist received content and report it
    async fn store_content(&self, data: bytes::Bytes) -> Option<End> {
        let Some(mut content) = self.content() else {
            return None;
        };
        let url = content.url().unwrap_or(content.name()).to_string();
        if let Err(e) = self.context().content().store(&url, data.clone()).await {
            return Some(
                End::failed(SessionErrorKind::MediaTransferFailed, Some(e.to_string()))
                    .with_teardown(Teardown::Hangup),
            );
        }
        content.set_size(data.len() as u64);
        if let SessionPayload::ContentSharing(current) = &mut self.inner().payload {
            *current = content.clone();
        }
        info!("Session {}: content received and stored at {}", self.id, url);
        if let Some(listener) = self.listener() {
            listener.handle_content_transferred(&content);
        }
        None
    }

    /// One session refresh (UPDATE) and its answer
    pub(super) async fn send_session_refresh(&self) -> Result<(), SipError> {
        let update = {
            let mut inner = self.inner();
            if !inner.dialog.is_session_established() || inner.dialog.is_session_terminated() {
                return Err(SipError::TransactionError("session not established".to_string()));
            }
            inner.dialog.increment_cseq();
            self.context().factory().create_update(&inner.dialog)?
        };

        debug!("Session {}: send session refresh", self.id);
        let timeout = self.context().config().sip.transaction_timeout();
        match self.context().transport().send_request_and_wait(update, timeout).await? {
            Some(response) if response.is_success() => Ok(()),
            Some(response) => Err(SipError::TransactionError(format!(
                "UPDATE rejected: {} {}",
                response.status_code(),
                response.reason_phrase()
            ))),
            None => Err(SipError::TransactionError("UPDATE timed out".to_string())),
        }
    }
}
