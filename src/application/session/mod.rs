//! IMS service sessions
//!
//! One driver shared by every session kind. Each session runs its protocol
//! sequence on its own tokio task; the public handle only sends commands to
//! that task (accept, reject, abort) or uses the established media channel
//! (chat messages).
//!
//! Teardown always follows the same order: media close, dialog terminated,
//! registry removal, listener notification. A local hangup passes through
//! the terminating state while its BYE, CANCEL or 603 is sent.

mod established;
pub mod kind;
mod originating;
mod terminating;

pub use kind::{Direction, SessionKind, SessionPayload};

use super::context::ImsContext;
use super::listener::ServiceListener;
use super::metrics;
use super::registry::SessionRegistry;
use crate::domain::instant_messaging::{CpimMessage, InstantMessage, MIME_CPIM, MIME_TEXT_PLAIN};
use crate::domain::session::{
    SessionError, SessionErrorKind, SessionEvent, SessionListener, SessionState,
    SessionStateMachine,
};
use crate::domain::shared::SessionId;
use crate::domain::MmContent;
use crate::infrastructure::media::{
    MediaChannel, MediaError, MediaEvent, MediaEventSink, PortReservation, RemoteMedia,
};
use crate::infrastructure::protocols::sip::dialog::generate_call_id;
use crate::infrastructure::protocols::sip::{
    AuthenticationAgent, DialogPath, Refresher, SessionTimerManager, SipError, SipMessage,
    SipRequest, SipResponse,
};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub(crate) type MediaEvents = mpsc::UnboundedReceiver<MediaEvent>;

/// Work delivered to the session task
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// In-dialog request routed by the dispatcher
    Request(SipRequest),
    /// Local user's answer to a terminating invitation
    Answer(InvitationAnswer),
    /// Session timer gave up on the dialog
    TimerExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InvitationAnswer {
    Accept,
    Reject,
}

/// How a session ended, decides the listener callback
#[derive(Debug, Clone)]
pub(crate) enum Ending {
    Aborted,
    /// BYE or CANCEL from the remote, or session timer expiry
    ByRemote,
    /// Content fully sent
    Transferred,
    Failed(SessionError),
}

/// Signalling performed between media close and registry removal
#[derive(Debug)]
pub(crate) enum Teardown {
    Silent,
    /// BYE when signalling is established, CANCEL or 603 while pending
    Hangup,
    /// Answer the request(s) that ended the session
    Reply(Vec<SipResponse>),
}

#[derive(Debug)]
pub(crate) struct End {
    ending: Ending,
    teardown: Teardown,
}

impl End {
    pub(crate) fn new(ending: Ending, teardown: Teardown) -> Self {
        Self { ending, teardown }
    }

    pub(crate) fn aborted() -> Self {
        Self::new(Ending::Aborted, Teardown::Hangup)
    }

    pub(crate) fn failed(kind: SessionErrorKind, detail: Option<String>) -> Self {
        let error = match detail {
            Some(detail) => SessionError::with_detail(kind, detail),
            None => SessionError::new(kind),
        };
        Self::new(Ending::Failed(error), Teardown::Silent)
    }

    /// Catch-all for protocol step failures
    pub(crate) fn unexpected(error: impl fmt::Display) -> Self {
        Self::failed(SessionErrorKind::UnexpectedException, Some(error.to_string()))
    }

    pub(crate) fn with_teardown(mut self, teardown: Teardown) -> Self {
        self.teardown = teardown;
        self
    }
}

pub(crate) struct SessionInner {
    pub(crate) dialog: DialogPath,
    pub(crate) state: SessionStateMachine,
    pub(crate) payload: SessionPayload,
    pub(crate) auth: AuthenticationAgent,
    /// Multipart INVITE body and its boundary, reused for the authenticated retry
    pub(crate) multipart: Option<(String, String)>,
    pub(crate) channel: Option<Arc<dyn MediaChannel>>,
    pub(crate) sink: Option<MediaEventSink>,
    pub(crate) port: Option<PortReservation>,
}

pub struct ImsServiceSession {
    id: SessionId,
    kind: SessionKind,
    direction: Direction,
    call_id: String,
    remote_contact: String,
    ctx: Arc<ImsContext>,
    registry: Weak<SessionRegistry>,
    this: Weak<ImsServiceSession>,
    inner: Mutex<SessionInner>,
    listener: Mutex<Option<Arc<dyn SessionListener>>>,
    interrupted: AtomicBool,
    started: AtomicBool,
    finished: AtomicBool,
    abort_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
    commands_tx: mpsc::UnboundedSender<SessionCommand>,
    commands_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionCommand>>>,
    timer: SessionTimerManager,
}

impl ImsServiceSession {
    fn new(
        ctx: Arc<ImsContext>,
        registry: Weak<SessionRegistry>,
        direction: Direction,
        remote_contact: String,
        dialog: DialogPath,
        payload: SessionPayload,
    ) -> Arc<Self> {
        let (abort_tx, _) = watch::channel(false);
        let (done_tx, _) = watch::channel(false);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let auth = AuthenticationAgent::new(ctx.profile().clone());

        Arc::new_cyclic(|this| Self {
            id: SessionId::new(),
            kind: payload.kind(),
            direction,
            call_id: dialog.call_id().to_string(),
            remote_contact,
            ctx,
            registry,
            this: this.clone(),
            inner: Mutex::new(SessionInner {
                dialog,
                state: SessionStateMachine::new(),
                payload,
                auth,
                multipart: None,
                channel: None,
                sink: None,
                port: None,
            }),
            listener: Mutex::new(None),
            interrupted: AtomicBool::new(false),
            started: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            abort_tx,
            done_tx,
            commands_tx,
            commands_rx: Mutex::new(Some(commands_rx)),
            timer: SessionTimerManager::new(),
        })
    }

    /// Session we initiate towards `contact`
    pub(crate) fn originating(
        ctx: Arc<ImsContext>,
        registry: Weak<SessionRegistry>,
        contact: &str,
        payload: SessionPayload,
    ) -> Arc<Self> {
        let sip = &ctx.config().sip;
        let mut dialog = DialogPath::originating(
            generate_call_id(&sip.local_address),
            contact,
            ctx.profile().public_uri(),
            contact,
            sip.default_route.clone(),
        );
        if sip.session_expire > 0 && sip.session_expire >= sip.min_session_expire {
            dialog.set_session_expire(sip.session_expire, Refresher::Uac);
        }
        Self::new(ctx, registry, Direction::Originating, contact.to_string(), dialog, payload)
    }

    /// Session for a received INVITE
    pub(crate) fn terminating(
        ctx: Arc<ImsContext>,
        registry: Weak<SessionRegistry>,
        invite: &SipRequest,
    ) -> Arc<Self> {
        let body = kind::invite_body(invite);
        let payload = kind::classify(invite, &body);
        let mut dialog = DialogPath::terminating(invite);
        if let Some(sdp) = body.sdp {
            dialog.set_remote_sdp(sdp);
        }
        let remote = dialog.remote_party().to_string();
        Self::new(ctx, registry, Direction::Terminating, remote, dialog, payload)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn remote_contact(&self) -> &str {
        &self.remote_contact
    }

    pub fn state(&self) -> SessionState {
        self.inner().state.state()
    }

    /// Snapshot of the dialog
    pub fn dialog(&self) -> DialogPath {
        self.inner().dialog.clone()
    }

    pub fn payload(&self) -> SessionPayload {
        self.inner().payload.clone()
    }

    pub fn content(&self) -> Option<MmContent> {
        self.inner().payload.content().cloned()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Set the single listener, replacing any previous one
    pub fn set_listener(&self, listener: Arc<dyn SessionListener>) {
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = Some(listener);
    }

    pub fn remove_listener(&self) {
        *self.listener.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub(crate) fn listener(&self) -> Option<Arc<dyn SessionListener>> {
        self.listener.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn inner(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn context(&self) -> &ImsContext {
        &self.ctx
    }

    /// Spawn the session task
    pub(crate) fn start(self: &Arc<Self>, service_listener: Option<Arc<dyn ServiceListener>>) {
        let commands = self.commands_rx.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(commands) = commands else {
            warn!("Session {} already started", self.id);
            return;
        };
        self.started.store(true, Ordering::SeqCst);

        let session = self.clone();
        tokio::spawn(async move {
            session.run(commands, service_listener).await;
        });
    }

    async fn run(
        self: Arc<Self>,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        service_listener: Option<Arc<dyn ServiceListener>>,
    ) {
        let mut abort = self.abort_tx.subscribe();
        let setup = match self.direction {
            Direction::Originating => self.run_originating(&mut commands, &mut abort).await,
            Direction::Terminating => {
                self.run_terminating(&mut commands, &mut abort, service_listener)
                    .await
            }
        };
        let end = match setup {
            Ok(events) => self.run_established(&mut commands, events, &mut abort).await,
            Err(end) => end,
        };
        self.finalize(end).await;
    }

    /// Queue an in-dialog request for the session task
    pub(crate) fn receive_request(&self, request: SipRequest) {
        if self.commands_tx.send(SessionCommand::Request(request)).is_err() {
            debug!("Session {} no longer accepts requests", self.id);
        }
    }

    /// Accept a terminating invitation
    pub fn accept(&self) {
        self.answer(InvitationAnswer::Accept);
    }

    /// Accept a generic SIP invitation with the application's SDP answer
    pub fn accept_with_sdp(&self, sdp: impl Into<String>) {
        if let SessionPayload::GenericSip { sdp: local, .. } = &mut self.inner().payload {
            *local = Some(sdp.into());
        }
        self.answer(InvitationAnswer::Accept);
    }

    /// Decline a terminating invitation (603)
    pub fn reject(&self) {
        self.answer(InvitationAnswer::Reject);
    }

    fn answer(&self, answer: InvitationAnswer) {
        if self.direction != Direction::Terminating {
            warn!("Session {} is not an invitation, {:?} ignored", self.id, answer);
            return;
        }
        if self.commands_tx.send(SessionCommand::Answer(answer)).is_err() {
            debug!("Session {} already ended", self.id);
        }
    }

    /// Abort the session and wait until its teardown is complete
    pub async fn abort(&self) {
        if self.finished.load(Ordering::SeqCst) {
            return;
        }
        info!("Abort session {}", self.id);
        self.interrupted.store(true, Ordering::SeqCst);
        self.abort_tx.send_replace(true);

        if !self.started.load(Ordering::SeqCst) {
            self.finalize(End::aborted()).await;
            return;
        }
        let mut done = self.done_tx.subscribe();
        let _ = done.wait_for(|finished| *finished).await;
    }

    /// Send a chat message over the established MSRP channel, CPIM wrapped
    pub async fn send_message(&self, text: &str) -> Result<InstantMessage, SessionError> {
        if self.kind != SessionKind::Chat {
            return Err(SessionError::with_detail(
                SessionErrorKind::UnexpectedException,
                format!("{} session has no chat channel", self.kind),
            ));
        }
        let (channel, from, to) = {
            let inner = self.inner();
            let channel = inner
                .channel
                .clone()
                .filter(|_| inner.dialog.is_session_established() && !self.is_interrupted());
            (
                channel,
                inner.dialog.local_party().to_string(),
                inner.dialog.remote_party().to_string(),
            )
        };
        let channel = channel.ok_or_else(|| {
            SessionError::with_detail(SessionErrorKind::UnexpectedException, "session not established")
        })?;

        let message = InstantMessage::new(to.clone(), text);
        let cpim = CpimMessage::build(&from, &to, text, MIME_TEXT_PLAIN);
        channel
            .send_data(Bytes::from(cpim), MIME_CPIM.to_string())
            .await
            .map_err(|e| SessionError::with_detail(SessionErrorKind::MediaTransferFailed, e.to_string()))?;
        debug!("Message {} sent in session {}", message.message_id, self.id);
        Ok(message)
    }

    pub(crate) fn transition(&self, event: SessionEvent) {
        let mut inner = self.inner();
        match inner.state.process_event(event) {
            Ok(state) => debug!("Session {} now {}", self.id, state.name()),
            Err(e) => debug!("Session {}: {}", self.id, e),
        }
    }

    pub(crate) async fn send_message_or_log(&self, message: SipMessage) {
        if let Err(e) = self.ctx.transport().send_message(message).await {
            warn!("Session {}: send failed: {}", self.id, e);
        }
    }

    pub(crate) async fn send_response(&self, response: SipResponse) -> Result<(), SipError> {
        self.ctx
            .transport()
            .send_message(SipMessage::Response(response))
            .await
    }

    /// Create, register and open the media channel described by `remote`
    pub(crate) async fn open_media(
        &self,
        remote: Option<RemoteMedia>,
    ) -> Result<Option<MediaEvents>, MediaError> {
        let Some(remote) = remote else {
            return Ok(None);
        };
        let media = &self.ctx.config().media;
        let (channel, sink, events) = {
            let mut inner = self.inner();
            let port = inner
                .port
                .as_ref()
                .map(|p| p.port())
                .ok_or(MediaError::Open("no local port reserved".to_string()))?;
            let channel = match &remote {
                RemoteMedia::Msrp { .. } => self.ctx.media().create_msrp_channel(port, media.chunk_size),
                RemoteMedia::Rtp { .. } => self.ctx.media().create_rtp_channel(port),
            };
            let (sink, events) = mpsc::unbounded_channel();
            inner.channel = Some(channel.clone());
            inner.sink = Some(sink.clone());
            (channel, sink, events)
        };

        info!("Session {}: open media to {}", self.id, remote);
        channel.open(remote, sink).await?;
        Ok(Some(events))
    }

    /// Reserve the local media port of this session kind
    pub(crate) fn reserve_port(&self) -> Result<Option<u16>, MediaError> {
        let allocator = match self.kind {
            SessionKind::ContentSharing | SessionKind::Chat => self.ctx.msrp_ports(),
            SessionKind::Streaming => self.ctx.rtp_ports(),
            SessionKind::GenericSip => return Ok(None),
        };
        let reservation = allocator.allocate()?;
        let port = reservation.port();
        self.inner().port = Some(reservation);
        Ok(Some(port))
    }

    pub(crate) fn local_media(&self, port: Option<u16>) -> kind::LocalMedia {
        kind::LocalMedia {
            host: self.ctx.config().sip.local_address.clone(),
            port: port.unwrap_or(0),
            path_id: self.id.as_uuid().simple().to_string(),
        }
    }

    /// End the dialog from our side according to its current state
    async fn hangup(&self) {
        enum Hangup {
            Request(SipRequest),
            Response(SipResponse),
        }

        let action = {
            let mut inner = self.inner();
            let factory = self.ctx.factory();
            let dialog = &mut inner.dialog;
            if dialog.is_session_terminated() {
                None
            } else if dialog.is_sig_established() {
                dialog.increment_cseq();
                Some(factory.create_bye(dialog).map(Hangup::Request).map_err(|e| e.to_string()))
            } else if dialog.is_originating() {
                match dialog.invite() {
                    Some(_) => {
                        dialog.session_cancelled();
                        Some(factory.create_cancel(dialog).map(Hangup::Request).map_err(|e| e.to_string()))
                    }
                    None => None,
                }
            } else {
                dialog.invite().map(|invite| {
                    Ok(Hangup::Response(factory.create_response_with_tag(
                        invite,
                        dialog.local_tag(),
                        603,
                    )))
                })
            }
        };

        match action {
            None => {}
            Some(Err(e)) => warn!("Session {}: cannot build hangup: {}", self.id, e),
            Some(Ok(Hangup::Response(response))) => {
                info!("Session {}: decline invitation", self.id);
                self.send_message_or_log(SipMessage::Response(response)).await;
            }
            Some(Ok(Hangup::Request(request))) => {
                info!("Session {}: send {}", self.id, request.method().map(|m| m.as_str()).unwrap_or("request"));
                let timeout = self.ctx.config().sip.transaction_timeout();
                match self.ctx.transport().send_request_and_wait(request, timeout).await {
                    Ok(Some(response)) => debug!("Hangup answered with {}", response.status_code()),
                    Ok(None) => debug!("No answer to hangup"),
                    Err(e) => warn!("Session {}: hangup failed: {}", self.id, e),
                }
            }
        }
    }

    /// Tear the session down exactly once
    pub(crate) async fn finalize(&self, end: End) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.interrupted.store(true, Ordering::SeqCst);
        self.timer.stop();
        info!("Session {} ending: {:?}", self.id, end.ending);

        let channel = self.inner().channel.take();
        if let Some(channel) = channel {
            channel.close().await;
            debug!("Session {}: media closed", self.id);
        }

        match end.teardown {
            Teardown::Silent => {}
            Teardown::Hangup => {
                self.transition(SessionEvent::Terminate);
                self.hangup().await
            }
            Teardown::Reply(responses) => {
                for response in responses {
                    self.send_message_or_log(SipMessage::Response(response)).await;
                }
            }
        }

        let (content, duration) = {
            let mut inner = self.inner();
            inner.dialog.session_terminated();
            inner.sink = None;
            inner.port = None;
            let event = match &end.ending {
                Ending::Aborted => SessionEvent::Abort,
                Ending::Failed(error) => SessionEvent::Fail(error.kind()),
                Ending::ByRemote | Ending::Transferred => SessionEvent::Terminated,
            };
            if let Err(e) = inner.state.process_event(event) {
                debug!("Session {}: {}", self.id, e);
            }
            (
                inner.payload.content().cloned(),
                inner.state.stats().session_duration(),
            )
        };

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_session(self.id).await;
        }

        match &end.ending {
            Ending::Failed(error) => metrics::record_session_failed(self.kind.name(), error.kind().name()),
            _ => metrics::record_session_terminated(self.kind.name()),
        }
        if let Some(duration) = duration {
            metrics::record_session_duration(self.kind.name(), duration);
        }

        if let Some(listener) = self.listener() {
            match &end.ending {
                Ending::Aborted => listener.handle_session_aborted(),
                Ending::ByRemote => listener.handle_session_terminated_by_remote(),
                Ending::Transferred => {
                    if let Some(content) = &content {
                        listener.handle_content_transferred(content);
                    }
                }
                Ending::Failed(error) => listener.handle_sharing_error(error),
            }
        }

        self.done_tx.send_replace(true);
    }
}

impl fmt::Debug for ImsServiceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImsServiceSession")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("direction", &self.direction)
            .field("call_id", &self.call_id)
            .finish()
    }
}
