//! IMS module: the application facing entry point
//!
//! Owns the shared context, the session registry, the inbound dispatcher and
//! the registration manager. Sessions are created here (originating) or by
//! the dispatcher (terminating) and always registered before they start.

use super::context::ImsContext;
use super::dispatcher::Dispatcher;
use super::listener::ServiceListener;
use super::metrics;
use super::registry::SessionRegistry;
use super::session::{ImsServiceSession, SessionPayload};
use crate::config::Config;
use crate::domain::instant_messaging::InstantMessage;
use crate::domain::session::{SessionError, SessionErrorKind, SessionListener};
use crate::domain::shared::SipUri;
use crate::domain::MmContent;
use crate::infrastructure::media::{ContentResolver, MediaFactory};
use crate::infrastructure::protocols::sip::{
    feature_tags, RegistrationManager, SipError, SipMessage, SipRequest, SipTransport,
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ImsModule {
    ctx: Arc<ImsContext>,
    registry: Arc<SessionRegistry>,
    dispatcher: Dispatcher,
    registration: Arc<RegistrationManager>,
}

impl ImsModule {
    pub fn new(
        config: Config,
        transport: Arc<dyn SipTransport>,
        media: Arc<dyn MediaFactory>,
        content: Arc<dyn ContentResolver>,
    ) -> Self {
        Self::with_context(ImsContext::new(config, transport, media, content))
    }

    pub fn with_context(ctx: ImsContext) -> Self {
        metrics::describe_metrics();
        let ctx = Arc::new(ctx);
        let registry = Arc::new(SessionRegistry::new());
        let registration = RegistrationManager::new(
            ctx.transport().clone(),
            ctx.factory().clone(),
            ctx.config().sip.clone(),
            feature_tags::supported_tags(),
        );
        Self {
            dispatcher: Dispatcher::new(ctx.clone(), registry.clone()),
            ctx,
            registry,
            registration,
        }
    }

    pub fn context(&self) -> &Arc<ImsContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn registration(&self) -> &Arc<RegistrationManager> {
        &self.registration
    }

    pub async fn set_service_listener(&self, listener: Arc<dyn ServiceListener>) {
        self.dispatcher.set_service_listener(listener).await;
    }

    pub async fn register(&self) -> Result<(), SipError> {
        self.registration.register().await
    }

    /// Hand an inbound message to the dispatcher
    pub async fn receive_sip_message(&self, message: SipMessage) -> Result<(), SipError> {
        self.dispatcher.dispatch(message).await
    }

    pub async fn receive_sip_request(&self, request: SipRequest) -> Result<(), SipError> {
        self.dispatcher.post_sip_request(request).await
    }

    /// Share a file or in-memory content with `contact` over MSRP
    pub async fn initiate_content_sharing(
        &self,
        contact: &str,
        content: MmContent,
        listener: Option<Arc<dyn SessionListener>>,
    ) -> Result<Arc<ImsServiceSession>, SessionError> {
        let max = self.ctx.config().media.max_content_size;
        if let Some(size) = content.size() {
            if max > 0 && size > max {
                return Err(SessionError::with_detail(
                    SessionErrorKind::MediaTransferFailed,
                    format!("content of {} bytes exceeds the {} bytes limit", size, max),
                ));
            }
        }
        Ok(self
            .initiate(contact, SessionPayload::ContentSharing(content), listener)
            .await)
    }

    /// Open a chat; the first message travels in the INVITE
    pub async fn initiate_chat(
        &self,
        contact: &str,
        first_message: Option<&str>,
        listener: Option<Arc<dyn SessionListener>>,
    ) -> Arc<ImsServiceSession> {
        let first_message = first_message.map(|text| InstantMessage::new(contact, text));
        self.initiate(contact, SessionPayload::Chat { first_message }, listener)
            .await
    }

    /// Outgoing video stream over RTP
    pub async fn initiate_streaming(
        &self,
        contact: &str,
        listener: Option<Arc<dyn SessionListener>>,
    ) -> Arc<ImsServiceSession> {
        self.initiate(contact, SessionPayload::Streaming, listener).await
    }

    /// Application defined session identified by its feature tag
    pub async fn initiate_sip_session(
        &self,
        contact: &str,
        feature_tag: &str,
        sdp: Option<String>,
        listener: Option<Arc<dyn SessionListener>>,
    ) -> Arc<ImsServiceSession> {
        let payload = SessionPayload::GenericSip {
            feature_tag: feature_tag.to_string(),
            sdp,
        };
        self.initiate(contact, payload, listener).await
    }

    async fn initiate(
        &self,
        contact: &str,
        payload: SessionPayload,
        listener: Option<Arc<dyn SessionListener>>,
    ) -> Arc<ImsServiceSession> {
        let contact = match SipUri::from_contact(contact, self.ctx.profile().home_domain()) {
            Ok(uri) => uri.to_string(),
            Err(e) => {
                warn!("{}, used as given", e);
                contact.to_string()
            }
        };
        let session = ImsServiceSession::originating(
            self.ctx.clone(),
            Arc::downgrade(&self.registry),
            &contact,
            payload,
        );
        if let Some(listener) = listener {
            session.set_listener(listener);
        }
        self.registry.add_session(session.clone()).await;
        session.start(None);
        session
    }

    /// Abort every session and wait for their teardown
    pub async fn abort_all_sessions(&self) {
        let sessions = self.registry.sessions().await;
        if sessions.is_empty() {
            return;
        }
        info!("Abort {} sessions", sessions.len());
        join_all(sessions.iter().map(|session| session.abort())).await;
    }

    /// Abort all sessions and remove the registration
    pub async fn stop(&self) -> Result<(), SipError> {
        info!("Stopping IMS module");
        self.abort_all_sessions().await;
        self.registration.unregister().await
    }
}
