//! Inbound SIP routing
//!
//! Requests belonging to a dialog go to the session that owns the call-id.
//! A fresh INVITE creates a terminating session; everything else out of
//! dialog is answered here.

use super::context::ImsContext;
use super::listener::ServiceListener;
use super::registry::SessionRegistry;
use super::session::ImsServiceSession;
use crate::infrastructure::protocols::sip::{
    feature_tags, SipError, SipHeaders, SipMessage, SipMethod, SipRequest, SipResponse,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct Dispatcher {
    ctx: Arc<ImsContext>,
    registry: Arc<SessionRegistry>,
    service_listener: RwLock<Option<Arc<dyn ServiceListener>>>,
}

impl Dispatcher {
    pub fn new(ctx: Arc<ImsContext>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            ctx,
            registry,
            service_listener: RwLock::new(None),
        }
    }

    pub async fn set_service_listener(&self, listener: Arc<dyn ServiceListener>) {
        *self.service_listener.write().await = Some(listener);
    }

    pub async fn remove_service_listener(&self) {
        *self.service_listener.write().await = None;
    }

    /// Entry point for every message the transport does not match to a
    /// client transaction
    pub async fn dispatch(&self, message: SipMessage) -> Result<(), SipError> {
        match message {
            SipMessage::Request(request) => self.post_sip_request(request).await,
            SipMessage::Response(response) => {
                debug!(
                    "Stray SIP response {} {} dropped",
                    response.status_code(),
                    response.reason_phrase()
                );
                Ok(())
            }
        }
    }

    pub async fn post_sip_request(&self, request: SipRequest) -> Result<(), SipError> {
        let method = request.method();
        debug!("Dispatch SIP request {:?}", method);

        match method {
            Some(SipMethod::Invite) if request.to_tag().is_none() => self.incoming_invite(request).await,
            Some(
                SipMethod::Invite
                | SipMethod::Bye
                | SipMethod::Cancel
                | SipMethod::Ack
                | SipMethod::Update
                | SipMethod::Refer,
            ) => self.route_in_dialog(request).await,
            Some(SipMethod::Message) => {
                self.respond(&request, 200).await?;
                if let Some(listener) = self.service_listener().await {
                    listener.handle_message(&request);
                }
                Ok(())
            }
            Some(SipMethod::Subscribe) => {
                self.respond(&request, 202).await?;
                if let Some(listener) = self.service_listener().await {
                    listener.handle_subscribe(&request);
                }
                Ok(())
            }
            Some(SipMethod::Options) => {
                info!("Capability request from {}", request.from_uri().unwrap_or_default());
                let response = self
                    .ctx
                    .factory()
                    .create_200_ok_options(&request, &feature_tags::supported_tags(), None);
                self.send(response).await
            }
            _ => {
                warn!("Method {} not allowed", request.inner.method);
                self.respond(&request, 405).await
            }
        }
    }

    async fn route_in_dialog(&self, request: SipRequest) -> Result<(), SipError> {
        let call_id = request.call_id().unwrap_or_default();
        match self.registry.find_by_call_id(&call_id).await {
            Some(session) => {
                session.receive_request(request);
                Ok(())
            }
            None if request.method() == Some(SipMethod::Ack) => {
                debug!("ACK for unknown call {} dropped", call_id);
                Ok(())
            }
            None => {
                info!("No session for call {}", call_id);
                self.respond(&request, 481).await
            }
        }
    }

    async fn incoming_invite(&self, invite: SipRequest) -> Result<(), SipError> {
        let call_id = invite
            .call_id()
            .ok_or_else(|| SipError::InvalidMessage("INVITE without Call-ID".to_string()))?;
        if self.registry.find_by_call_id(&call_id).await.is_some() {
            debug!("INVITE retransmission for call {} ignored", call_id);
            return Ok(());
        }

        let session = ImsServiceSession::terminating(
            self.ctx.clone(),
            Arc::downgrade(&self.registry),
            &invite,
        );
        // A concurrent copy of the same INVITE may have won the race
        if !self.registry.add_if_absent(session.clone()).await {
            debug!("INVITE retransmission for call {} ignored", call_id);
            return Ok(());
        }
        info!(
            "New {} invitation {} from {}",
            session.kind(),
            session.id(),
            session.remote_contact()
        );
        session.start(self.service_listener().await);
        Ok(())
    }

    async fn service_listener(&self) -> Option<Arc<dyn ServiceListener>> {
        self.service_listener.read().await.clone()
    }

    async fn respond(&self, request: &SipRequest, code: u16) -> Result<(), SipError> {
        let response = self.ctx.factory().create_response(request, code);
        self.send(response).await
    }

    async fn send(&self, response: SipResponse) -> Result<(), SipError> {
        self.ctx
            .transport()
            .send_message(SipMessage::Response(response))
            .await
    }
}
