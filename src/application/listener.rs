//! Service level listener

use super::session::ImsServiceSession;
use crate::infrastructure::protocols::sip::SipRequest;
use std::sync::Arc;

/// Receives what arrives outside an existing session.
///
/// The invitation callback must not block; the user answers later through
/// [`ImsServiceSession::accept`] or [`ImsServiceSession::reject`].
#[cfg_attr(test, mockall::automock)]
pub trait ServiceListener: Send + Sync {
    /// A new terminating session is ringing
    fn handle_incoming_session(&self, session: Arc<ImsServiceSession>);

    /// Stand-alone MESSAGE, already answered with 200
    fn handle_message(&self, _request: &SipRequest) {}

    /// Out-of-dialog SUBSCRIBE, already answered with 202
    fn handle_subscribe(&self, _request: &SipRequest) {}
}
