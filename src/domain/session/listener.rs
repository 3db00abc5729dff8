//! Session event listener

use super::error::SessionError;
use crate::domain::content::MmContent;
use crate::domain::instant_messaging::InstantMessage;

/// Receives the events of one session.
///
/// Every method has an empty default so listeners only implement what they
/// care about. Callbacks run on the session task and must not block.
#[cfg_attr(test, mockall::automock)]
pub trait SessionListener: Send + Sync {
    /// Media negotiated and opened
    fn handle_session_started(&self) {}

    /// Session aborted by the local user
    fn handle_session_aborted(&self) {}

    /// Remote BYE/CANCEL, or session timer expiry
    fn handle_session_terminated_by_remote(&self) {}

    fn handle_sharing_progress(&self, _current: u64, _total: u64) {}

    /// Content fully sent or received
    fn handle_content_transferred(&self, _content: &MmContent) {}

    fn handle_sharing_error(&self, _error: &SessionError) {}

    /// Chat message received over the media channel
    fn handle_message_received(&self, _message: &InstantMessage) {}

    /// REFER received inside the dialog
    fn handle_refer_received(&self, _refer_to: &str) {}
}
