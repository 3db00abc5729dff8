//! SIP transport boundary
//!
//! Socket handling lives outside this crate. Sessions and managers only see
//! this trait.

use super::message::{SipError, SipMessage, SipRequest, SipResponse};
use async_trait::async_trait;
use std::time::Duration;

/// Transport layer trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SipTransport: Send + Sync {
    /// Send a request and wait for its final response.
    ///
    /// Provisional responses are absorbed. `Ok(None)` means nothing final
    /// arrived within `timeout`.
    async fn send_request_and_wait(
        &self,
        request: SipRequest,
        timeout: Duration,
    ) -> Result<Option<SipResponse>, SipError>;

    /// Send a request or response without waiting (ACK, provisional and final responses)
    async fn send_message(&self, message: SipMessage) -> Result<(), SipError>;
}
