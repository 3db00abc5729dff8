//! SIP protocol implementation
//!
//! Client side of the IMS signalling (RFC 3261 and the session timer,
//! UPDATE, MESSAGE and MSRP offer/answer extensions).
//!
//! Architecture:
//! ```text
//! ┌─────────────────────────┐
//! │   Service sessions      │
//! │ (application::session)  │
//! └───────────┬─────────────┘
//!             │
//! ┌───────────▼─────────────┐
//! │  Dialog + Factory       │
//! │ (DialogPath, SDP, auth) │
//! └───────────┬─────────────┘
//!             │
//! ┌───────────▼─────────────┐
//! │   SipTransport trait    │
//! └─────────────────────────┘
//! ```

pub mod auth;
pub mod builder;
pub mod dialog;
pub mod factory;
pub mod feature_tags;
pub mod message;
pub mod refresher;
pub mod registration;
pub mod sdp;
pub mod session_timer;
pub mod transport;

pub use auth::{AuthChallenge, AuthenticationAgent};
pub use dialog::{DialogPath, Refresher};
pub use factory::SipMessageFactory;
pub use message::{SipError, SipHeaders, SipMessage, SipMethod, SipRequest, SipResponse};
pub use refresher::PeriodicRefresher;
pub use registration::RegistrationManager;
pub use sdp::{FileSelector, MediaDirection, MsrpMediaDescription, RtpCodec, RtpMediaDescription, SdpError, SdpSession};
pub use session_timer::{SessionRefreshHandler, SessionTimerManager};
pub use transport::SipTransport;
