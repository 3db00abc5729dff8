//! rcs-ims - RCS IMS client signalling engine
//!
//! Originating and terminating SIP sessions for content sharing, chat,
//! video streaming and application defined services, with registration,
//! digest authentication and session timers.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{ImsContext, ImsModule, ImsServiceSession, ServiceListener, SessionKind};
pub use config::Config;
pub use domain::session::{SessionError, SessionErrorKind, SessionListener, SessionState};
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
pub use domain::{MmContent, UserProfile};
