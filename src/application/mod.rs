//! Application layer
//!
//! Session orchestration on top of the SIP and media infrastructure.

pub mod context;
pub mod dispatcher;
pub mod ims_module;
pub mod listener;
pub mod metrics;
pub mod registry;
pub mod session;

pub use context::ImsContext;
pub use dispatcher::Dispatcher;
pub use ims_module::ImsModule;
pub use listener::ServiceListener;
pub use registry::SessionRegistry;
pub use session::{Direction, ImsServiceSession, SessionKind, SessionPayload};
