//! Session lifecycle: states, listener contract and error values

pub mod error;
pub mod listener;
pub mod state;

pub use error::{SessionError, SessionErrorKind};
pub use listener::SessionListener;
pub use state::{SessionEvent, SessionState, SessionStateMachine, SessionStats};
