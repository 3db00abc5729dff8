//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - SIP protocol engine (messages, dialogs, factory, authentication, timers)
//! - Media boundary (channels, content access, ports, codecs)

pub mod media;
pub mod protocols;
