//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Value Objects: content descriptors, user profile, identifiers
//! - Session lifecycle: state machine, listener contract, error taxonomy
//! - Chat payloads: instant messages, CPIM, resource lists

pub mod content;
pub mod instant_messaging;
pub mod session;
pub mod shared;
pub mod user_profile;

// Re-export commonly used types
pub use content::MmContent;
pub use shared::{DomainError, Result};
pub use user_profile::UserProfile;
