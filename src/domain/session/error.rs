//! Errors delivered to session listeners

use std::fmt;

/// Why a session ended badly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionErrorKind {
    /// A protocol step failed (malformed SDP, transport failure, ...)
    UnexpectedException,
    /// The remote declined the invitation (603)
    SessionInitiationDeclined,
    /// The invitation was cancelled (487)
    SessionInitiationCancelled,
    /// Any other failure to set up the session, timeouts included
    SessionInitiationFailed,
    /// The media layer reported an error
    MediaTransferFailed,
}

impl SessionErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            SessionErrorKind::UnexpectedException => "unexpected-exception",
            SessionErrorKind::SessionInitiationDeclined => "session-initiation-declined",
            SessionErrorKind::SessionInitiationCancelled => "session-initiation-cancelled",
            SessionErrorKind::SessionInitiationFailed => "session-initiation-failed",
            SessionErrorKind::MediaTransferFailed => "media-transfer-failed",
        }
    }

    /// Kind reported for a final non-2xx answer to an INVITE
    pub fn from_status(status: u16) -> Self {
        match status {
            603 => SessionErrorKind::SessionInitiationDeclined,
            487 => SessionErrorKind::SessionInitiationCancelled,
            _ => SessionErrorKind::SessionInitiationFailed,
        }
    }
}

impl fmt::Display for SessionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Structured error value, never raised across the listener boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    kind: SessionErrorKind,
    detail: Option<String>,
}

impl SessionError {
    pub fn new(kind: SessionErrorKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(kind: SessionErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    pub fn kind(&self) -> SessionErrorKind {
        self.kind
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.kind, detail),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_status() {
        assert_eq!(SessionErrorKind::from_status(603), SessionErrorKind::SessionInitiationDeclined);
        assert_eq!(SessionErrorKind::from_status(487), SessionErrorKind::SessionInitiationCancelled);
        assert_eq!(SessionErrorKind::from_status(486), SessionErrorKind::SessionInitiationFailed);
    }

    #[test]
    fn test_display() {
        let error = SessionError::with_detail(SessionErrorKind::SessionInitiationDeclined, "Decline");
        assert_eq!(error.to_string(), "session-initiation-declined: Decline");
        assert_eq!(SessionError::new(SessionErrorKind::MediaTransferFailed).detail(), None);
    }
}
