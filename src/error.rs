use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionErrorKind {
    CaptureUnavailable,
    TransportConnectFailed,
    TransportClosed,
    RelayTargetNotFound,
    RelayApplyFailed,
    InvalidBlockSize,
}

impl SessionErrorKind {
    pub fn as_label(self) -> &'static str {
        match self {
            SessionErrorKind::CaptureUnavailable => "capture_unavailable",
            SessionErrorKind::TransportConnectFailed => "transport_connect_failed",
            SessionErrorKind::TransportClosed => "transport_closed",
            SessionErrorKind::RelayTargetNotFound => "relay_target_not_found",
            SessionErrorKind::RelayApplyFailed => "relay_apply_failed",
            SessionErrorKind::InvalidBlockSize => "invalid_block_size",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionError {
    kind: SessionErrorKind,
    message: String,
}

impl SessionError {
    pub fn new<T>(kind: SessionErrorKind, message: T) -> Self
    where
        T: Into<String>,
    {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn capture_unavailable<T: Into<String>>(message: T) -> Self {
        Self::new(SessionErrorKind::CaptureUnavailable, message)
    }

    pub fn transport_connect_failed<T: Into<String>>(message: T) -> Self {
        Self::new(SessionErrorKind::TransportConnectFailed, message)
    }

    pub fn transport_closed<T: Into<String>>(message: T) -> Self {
        Self::new(SessionErrorKind::TransportClosed, message)
    }

    pub fn invalid_block_size<T: Into<String>>(message: T) -> Self {
        Self::new(SessionErrorKind::InvalidBlockSize, message)
    }

    pub fn kind(&self) -> SessionErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_label(), self.message)
    }
}

impl Error for SessionError {}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_kind_and_message() {
        let error = SessionError::transport_closed("socket dropped");
        assert_eq!(error.kind(), SessionErrorKind::TransportClosed);
        assert_eq!(error.to_string(), "transport_closed: socket dropped");
    }

    #[test]
    fn kind_labels_are_snake_case() {
        assert_eq!(
            SessionErrorKind::CaptureUnavailable.as_label(),
            "capture_unavailable"
        );
        assert_eq!(
            SessionErrorKind::InvalidBlockSize.as_label(),
            "invalid_block_size"
        );
    }
}
