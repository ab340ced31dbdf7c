//! Error types for the patchbay client library.

use crate::wire::{ErrorKind, FrameError, WireError};

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur during client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Failed to establish or keep a connection to the registry.
    #[error("connection failed: {0}")]
    Connection(String),

    /// I/O failure on an established connection.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error returned by the registry itself.
    #[error("registry error: {0}")]
    Registry(WireError),
}

impl From<FrameError> for ClientError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => ClientError::Io(e),
            other => ClientError::Protocol(other.to_string()),
        }
    }
}

impl From<WireError> for ClientError {
    fn from(err: WireError) -> Self {
        ClientError::Registry(err)
    }
}

impl ClientError {
    /// Returns the error message.
    pub fn message(&self) -> String {
        match self {
            ClientError::Connection(msg) => msg.clone(),
            ClientError::Io(e) => e.to_string(),
            ClientError::Protocol(msg) => msg.clone(),
            ClientError::Registry(e) => e.message.clone(),
        }
    }

    /// Returns the registry error kind if the registry rejected the call.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Registry(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Returns true if the operation referenced an unknown name.
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind(), Some(ErrorKind::NotFound))
    }

    /// Returns true if a registration reused a name with a different type.
    pub fn is_type_conflict(&self) -> bool {
        matches!(self.kind(), Some(ErrorKind::TypeConflict))
    }

    /// Returns true if a connect crossed incompatible types.
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self.kind(), Some(ErrorKind::TypeMismatch))
    }

    /// Returns true if the registry applied the mutation but failed to
    /// persist it.
    pub fn is_persistence_failed(&self) -> bool {
        matches!(self.kind(), Some(ErrorKind::PersistenceFailed))
    }

    /// Returns true if this is a connection or I/O error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ClientError::Connection(_) | ClientError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_error(kind: ErrorKind) -> ClientError {
        ClientError::Registry(WireError {
            kind,
            message: "boom".to_string(),
        })
    }

    #[test]
    fn test_connection_error_display() {
        let err = ClientError::Connection("refused".to_string());
        assert_eq!(err.to_string(), "connection failed: refused");
    }

    #[test]
    fn test_connection_error_message() {
        let err = ClientError::Connection("timeout".to_string());
        assert_eq!(err.message(), "timeout");
    }

    #[test]
    fn test_registry_error_display() {
        let err = registry_error(ErrorKind::TypeConflict);
        assert_eq!(err.to_string(), "registry error: type_conflict: boom");
    }

    #[test]
    fn test_registry_error_kind() {
        let err = registry_error(ErrorKind::NotFound);
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
    }

    #[test]
    fn test_non_registry_error_kind_is_none() {
        let err = ClientError::Connection("refused".to_string());
        assert_eq!(err.kind(), None);
    }

    #[test]
    fn test_is_not_found() {
        assert!(registry_error(ErrorKind::NotFound).is_not_found());
        assert!(!registry_error(ErrorKind::TypeConflict).is_not_found());
        assert!(!ClientError::Protocol("bad".to_string()).is_not_found());
    }

    #[test]
    fn test_is_type_conflict() {
        assert!(registry_error(ErrorKind::TypeConflict).is_type_conflict());
        assert!(!registry_error(ErrorKind::TypeMismatch).is_type_conflict());
    }

    #[test]
    fn test_is_type_mismatch() {
        assert!(registry_error(ErrorKind::TypeMismatch).is_type_mismatch());
        assert!(!registry_error(ErrorKind::NotFound).is_type_mismatch());
    }

    #[test]
    fn test_is_persistence_failed() {
        assert!(registry_error(ErrorKind::PersistenceFailed).is_persistence_failed());
        assert!(!registry_error(ErrorKind::Internal).is_persistence_failed());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(ClientError::Connection("refused".to_string()).is_connection_error());
        let io = ClientError::Io(std::io::Error::other("down"));
        assert!(io.is_connection_error());
        assert!(!registry_error(ErrorKind::Internal).is_connection_error());
    }

    #[test]
    fn test_frame_error_conversion() {
        let err: ClientError = FrameError::TooLarge(64 * 1024 * 1024).into();
        assert!(matches!(err, ClientError::Protocol(_)));
        let err: ClientError = FrameError::Io(std::io::Error::other("down")).into();
        assert!(matches!(err, ClientError::Io(_)));
    }
}
