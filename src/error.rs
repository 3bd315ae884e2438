//! Error type shared by every module of the router.

use thiserror::Error;

/// Errors surfaced by the cluster router.
///
/// Nothing in this crate retries or refreshes topology on error; every
/// variant reaches the caller as-is.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("CLUSTERDOWN Hash slot {0} not served by any known master")]
    SlotUnassigned(u16),

    #[error("Unable to find master node {host}:{port}")]
    MasterNotFound { host: String, port: u16 },

    #[error("No live connection for node {0}")]
    NodeUnavailable(String),

    #[error("'{0}' cannot be called in pipeline / transaction mode")]
    UnsupportedInTransaction(String),

    #[error("ERR no such key '{0}'")]
    SourceNotFound(String),

    #[error("Key '{source_key}' was restored to '{dest_key}' but could not be deleted: {reason}")]
    RelocationIncomplete {
        source_key: String,
        dest_key: String,
        reason: String,
    },

    #[error("{0}")]
    Server(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgCount(String),

    #[error("ERR {0}")]
    InvalidArgument(String),

    #[error("EXECABORT Transaction discarded")]
    TransactionAborted,

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;

impl RouterError {
    /// True when the error came back from the store as an error reply.
    pub fn is_server_error(&self) -> bool {
        matches!(self, RouterError::Server(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            RouterError::SlotUnassigned(42).to_string(),
            "CLUSTERDOWN Hash slot 42 not served by any known master"
        );
        assert_eq!(
            RouterError::WrongArgCount("RESTORE".to_string()).to_string(),
            "ERR wrong number of arguments for 'RESTORE' command"
        );
        assert!(RouterError::UnsupportedInTransaction("SCAN".to_string())
            .to_string()
            .contains("pipeline / transaction"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: RouterError = io.into();
        assert!(matches!(err, RouterError::Io(_)));
        assert!(!err.is_server_error());
    }
}
