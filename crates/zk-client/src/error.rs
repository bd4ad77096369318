// Client error taxonomy.
//
// Connection failures are classified once, by the session, from what it
// knows about the current session credentials and the time since the server
// last answered. Only the failover layer acts on `is_retryable`.
use zk_wire::Status;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No session was ever established with the server.
    #[error("no connection to {host}: {reason}")]
    NoConnection { host: String, reason: String },
    /// The socket failed while the session could still be resumed.
    #[error("connection to {host} lost: {reason}")]
    ConnectionLost { host: String, reason: String },
    #[error("session 0x{session_id:x} expired")]
    SessionExpired { session_id: i64 },
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("server returned {0}")]
    Server(Status),
    #[error("{} host(s) failed: {}", .attempts.len(), summarize(.attempts))]
    AllHostsFailed { attempts: Vec<HostAttempt> },
    #[error("authentication failed for scheme '{scheme}'")]
    AuthFailed { scheme: String },
    #[error("session closed")]
    Closed,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// One host tried during a failover round, and why it did not work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAttempt {
    pub host: String,
    pub error: Error,
}

fn summarize(attempts: &[HostAttempt]) -> String {
    attempts
        .iter()
        .map(|attempt| format!("{}: {}", attempt.host, attempt.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Whether the failed call may be repeated against the same or another
    /// host. An aggregate counts as retryable if any host merely lost its
    /// connection.
    ///
    /// ```
    /// use zk_client::Error;
    ///
    /// let lost = Error::ConnectionLost { host: "a:2181".into(), reason: "reset".into() };
    /// assert!(lost.is_retryable());
    /// assert!(!Error::SessionExpired { session_id: 1 }.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoConnection { .. } | Self::ConnectionLost { .. } => true,
            Self::AllHostsFailed { attempts } => attempts
                .iter()
                .any(|attempt| matches!(attempt.error, Self::ConnectionLost { .. })),
            _ => false,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired { .. })
    }

    /// Server status carried by the error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Server(status) => Some(*status),
            Self::SessionExpired { .. } => Some(Status::SessionExpired),
            Self::ConnectionLost { .. } | Self::NoConnection { .. } => Some(Status::ConnectionLoss),
            Self::AuthFailed { .. } => Some(Status::AuthFailed),
            _ => None,
        }
    }
}

impl From<zk_wire::Error> for Error {
    fn from(err: zk_wire::Error) -> Self {
        match err {
            zk_wire::Error::Status(status) => Self::Server(status),
            invalid @ zk_wire::Error::InvalidPath { .. } => Self::InvalidArgument(invalid.to_string()),
            other => Self::ProtocolViolation(other.to_string()),
        }
    }
}
