use crate::domain::transaction::TransactionId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Malformed token: {0}")]
    MalformedToken(String),
    #[error("Transaction {0} not found")]
    NotFound(TransactionId),
    #[error("Unsupported transaction kind: {0}")]
    UnsupportedKind(String),
    #[error("Transaction {0} is already being processed")]
    AlreadyProcessing(TransactionId),
    #[error("Transaction {0} is already resolved")]
    AlreadyResolved(TransactionId),
    #[error("Transaction {0} has expired")]
    Expired(TransactionId),
    #[error("Issuer unavailable: {0}")]
    IssuerUnavailable(String),
    #[error("Issuer rejected request: {0}")]
    IssuerRejected(String),
    #[error("Issuer deferred request: {0}")]
    IssuerDeferred(String),
    #[error("Transient persistence conflict: {0}")]
    PersistenceTransient(String),
    #[error("Persistence error: {0}")]
    PersistenceFatal(String),
    #[error("Precondition failed for transaction {0}")]
    PreconditionFailed(TransactionId),
    #[error("Duplicate record: {0}")]
    Duplicate(String),
    #[error("Scheduling error: {0}")]
    Scheduling(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Stable code reported to callers in a failed acknowledgement.
    pub fn failure_code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "validation_error",
            Self::MalformedToken(_) => "malformed_token",
            Self::NotFound(_) => "not_found",
            Self::UnsupportedKind(_) => "unsupported_kind",
            Self::AlreadyProcessing(_) | Self::PreconditionFailed(_) => "already_processing",
            Self::AlreadyResolved(_) => "already_resolved",
            Self::Expired(_) => "expired",
            Self::IssuerUnavailable(_) => "issuer_unavailable",
            Self::IssuerRejected(_) | Self::IssuerDeferred(_) => "issuer_rejected",
            _ => "persistence_error",
        }
    }

    /// Rejections caused by caller input or transaction state. These never
    /// mutate stored state and are safe to retry with corrected input.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ValidationError(_)
                | Self::MalformedToken(_)
                | Self::NotFound(_)
                | Self::UnsupportedKind(_)
                | Self::AlreadyProcessing(_)
                | Self::AlreadyResolved(_)
                | Self::Expired(_)
        )
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PersistenceTransient(_))
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for GatewayError {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;
        match err.kind() {
            ErrorKind::Busy | ErrorKind::TryAgain | ErrorKind::TimedOut => {
                Self::PersistenceTransient(err.to_string())
            }
            _ => Self::PersistenceFatal(err.to_string()),
        }
    }
}
