//! Classify collaborator errors into retry policy error kinds.

use crate::retry::policy::ErrorKind;
use crate::transfer::TransferError;

/// Classify a transfer error into an ErrorKind.
pub fn classify(e: &TransferError) -> ErrorKind {
    match e {
        TransferError::Network(_) => ErrorKind::Transient,
        TransferError::RateLimited { wait } => ErrorKind::RateLimited(*wait),
        TransferError::Unsupported(_) => ErrorKind::Unsupported,
        TransferError::Unauthorized(_) => ErrorKind::Unauthorized,
        TransferError::NotFound(_) => ErrorKind::NotFound,
    }
}
