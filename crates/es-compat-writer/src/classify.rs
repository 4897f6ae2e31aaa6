//! Per-item outcome of a bulk response

use es_compat_core::error::{is_rejection_message, EsCompatError};
use es_compat_core::response::BulkItem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Success,
    /// Node overloaded; resubmit in a later batch
    Retryable(String),
    /// Logged and dropped
    Terminal(String),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Failure for the document `id`, or `None` on success
    pub fn into_error(self, id: impl Into<String>) -> Option<EsCompatError> {
        match self {
            Self::Success => None,
            Self::Retryable(reason) => Some(EsCompatError::retryable_write(id, reason)),
            Self::Terminal(reason) => Some(EsCompatError::terminal_write(id, reason)),
        }
    }
}

pub fn classify_item(item: &BulkItem) -> ItemOutcome {
    let result = item.result();
    let status = result.status;

    if (200..300).contains(&status) || (status == 404 && item.is_delete()) {
        return ItemOutcome::Success;
    }

    let reason = match &result.error {
        Some(error) => error.to_string(),
        None => format!("status {status}"),
    };

    let rejected = status == 429
        || result.error.as_ref().is_some_and(|e| e.is_rejection())
        || is_rejection_message(&reason);
    if rejected {
        ItemOutcome::Retryable(reason)
    } else {
        ItemOutcome::Terminal(reason)
    }
}
