use thiserror::Error;
use tokio::time::error::Elapsed;

/// ストレージ層が返すエラー。
///
/// リトライ可否を判断できるように、not found / conflict / transient を区別する。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found")]
    NotFound,

    #[error("version mismatch (expected={expected}, actual={actual})")]
    VersionMismatch { expected: i64, actual: i64 },

    #[error("user already has a running timer")]
    ActiveTimerExists,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// 不正な行や制約違反など、再試行しても結果が変わらない失敗。
    #[error("storage rejected the operation: {0}")]
    Rejected(String),
}

/// time entryの操作で発生するエラー。
#[derive(Debug, Error)]
pub enum TimeEntryError {
    #[error("{0}")]
    Validation(String),

    #[error("Cannot update {} on an invoiced time entry", .fields.join(", "))]
    InvoicedEntryLocked { fields: Vec<String> },

    #[error("Time entry was modified concurrently (expected version {expected}, found {actual})")]
    Concurrency { expected: i64, actual: i64 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Permission(String),

    #[error("Temporary storage failure: {0}")]
    Transient(String),

    #[error("Storage failure: {0}")]
    Storage(String),
}

impl TimeEntryError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// 入力の不正によるエラーかどうか。
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvoicedEntryLocked { .. }
        )
    }

    /// 再試行で回復する可能性のあるエラーかどうか。
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<StorageError> for TimeEntryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound => Self::NotFound("Time entry".to_string()),
            StorageError::VersionMismatch { expected, actual } => {
                Self::Concurrency { expected, actual }
            }
            StorageError::ActiveTimerExists => {
                Self::validation("You already have an active timer running")
            }
            StorageError::Unavailable(message) => Self::Transient(message),
            StorageError::Rejected(message) => Self::Storage(message),
        }
    }
}

// 締め切りを過ぎた試行も一時的な失敗として扱い、リトライ回数に数える。
impl From<Elapsed> for TimeEntryError {
    fn from(_: Elapsed) -> Self {
        Self::Transient("attempt deadline elapsed".to_string())
    }
}

pub type Result<T, E = TimeEntryError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{StorageError, TimeEntryError};

    #[rstest]
    #[case::not_found(StorageError::NotFound, false, false)]
    #[case::version(StorageError::VersionMismatch { expected: 1, actual: 2 }, false, false)]
    #[case::active_timer(StorageError::ActiveTimerExists, true, false)]
    #[case::unavailable(StorageError::Unavailable("busy".to_string()), false, true)]
    #[case::rejected(StorageError::Rejected("bad row".to_string()), false, false)]
    fn test_storage_error_kind(
        #[case] input: StorageError,
        #[case] validation: bool,
        #[case] transient: bool,
    ) {
        let err = TimeEntryError::from(input);

        assert_eq!(err.is_validation(), validation);
        assert_eq!(err.is_transient(), transient);
    }

    #[test]
    fn test_invoiced_entry_locked_names_fields() {
        let err = TimeEntryError::InvoicedEntryLocked {
            fields: vec!["billable".to_string(), "startTime".to_string()],
        };

        assert_eq!(
            err.to_string(),
            "Cannot update billable, startTime on an invoiced time entry"
        );
    }
}
