use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("File not found: category {category}, file {file_id}")]
    NotFound { category: u8, file_id: u32 },

    #[error("Category not found: {0}")]
    CategoryNotFound(u8),

    #[error("Unknown file in reference table: {0}")]
    UnknownFile(u32),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Data container is full: sector numbers exceed 24 bits")]
    ContainerFull,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// True for the "nothing stored here" errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CacheError::NotFound { .. } | CacheError::CategoryNotFound(_)
        )
    }

    /// Per-file failures a bulk caller can log and skip.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CacheError::Corruption(_)
                | CacheError::ChecksumMismatch { .. }
                | CacheError::UnsupportedFormat(_)
                | CacheError::UnknownFile(_)
        )
    }

    /// Failures of the medium or the store itself; a bulk operation should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CacheError::Io(_) | CacheError::Permission(_) | CacheError::ContainerFull
        )
    }

    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        CacheError::Corruption(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let missing = CacheError::NotFound {
            category: 2,
            file_id: 10,
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_recoverable());
        assert!(!missing.is_fatal());

        let corrupt = CacheError::corruption("bad chunk");
        assert!(corrupt.is_recoverable());
        assert!(!corrupt.is_fatal());

        let io = CacheError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(io.is_fatal());
        assert!(!io.is_recoverable());

        assert!(CacheError::Permission("read-only".into()).is_fatal());
    }

    #[test]
    fn test_error_display() {
        let err = CacheError::ChecksumMismatch {
            expected: 0xdeadbeef,
            actual: 0x1,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: expected 0xdeadbeef, computed 0x00000001"
        );
    }
}
