use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Serialization failed for '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage I/O error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    Validation(String),

    #[error("Backup encryption error: {0}")]
    Crypto(String),
}

/// Maximum length of a raw value quoted inside a validation message
const MAX_QUOTED_LENGTH: usize = 80;

impl StoreError {
    pub fn serialization(key: &str, source: serde_json::Error) -> Self {
        StoreError::Serialization {
            key: key.to_string(),
            source,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }

    /// Quote a user-supplied value without flooding the error message
    pub(crate) fn quote(value: &str) -> String {
        if value.chars().count() <= MAX_QUOTED_LENGTH {
            format!("'{}'", value)
        } else {
            let head: String = value.chars().take(MAX_QUOTED_LENGTH).collect();
            format!("'{}...'", head)
        }
    }

    /// True for failures of the underlying medium (as opposed to bad data)
    pub fn is_persistence(&self) -> bool {
        matches!(self, StoreError::Persistence(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_truncates_long_values() {
        assert_eq!(StoreError::quote("abc"), "'abc'");
        let long = "x".repeat(200);
        let quoted = StoreError::quote(&long);
        assert!(quoted.ends_with("...'"));
        assert_eq!(quoted.len(), MAX_QUOTED_LENGTH + 5);
    }

    #[test]
    fn test_persistence_from_io() {
        let err: StoreError = std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into();
        assert!(err.is_persistence());
        assert!(err.to_string().contains("disk gone"));
    }
}
