//! Error types for puente.

/// Result type alias for puente operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while wrapping or converting batches.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A column's declared shape or dtype disagrees with its backing buffer.
    #[error("Shape error: {message}")]
    Shape {
        /// Description of the inconsistency.
        message: String,
    },

    /// No shared-memory or copy path exists between two representations.
    #[error("Cannot convert {from} to {to}: {reason}")]
    UnsupportedConversion {
        /// The source representation or dtype.
        from: String,
        /// The requested target representation.
        to: String,
        /// Why no path exists.
        reason: String,
    },

    /// Two entries of one mapping share a name.
    #[error("Duplicate column '{name}'")]
    DuplicateColumn {
        /// The repeated name.
        name: String,
    },

    /// Column not found in a batch.
    #[error("Column '{name}' not found in batch")]
    ColumnNotFound {
        /// The name of the missing column.
        name: String,
    },

    /// A dataset was built from no batches.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// Record batches of one dataset disagree on their schema.
    #[error("Schema mismatch: {message}")]
    SchemaMismatch {
        /// Description of the schema mismatch.
        message: String,
    },

    /// The upstream iterator failed to produce a batch.
    #[error("Upstream batch error: {message}")]
    Upstream {
        /// Description of the upstream failure.
        message: String,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// A user-registered batch transform failed.
    #[error("Transform error: {message}")]
    Transform {
        /// Description of the transform error.
        message: String,
    },

    /// Arrow error while building or slicing host arrays.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl Error {
    /// Create a shape error.
    pub fn shape(message: impl Into<String>) -> Self {
        Self::Shape {
            message: message.into(),
        }
    }

    /// Create an unsupported conversion error.
    pub fn unsupported(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnsupportedConversion {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }

    /// Create a duplicate column error.
    pub fn duplicate_column(name: impl Into<String>) -> Self {
        Self::DuplicateColumn { name: name.into() }
    }

    /// Create a column not found error.
    pub fn column_not_found(name: impl Into<String>) -> Self {
        Self::ColumnNotFound { name: name.into() }
    }

    /// Create a schema mismatch error.
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Create an upstream batch error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a transform error.
    pub fn transform(message: impl Into<String>) -> Self {
        Self::Transform {
            message: message.into(),
        }
    }

    /// Returns true for errors raised because no conversion path exists.
    pub fn is_unsupported_conversion(&self) -> bool {
        matches!(self, Self::UnsupportedConversion { .. })
    }

    /// Returns true for shape/dtype consistency errors.
    pub fn is_shape(&self) -> bool {
        matches!(self, Self::Shape { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error() {
        let err = Error::shape("expected 12 bytes, got 8");
        assert!(err.is_shape());
        assert!(err.to_string().contains("expected 12 bytes, got 8"));
    }

    #[test]
    fn test_unsupported_conversion() {
        let err = Error::unsupported("Utf8", "framework", "no tensor dtype");
        assert!(err.is_unsupported_conversion());
        let msg = err.to_string();
        assert!(msg.contains("Utf8"));
        assert!(msg.contains("framework"));
        assert!(msg.contains("no tensor dtype"));
    }

    #[test]
    fn test_duplicate_column() {
        let err = Error::duplicate_column("tags__values");
        assert!(err.to_string().contains("tags__values"));
    }

    #[test]
    fn test_column_not_found() {
        let err = Error::column_not_found("label");
        assert!(err.to_string().contains("label"));
    }

    #[test]
    fn test_invalid_config() {
        let err = Error::invalid_config("batch_size must be positive");
        assert!(err.to_string().contains("batch_size must be positive"));
    }

    #[test]
    fn test_dataset_errors() {
        assert!(Error::EmptyDataset.to_string().contains("empty"));
        let err = Error::schema_mismatch("batch 1 differs");
        assert!(err.to_string().contains("batch 1 differs"));
    }

    #[test]
    fn test_transform_error() {
        let err = Error::transform("sample weight missing");
        assert!(err.to_string().contains("sample weight missing"));
        assert!(!err.is_shape());
    }

    #[test]
    fn test_arrow_error_from() {
        let err: Error = arrow::error::ArrowError::ComputeError("boom".to_string()).into();
        assert!(err.to_string().contains("boom"));
    }
}
