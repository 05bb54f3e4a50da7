use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConversionError>;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("invalid {hash_type} hash value: {value}")]
    InvalidHashValue { hash_type: String, value: String },

    #[error("no composite separator found in {attribute_type} value: {value}")]
    CompositeSeparator {
        attribute_type: String,
        value: String,
    },

    #[error("missing required field '{field}' on {context}")]
    MissingField { field: &'static str, context: String },

    #[error("unsupported {kind} type: {name}")]
    UnsupportedType { kind: &'static str, name: String },

    #[error("unknown internal dispatch key: {0}")]
    UnknownDispatch(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper functions for creating specific errors
impl ConversionError {
    pub fn invalid_hash<S: Into<String>, V: Into<String>>(hash_type: S, value: V) -> Self {
        ConversionError::InvalidHashValue {
            hash_type: hash_type.into(),
            value: value.into(),
        }
    }

    pub fn composite<S: Into<String>, V: Into<String>>(attribute_type: S, value: V) -> Self {
        ConversionError::CompositeSeparator {
            attribute_type: attribute_type.into(),
            value: value.into(),
        }
    }

    pub fn missing_field<S: Into<String>>(field: &'static str, context: S) -> Self {
        ConversionError::MissingField {
            field,
            context: context.into(),
        }
    }

    pub fn unsupported<S: Into<String>>(kind: &'static str, name: S) -> Self {
        ConversionError::UnsupportedType {
            kind,
            name: name.into(),
        }
    }

    pub fn dispatch<S: Into<String>>(key: S) -> Self {
        ConversionError::UnknownDispatch(key.into())
    }

    /// Recoverable errors degrade to a fallback representation at the
    /// dispatch boundary; everything else is reported and the item skipped.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConversionError::InvalidHashValue { .. } | ConversionError::CompositeSeparator { .. }
        )
    }
}

/// Accumulates the warnings and errors raised during one conversion run.
///
/// Conversions never abort on malformed items; they degrade and record the
/// issue here so the caller can inspect the run afterwards.
#[derive(Debug, Default, Clone)]
pub struct ConversionLog {
    warnings: Vec<String>,
    errors: Vec<String>,
}

impl ConversionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.errors.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }

    pub fn clear(&mut self) {
        self.warnings.clear();
        self.errors.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(ConversionError::invalid_hash("SHA256", "abc").is_recoverable());
        assert!(ConversionError::composite("domain|ip", "no-separator").is_recoverable());
        assert!(!ConversionError::dispatch("bogus").is_recoverable());
    }

    #[test]
    fn log_accumulates() {
        let mut log = ConversionLog::new();
        log.warn("first");
        log.error("second");
        assert_eq!(log.warnings(), ["first"]);
        assert_eq!(log.errors(), ["second"]);
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty());
    }
}
