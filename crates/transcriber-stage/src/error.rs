use thiserror::Error;

/// Failure reported by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
  /// Retryable, e.g. rate limiting or a dropped connection.
  #[error("transient: {message}")]
  Transient { message: String },

  /// Not retryable, e.g. malformed input or an unsupported codec.
  #[error("permanent: {message}")]
  Permanent { message: String },
}

impl StageError {
  pub fn transient(message: impl Into<String>) -> Self {
    Self::Transient {
      message: message.into(),
    }
  }

  pub fn permanent(message: impl Into<String>) -> Self {
    Self::Permanent {
      message: message.into(),
    }
  }

  pub fn is_transient(&self) -> bool {
    matches!(self, Self::Transient { .. })
  }

  pub fn message(&self) -> &str {
    match self {
      Self::Transient { message } | Self::Permanent { message } => message,
    }
  }
}
