use thiserror::Error;

#[derive(Debug, Error, Eq, PartialEq)]
/// Enum for various errors in stream aggregation.
pub enum StreamAggrError {
  #[error("Invalid configuration. {0}")]
  InvalidConfiguration(String),

  #[error("Invalid duration. {0}")]
  InvalidDuration(String),

  #[error("Invalid number. {0}")]
  InvalidNumber(String),

  #[error("Invalid series selector. {0}")]
  InvalidSeriesSelector(String),

  #[error("Invalid relabel config. {0}")]
  InvalidRelabelConfig(String),

  #[error("Unsupported output. {0}")]
  UnknownOutput(String),

  #[error("I/O error. {0}")]
  Io(String),

  #[error("{0}")]
  General(String)
}

pub type StreamAggrResult<T> = Result<T, StreamAggrError>;

impl From<std::io::Error> for StreamAggrError {
  fn from(e: std::io::Error) -> Self {
    StreamAggrError::Io(e.to_string())
  }
}
