use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Parse error at position {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer error: {0}")]
    Buffer(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Unsupported expression: {0}")]
    Unsupported(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl GraphError {
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        GraphError::Parse { position, message: message.into() }
    }

    /// True for errors raised while compiling a statement, before any
    /// operator has run.
    pub fn is_compile_error(&self) -> bool {
        matches!(self, GraphError::Parse { .. } | GraphError::Bind(_) | GraphError::Plan(_))
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;

// Error conversions for common error types

impl From<bincode::error::EncodeError> for GraphError {
    fn from(e: bincode::error::EncodeError) -> Self {
        GraphError::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for GraphError {
    fn from(e: bincode::error::DecodeError) -> Self {
        GraphError::Serialization(e.to_string())
    }
}
