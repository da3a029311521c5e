use thiserror::Error;

/// Main error type for the autotrace engine
#[derive(Error, Debug, Clone)]
pub enum AutotraceError {
    /// Operand shapes are incompatible for the requested operation
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// A node value or gradient was read at an index that was never written
    #[error("Undefined reference: {0}")]
    UndefinedReference(String),

    /// Invalid operator geometry or engine configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Operation errors with context
    #[error("Operation error: {operation} - {message}")]
    OperationError {
        operation: String,
        message: String,
    },

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid state errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// IO errors
    #[error("IO error: {0}")]
    IoError(String),
}

impl AutotraceError {
    /// Create a dimension mismatch error naming the failing operation
    pub fn dimension_mismatch(operation: &str, expected: &str, got: &str) -> Self {
        AutotraceError::DimensionMismatch(format!(
            "{}: expected {}, got {}",
            operation, expected, got
        ))
    }

    /// Create an undefined reference error for a node slot
    pub fn undefined_reference(what: &str, index: usize) -> Self {
        AutotraceError::UndefinedReference(format!("{} at index {} is not defined", what, index))
    }

    /// Create an operation error with context
    pub fn operation_error(operation: &str, message: &str) -> Self {
        AutotraceError::OperationError {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: &str) -> Self {
        AutotraceError::ConfigurationError(message.to_string())
    }
}

impl From<std::io::Error> for AutotraceError {
    fn from(err: std::io::Error) -> Self {
        AutotraceError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for AutotraceError {
    fn from(err: serde_json::Error) -> Self {
        AutotraceError::SerializationError(err.to_string())
    }
}

impl From<rand_distr::NormalError> for AutotraceError {
    fn from(err: rand_distr::NormalError) -> Self {
        AutotraceError::ConfigurationError(format!("Invalid normal distribution: {}", err))
    }
}

/// Result type for autotrace operations
pub type AutotraceResult<T> = Result<T, AutotraceError>;

/// Where in a procedure an error surfaced
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: String,
    pub expression: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            expression: None,
        }
    }

    pub fn with_expression(mut self, expression: &str) -> Self {
        self.expression = Some(expression.to_string());
        self
    }

    pub fn to_error_message(&self) -> String {
        match self.expression {
            Some(ref expression) => format!("{} of {}", self.operation, expression),
            None => self.operation.clone(),
        }
    }
}

/// Helper trait for adding context to errors
pub trait WithContext<T> {
    fn with_context<F>(self, f: F) -> AutotraceResult<T>
    where
        F: FnOnce() -> ErrorContext;
}

impl<T> WithContext<T> for AutotraceResult<T> {
    fn with_context<F>(self, f: F) -> AutotraceResult<T>
    where
        F: FnOnce() -> ErrorContext,
    {
        self.map_err(|e| {
            let context = f().to_error_message();
            match e {
                AutotraceError::DimensionMismatch(msg) => {
                    AutotraceError::DimensionMismatch(format!("{} (in {})", msg, context))
                }
                AutotraceError::UndefinedReference(msg) => {
                    AutotraceError::UndefinedReference(format!("{} (in {})", msg, context))
                }
                AutotraceError::OperationError { operation, message } => AutotraceError::OperationError {
                    operation,
                    message: format!("{} (in {})", message, context),
                },
                _ => e,
            }
        })
    }
}
