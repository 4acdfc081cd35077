//! Core error types for the Lumen film.

/// A specialized Result type for Lumen operations.
pub type LumenResult<T> = Result<T, LumenError>;

/// Top-level error type encompassing all Lumen subsystems.
#[derive(Debug, thiserror::Error)]
pub enum LumenError {
    #[error("device error: {0}")]
    Device(String),

    #[error("allocation of {size} bytes for buffer {label} failed: {message}")]
    Allocation {
        label: String,
        size: usize,
        message: String,
    },

    #[error("compile error in program {program}: {message}")]
    Compile { program: String, message: String },

    #[error("kernel entry point {entry} not found in program {program}")]
    KernelNotFound { program: String, entry: String },

    #[error("unknown device handle: {0}")]
    UnknownHandle(String),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("readback error: {0}")]
    Readback(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),
}

impl LumenError {
    /// Create an allocation error.
    pub fn allocation(label: impl Into<String>, size: usize, message: impl Into<String>) -> Self {
        LumenError::Allocation {
            label: label.into(),
            size,
            message: message.into(),
        }
    }

    /// Create a compile error for a named program.
    pub fn compile(program: impl Into<String>, message: impl Into<String>) -> Self {
        LumenError::Compile {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Create a missing entry point error.
    pub fn kernel_not_found(program: impl Into<String>, entry: impl Into<String>) -> Self {
        LumenError::KernelNotFound {
            program: program.into(),
            entry: entry.into(),
        }
    }
}
