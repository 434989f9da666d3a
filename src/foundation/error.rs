/// Convenience result type used across Luma.
pub type LumaResult<T> = Result<T, LumaError>;

/// Compiler diagnostic produced when a shader program fails to build.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("program `{label}` failed to compile: {diagnostic}")]
pub struct ShaderCompileError {
    /// Label of the program that failed.
    pub label: String,
    /// Diagnostic text reported by the compiler.
    pub diagnostic: String,
}

impl ShaderCompileError {
    /// Build a compile error for `label`.
    pub fn new(label: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            diagnostic: diagnostic.into(),
        }
    }
}

/// Top-level error taxonomy used by pipeline APIs.
#[derive(thiserror::Error, Debug)]
pub enum LumaError {
    /// Invalid user-provided parameters or graph wiring.
    #[error("validation error: {0}")]
    Validation(String),

    /// A shader program could not be compiled or linked.
    #[error("shader compile error: {0}")]
    Shader(#[from] ShaderCompileError),

    /// The render backend rejected a request.
    #[error("backend error: {0}")]
    Backend(String),

    /// The processing queue is gone or was entered re-entrantly.
    #[error("queue error: {0}")]
    Queue(String),

    /// Filesystem errors while loading or exporting images.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped lower-level error from dependencies.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LumaError {
    /// Build a [`LumaError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`LumaError::Backend`] value.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Build a [`LumaError::Queue`] value.
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }
}

impl From<image::ImageError> for LumaError {
    fn from(err: image::ImageError) -> Self {
        Self::Other(anyhow::Error::new(err))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
