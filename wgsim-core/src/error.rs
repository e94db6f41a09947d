use thiserror::Error;

/// Hard failures: malformed source stops processing, and a dispatch that
/// cannot start at all (missing entry point, bad workgroup size) aborts.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("Syntax error: {message}")]
    Syntax { message: String, line: usize },

    #[error("Parse error at line {line} near '{lexeme}': {message}")]
    Parse {
        message: String,
        line: usize,
        lexeme: String,
    },

    #[error("Execution error: {0}")]
    Exec(String),

    #[error("Layout error: {0}")]
    Layout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShaderError {
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Syntax { line, .. } | Self::Parse { line, .. } => Some(*line),
            Self::Exec(_) | Self::Layout(_) | Self::Io(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ShaderError>;

/// Recoverable semantic errors raised while executing a shader.
///
/// The executor reports these and keeps going with the next statement, so a
/// shader that calls an unsupported built-in still runs to completion with
/// degraded results at that point.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecError {
    #[error("line {line}: unknown identifier '{name}'")]
    UnknownIdentifier { name: String, line: usize },

    #[error("line {line}: unknown function '{name}'")]
    UnknownFunction { name: String, line: usize },

    #[error("line {line}: type mismatch: {message}")]
    TypeMismatch { message: String, line: usize },

    #[error("line {line}: '{name}' expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
        line: usize,
    },

    #[error("line {line}: invalid swizzle '{swizzle}'")]
    InvalidSwizzle { swizzle: String, line: usize },

    #[error("line {line}: index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: i64, len: usize, line: usize },

    #[error("line {line}: '{name}' is not supported")]
    Unsupported { name: String, line: usize },

    #[error("line {line}: vector length mismatch ({left} vs {right})")]
    VectorLength { left: usize, right: usize, line: usize },

    #[error("line {line}: {message}")]
    Other { message: String, line: usize },
}

impl ExecError {
    pub fn line(&self) -> usize {
        match self {
            Self::UnknownIdentifier { line, .. }
            | Self::UnknownFunction { line, .. }
            | Self::TypeMismatch { line, .. }
            | Self::Arity { line, .. }
            | Self::InvalidSwizzle { line, .. }
            | Self::IndexOutOfBounds { line, .. }
            | Self::Unsupported { line, .. }
            | Self::VectorLength { line, .. }
            | Self::Other { line, .. } => *line,
        }
    }

    /// Attach a source line to an error raised by code that had none (value
    /// helpers report line 0).
    pub fn at(mut self, at: usize) -> Self {
        let line = match &mut self {
            Self::UnknownIdentifier { line, .. }
            | Self::UnknownFunction { line, .. }
            | Self::TypeMismatch { line, .. }
            | Self::Arity { line, .. }
            | Self::InvalidSwizzle { line, .. }
            | Self::IndexOutOfBounds { line, .. }
            | Self::Unsupported { line, .. }
            | Self::VectorLength { line, .. }
            | Self::Other { line, .. } => line,
        };
        if *line == 0 {
            *line = at;
        }
        self
    }

    pub fn mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
            line: 0,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
            line: 0,
        }
    }
}

pub type ExecResult<T> = std::result::Result<T, ExecError>;

#[macro_export]
macro_rules! bail_syntax {
    ($line:expr, $($arg:tt)*) => {
        return Err($crate::error::ShaderError::Syntax { message: format!($($arg)*), line: $line })
    };
}

#[macro_export]
macro_rules! bail_parse_at {
    ($token:expr, $($arg:tt)*) => {
        return Err($crate::error::ShaderError::Parse {
            message: format!($($arg)*),
            line: $token.line,
            lexeme: $token.lexeme.clone(),
        })
    };
}

#[macro_export]
macro_rules! bail_exec {
    ($($arg:tt)*) => {
        return Err($crate::error::ShaderError::Exec(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! bail_mismatch {
    ($($arg:tt)*) => {
        return Err($crate::error::ExecError::mismatch(format!($($arg)*)))
    };
}
