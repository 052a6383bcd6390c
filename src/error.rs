//! Error types.
//!
//! Problems inside a module (bad syntax, unknown names) are not errors in the
//! `Result` sense: they become diagnostics and module states so the rest of
//! the project keeps resolving. The types here cover the places where a
//! caller gets a `Result` back:
//!
//! - [`SyntaxError`]: one parse error, carried in parse output and turned
//!   into a diagnostic by the parse stage
//! - [`ResolveError`]: a module whose tree cannot be resolved at all
//! - [`LibraryError`]: a referenced library a provider could not load
//! - [`SessionError`]: invalid host input

use smol_str::SmolStr;
use thiserror::Error;

use crate::base::{LineCol, TextRange};

/// A syntax error with its position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{position}: {message}")]
pub struct SyntaxError {
    pub message: SmolStr,
    pub position: LineCol,
    pub range: TextRange,
}

/// A module that declaration resolution had to give up on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("module `{module}` was parsed with a non-module start rule")]
    UnexpectedTreeShape { module: SmolStr },
}

/// A library reference that could not be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LibraryError {
    #[error("library `{name}` is not available")]
    NotFound { name: SmolStr },

    #[error("library `{name}` failed to load: {reason}")]
    LoadFailed { name: SmolStr, reason: SmolStr },
}

impl LibraryError {
    /// Name of the library the error is about.
    pub fn library_name(&self) -> &str {
        match self {
            LibraryError::NotFound { name } | LibraryError::LoadFailed { name, .. } => name,
        }
    }
}

/// Invalid input from the host.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("`{0}` is not a valid project or component name")]
    InvalidName(SmolStr),

    #[error("no module `{project}.{component}` in the session")]
    UnknownModule { project: SmolStr, component: SmolStr },

    #[error("no project `{0}` in the session")]
    UnknownProject(SmolStr),

    #[error("failed to read `{path}`")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk `{path}`")]
    Walk {
        path: std::path::PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to build the worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to spawn the pass thread")]
    Spawn(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_display_uses_one_indexed_position() {
        let err = SyntaxError {
            message: "expected `Then`".into(),
            position: LineCol::new(2, 4),
            range: TextRange::empty(0.into()),
        };
        assert_eq!(err.to_string(), "3:5: expected `Then`");
    }

    #[test]
    fn test_library_error_name() {
        let err = LibraryError::LoadFailed {
            name: "Excel".into(),
            reason: "corrupt".into(),
        };
        assert_eq!(err.library_name(), "Excel");
        assert_eq!(err.to_string(), "library `Excel` failed to load: corrupt");
    }
}
