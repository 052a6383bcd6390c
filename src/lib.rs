//! # vbscope-base
//!
//! Incremental symbol engine for VBA projects: declarations, references and
//! the module dependency graph, kept current as the host edits modules.
//!
//! ## Module Structure (dependency order)
//!
//! ```text
//! session   → Host handle: input, passes, results
//!   ↓
//! pipeline  → Sync, parse, declarations, references; the coordinator
//!   ↓
//! hir       → Declarations, references, resolver, finder, states
//!   ↓
//! syntax    → Lexer, parser, module trees
//!   ↓
//! base      → Primitives (ModuleId, spans, name interning)
//! ```
//!
//! `project` supplies what comes from outside the host's module list:
//! external libraries and exported component files.

/// Foundation types: ModuleId, spans, name interning
pub mod base;

/// Declarations, references and the stores behind them
pub mod hir;

/// Resolution pipeline and pass coordinator
pub mod pipeline;

/// External libraries and the directory loader
pub mod project;

/// Lexer, parser and syntax trees
pub mod syntax;

pub mod config;
pub mod error;
pub mod session;

pub use base::{Interner, LineCol, LineIndex, ModuleId, Name, ProjectId, Selection, TextRange};
pub use config::SessionConfig;
pub use error::{LibraryError, ResolveError, SessionError, SyntaxError};
pub use hir::{
    Accessibility, ChangeSet, ComponentKind, DeclId, Declaration, DeclarationFinder,
    DeclarationKind, Diagnostic, DiagnosticKind, IdentifierReference, ParserState,
    StateChangedEvent,
};
pub use pipeline::PassOutcome;
pub use project::{ExternalLibrary, LibraryProvider, LibraryRegistry, ProjectLoader};
pub use session::{PassTicket, Session, SessionBuilder};

pub use tokio_util::sync::CancellationToken;
