//! High-level IR: declarations, references and the stores behind them.
//!
//! ## Key Types
//!
//! - [`ModuleSet`] - Host components and their text
//! - [`DeclarationGraph`] - Mutable store of declarations and references
//! - [`ModuleDependencyTracker`] - Which modules reference which
//! - [`StateManager`] - Per-module and aggregate pipeline states
//! - [`Resolver`] - VBA name lookup from one usage site
//! - [`DeclarationFinder`] - Immutable per-pass query surface

mod declaration;
mod dependencies;
mod diagnostics;
mod finder;
mod graph;
mod ids;
mod input;
mod resolve;
mod source;
mod state;

pub use declaration::{
    Accessibility, Declaration, DeclarationKind, DeclaredType, INTRINSIC_TYPES,
    IdentifierReference, ScopeLevel, UnboundReference, intrinsic_for_hint,
};
pub use dependencies::ModuleDependencyTracker;
pub use diagnostics::{
    Diagnostic, DiagnosticCollector, DiagnosticKind, RelatedInfo, Severity, codes,
};
pub use finder::DeclarationFinder;
pub use graph::{DeclarationGraph, DeclarationSet, LibraryDeclarations, ModuleDeclarations};
pub use ids::{DeclId, DeclOwner, LocalDeclId};
pub use input::ChangeSet;
pub use resolve::{
    AccessKind, LibraryScope, PathResolution, ProjectScope, ResolutionIndex, ResolveResult,
    Resolver,
};
pub use source::{ComponentKind, ModuleSet, ModuleSource, ProjectEntry, Upserted};
pub use state::{ParserState, StateChangedEvent, StateManager};
