//! Foundation types for the vbscope engine.
//!
//! This module provides fundamental types used throughout the engine:
//! - [`ModuleId`], [`ProjectId`], [`LibraryId`] - Interned identities
//! - [`TextRange`], [`TextSize`] - Source positions
//! - [`LineCol`], [`LineIndex`], [`Selection`] - Line/column conversion
//! - [`Name`], [`Interner`] - Case-insensitive name interning
//!
//! This module has NO dependencies on other vbscope modules.

mod intern;
mod module_id;
mod span;

pub use intern::{Interner, Name, fold, is_identifier};
pub use module_id::{LibraryId, ModuleId, ProjectId};
pub use span::{LineCol, LineIndex, Selection, TextRange, TextSize};

// Re-export text-size types for convenience
pub use text_size;
