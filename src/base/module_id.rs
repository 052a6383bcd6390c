//! Interned identifiers for modules, projects and external libraries.

use std::fmt;

/// An interned identifier for a user module (a VBA component).
///
/// `ModuleId` is a lightweight handle (just a u32) that uniquely identifies
/// a module within the session. The qualified name and source text are
/// stored in the [`ModuleSet`](crate::hir::ModuleSet).
///
/// Using `ModuleId` instead of `QualifiedModuleName` throughout the codebase:
/// - Makes comparisons O(1) instead of O(n)
/// - Enables cheap copying and hashing in dependency maps
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ModuleId(pub u32);

impl ModuleId {
    /// Create a new ModuleId from a raw index.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

impl From<u32> for ModuleId {
    #[inline]
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// An interned identifier for a user project.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ProjectId(pub u32);

impl ProjectId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProjectId({})", self.0)
    }
}

/// An interned identifier for an external (type-library) reference.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct LibraryId(pub u32);

impl LibraryId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LibraryId({})", self.0)
    }
}
