//! Semantic identifiers for declarations.

use std::fmt;

use crate::base::{LibraryId, ModuleId, ProjectId};

/// Where a declaration lives.
///
/// User modules and external libraries each own a private id space, so a
/// module can be rebuilt without renumbering anything outside it.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum DeclOwner {
    /// The declaration of a user project itself.
    Project(ProjectId),
    /// A user module and everything declared in it.
    Module(ModuleId),
    /// A referenced external library.
    Library(LibraryId),
}

impl DeclOwner {
    pub fn module(self) -> Option<ModuleId> {
        match self {
            DeclOwner::Module(module) => Some(module),
            _ => None,
        }
    }

    pub fn library(self) -> Option<LibraryId> {
        match self {
            DeclOwner::Library(library) => Some(library),
            _ => None,
        }
    }

    /// Whether the owner is user code (a project or one of its modules).
    pub fn is_user(self) -> bool {
        !matches!(self, DeclOwner::Library(_))
    }
}

impl fmt::Debug for DeclOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeclOwner::Project(id) => write!(f, "project#{}", id.index()),
            DeclOwner::Module(id) => write!(f, "module#{}", id.index()),
            DeclOwner::Library(id) => write!(f, "library#{}", id.index()),
        }
    }
}

/// A globally unique identifier for a declaration.
///
/// Combines the owner with an owner-local ID. This allows efficient
/// per-module invalidation while still having globally unique identifiers.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DeclId {
    /// The project, module or library containing this declaration
    pub owner: DeclOwner,
    /// The local ID within the owner
    pub local: LocalDeclId,
}

impl DeclId {
    /// Create a new DeclId.
    #[inline]
    pub const fn new(owner: DeclOwner, local: LocalDeclId) -> Self {
        Self { owner, local }
    }

    /// The declaration of a user project.
    #[inline]
    pub const fn project(project: ProjectId) -> Self {
        Self::new(DeclOwner::Project(project), LocalDeclId::ROOT)
    }

    /// The declaration of a user module.
    #[inline]
    pub const fn module(module: ModuleId) -> Self {
        Self::new(DeclOwner::Module(module), LocalDeclId::ROOT)
    }

    /// Whether this is the root declaration of its owner (project, module
    /// or library project).
    #[inline]
    pub fn is_root(self) -> bool {
        self.local == LocalDeclId::ROOT
    }
}

impl fmt::Debug for DeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeclId({:?}:{})", self.owner, self.local.0)
    }
}

/// An owner-local declaration identifier.
///
/// These are assigned sequentially as declarations are built for a module;
/// the module declaration itself is always [`LocalDeclId::ROOT`].
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct LocalDeclId(pub u32);

impl LocalDeclId {
    pub const ROOT: LocalDeclId = LocalDeclId(0);

    /// Create a new LocalDeclId.
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

impl fmt::Debug for LocalDeclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocalDeclId({})", self.0)
    }
}

impl From<u32> for LocalDeclId {
    #[inline]
    fn from(id: u32) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decl_id_equality() {
        let module1 = DeclOwner::Module(ModuleId::new(1));
        let module2 = DeclOwner::Module(ModuleId::new(2));

        let a = DeclId::new(module1, LocalDeclId::new(0));
        let b = DeclId::new(module1, LocalDeclId::new(0));
        let c = DeclId::new(module1, LocalDeclId::new(1));
        let d = DeclId::new(module2, LocalDeclId::new(0));

        assert_eq!(a, b);
        assert_ne!(a, c); // different local
        assert_ne!(a, d); // different module
    }

    #[test]
    fn test_same_index_different_owner_kind() {
        let module = DeclId::module(ModuleId::new(3));
        let project = DeclId::project(ProjectId::new(3));
        let library = DeclId::new(DeclOwner::Library(LibraryId::new(3)), LocalDeclId::ROOT);

        assert_ne!(module, project);
        assert_ne!(module, library);
        assert!(module.is_root() && project.is_root());
        assert!(module.owner.is_user());
        assert!(!library.owner.is_user());
    }

    #[test]
    fn test_decl_id_orders_by_owner_then_local() {
        let m = DeclOwner::Module(ModuleId::new(1));
        let first = DeclId::new(m, LocalDeclId::new(2));
        let second = DeclId::new(m, LocalDeclId::new(7));
        let later_module = DeclId::new(DeclOwner::Module(ModuleId::new(2)), LocalDeclId::new(0));

        assert!(first < second);
        assert!(second < later_module);
    }
}
