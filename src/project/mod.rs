//! Project inputs that come from outside the host's module list: external
//! libraries and exported component files.

mod library;
mod loader;

pub use library::{
    ExternalLibrary, LibraryMember, LibraryMemberKind, LibraryModule, LibraryModuleKind,
    LibraryParam, LibraryProvider, LibraryRegistry, VBA_LIBRARY, vba_library,
};
pub use loader::{
    ComponentFile, LoadReport, ProjectLoader, collect_component_paths, read_component,
};
