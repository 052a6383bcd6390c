//! External libraries: pre-built declaration sets a project can reference.
//!
//! Type-library introspection is the host's job; it hands the engine an
//! [`ExternalLibrary`] through a [`LibraryProvider`]. [`vba_library`] is
//! the built-in `VBA` library every project references first.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::base::fold;
use crate::error::LibraryError;

// ============================================================================
// LIBRARY MODEL
// ============================================================================

/// What a library module declares itself as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LibraryModuleKind {
    /// Members are callable unqualified from any referencing project.
    Standard,
    /// A creatable class (`Collection`).
    Class,
    /// An enum whose members are constants (`VbMsgBoxStyle`).
    Enum,
}

/// What a library member is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LibraryMemberKind {
    Procedure,
    Function,
    PropertyGet,
    Variable,
    Constant,
    Event,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryParam {
    pub name: SmolStr,
    pub optional: bool,
    pub as_type: Option<SmolStr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryMember {
    pub name: SmolStr,
    pub kind: LibraryMemberKind,
    pub params: Vec<LibraryParam>,
    /// Return or value type name, if any.
    pub as_type: Option<SmolStr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryModule {
    pub name: SmolStr,
    pub kind: LibraryModuleKind,
    pub members: Vec<LibraryMember>,
}

impl LibraryModule {
    pub fn new(name: impl Into<SmolStr>, kind: LibraryModuleKind) -> Self {
        Self {
            name: name.into(),
            kind,
            members: Vec::new(),
        }
    }

    pub fn standard(name: impl Into<SmolStr>) -> Self {
        Self::new(name, LibraryModuleKind::Standard)
    }

    pub fn class(name: impl Into<SmolStr>) -> Self {
        Self::new(name, LibraryModuleKind::Class)
    }

    /// An enum with the given members.
    pub fn enumeration(name: impl Into<SmolStr>, members: &[&str]) -> Self {
        let mut module = Self::new(name, LibraryModuleKind::Enum);
        for member in members {
            module = module.member(*member, LibraryMemberKind::Constant, &[], Some("Long"));
        }
        module
    }

    /// Add a member. Parameter names ending in `?` are optional.
    pub fn member(
        mut self,
        name: impl Into<SmolStr>,
        kind: LibraryMemberKind,
        params: &[&str],
        as_type: Option<&str>,
    ) -> Self {
        let params = params
            .iter()
            .map(|p| {
                let (name, optional) = match p.strip_suffix('?') {
                    Some(name) => (name, true),
                    None => (*p, false),
                };
                LibraryParam {
                    name: SmolStr::new(name),
                    optional,
                    as_type: None,
                }
            })
            .collect();
        self.members.push(LibraryMember {
            name: name.into(),
            kind,
            params,
            as_type: as_type.map(SmolStr::new),
        });
        self
    }

    pub fn function(self, name: &str, params: &[&str], as_type: &str) -> Self {
        self.member(name, LibraryMemberKind::Function, params, Some(as_type))
    }

    pub fn procedure(self, name: &str, params: &[&str]) -> Self {
        self.member(name, LibraryMemberKind::Procedure, params, None)
    }

    pub fn property(self, name: &str, as_type: &str) -> Self {
        self.member(name, LibraryMemberKind::PropertyGet, &[], Some(as_type))
    }
}

/// A referenced type library as a plain declaration tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalLibrary {
    pub name: SmolStr,
    pub modules: Vec<LibraryModule>,
}

impl ExternalLibrary {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            modules: Vec::new(),
        }
    }

    pub fn with_module(mut self, module: LibraryModule) -> Self {
        self.modules.push(module);
        self
    }

    /// Total number of declarations the library will produce.
    pub fn declaration_count(&self) -> usize {
        1 + self
            .modules
            .iter()
            .map(|m| {
                1 + m.members.len()
                    + m.members.iter().map(|member| member.params.len()).sum::<usize>()
            })
            .sum::<usize>()
    }
}

// ============================================================================
// PROVIDERS
// ============================================================================

/// Supplies library declarations by name.
pub trait LibraryProvider: Send + Sync + fmt::Debug {
    fn load(&self, name: &str) -> Result<Arc<ExternalLibrary>, LibraryError>;
}

/// In-memory provider; hosts register what they introspected.
#[derive(Debug, Default)]
pub struct LibraryRegistry {
    libraries: RwLock<FxHashMap<SmolStr, Arc<ExternalLibrary>>>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace or add a library under its own name.
    pub fn register(&self, library: ExternalLibrary) {
        self.libraries
            .write()
            .insert(fold(&library.name), Arc::new(library));
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<ExternalLibrary>> {
        self.libraries.write().remove(&fold(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.libraries.read().contains_key(&fold(name))
    }
}

impl LibraryProvider for LibraryRegistry {
    fn load(&self, name: &str) -> Result<Arc<ExternalLibrary>, LibraryError> {
        self.libraries
            .read()
            .get(&fold(name))
            .cloned()
            .ok_or_else(|| LibraryError::NotFound {
                name: SmolStr::new(name),
            })
    }
}

// ============================================================================
// BUILT-IN VBA LIBRARY
// ============================================================================

/// Name of the library every project references implicitly.
pub const VBA_LIBRARY: &str = "VBA";

/// The subset of the `VBA` standard library the engine knows about.
pub fn vba_library() -> ExternalLibrary {
    use LibraryMemberKind::*;

    ExternalLibrary::new(VBA_LIBRARY)
        .with_module(
            LibraryModule::class("Debug")
                .procedure("Print", &["OutputList?"])
                .procedure("Assert", &["Condition"]),
        )
        .with_module(
            LibraryModule::standard("Interaction")
                .function(
                    "MsgBox",
                    &["Prompt", "Buttons?", "Title?", "HelpFile?", "Context?"],
                    "VbMsgBoxResult",
                )
                .function(
                    "InputBox",
                    &["Prompt", "Title?", "Default?", "XPos?", "YPos?"],
                    "String",
                )
                .procedure("Beep", &[])
                .function("Shell", &["PathName", "WindowStyle?"], "Double")
                .function("Environ", &["Expression"], "String")
                .function("DoEvents", &[], "Integer")
                .function("CreateObject", &["Class", "ServerName?"], "Object")
                .function("IIf", &["Expression", "TruePart", "FalsePart"], "Variant"),
        )
        .with_module(
            LibraryModule::standard("Strings")
                .function("Len", &["Expression"], "Long")
                .function("Left", &["String", "Length"], "String")
                .function("Mid", &["String", "Start", "Length?"], "String")
                .function("Right", &["String", "Length"], "String")
                .function("Trim", &["String"], "String")
                .function("UCase", &["String"], "String")
                .function("LCase", &["String"], "String")
                .function("InStr", &["Start?", "String1", "String2", "Compare?"], "Long")
                .function(
                    "Replace",
                    &["Expression", "Find", "Replace", "Start?", "Count?", "Compare?"],
                    "String",
                )
                .function("Split", &["Expression", "Delimiter?", "Limit?", "Compare?"], "Variant")
                .function("Join", &["SourceArray", "Delimiter?"], "String")
                .function("Format", &["Expression", "Format?"], "String"),
        )
        .with_module(
            LibraryModule::standard("Conversion")
                .function("CStr", &["Expression"], "String")
                .function("CLng", &["Expression"], "Long")
                .function("CInt", &["Expression"], "Integer")
                .function("CDbl", &["Expression"], "Double")
                .function("CBool", &["Expression"], "Boolean")
                .function("CDate", &["Expression"], "Date")
                .function("Val", &["String"], "Double"),
        )
        .with_module(
            LibraryModule::standard("Information")
                .function("IsNumeric", &["Expression"], "Boolean")
                .function("IsEmpty", &["Expression"], "Boolean")
                .function("IsNull", &["Expression"], "Boolean")
                .function("IsObject", &["Expression"], "Boolean")
                .function("IsArray", &["VarName"], "Boolean")
                .function("TypeName", &["VarName"], "String")
                .function("VarType", &["VarName"], "Integer")
                .function("UBound", &["Arrayname", "Dimension?"], "Long")
                .function("LBound", &["Arrayname", "Dimension?"], "Long")
                .function("Err", &[], "ErrObject"),
        )
        .with_module(
            LibraryModule::standard("DateTime")
                .function("Now", &[], "Date")
                .property("Date", "Date")
                .property("Time", "Date"),
        )
        .with_module(
            LibraryModule::class("Collection")
                .procedure("Add", &["Item", "Key?", "Before?", "After?"])
                .function("Count", &[], "Long")
                .function("Item", &["Index"], "Variant")
                .procedure("Remove", &["Index"]),
        )
        .with_module(
            LibraryModule::class("ErrObject")
                .property("Number", "Long")
                .property("Description", "String")
                .property("Source", "String")
                .procedure("Clear", &[])
                .procedure(
                    "Raise",
                    &["Number", "Source?", "Description?", "HelpFile?", "HelpContext?"],
                ),
        )
        .with_module(LibraryModule::enumeration(
            "VbMsgBoxStyle",
            &[
                "vbOKOnly",
                "vbOKCancel",
                "vbYesNoCancel",
                "vbYesNo",
                "vbCritical",
                "vbQuestion",
                "vbExclamation",
                "vbInformation",
            ],
        ))
        .with_module(LibraryModule::enumeration(
            "VbMsgBoxResult",
            &["vbOK", "vbCancel", "vbAbort", "vbRetry", "vbIgnore", "vbYes", "vbNo"],
        ))
        .with_module(
            LibraryModule::standard("Constants")
                .member("vbCrLf", Constant, &[], Some("String"))
                .member("vbNewLine", Constant, &[], Some("String"))
                .member("vbTab", Constant, &[], Some("String"))
                .member("vbNullString", Constant, &[], Some("String")),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup_ignores_case() {
        let registry = LibraryRegistry::new();
        registry.register(ExternalLibrary::new("Excel"));

        assert!(registry.load("EXCEL").is_ok());
        assert!(matches!(
            registry.load("Word"),
            Err(LibraryError::NotFound { .. })
        ));

        registry.unregister("excel");
        assert!(!registry.contains("Excel"));
    }

    #[test]
    fn test_optional_params_from_suffix() {
        let module = LibraryModule::standard("M").function("F", &["A", "B?"], "Long");
        let params = &module.members[0].params;
        assert!(!params[0].optional);
        assert!(params[1].optional);
        assert_eq!(params[1].name, "B");
    }

    #[test]
    fn test_vba_library_shape() {
        let vba = vba_library();
        assert_eq!(vba.name, VBA_LIBRARY);
        let strings = vba.modules.iter().find(|m| m.name == "Strings").unwrap();
        assert!(strings.members.iter().any(|m| m.name == "Len"));
        let collection = vba.modules.iter().find(|m| m.name == "Collection").unwrap();
        assert_eq!(collection.kind, LibraryModuleKind::Class);
        assert!(vba.declaration_count() > vba.modules.len());
    }
}
