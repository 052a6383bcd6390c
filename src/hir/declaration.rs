//! Declarations and the references that point at them.

use smol_str::SmolStr;

use super::ids::DeclId;
use super::source::ComponentKind;
use crate::base::{ModuleId, Name, Selection, TextRange};
use crate::syntax::TypePath;

// ============================================================================
// KINDS
// ============================================================================

/// The closed set of things a declaration can be.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeclarationKind {
    Project,
    ProceduralModule,
    ClassModule,
    /// A `Sub`.
    Procedure,
    Function,
    PropertyGet,
    PropertyLet,
    PropertySet,
    Parameter,
    Variable,
    Constant,
    Enumeration,
    EnumerationMember,
    UserDefinedType,
    UserDefinedTypeMember,
    Event,
    /// A `Declare Sub` or a library procedure.
    LibraryProcedure,
    /// A `Declare Function` or a library function.
    LibraryFunction,
}

impl DeclarationKind {
    pub fn is_module(self) -> bool {
        matches!(self, Self::ProceduralModule | Self::ClassModule)
    }

    /// Anything with a parameter list that can be called.
    pub fn is_procedure(self) -> bool {
        matches!(
            self,
            Self::Procedure
                | Self::Function
                | Self::PropertyGet
                | Self::PropertyLet
                | Self::PropertySet
                | Self::LibraryProcedure
                | Self::LibraryFunction
        )
    }

    pub fn is_property(self) -> bool {
        matches!(self, Self::PropertyGet | Self::PropertyLet | Self::PropertySet)
    }

    /// Kinds that may appear after `As`, `New` or `Implements`.
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Self::ClassModule | Self::UserDefinedType | Self::Enumeration
        )
    }

    /// Procedures whose name can be assigned to set the return value.
    pub fn returns_value(self) -> bool {
        matches!(
            self,
            Self::Function | Self::PropertyGet | Self::LibraryFunction
        )
    }

    /// Human-readable kind name for messages.
    pub fn display(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::ProceduralModule => "module",
            Self::ClassModule => "class module",
            Self::Procedure => "procedure",
            Self::Function => "function",
            Self::PropertyGet => "property get",
            Self::PropertyLet => "property let",
            Self::PropertySet => "property set",
            Self::Parameter => "parameter",
            Self::Variable => "variable",
            Self::Constant => "constant",
            Self::Enumeration => "enum",
            Self::EnumerationMember => "enum member",
            Self::UserDefinedType => "user-defined type",
            Self::UserDefinedTypeMember => "user-defined type member",
            Self::Event => "event",
            Self::LibraryProcedure => "library procedure",
            Self::LibraryFunction => "library function",
        }
    }
}

/// Declared visibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Accessibility {
    Private,
    Friend,
    Public,
    Global,
    /// No keyword written (module members default to public, locals are
    /// implicitly private to their procedure).
    Implicit,
}

impl Accessibility {
    pub fn is_private(self) -> bool {
        self == Accessibility::Private
    }
}

/// How close a declaration sits to the code that uses it. Lower is closer;
/// position queries prefer the closest scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScopeLevel {
    Local,
    Member,
    Module,
    Project,
}

// ============================================================================
// DECLARED TYPES
// ============================================================================

/// Built-in type names that never resolve to a declaration.
pub const INTRINSIC_TYPES: &[&str] = &[
    "Any", "Boolean", "Byte", "Currency", "Date", "Decimal", "Double", "Integer", "Long",
    "LongLong", "LongPtr", "Object", "Single", "String",
];

/// Intrinsic type implied by a type-hint suffix (`s$` is a `String`).
pub fn intrinsic_for_hint(hint: char) -> Option<&'static str> {
    match hint {
        '%' => Some("Integer"),
        '&' => Some("Long"),
        '!' => Some("Single"),
        '#' => Some("Double"),
        '@' => Some("Currency"),
        '$' => Some("String"),
        _ => None,
    }
}

/// The type written on a declaration.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum DeclaredType {
    /// No `As` clause, or `As Variant`.
    #[default]
    Variant,
    Intrinsic(SmolStr),
    /// A class, user-defined type or enum; `resolved` is filled by
    /// reference resolution.
    Named {
        path: TypePath,
        is_new: bool,
        resolved: Option<DeclId>,
    },
}

impl DeclaredType {
    /// Classify a written type path.
    pub fn from_path(path: TypePath, is_new: bool) -> Self {
        if let [single] = path.segments.as_slice() {
            if single.name.eq_ignore_ascii_case("Variant") {
                return DeclaredType::Variant;
            }
            if let Some(intrinsic) = INTRINSIC_TYPES
                .iter()
                .find(|t| t.eq_ignore_ascii_case(&single.name))
            {
                return DeclaredType::Intrinsic(SmolStr::new(intrinsic));
            }
        }
        DeclaredType::Named {
            path,
            is_new,
            resolved: None,
        }
    }

    pub fn resolved(&self) -> Option<DeclId> {
        match self {
            DeclaredType::Named { resolved, .. } => *resolved,
            _ => None,
        }
    }

    pub fn path(&self) -> Option<&TypePath> {
        match self {
            DeclaredType::Named { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Forget the resolution so the next pass starts from the written path.
    pub fn clear_resolution(&mut self) {
        if let DeclaredType::Named { resolved, .. } = self {
            *resolved = None;
        }
    }

    pub fn display_name(&self) -> SmolStr {
        match self {
            DeclaredType::Variant => SmolStr::new_static("Variant"),
            DeclaredType::Intrinsic(name) => name.clone(),
            DeclaredType::Named { path, .. } => path.to_dotted(),
        }
    }
}

// ============================================================================
// DECLARATION
// ============================================================================

/// One named symbol.
#[derive(Clone, Debug)]
pub struct Declaration {
    pub id: DeclId,
    /// Name as written.
    pub name: SmolStr,
    /// Case-insensitive lookup key.
    pub key: Name,
    pub kind: DeclarationKind,
    pub accessibility: Accessibility,
    pub as_type: DeclaredType,
    /// Declaring scope: procedure for locals and parameters, module for
    /// members, project for modules. `None` only for projects.
    pub parent: Option<DeclId>,
    /// The user project or library project this declaration belongs to.
    pub project: DeclId,
    /// `Project.Module.Member`, extended with nested scope names.
    pub qualified_name: SmolStr,
    /// Qualified name of the declaring scope.
    pub scope: SmolStr,
    pub level: ScopeLevel,
    /// Identifier range in module text; empty when the declaration has no
    /// identifier in source (modules, implicit and library declarations).
    pub range: TextRange,
    pub selection: Selection,
    /// Extent of the body for procedures and modules.
    pub body: Option<Selection>,
    pub component_kind: Option<ComponentKind>,
    pub is_array: bool,
    pub is_static: bool,
    pub is_with_events: bool,
    pub is_optional: bool,
    pub is_param_array: bool,
    /// Synthesized rather than written (implicit events, default instances).
    pub is_implicit: bool,
    /// The predeclared instance variable of a class, form or document.
    pub is_default_instance: bool,
    /// Interfaces named by `Implements`, recomputed every pass.
    pub supertypes: Vec<DeclId>,
    pub references: Vec<IdentifierReference>,
}

impl Declaration {
    /// Fresh declaration with empty flags; builders fill in the rest.
    pub fn new(
        id: DeclId,
        name: impl Into<SmolStr>,
        key: Name,
        kind: DeclarationKind,
        project: DeclId,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            key,
            kind,
            accessibility: Accessibility::Implicit,
            as_type: DeclaredType::Variant,
            parent: None,
            project,
            qualified_name: SmolStr::default(),
            scope: SmolStr::default(),
            level: ScopeLevel::Member,
            range: TextRange::default(),
            selection: Selection::default(),
            body: None,
            component_kind: None,
            is_array: false,
            is_static: false,
            is_with_events: false,
            is_optional: false,
            is_param_array: false,
            is_implicit: false,
            is_default_instance: false,
            supertypes: Vec::new(),
            references: Vec::new(),
        }
    }

    pub fn module(&self) -> Option<ModuleId> {
        self.id.owner.module()
    }

    pub fn is_user_defined(&self) -> bool {
        self.id.owner.is_user()
    }

    /// Rank used by position queries: parameter/local 0, member 1,
    /// module 2, project 3.
    pub fn scope_rank(&self) -> u8 {
        self.level as u8
    }

    /// Whether the declaration has an identifier written in module text.
    pub fn has_identifier(&self) -> bool {
        !self.range.is_empty()
    }

    /// Visible outside its module (module names always are).
    pub fn is_exported(&self) -> bool {
        match self.kind {
            DeclarationKind::Project
            | DeclarationKind::ProceduralModule
            | DeclarationKind::ClassModule => true,
            _ => self.level == ScopeLevel::Member && !self.accessibility.is_private(),
        }
    }
}

// ============================================================================
// REFERENCES
// ============================================================================

/// One use of a declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentifierReference {
    /// Module the reference is written in.
    pub module: ModuleId,
    /// Procedure or module the reference was found in.
    pub parent_scope: DeclId,
    pub range: TextRange,
    pub selection: Selection,
    /// Identifier as written.
    pub identifier: SmolStr,
    pub is_assignment: bool,
    /// Reached through `.` (`a.b` marks `b`).
    pub is_member_access: bool,
    /// Several equally ranked candidates existed; this one won the
    /// documented tie-break.
    pub is_ambiguous: bool,
}

/// An identifier no declaration matched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnboundReference {
    pub module: ModuleId,
    pub parent_scope: DeclId,
    pub range: TextRange,
    pub selection: Selection,
    pub identifier: SmolStr,
    pub is_assignment: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::Ident;
    use rstest::rstest;

    fn path(name: &str) -> TypePath {
        TypePath {
            segments: vec![Ident::new(name, TextRange::default())],
        }
    }

    #[rstest]
    #[case("Long", DeclaredType::Intrinsic("Long".into()))]
    #[case("long", DeclaredType::Intrinsic("Long".into()))]
    #[case("Variant", DeclaredType::Variant)]
    fn test_declared_type_intrinsics(#[case] name: &str, #[case] expected: DeclaredType) {
        assert_eq!(DeclaredType::from_path(path(name), false), expected);
    }

    #[test]
    fn test_declared_type_named_starts_unresolved() {
        let ty = DeclaredType::from_path(path("Class1"), true);
        assert!(matches!(ty, DeclaredType::Named { is_new: true, resolved: None, .. }));
        assert_eq!(ty.display_name(), "Class1");
    }

    #[rstest]
    #[case('$', Some("String"))]
    #[case('&', Some("Long"))]
    #[case('x', None)]
    fn test_type_hints(#[case] hint: char, #[case] expected: Option<&str>) {
        assert_eq!(intrinsic_for_hint(hint), expected);
    }

    #[test]
    fn test_scope_level_order() {
        assert!(ScopeLevel::Local < ScopeLevel::Member);
        assert!(ScopeLevel::Member < ScopeLevel::Module);
        assert!(ScopeLevel::Module < ScopeLevel::Project);
        assert_eq!(ScopeLevel::Project as u8, 3);
    }
}
