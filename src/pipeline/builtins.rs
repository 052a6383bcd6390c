//! Implicit declarations synthesized for modules whose host defines them.
//!
//! A class module has `Initialize` and `Terminate` events nobody writes
//! down; forms and documents have their own sets. Each generator returns
//! the events for one component kind along with the handler prefixes
//! (`Class`, `UserForm`, ...) that `Prefix_Event` procedures use.

use std::fmt;
use std::sync::Arc;

use smol_str::SmolStr;

use crate::hir::{ComponentKind, DeclarationKind};
use crate::syntax::ModuleTree;

/// One synthesized declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImplicitDeclaration {
    pub name: SmolStr,
    pub kind: DeclarationKind,
    /// Parameter names, in order.
    pub params: Vec<SmolStr>,
    /// Prefixes of procedures handling this event (`Class` in
    /// `Class_Initialize`).
    pub handler_prefixes: Vec<SmolStr>,
}

impl ImplicitDeclaration {
    pub fn event(name: &str, params: &[&str], prefixes: &[&str]) -> Self {
        Self {
            name: SmolStr::new(name),
            kind: DeclarationKind::Event,
            params: params.iter().map(|p| SmolStr::new(p)).collect(),
            handler_prefixes: prefixes.iter().map(|p| SmolStr::new(p)).collect(),
        }
    }
}

/// Produces implicit declarations for a module; run once per module each
/// time its declarations are rebuilt.
pub trait ImplicitDeclarationGenerator: Send + Sync + fmt::Debug {
    fn applies_to(&self, kind: ComponentKind) -> bool;

    fn generate(&self, module_name: &str, tree: &ModuleTree) -> Vec<ImplicitDeclaration>;
}

/// `Class_Initialize` / `Class_Terminate`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClassEvents;

impl ImplicitDeclarationGenerator for ClassEvents {
    fn applies_to(&self, kind: ComponentKind) -> bool {
        kind == ComponentKind::Class
    }

    fn generate(&self, _module_name: &str, _tree: &ModuleTree) -> Vec<ImplicitDeclaration> {
        ["Initialize", "Terminate"]
            .into_iter()
            .map(|name| ImplicitDeclaration::event(name, &[], &["Class"]))
            .collect()
    }
}

/// `UserForm_*` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct FormEvents;

impl ImplicitDeclarationGenerator for FormEvents {
    fn applies_to(&self, kind: ComponentKind) -> bool {
        kind == ComponentKind::UserForm
    }

    fn generate(&self, _module_name: &str, _tree: &ModuleTree) -> Vec<ImplicitDeclaration> {
        vec![
            ImplicitDeclaration::event("Initialize", &[], &["UserForm"]),
            ImplicitDeclaration::event("Activate", &[], &["UserForm"]),
            ImplicitDeclaration::event("Deactivate", &[], &["UserForm"]),
            ImplicitDeclaration::event("QueryClose", &["Cancel", "CloseMode"], &["UserForm"]),
            ImplicitDeclaration::event("Terminate", &[], &["UserForm"]),
            ImplicitDeclaration::event("Click", &[], &["UserForm"]),
        ]
    }
}

/// Document module events (`Workbook_Open`, `Worksheet_Activate`, ...).
#[derive(Clone, Copy, Debug, Default)]
pub struct DocumentEvents;

impl ImplicitDeclarationGenerator for DocumentEvents {
    fn applies_to(&self, kind: ComponentKind) -> bool {
        kind == ComponentKind::Document
    }

    fn generate(&self, _module_name: &str, _tree: &ModuleTree) -> Vec<ImplicitDeclaration> {
        let prefixes = ["Document", "Workbook", "Worksheet"];
        ["Open", "Activate", "Deactivate"]
            .into_iter()
            .map(|name| ImplicitDeclaration::event(name, &[], &prefixes))
            .collect()
    }
}

/// The generators every session starts with.
pub fn default_generators() -> Vec<Arc<dyn ImplicitDeclarationGenerator>> {
    vec![
        Arc::new(ClassEvents),
        Arc::new(FormEvents),
        Arc::new(DocumentEvents),
    ]
}
