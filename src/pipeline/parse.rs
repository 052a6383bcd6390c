//! Parse stage: module text to [`ModuleTree`], in parallel.
//!
//! The cache keeps the last successful tree per module. A failed re-parse
//! records its errors and the attempted version but leaves the old tree in
//! place so the module keeps its previous declarations.

use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::base::{LineIndex, ModuleId};
use crate::error::{ResolveError, SyntaxError};
use crate::hir::{ComponentKind, Diagnostic, ModuleSource};
use crate::syntax::{Grammar, ModuleTree, ParseTree, StartRule};

/// The tree a module's declarations are built from, with the text it was
/// parsed from.
#[derive(Clone, Debug)]
pub struct ParsedModule {
    pub tree: Arc<ModuleTree>,
    pub text: Arc<str>,
    pub line_index: Arc<LineIndex>,
    pub kind: ComponentKind,
    /// Version `tree` was parsed from.
    pub version: u64,
    /// Last version a parse was attempted for.
    pub attempted_version: u64,
    /// Errors of the last attempt.
    pub errors: Vec<SyntaxError>,
}

impl ParsedModule {
    pub fn is_current(&self, source: &ModuleSource) -> bool {
        self.attempted_version == source.version && self.kind == source.kind
    }
}

#[derive(Clone, Debug, Default)]
pub struct ParseCache {
    modules: FxHashMap<ModuleId, ParsedModule>,
}

impl ParseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, module: ModuleId) -> Option<&ParsedModule> {
        self.modules.get(&module)
    }

    pub fn insert(&mut self, module: ModuleId, parsed: ParsedModule) {
        self.modules.insert(module, parsed);
    }

    pub fn remove(&mut self, module: ModuleId) -> Option<ParsedModule> {
        self.modules.remove(&module)
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.modules.keys().copied().collect()
    }
}

/// What happened to one module in the parse stage.
#[derive(Clone, Debug)]
pub enum ParseOutcome {
    /// Clean parse; declarations are rebuilt from the new tree.
    Parsed(ParsedModule),
    /// Syntax errors. `rebuild` is set when there was no earlier tree and
    /// declarations must be built from an empty one.
    Failed {
        parsed: ParsedModule,
        diagnostics: Vec<Diagnostic>,
        rebuild: bool,
    },
    /// The grammar returned something other than a module tree.
    Unresolvable(ResolveError),
}

/// Parse one module against its cached entry.
pub fn parse_module(
    grammar: &dyn Grammar,
    source: &ModuleSource,
    previous: Option<&ParsedModule>,
) -> ParseOutcome {
    let output = grammar.parse(&source.text, StartRule::Module);
    let module = match output.tree {
        ParseTree::Module(module) => module,
        ParseTree::Expression(_) => {
            return ParseOutcome::Unresolvable(ResolveError::UnexpectedTreeShape {
                module: source.name.clone(),
            });
        }
    };

    if output.errors.is_empty() {
        return ParseOutcome::Parsed(ParsedModule {
            tree: Arc::new(module),
            text: source.text.clone(),
            line_index: Arc::new(LineIndex::new(&source.text)),
            kind: source.kind,
            version: source.version,
            attempted_version: source.version,
            errors: Vec::new(),
        });
    }

    let new_index = LineIndex::new(&source.text);
    let diagnostics = output
        .errors
        .iter()
        .map(|e| Diagnostic::syntax(source.id, new_index.selection(e.range), e.message.as_str()))
        .collect();

    let (parsed, rebuild) = match previous {
        Some(previous) => (
            ParsedModule {
                attempted_version: source.version,
                errors: output.errors,
                ..previous.clone()
            },
            false,
        ),
        None => (
            ParsedModule {
                tree: Arc::new(ModuleTree::default()),
                text: source.text.clone(),
                line_index: Arc::new(new_index),
                kind: source.kind,
                version: source.version,
                attempted_version: source.version,
                errors: output.errors,
            },
            true,
        ),
    };
    ParseOutcome::Failed {
        parsed,
        diagnostics,
        rebuild,
    }
}

/// Parse a batch on the current rayon pool. Modules skipped because
/// `cancelled` turned true come back as `None`.
pub fn parse_batch(
    grammar: &dyn Grammar,
    sources: &[ModuleSource],
    cache: &ParseCache,
    cancelled: &(dyn Fn() -> bool + Sync),
) -> Vec<(ModuleId, Option<ParseOutcome>)> {
    sources
        .par_iter()
        .map(|source| {
            if cancelled() {
                return (source.id, None);
            }
            let outcome = parse_module(grammar, source, cache.get(source.id));
            (source.id, Some(outcome))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ProjectId;
    use crate::syntax::VbaGrammar;

    fn source(text: &str, version: u64) -> ModuleSource {
        ModuleSource {
            id: ModuleId::new(0),
            project: ProjectId::new(0),
            name: "M".into(),
            kind: ComponentKind::Standard,
            text: Arc::from(text),
            version,
        }
    }

    #[test]
    fn test_clean_parse() {
        let outcome = parse_module(&VbaGrammar, &source("Sub A()\nEnd Sub\n", 1), None);
        let ParseOutcome::Parsed(parsed) = outcome else {
            panic!("expected a clean parse");
        };
        assert_eq!(parsed.tree.procedures().count(), 1);
        assert_eq!(parsed.version, 1);
    }

    #[test]
    fn test_failed_first_parse_rebuilds_from_empty_tree() {
        let outcome = parse_module(&VbaGrammar, &source("Sub A(\n", 1), None);
        let ParseOutcome::Failed { parsed, diagnostics, rebuild } = outcome else {
            panic!("expected a failed parse");
        };
        assert!(rebuild);
        assert!(parsed.tree.items.is_empty());
        assert!(!diagnostics.is_empty());
    }

    #[test]
    fn test_failed_reparse_keeps_previous_tree() {
        let ParseOutcome::Parsed(first) =
            parse_module(&VbaGrammar, &source("Sub A()\nEnd Sub\n", 1), None)
        else {
            panic!("expected a clean parse");
        };
        let outcome = parse_module(&VbaGrammar, &source("Sub A(\n", 2), Some(&first));
        let ParseOutcome::Failed { parsed, rebuild, .. } = outcome else {
            panic!("expected a failed parse");
        };
        assert!(!rebuild);
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.attempted_version, 2);
        assert_eq!(parsed.tree.procedures().count(), 1);
        assert_eq!(&*parsed.text, "Sub A()\nEnd Sub\n");
    }

    #[derive(Debug)]
    struct ExpressionOnly;

    impl Grammar for ExpressionOnly {
        fn parse(&self, text: &str, _rule: StartRule) -> crate::syntax::ParseOutput {
            VbaGrammar.parse(text, StartRule::Expression)
        }
    }

    #[test]
    fn test_wrong_tree_shape_is_unresolvable() {
        let outcome = parse_module(&ExpressionOnly, &source("x", 1), None);
        assert!(matches!(
            outcome,
            ParseOutcome::Unresolvable(ResolveError::UnexpectedTreeShape { .. })
        ));
    }
}
