//! Diagnostics: problems found while parsing and resolving.
//!
//! Every stage records its per-module problems here instead of failing;
//! the finder exposes them after each pass.

use std::sync::Arc;

use crate::base::{ModuleId, ProjectId, Selection};

// ============================================================================
// DIAGNOSTIC TYPES
// ============================================================================

/// Severity level of a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl Severity {
    /// Convert to LSP severity number.
    pub fn to_lsp(&self) -> u32 {
        match self {
            Severity::Error => 1,
            Severity::Warning => 2,
            Severity::Info => 3,
            Severity::Hint => 4,
        }
    }
}

/// What went wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    SyntaxError,
    UnresolvedExternalLibrary,
    UnboundIdentifier,
    AmbiguousResolution,
    ResolverError,
}

impl DiagnosticKind {
    pub fn code(self) -> &'static str {
        match self {
            DiagnosticKind::SyntaxError => codes::SYNTAX_ERROR,
            DiagnosticKind::UnresolvedExternalLibrary => codes::UNRESOLVED_LIBRARY,
            DiagnosticKind::UnboundIdentifier => codes::UNBOUND_IDENTIFIER,
            DiagnosticKind::AmbiguousResolution => codes::AMBIGUOUS_RESOLUTION,
            DiagnosticKind::ResolverError => codes::RESOLVER_ERROR,
        }
    }

    pub fn default_severity(self) -> Severity {
        match self {
            DiagnosticKind::UnboundIdentifier | DiagnosticKind::AmbiguousResolution => {
                Severity::Warning
            }
            _ => Severity::Error,
        }
    }
}

/// A diagnostic message with location.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    /// The module containing this diagnostic; `None` for project-level
    /// problems such as a library that failed to load.
    pub module: Option<ModuleId>,
    /// Owning project for project-level problems.
    pub project: Option<ProjectId>,
    pub selection: Selection,
    pub kind: DiagnosticKind,
    /// Severity level.
    pub severity: Severity,
    /// Diagnostic code (e.g., "VB0001").
    pub code: &'static str,
    /// The diagnostic message.
    pub message: Arc<str>,
    /// Optional related information.
    pub related: Vec<RelatedInfo>,
}

/// Related information for a diagnostic.
#[derive(Clone, Debug, PartialEq)]
pub struct RelatedInfo {
    pub module: Option<ModuleId>,
    pub selection: Selection,
    /// The message.
    pub message: Arc<str>,
}

impl Diagnostic {
    /// Create a diagnostic with the kind's default severity.
    pub fn new(
        kind: DiagnosticKind,
        module: Option<ModuleId>,
        selection: Selection,
        message: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            module,
            project: None,
            selection,
            kind,
            severity: kind.default_severity(),
            code: kind.code(),
            message: message.into(),
            related: Vec::new(),
        }
    }

    pub fn syntax(module: ModuleId, selection: Selection, message: impl Into<Arc<str>>) -> Self {
        Self::new(DiagnosticKind::SyntaxError, Some(module), selection, message)
    }

    pub fn unbound(module: ModuleId, selection: Selection, name: &str) -> Self {
        Self::new(
            DiagnosticKind::UnboundIdentifier,
            Some(module),
            selection,
            format!("unbound identifier: '{}'", name),
        )
    }

    pub fn unresolved_library(project: ProjectId, library: &str, reason: &str) -> Self {
        let mut diag = Self::new(
            DiagnosticKind::UnresolvedExternalLibrary,
            None,
            Selection::default(),
            format!("cannot load library '{}': {}", library, reason),
        );
        diag.project = Some(project);
        diag
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Add related information.
    pub fn with_related(mut self, info: RelatedInfo) -> Self {
        self.related.push(info);
        self
    }
}

// ============================================================================
// DIAGNOSTIC CODES
// ============================================================================

/// Standard diagnostic codes.
pub mod codes {
    /// Module text failed to parse.
    pub const SYNTAX_ERROR: &str = "VB0001";
    /// A referenced library could not be loaded.
    pub const UNRESOLVED_LIBRARY: &str = "VB0002";
    /// Module could not be resolved at all.
    pub const RESOLVER_ERROR: &str = "VB0003";

    /// Identifier matched no declaration.
    pub const UNBOUND_IDENTIFIER: &str = "VB1001";
    /// Several equally ranked candidates; one was picked.
    pub const AMBIGUOUS_RESOLUTION: &str = "VB1002";
}

// ============================================================================
// DIAGNOSTIC COLLECTOR
// ============================================================================

/// Collects diagnostics for one module during a stage.
#[derive(Clone, Debug, Default)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    /// Create a new empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic.
    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Add an ambiguous resolution warning naming the losing candidates.
    pub fn ambiguous_resolution(
        &mut self,
        module: ModuleId,
        selection: Selection,
        name: &str,
        chosen: &str,
        candidates: &[(Option<ModuleId>, Selection, &str)],
    ) {
        let mut diag = Diagnostic::new(
            DiagnosticKind::AmbiguousResolution,
            Some(module),
            selection,
            format!(
                "ambiguous reference: '{}' resolved to {} of {} candidates",
                name,
                chosen,
                candidates.len()
            ),
        );

        // Add related info for each candidate
        for (candidate_module, candidate_selection, qualified) in candidates {
            diag = diag.with_related(RelatedInfo {
                module: *candidate_module,
                selection: *candidate_selection,
                message: Arc::from(format!("candidate: {}", qualified)),
            });
        }

        self.add(diag);
    }

    /// Get all diagnostics.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Get diagnostics for a specific module.
    pub fn diagnostics_for_module(&self, module: ModuleId) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.module == Some(module))
            .collect()
    }

    /// Get the number of errors.
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    /// Get the number of warnings.
    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    /// Check if there are any errors.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Take all diagnostics, leaving the collector empty.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}
