//! The grammar boundary.
//!
//! The pipeline only talks to a [`Grammar`]: text plus a start rule in, a
//! tree plus syntax errors out. [`VbaGrammar`] is the built-in
//! implementation; hosts with their own parser plug it in through
//! `SessionBuilder::with_grammar`.

use std::fmt;

use super::parser;
use super::tree::{Expr, ModuleTree, ParseTree};
use crate::base::TextRange;
use crate::error::SyntaxError;

/// Which production a parse starts from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StartRule {
    Module,
    Expression,
}

/// Result of one parse.
#[derive(Clone, Debug)]
pub struct ParseOutput {
    pub tree: ParseTree,
    pub errors: Vec<SyntaxError>,
}

impl ParseOutput {
    /// A parse succeeded only if it reported no errors at all.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Parses module text into a [`ParseTree`].
///
/// Implementations must be usable from several rayon workers at once.
pub trait Grammar: Send + Sync + fmt::Debug {
    fn parse(&self, text: &str, rule: StartRule) -> ParseOutput;
}

/// Built-in grammar for the supported VBA subset.
#[derive(Clone, Copy, Debug, Default)]
pub struct VbaGrammar;

impl Grammar for VbaGrammar {
    fn parse(&self, text: &str, rule: StartRule) -> ParseOutput {
        match rule {
            StartRule::Module => {
                let (module, errors) = parser::parse_module(text);
                ParseOutput {
                    tree: ParseTree::Module(module),
                    errors,
                }
            }
            StartRule::Expression => {
                let (expr, errors) = parser::parse_expression(text);
                let expr = expr.unwrap_or(Expr::Literal(TextRange::empty(0.into())));
                ParseOutput {
                    tree: ParseTree::Expression(expr),
                    errors,
                }
            }
        }
    }
}

impl VbaGrammar {
    /// Convenience for callers that only need the module tree.
    pub fn parse_module(&self, text: &str) -> (ModuleTree, Vec<SyntaxError>) {
        parser::parse_module(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_rule_shapes_the_tree() {
        let grammar = VbaGrammar;

        let module = grammar.parse("Sub A()\nEnd Sub\n", StartRule::Module);
        assert!(module.is_ok());
        assert!(module.tree.as_module().is_some());

        let expr = grammar.parse("a.b(1)", StartRule::Expression);
        assert!(expr.is_ok());
        assert!(matches!(expr.tree, ParseTree::Expression(Expr::Call { .. })));
    }

    #[test]
    fn test_failed_expression_still_yields_a_tree() {
        let output = VbaGrammar.parse("+", StartRule::Expression);
        assert!(!output.is_ok());
        assert!(matches!(output.tree, ParseTree::Expression(Expr::Literal(_))));
    }
}
