// Lexer, parse tree and grammar for module source text
mod grammar;
mod lexer;
mod parser;
mod tree;

pub use grammar::{Grammar, ParseOutput, StartRule, VbaGrammar};
pub use lexer::{Token, TokenKind, lex};
pub use parser::{parse_expression, parse_module};
pub use tree::{
    Arg, AsType, BinaryOp, CaseClause, ConstDecl, ConstSpec, DeclareDecl, EnumDecl, EnumMember,
    EventDecl, Expr, Ident, LocalDecl, ModuleAttribute, ModuleItem, ModuleTree, Param, ParseTree,
    Procedure, ProcedureKind, Stmt, TypeDecl, TypePath, UnaryOp, VarSpec, VariableDecl,
    Visibility,
};
