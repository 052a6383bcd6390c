//! Recursive-descent parser over the [`lex`] token stream.
//!
//! Errors never stop the parse. A failed statement is skipped to the end of
//! its line, a block whose closing keyword is missing is closed where the
//! parser finds the next thing it recognizes, and every problem is pushed as
//! a [`SyntaxError`]. Callers treat any error as a failed parse but still get
//! the partial tree.

use smol_str::SmolStr;

use super::lexer::{Token, TokenKind, lex};
use super::tree::*;
use crate::base::{LineIndex, TextRange};
use crate::error::SyntaxError;

/// The error for this failure has already been recorded.
struct Abort;

type PResult<T> = Result<T, Abort>;

/// Words that cannot start an expression or name a declaration.
const RESERVED: &[&str] = &[
    "and", "as", "byref", "byval", "call", "case", "const", "declare", "dim", "do", "each",
    "else", "elseif", "end", "enum", "eqv", "event", "exit", "for", "function", "goto", "if",
    "imp", "implements", "in", "is", "let", "like", "loop", "mod", "next", "not", "on",
    "option", "optional", "or", "paramarray", "preserve", "private", "property", "public",
    "raiseevent", "redim", "resume", "select", "set", "static", "step", "sub", "then", "to",
    "type", "until", "wend", "while", "with", "withevents", "xor",
];

/// Words skipped inside keyword statements (`Open f For Input As #1`).
const KEYWORD_STATEMENT_FILLER: &[&str] = &[
    "access", "append", "as", "binary", "for", "input", "len", "line", "lock", "output",
    "random", "read", "shared", "to", "write",
];

const VISIBILITIES: &[(&str, Visibility)] = &[
    ("Public", Visibility::Public),
    ("Private", Visibility::Private),
    ("Friend", Visibility::Friend),
    ("Global", Visibility::Global),
    ("Dim", Visibility::Dim),
];

// Binding powers, loosest first. Left-associative operators parse their
// right operand one step tighter.
const NOT_BP: u8 = 12;
const NEG_BP: u8 = 26;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BlockEnd {
    Procedure,
    IfBranch,
    IfElse,
    Next,
    Loop,
    Wend,
    With,
    Case,
}

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|kw| kw.eq_ignore_ascii_case(word))
}

/// Parse a whole module.
pub fn parse_module(source: &str) -> (ModuleTree, Vec<SyntaxError>) {
    let mut parser = Parser::new(source);
    let tree = parser.module();
    (tree, parser.errors)
}

/// Parse a single expression. `None` only when no expression could be read.
pub fn parse_expression(source: &str) -> (Option<Expr>, Vec<SyntaxError>) {
    let mut parser = Parser::new(source);
    parser.skip_terminators();
    let expr = parser.expr().ok();
    parser.skip_terminators();
    if expr.is_some() && !parser.at(TokenKind::Eof) {
        parser.error_here("expected end of expression");
    }
    (expr, parser.errors)
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
    line_index: LineIndex,
    errors: Vec<SyntaxError>,
}

impl<'s> Parser<'s> {
    fn new(source: &'s str) -> Self {
        let tokens = lex(source)
            .into_iter()
            .filter(|t| t.kind != TokenKind::Comment)
            .collect();
        Self {
            source,
            tokens,
            pos: 0,
            line_index: LineIndex::new(source),
            errors: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Token cursor
    // ------------------------------------------------------------------

    fn nth(&self, n: usize) -> Token {
        let last = self.tokens.len() - 1;
        self.tokens[(self.pos + n).min(last)]
    }

    fn peek(&self) -> Token {
        self.nth(0)
    }

    fn bump(&mut self) -> Token {
        let token = self.peek();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn text(&self, token: Token) -> &'s str {
        token.text(self.source)
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn at_kw(&self, keyword: &str) -> bool {
        self.peek().is_keyword(self.source, keyword)
    }

    fn nth_is_kw(&self, n: usize, keyword: &str) -> bool {
        self.nth(n).is_keyword(self.source, keyword)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, keyword: &str) -> bool {
        if self.at_kw(keyword) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> PResult<Token> {
        if self.at(kind) {
            Ok(self.bump())
        } else {
            self.error_expected(what);
            Err(Abort)
        }
    }

    fn expect_kw(&mut self, keyword: &str) -> PResult<Token> {
        if self.at_kw(keyword) {
            Ok(self.bump())
        } else {
            self.error_expected(&format!("`{keyword}`"));
            Err(Abort)
        }
    }

    /// Newline, `:`, or end of input.
    fn at_terminator(&self) -> bool {
        self.peek().is_terminator()
    }

    /// End of a statement; `Else` also ends one inside a single-line `If`.
    fn at_stmt_end(&self) -> bool {
        self.at_terminator() || self.at_kw("Else")
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Newline | TokenKind::Eof)
    }

    fn at_line_start(&self) -> bool {
        self.pos == 0 || self.tokens[self.pos - 1].kind == TokenKind::Newline
    }

    /// No whitespace between the previous token and the current one.
    fn adjacent(&self) -> bool {
        self.pos > 0 && self.tokens[self.pos - 1].range.end() == self.peek().range.start()
    }

    /// `End` followed by `keyword`.
    fn at_end_of(&self, keyword: &str) -> bool {
        self.at_kw("End") && self.nth_is_kw(1, keyword)
    }

    fn skip_terminators(&mut self) {
        while matches!(self.peek().kind, TokenKind::Newline | TokenKind::Colon) {
            self.bump();
        }
    }

    fn skip_to_terminator(&mut self) {
        while !self.at_terminator() {
            self.bump();
        }
    }

    fn recover_line(&mut self) {
        while !self.at_line_end() {
            self.bump();
        }
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    fn error_at(&mut self, token: Token, message: impl Into<SmolStr>) {
        if self.errors.last().is_some_and(|e| e.range == token.range) {
            return;
        }
        self.errors.push(SyntaxError {
            message: message.into(),
            position: self.line_index.line_col(token.range.start()),
            range: token.range,
        });
    }

    fn error_here(&mut self, message: impl Into<SmolStr>) {
        self.error_at(self.peek(), message);
    }

    fn error_expected(&mut self, what: &str) {
        let found = self.describe(self.peek());
        self.error_here(format!("expected {what}, found {found}"));
    }

    fn describe(&self, token: Token) -> String {
        match token.kind {
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Eof => "end of file".to_string(),
            _ => format!("`{}`", self.text(token)),
        }
    }

    // ------------------------------------------------------------------
    // Names and types
    // ------------------------------------------------------------------

    fn ident_from(&self, token: Token) -> Ident {
        let text = self.text(token);
        let name = match token.kind {
            TokenKind::BracketIdent => &text[1..text.len() - 1],
            _ => text
                .strip_suffix(|c: char| "%&!#@$".contains(c))
                .unwrap_or(text),
        };
        Ident::new(name, token.range)
    }

    /// Name of a declaration: a non-reserved identifier or a bracketed one.
    fn decl_name(&mut self) -> PResult<Ident> {
        let token = self.peek();
        match token.kind {
            TokenKind::Ident if !is_reserved(self.text(token)) => {
                self.bump();
                Ok(self.ident_from(token))
            }
            TokenKind::BracketIdent => {
                self.bump();
                Ok(self.ident_from(token))
            }
            _ => {
                self.error_expected("a name");
                Err(Abort)
            }
        }
    }

    /// Name after `.`: keywords are allowed there.
    fn member_name(&mut self) -> PResult<Ident> {
        let token = self.peek();
        match token.kind {
            TokenKind::Ident | TokenKind::BracketIdent => {
                self.bump();
                Ok(self.ident_from(token))
            }
            _ => {
                self.error_expected("a member name");
                Err(Abort)
            }
        }
    }

    fn type_path(&mut self) -> PResult<TypePath> {
        let mut segments = vec![self.decl_name()?];
        while self.at(TokenKind::Dot) {
            self.bump();
            segments.push(self.member_name()?);
        }
        Ok(TypePath { segments })
    }

    fn as_clause(&mut self) -> PResult<Option<AsType>> {
        if !self.eat_kw("As") {
            return Ok(None);
        }
        let is_new = self.eat_kw("New");
        let path = self.type_path()?;
        // Fixed-length string: `As String * 10`.
        if self.eat(TokenKind::Star) {
            self.expr()?;
        }
        Ok(Some(AsType { path, is_new }))
    }

    fn visibility(&mut self) -> Option<Visibility> {
        let vis = VISIBILITIES
            .iter()
            .find(|(kw, _)| self.at_kw(kw))
            .map(|&(_, vis)| vis)?;
        self.bump();
        Some(vis)
    }

    // ------------------------------------------------------------------
    // Module level
    // ------------------------------------------------------------------

    fn module(&mut self) -> ModuleTree {
        let mut tree = ModuleTree::default();
        loop {
            self.skip_terminators();
            if self.at(TokenKind::Eof) {
                break;
            }
            match self.module_line(&mut tree) {
                // A procedure missing its `End` stops at the next header.
                Ok(()) if self.at_terminator() || self.at_line_start() => {}
                Ok(()) => {
                    self.error_expected("end of statement");
                    self.recover_line();
                }
                Err(Abort) => self.recover_line(),
            }
        }
        tree
    }

    fn module_line(&mut self, tree: &mut ModuleTree) -> PResult<()> {
        let start = self.peek();

        // Export headers and conditional-compilation directives.
        if self.at_kw("VERSION") || self.at(TokenKind::Hash) {
            self.recover_line();
            return Ok(());
        }
        if self.at_kw("Begin") {
            self.skip_designer_block();
            return Ok(());
        }
        if self.at_kw("Attribute") {
            let attribute = self.attribute()?;
            tree.attributes.push(attribute);
            return Ok(());
        }
        if self.eat_kw("Option") {
            if self.eat_kw("Explicit") {
                tree.option_explicit = true;
            }
            self.skip_to_terminator();
            return Ok(());
        }
        if self.eat_kw("Implements") {
            tree.implements.push(self.type_path()?);
            return Ok(());
        }
        if self.at_def_type() {
            self.skip_to_terminator();
            return Ok(());
        }

        let visibility = self.visibility();
        let is_static = self.eat_kw("Static");

        let item = if self.at_kw("Sub") || self.at_kw("Function") || self.at_kw("Property") {
            ModuleItem::Procedure(self.procedure(start, visibility, is_static)?)
        } else if self.eat_kw("Const") {
            ModuleItem::Constants(ConstDecl {
                visibility,
                consts: self.const_specs()?,
            })
        } else if self.eat_kw("Enum") {
            ModuleItem::Enum(self.enum_decl(visibility)?)
        } else if self.eat_kw("Type") {
            ModuleItem::Type(self.type_decl(visibility)?)
        } else if self.eat_kw("Event") {
            let name = self.decl_name()?;
            let params = if self.at(TokenKind::LParen) {
                self.param_list()?
            } else {
                Vec::new()
            };
            ModuleItem::Event(EventDecl {
                visibility,
                name,
                params,
            })
        } else if self.eat_kw("Declare") {
            ModuleItem::Declare(self.declare(visibility)?)
        } else if visibility.is_some() || is_static {
            ModuleItem::Variables(VariableDecl {
                visibility,
                is_static,
                vars: self.var_specs()?,
            })
        } else {
            self.error_expected("a declaration");
            return Err(Abort);
        };
        tree.items.push(item);
        Ok(())
    }

    fn at_def_type(&self) -> bool {
        let token = self.peek();
        token.kind == TokenKind::Ident && {
            let text = self.text(token);
            text.len() == 6
                && text[..3].eq_ignore_ascii_case("def")
                && [
                    "bool", "byte", "int", "lng", "cur", "sng", "dbl", "dec", "dat", "str", "obj",
                    "var",
                ]
                .iter()
                    .any(|suffix| text[3..].eq_ignore_ascii_case(suffix))
        }
    }

    /// Skip a `Begin ... End` designer block from an exported form or class.
    fn skip_designer_block(&mut self) {
        let mut depth = 0usize;
        loop {
            self.skip_terminators();
            if self.at(TokenKind::Eof) {
                return;
            }
            if self.at_kw("Begin") {
                depth += 1;
            } else if self.at_kw("End") && self.nth(1).is_terminator() {
                depth = depth.saturating_sub(1);
            }
            self.recover_line();
            if depth == 0 {
                return;
            }
        }
    }

    fn attribute(&mut self) -> PResult<ModuleAttribute> {
        self.bump();
        let mut name = self.member_name()?.name.to_string();
        while self.eat(TokenKind::Dot) {
            name.push('.');
            name.push_str(&self.member_name()?.name);
        }
        self.expect(TokenKind::Eq, "`=`")?;
        let value = self.text(self.peek()).trim_matches('"');
        let value = SmolStr::new(value);
        self.skip_to_terminator();
        Ok(ModuleAttribute {
            name: name.into(),
            value,
        })
    }

    fn var_specs(&mut self) -> PResult<Vec<VarSpec>> {
        let mut vars = vec![self.var_spec()?];
        while self.eat(TokenKind::Comma) {
            vars.push(self.var_spec()?);
        }
        Ok(vars)
    }

    fn var_spec(&mut self) -> PResult<VarSpec> {
        let with_events = self.eat_kw("WithEvents");
        let name = self.decl_name()?;
        let mut is_array = false;
        let mut bounds = Vec::new();
        if self.eat(TokenKind::LParen) {
            is_array = true;
            if !self.eat(TokenKind::RParen) {
                loop {
                    bounds.push(self.expr()?);
                    if self.eat_kw("To") {
                        bounds.push(self.expr()?);
                    }
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RParen, "`)`")?;
            }
        }
        let as_type = self.as_clause()?;
        Ok(VarSpec {
            name,
            is_array,
            bounds,
            with_events,
            as_type,
        })
    }

    fn const_specs(&mut self) -> PResult<Vec<ConstSpec>> {
        let mut consts = Vec::new();
        loop {
            let name = self.decl_name()?;
            let as_type = self.as_clause()?;
            self.expect(TokenKind::Eq, "`=`")?;
            let value = self.expr()?;
            consts.push(ConstSpec {
                name,
                as_type,
                value,
            });
            if !self.eat(TokenKind::Comma) {
                return Ok(consts);
            }
        }
    }

    fn enum_decl(&mut self, visibility: Option<Visibility>) -> PResult<EnumDecl> {
        let name = self.decl_name()?;
        let mut members = Vec::new();
        loop {
            self.skip_terminators();
            if self.at_end_of("Enum") {
                self.bump();
                self.bump();
                break;
            }
            if self.at(TokenKind::Eof) || self.at_procedure_header() {
                self.error_expected("`End Enum`");
                break;
            }
            match self.enum_member() {
                Ok(member) if self.at_terminator() => members.push(member),
                Ok(member) => {
                    members.push(member);
                    self.error_expected("end of statement");
                    self.recover_line();
                }
                Err(Abort) => self.recover_line(),
            }
        }
        Ok(EnumDecl {
            visibility,
            name,
            members,
        })
    }

    fn enum_member(&mut self) -> PResult<EnumMember> {
        let name = self.decl_name()?;
        let value = if self.eat(TokenKind::Eq) {
            Some(self.expr()?)
        } else {
            None
        };
        Ok(EnumMember { name, value })
    }

    fn type_decl(&mut self, visibility: Option<Visibility>) -> PResult<TypeDecl> {
        let name = self.decl_name()?;
        let mut members = Vec::new();
        loop {
            self.skip_terminators();
            if self.at_end_of("Type") {
                self.bump();
                self.bump();
                break;
            }
            if self.at(TokenKind::Eof) || self.at_procedure_header() {
                self.error_expected("`End Type`");
                break;
            }
            match self.var_spec() {
                Ok(member) => {
                    members.push(member);
                    if !self.at_terminator() {
                        self.error_expected("end of statement");
                        self.recover_line();
                    }
                }
                Err(Abort) => self.recover_line(),
            }
        }
        Ok(TypeDecl {
            visibility,
            name,
            members,
        })
    }

    fn declare(&mut self, visibility: Option<Visibility>) -> PResult<DeclareDecl> {
        self.eat_kw("PtrSafe");
        let is_function = if self.eat_kw("Function") {
            true
        } else {
            self.expect_kw("Sub")?;
            false
        };
        let name = self.decl_name()?;
        self.expect_kw("Lib")?;
        let lib = self.expect(TokenKind::String, "a library name")?;
        let lib = SmolStr::new(self.text(lib).trim_matches('"'));
        if self.eat_kw("Alias") {
            self.expect(TokenKind::String, "an alias")?;
        }
        let params = if self.at(TokenKind::LParen) {
            self.param_list()?
        } else {
            Vec::new()
        };
        let as_type = self.as_clause()?;
        Ok(DeclareDecl {
            visibility,
            is_function,
            name,
            lib,
            params,
            as_type,
        })
    }

    fn procedure(
        &mut self,
        start: Token,
        visibility: Option<Visibility>,
        is_static: bool,
    ) -> PResult<Procedure> {
        let kind = if self.eat_kw("Sub") {
            ProcedureKind::Sub
        } else if self.eat_kw("Function") {
            ProcedureKind::Function
        } else {
            self.expect_kw("Property")?;
            if self.eat_kw("Get") {
                ProcedureKind::PropertyGet
            } else if self.eat_kw("Let") {
                ProcedureKind::PropertyLet
            } else if self.eat_kw("Set") {
                ProcedureKind::PropertySet
            } else {
                self.error_expected("`Get`, `Let` or `Set`");
                return Err(Abort);
            }
        };
        let name = self.decl_name()?;
        let params = if self.at(TokenKind::LParen) {
            self.param_list()?
        } else {
            Vec::new()
        };
        let as_type = self.as_clause()?;
        if !self.at_terminator() {
            self.error_expected("end of statement");
            self.recover_line();
        }

        let body = self.block(BlockEnd::Procedure);

        let end_keyword = match kind {
            ProcedureKind::Sub => "Sub",
            ProcedureKind::Function => "Function",
            _ => "Property",
        };
        let end = if self.at_end_of(end_keyword) {
            self.bump();
            self.bump().range.end()
        } else {
            self.error_expected(&format!("`End {end_keyword}`"));
            self.tokens[self.pos.saturating_sub(1)].range.end()
        };

        Ok(Procedure {
            visibility,
            is_static,
            kind,
            name,
            params,
            as_type,
            body,
            range: TextRange::new(start.range.start(), end.max(start.range.start())),
        })
    }

    fn param_list(&mut self) -> PResult<Vec<Param>> {
        self.expect(TokenKind::LParen, "`(`")?;
        let mut params = Vec::new();
        if self.eat(TokenKind::RParen) {
            return Ok(params);
        }
        loop {
            params.push(self.param()?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "`)`")?;
        Ok(params)
    }

    fn param(&mut self) -> PResult<Param> {
        let optional = self.eat_kw("Optional");
        let by_val = if self.eat_kw("ByVal") {
            true
        } else {
            self.eat_kw("ByRef");
            false
        };
        let param_array = self.eat_kw("ParamArray");
        let name = self.decl_name()?;
        let is_array = if self.eat(TokenKind::LParen) {
            self.expect(TokenKind::RParen, "`)`")?;
            true
        } else {
            false
        };
        let as_type = self.as_clause()?;
        let default = if self.eat(TokenKind::Eq) {
            Some(self.expr()?)
        } else {
            None
        };
        Ok(Param {
            name,
            optional,
            by_val,
            param_array,
            is_array,
            as_type,
            default,
        })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// `End Sub`, `End Function` or `End Property`.
    fn at_procedure_end(&self) -> bool {
        self.at_end_of("Sub") || self.at_end_of("Function") || self.at_end_of("Property")
    }

    /// A procedure header at the start of a line, seen while a body is
    /// still open.
    fn at_procedure_header(&self) -> bool {
        if !self.at_line_start() {
            return false;
        }
        let mut n = 0;
        if ["Public", "Private", "Friend", "Global"]
            .iter()
            .any(|kw| self.nth_is_kw(n, kw))
        {
            n += 1;
        }
        if self.nth_is_kw(n, "Static") {
            n += 1;
        }
        self.nth_is_kw(n, "Sub")
            || self.nth_is_kw(n, "Function")
            || (self.nth_is_kw(n, "Property")
                && ["Get", "Let", "Set"]
                    .iter()
                    .any(|kw| self.nth_is_kw(n + 1, kw)))
    }

    fn at_block_end(&self, end: BlockEnd) -> bool {
        match end {
            BlockEnd::Procedure => false,
            BlockEnd::IfBranch => {
                self.at_kw("ElseIf") || self.at_kw("Else") || self.at_end_of("If")
            }
            BlockEnd::IfElse => self.at_end_of("If"),
            BlockEnd::Next => self.at_kw("Next"),
            BlockEnd::Loop => self.at_kw("Loop"),
            BlockEnd::Wend => self.at_kw("Wend"),
            BlockEnd::With => self.at_end_of("With"),
            BlockEnd::Case => self.at_kw("Case") || self.at_end_of("Select"),
        }
    }

    fn block(&mut self, end: BlockEnd) -> Vec<Stmt> {
        let mut body = Vec::new();
        loop {
            self.skip_terminators();
            if self.at(TokenKind::Eof)
                || self.at_procedure_end()
                || self.at_procedure_header()
                || self.at_block_end(end)
            {
                return body;
            }
            match self.statement() {
                Ok(stmt) => {
                    body.extend(stmt);
                    if !self.at_terminator() {
                        self.error_expected("end of statement");
                        self.recover_line();
                    }
                }
                Err(Abort) => self.recover_line(),
            }
        }
    }

    /// Consume `End <keyword>` or report it missing. A missing closer does
    /// not abort the statement that opened the block.
    fn close_block(&mut self, keyword: &str) {
        if self.at_end_of(keyword) {
            self.bump();
            self.bump();
        } else {
            self.error_expected(&format!("`End {keyword}`"));
        }
    }

    fn close_next(&mut self) {
        if !self.eat_kw("Next") {
            self.error_expected("`Next`");
            return;
        }
        while matches!(self.peek().kind, TokenKind::Ident | TokenKind::Comma) && !self.at_kw("Else")
        {
            self.bump();
        }
    }

    /// One statement. `Ok(None)` for lines that carry nothing to resolve
    /// (labels, `Rem`, directives).
    fn statement(&mut self) -> PResult<Option<Stmt>> {
        let token = self.peek();

        if self.at_line_start() {
            if token.kind == TokenKind::Number {
                self.bump();
                return Ok(None);
            }
            if token.kind == TokenKind::Ident
                && self.nth(1).kind == TokenKind::Colon
                && !is_reserved(self.text(token))
            {
                self.bump();
                return Ok(None);
            }
            if token.kind == TokenKind::Hash || self.at_kw("Attribute") {
                self.skip_to_terminator();
                return Ok(None);
            }
        }

        if token.kind == TokenKind::Ident {
            let keyword = self.text(token).to_ascii_lowercase();
            let next = self.nth(1).kind;
            let not_assignment = !matches!(
                next,
                TokenKind::Eq | TokenKind::Dot | TokenKind::LParen | TokenKind::ColonEq
            );
            let stmt = match keyword.as_str() {
                "rem" => {
                    self.recover_line();
                    return Ok(None);
                }
                "dim" | "static" => {
                    self.bump();
                    Stmt::Dim(LocalDecl {
                        is_static: keyword == "static",
                        vars: self.var_specs()?,
                    })
                }
                "const" => {
                    self.bump();
                    Stmt::Const(self.const_specs()?)
                }
                "set" | "let" => {
                    self.bump();
                    let target = self.postfix()?;
                    self.expect(TokenKind::Eq, "`=`")?;
                    let value = self.expr()?;
                    Stmt::Assign {
                        is_set: keyword == "set",
                        target,
                        value,
                    }
                }
                "call" => {
                    self.bump();
                    Stmt::Call {
                        callee: self.postfix()?,
                        args: Vec::new(),
                    }
                }
                "if" => self.if_stmt()?,
                "for" => self.for_stmt()?,
                "do" => self.do_stmt()?,
                "while" => {
                    self.bump();
                    let condition = self.expr()?;
                    let body = self.block(BlockEnd::Wend);
                    if !self.eat_kw("Wend") {
                        self.error_expected("`Wend`");
                    }
                    Stmt::While { condition, body }
                }
                "with" => {
                    self.bump();
                    let object = self.expr()?;
                    let body = self.block(BlockEnd::With);
                    self.close_block("With");
                    Stmt::With { object, body }
                }
                "select" => self.select_stmt()?,
                "redim" => self.redim_stmt()?,
                "raiseevent" => {
                    self.bump();
                    let event = self.decl_name()?;
                    let args = if self.eat(TokenKind::LParen) {
                        self.paren_args()?
                    } else {
                        Vec::new()
                    };
                    Stmt::RaiseEvent { event, args }
                }
                "exit" | "goto" | "gosub" | "return" | "resume" | "on" | "stop" => {
                    self.bump();
                    while !self.at_stmt_end() {
                        self.bump();
                    }
                    Stmt::Jump
                }
                "end" => {
                    self.bump();
                    if !self.at_stmt_end() {
                        let found = self.describe(self.peek());
                        self.error_here(format!("unexpected `End {}`", found.trim_matches('`')));
                        return Err(Abort);
                    }
                    Stmt::Jump
                }
                "open" | "close" | "erase" | "load" | "unload" | "lset" | "rset" | "error"
                    if not_assignment =>
                {
                    self.keyword_statement()?
                }
                "print" | "write" | "input" | "get" | "put" | "seek" | "lock" | "unlock"
                | "width"
                    if next == TokenKind::Hash =>
                {
                    self.keyword_statement()?
                }
                "line" if self.nth_is_kw(1, "Input") => self.keyword_statement()?,
                _ => self.call_or_assignment()?,
            };
            return Ok(Some(stmt));
        }

        self.call_or_assignment().map(Some)
    }

    fn keyword_statement(&mut self) -> PResult<Stmt> {
        self.bump();
        let mut operands = Vec::new();
        while !self.at_stmt_end() {
            let token = self.peek();
            let filler = match token.kind {
                TokenKind::Hash | TokenKind::Comma | TokenKind::Semicolon | TokenKind::Eq => true,
                TokenKind::Ident => {
                    let text = self.text(token);
                    KEYWORD_STATEMENT_FILLER
                        .iter()
                        .any(|kw| kw.eq_ignore_ascii_case(text))
                }
                _ => false,
            };
            if filler {
                self.bump();
            } else {
                operands.push(self.expr()?);
            }
        }
        Ok(Stmt::Keyword { operands })
    }

    fn call_or_assignment(&mut self) -> PResult<Stmt> {
        let start = self.peek();
        let target = self.postfix()?;
        if self.eat(TokenKind::Eq) {
            let value = self.expr()?;
            return Ok(Stmt::Assign {
                is_set: false,
                target,
                value,
            });
        }
        if !matches!(
            target,
            Expr::Name(_) | Expr::Member { .. } | Expr::Call { .. }
        ) {
            self.error_at(start, "expected a statement");
            return Err(Abort);
        }

        // `Foo (a), b`: the parenthesized part was the first argument.
        let (callee, mut args) = match target {
            Expr::Call { callee, args } if self.eat(TokenKind::Comma) => (*callee, args),
            other => (other, Vec::new()),
        };
        if !args.is_empty() || !self.at_stmt_end() {
            args.extend(self.bare_args()?);
        }
        Ok(Stmt::Call { callee, args })
    }

    fn if_stmt(&mut self) -> PResult<Stmt> {
        self.bump();
        let condition = self.expr()?;
        self.expect_kw("Then")?;

        if self.at_line_end() {
            let body = self.block(BlockEnd::IfBranch);
            let mut branches = vec![(condition, body)];
            let mut else_body = None;
            loop {
                if self.eat_kw("ElseIf") {
                    let condition = self.expr()?;
                    self.expect_kw("Then")?;
                    branches.push((condition, self.block(BlockEnd::IfBranch)));
                } else if self.eat_kw("Else") {
                    else_body = Some(self.block(BlockEnd::IfElse));
                } else {
                    break;
                }
            }
            self.close_block("If");
            return Ok(Stmt::If {
                branches,
                else_body,
            });
        }

        let body = self.inline_body()?;
        let else_body = if self.eat_kw("Else") {
            Some(self.inline_body()?)
        } else {
            None
        };
        Ok(Stmt::If {
            branches: vec![(condition, body)],
            else_body,
        })
    }

    /// Statements of a single-line `If`, up to `Else` or the end of line.
    fn inline_body(&mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            while self.eat(TokenKind::Colon) {}
            if self.at_line_end() || self.at_kw("Else") {
                return Ok(body);
            }
            // `If x Then 100` jumps to line 100.
            if body.is_empty() && self.at(TokenKind::Number) {
                self.bump();
                body.push(Stmt::Jump);
                continue;
            }
            body.extend(self.statement()?);
            if !self.at_stmt_end() {
                self.error_expected("end of statement");
                return Err(Abort);
            }
        }
    }

    fn for_stmt(&mut self) -> PResult<Stmt> {
        self.bump();
        if self.eat_kw("Each") {
            let element = self.postfix()?;
            self.expect_kw("In")?;
            let collection = self.expr()?;
            let body = self.block(BlockEnd::Next);
            self.close_next();
            return Ok(Stmt::ForEach {
                element,
                collection,
                body,
            });
        }

        let counter = self.postfix()?;
        self.expect(TokenKind::Eq, "`=`")?;
        let from = self.expr()?;
        self.expect_kw("To")?;
        let to = self.expr()?;
        let step = if self.eat_kw("Step") {
            Some(self.expr()?)
        } else {
            None
        };
        let body = self.block(BlockEnd::Next);
        self.close_next();
        Ok(Stmt::For {
            counter,
            from,
            to,
            step,
            body,
        })
    }

    fn do_stmt(&mut self) -> PResult<Stmt> {
        self.bump();
        let mut condition = self.loop_condition()?;
        let body = self.block(BlockEnd::Loop);
        if self.eat_kw("Loop") {
            if let Some(post) = self.loop_condition()? {
                condition = Some(post);
            }
        } else {
            self.error_expected("`Loop`");
        }
        Ok(Stmt::Do { condition, body })
    }

    fn loop_condition(&mut self) -> PResult<Option<Expr>> {
        if self.eat_kw("While") || self.eat_kw("Until") {
            Ok(Some(self.expr()?))
        } else {
            Ok(None)
        }
    }

    fn select_stmt(&mut self) -> PResult<Stmt> {
        self.bump();
        self.expect_kw("Case")?;
        let subject = self.expr()?;
        let mut cases = Vec::new();
        let mut else_body = None;
        loop {
            self.skip_terminators();
            if !self.eat_kw("Case") {
                break;
            }
            if self.eat_kw("Else") {
                else_body = Some(self.block(BlockEnd::Case));
                continue;
            }
            let mut tests = Vec::new();
            loop {
                if self.eat_kw("Is") {
                    if self.infix_op().is_none() {
                        self.error_expected("a comparison operator");
                        return Err(Abort);
                    }
                    self.bump();
                }
                tests.push(self.expr()?);
                if self.eat_kw("To") {
                    tests.push(self.expr()?);
                }
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
            let body = self.block(BlockEnd::Case);
            cases.push(CaseClause { tests, body });
        }
        self.close_block("Select");
        Ok(Stmt::Select {
            subject,
            cases,
            else_body,
        })
    }

    fn redim_stmt(&mut self) -> PResult<Stmt> {
        self.bump();
        let preserve = self.eat_kw("Preserve");
        let mut targets = Vec::new();
        loop {
            targets.push(self.postfix()?);
            self.as_clause()?;
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        Ok(Stmt::ReDim { preserve, targets })
    }

    // ------------------------------------------------------------------
    // Arguments
    // ------------------------------------------------------------------

    /// One argument; `a To b` (array bounds) yields two.
    fn argument(&mut self) -> PResult<Vec<Arg>> {
        let name = if matches!(self.peek().kind, TokenKind::Ident | TokenKind::BracketIdent)
            && self.nth(1).kind == TokenKind::ColonEq
        {
            let token = self.bump();
            self.bump();
            Some(self.ident_from(token))
        } else {
            None
        };
        self.eat_kw("ByVal");
        let value = self.expr()?;
        let mut args = vec![Arg {
            name,
            value: Some(value),
        }];
        if self.eat_kw("To") {
            args.push(Arg {
                name: None,
                value: Some(self.expr()?),
            });
        }
        Ok(args)
    }

    /// Arguments after `(` up to and including `)`.
    fn paren_args(&mut self) -> PResult<Vec<Arg>> {
        let mut args = Vec::new();
        if self.eat(TokenKind::RParen) {
            return Ok(args);
        }
        loop {
            if self.at(TokenKind::Comma) || self.at(TokenKind::RParen) {
                args.push(Arg {
                    name: None,
                    value: None,
                });
            } else {
                args.extend(self.argument()?);
            }
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen, "`)`")?;
        Ok(args)
    }

    /// Unparenthesized call-statement arguments; `;` separates like `,`
    /// for `Debug.Print`.
    fn bare_args(&mut self) -> PResult<Vec<Arg>> {
        let mut args = Vec::new();
        loop {
            if self.at_stmt_end() {
                return Ok(args);
            }
            if self.at(TokenKind::Comma) || self.at(TokenKind::Semicolon) {
                args.push(Arg {
                    name: None,
                    value: None,
                });
            } else {
                args.extend(self.argument()?);
            }
            if !(self.eat(TokenKind::Comma) || self.eat(TokenKind::Semicolon)) {
                return Ok(args);
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn expr(&mut self) -> PResult<Expr> {
        self.expr_bp(0)
    }

    fn expr_bp(&mut self, min_bp: u8) -> PResult<Expr> {
        let mut lhs = if self.eat_kw("Not") {
            Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(self.expr_bp(NOT_BP)?),
            }
        } else if self.eat(TokenKind::Minus) {
            Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(self.expr_bp(NEG_BP)?),
            }
        } else if self.eat(TokenKind::Plus) {
            self.expr_bp(NEG_BP)?
        } else {
            self.postfix()?
        };

        while let Some((op, bp)) = self.infix_op() {
            if bp < min_bp {
                break;
            }
            self.bump();
            let rhs = self.expr_bp(bp + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn infix_op(&self) -> Option<(BinaryOp, u8)> {
        let token = self.peek();
        let op = match token.kind {
            TokenKind::Eq => (BinaryOp::Eq, 14),
            TokenKind::Ne => (BinaryOp::Ne, 14),
            TokenKind::Lt => (BinaryOp::Lt, 14),
            TokenKind::Gt => (BinaryOp::Gt, 14),
            TokenKind::Le => (BinaryOp::Le, 14),
            TokenKind::Ge => (BinaryOp::Ge, 14),
            TokenKind::Amp => (BinaryOp::Concat, 16),
            TokenKind::Plus => (BinaryOp::Add, 18),
            TokenKind::Minus => (BinaryOp::Sub, 18),
            TokenKind::Backslash => (BinaryOp::IntDiv, 22),
            TokenKind::Star => (BinaryOp::Mul, 24),
            TokenKind::Slash => (BinaryOp::Div, 24),
            TokenKind::Caret => (BinaryOp::Pow, 28),
            TokenKind::Ident => match self.text(token).to_ascii_lowercase().as_str() {
                "imp" => (BinaryOp::Imp, 2),
                "eqv" => (BinaryOp::Eqv, 4),
                "xor" => (BinaryOp::Xor, 6),
                "or" => (BinaryOp::Or, 8),
                "and" => (BinaryOp::And, 10),
                "is" => (BinaryOp::Is, 14),
                "like" => (BinaryOp::Like, 14),
                "mod" => (BinaryOp::Mod, 20),
                _ => return None,
            },
            _ => return None,
        };
        Some(op)
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            match self.peek().kind {
                TokenKind::Dot if self.adjacent() => {
                    self.bump();
                    let member = self.member_name()?;
                    expr = Expr::Member {
                        object: Some(Box::new(expr)),
                        member,
                    };
                }
                // `rs!Field` is a late-bound default-member lookup.
                TokenKind::Bang if self.adjacent() => {
                    self.bump();
                    let key = self.member_name()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args: vec![Arg {
                            name: None,
                            value: Some(Expr::Literal(key.range)),
                        }],
                    };
                }
                TokenKind::LParen => {
                    self.bump();
                    let args = self.paren_args()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let token = self.peek();
        match token.kind {
            TokenKind::Number | TokenKind::String | TokenKind::Date => {
                self.bump();
                Ok(Expr::Literal(token.range))
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.expr()?;
                self.expect(TokenKind::RParen, "`)`")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            TokenKind::Dot => {
                self.bump();
                let member = self.member_name()?;
                Ok(Expr::Member {
                    object: None,
                    member,
                })
            }
            TokenKind::Bang => {
                self.bump();
                let key = self.member_name()?;
                Ok(Expr::Literal(key.range))
            }
            TokenKind::BracketIdent => {
                self.bump();
                Ok(Expr::Name(self.ident_from(token)))
            }
            TokenKind::Ident => {
                let word = self.text(token).to_ascii_lowercase();
                match word.as_str() {
                    "me" => {
                        self.bump();
                        Ok(Expr::Me(token.range))
                    }
                    "new" => {
                        self.bump();
                        Ok(Expr::New(self.type_path()?))
                    }
                    "typeof" => {
                        self.bump();
                        let operand = self.postfix()?;
                        self.expect_kw("Is")?;
                        let type_path = self.type_path()?;
                        Ok(Expr::TypeOf {
                            operand: Box::new(operand),
                            type_path,
                        })
                    }
                    "nothing" | "empty" | "null" | "true" | "false" => {
                        self.bump();
                        Ok(Expr::Literal(token.range))
                    }
                    "addressof" => {
                        self.bump();
                        self.postfix()
                    }
                    _ if is_reserved(&word) => {
                        self.error_expected("an expression");
                        Err(Abort)
                    }
                    _ => {
                        self.bump();
                        Ok(Expr::Name(self.ident_from(token)))
                    }
                }
            }
            _ => {
                self.error_expected("an expression");
                Err(Abort)
            }
        }
    }
}
