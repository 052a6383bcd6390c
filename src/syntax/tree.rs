//! Parse tree for modules and expressions.
//!
//! The tree keeps exactly what declaration and reference resolution need:
//! every identifier carries its [`TextRange`], statements keep their
//! nesting, and expressions keep member-access and call structure. Trivia
//! (comments, continuations, literal values) is dropped.

use smol_str::SmolStr;

use crate::base::TextRange;

/// An identifier occurrence. `name` has brackets and type-hint suffixes
/// stripped; `range` covers the token as written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ident {
    pub name: SmolStr,
    pub range: TextRange,
}

impl Ident {
    pub fn new(name: impl Into<SmolStr>, range: TextRange) -> Self {
        Self {
            name: name.into(),
            range,
        }
    }
}

/// Root of a parse, shaped by the start rule the grammar was invoked with.
#[derive(Clone, Debug, PartialEq)]
pub enum ParseTree {
    Module(ModuleTree),
    Expression(Expr),
}

impl ParseTree {
    /// The module root, if this tree was parsed with the module rule.
    pub fn as_module(&self) -> Option<&ModuleTree> {
        match self {
            ParseTree::Module(module) => Some(module),
            ParseTree::Expression(_) => None,
        }
    }
}

/// A whole module: header attributes, options, `Implements` and members.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModuleTree {
    pub attributes: Vec<ModuleAttribute>,
    pub option_explicit: bool,
    pub implements: Vec<TypePath>,
    pub items: Vec<ModuleItem>,
}

impl ModuleTree {
    /// Value of an `Attribute` line, compared case-insensitively.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.as_str())
    }

    /// Whether `Attribute VB_PredeclaredId = True` is present.
    pub fn has_predeclared_id(&self) -> bool {
        self.attribute("VB_PredeclaredId")
            .is_some_and(|v| v.eq_ignore_ascii_case("True"))
    }

    /// All procedures in source order.
    pub fn procedures(&self) -> impl Iterator<Item = &Procedure> {
        self.items.iter().filter_map(|item| match item {
            ModuleItem::Procedure(p) => Some(p),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleAttribute {
    pub name: SmolStr,
    /// Raw value text with surrounding quotes removed.
    pub value: SmolStr,
}

/// Visibility keyword written in front of a declaration, if any.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Private,
    Friend,
    Global,
    /// `Dim` at module level.
    Dim,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModuleItem {
    Variables(VariableDecl),
    Constants(ConstDecl),
    Procedure(Procedure),
    Enum(EnumDecl),
    Type(TypeDecl),
    Event(EventDecl),
    Declare(DeclareDecl),
}

#[derive(Clone, Debug, PartialEq)]
pub struct VariableDecl {
    pub visibility: Option<Visibility>,
    pub is_static: bool,
    pub vars: Vec<VarSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarSpec {
    pub name: Ident,
    pub is_array: bool,
    /// Array bound expressions (`x(1 To n)` keeps both `1` and `n`).
    pub bounds: Vec<Expr>,
    pub with_events: bool,
    pub as_type: Option<AsType>,
}

/// A dotted type name such as `Long`, `Class1` or `Excel.Range`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypePath {
    pub segments: Vec<Ident>,
}

impl TypePath {
    pub fn last(&self) -> Option<&Ident> {
        self.segments.last()
    }

    /// Dotted display form (`Excel.Range`).
    pub fn to_dotted(&self) -> SmolStr {
        let parts: Vec<&str> = self.segments.iter().map(|s| s.name.as_str()).collect();
        SmolStr::new(parts.join("."))
    }
}

/// An `As [New] Type` clause.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsType {
    pub path: TypePath,
    pub is_new: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConstDecl {
    pub visibility: Option<Visibility>,
    pub consts: Vec<ConstSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConstSpec {
    pub name: Ident,
    pub as_type: Option<AsType>,
    pub value: Expr,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumDecl {
    pub visibility: Option<Visibility>,
    pub name: Ident,
    pub members: Vec<EnumMember>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumMember {
    pub name: Ident,
    pub value: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeDecl {
    pub visibility: Option<Visibility>,
    pub name: Ident,
    pub members: Vec<VarSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EventDecl {
    pub visibility: Option<Visibility>,
    pub name: Ident,
    pub params: Vec<Param>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProcedureKind {
    Sub,
    Function,
    PropertyGet,
    PropertyLet,
    PropertySet,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeclareDecl {
    pub visibility: Option<Visibility>,
    pub is_function: bool,
    pub name: Ident,
    pub lib: SmolStr,
    pub params: Vec<Param>,
    pub as_type: Option<AsType>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Procedure {
    pub visibility: Option<Visibility>,
    pub is_static: bool,
    pub kind: ProcedureKind,
    pub name: Ident,
    pub params: Vec<Param>,
    pub as_type: Option<AsType>,
    pub body: Vec<Stmt>,
    /// From the first header token to the end of `End Sub`/`End Function`.
    pub range: TextRange,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: Ident,
    pub optional: bool,
    pub by_val: bool,
    pub param_array: bool,
    pub is_array: bool,
    pub as_type: Option<AsType>,
    pub default: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Dim(LocalDecl),
    Const(Vec<ConstSpec>),
    Assign {
        is_set: bool,
        target: Expr,
        value: Expr,
    },
    /// A call statement. `callee` may itself be a parenthesized call.
    Call { callee: Expr, args: Vec<Arg> },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        else_body: Option<Vec<Stmt>>,
    },
    For {
        counter: Expr,
        from: Expr,
        to: Expr,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    ForEach {
        element: Expr,
        collection: Expr,
        body: Vec<Stmt>,
    },
    Do {
        condition: Option<Expr>,
        body: Vec<Stmt>,
    },
    While { condition: Expr, body: Vec<Stmt> },
    With { object: Expr, body: Vec<Stmt> },
    Select {
        subject: Expr,
        cases: Vec<CaseClause>,
        else_body: Option<Vec<Stmt>>,
    },
    ReDim { preserve: bool, targets: Vec<Expr> },
    RaiseEvent { event: Ident, args: Vec<Arg> },
    /// File I/O and other keyword statements (`Open`, `Print #`, `Erase`,
    /// `Unload`); only their operand expressions are kept.
    Keyword { operands: Vec<Expr> },
    /// `Exit`, `GoTo`, `On Error`, `Resume`, `End`, labels.
    Jump,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocalDecl {
    pub is_static: bool,
    pub vars: Vec<VarSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaseClause {
    pub tests: Vec<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Arg {
    /// `name` in `name:=value`.
    pub name: Option<Ident>,
    /// `None` for an omitted positional argument (`Foo(, 2)`).
    pub value: Option<Expr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Imp,
    Eqv,
    Xor,
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Is,
    Like,
    Concat,
    Add,
    Sub,
    Mod,
    IntDiv,
    Mul,
    Div,
    Pow,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(TextRange),
    Name(Ident),
    Me(TextRange),
    /// `object.member`, or `.member` inside a `With` block when `object`
    /// is `None`.
    Member {
        object: Option<Box<Expr>>,
        member: Ident,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Arg>,
    },
    New(TypePath),
    TypeOf {
        operand: Box<Expr>,
        type_path: TypePath,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Paren(Box<Expr>),
}
