#![forbid(unsafe_code)]

use miette::SourceSpan;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

pub type Ident = Spanned<String>;

/// `module::name`, or a bare `name` when `module` is empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualName {
    pub span: Span,
    pub module: Vec<String>,
    pub name: String,
}

impl QualName {
    pub fn is_qualified(&self) -> bool {
        !self.module.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// A `;`-separated sequence of statements.
#[derive(Clone, Debug, PartialEq)]
pub struct Script {
    pub stmts: Vec<Query>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub span: Span,
    pub aliases: Vec<Alias>,
    pub kind: QueryKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Alias {
    /// `name := expr`
    Expr { name: Ident, expr: Expr },
    /// `MODULE m`
    Module { span: Span, name: Vec<String> },
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryKind {
    Select(SelectQuery),
    Insert(InsertQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
    For(ForQuery),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SelectQuery {
    /// `SELECT name := expr ...`
    pub result_alias: Option<Ident>,
    pub result: Expr,
    pub filter: Option<Expr>,
    pub order_by: Vec<SortExpr>,
    pub offset: Option<Expr>,
    pub limit: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InsertQuery {
    pub subject: QualName,
    pub shape: Vec<ShapeElement>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateQuery {
    pub subject: Expr,
    pub filter: Option<Expr>,
    pub shape: Vec<ShapeElement>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeleteQuery {
    pub subject: Expr,
    pub filter: Option<Expr>,
    pub order_by: Vec<SortExpr>,
    pub offset: Option<Expr>,
    pub limit: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForQuery {
    pub iterator: Ident,
    pub iterator_expr: Expr,
    pub body: Expr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NonesOrder {
    First,
    Last,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SortExpr {
    pub span: Span,
    pub expr: Expr,
    pub direction: SortDirection,
    pub empty: Option<NonesOrder>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignOp {
    /// `:=`
    Assign,
    /// `+=`
    Append,
    /// `-=`
    Subtract,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerKind {
    Property,
    LinkProperty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShapeElement {
    pub span: Span,
    pub kind: PointerKind,
    pub name: Ident,
    pub body: ShapeElementBody,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ShapeElementBody {
    /// `name`, `name: { ... }` with optional clauses on the nested set.
    Select {
        shape: Option<Vec<ShapeElement>>,
        filter: Option<Expr>,
        order_by: Vec<SortExpr>,
        offset: Option<Expr>,
        limit: Option<Expr>,
    },
    /// `name := expr`, `name += expr`, `name -= expr`
    Compute { op: AssignOp, expr: Expr },
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    IntLit(i64),
    FloatLit(f64),
    StrLit(String),
    BoolLit(bool),
    /// `{a, b}`; `{}` is the empty set.
    Set(Vec<Expr>),
    Array(Vec<Expr>),
    Tuple(Vec<Expr>),
    NamedTuple(Vec<(Ident, Expr)>),
    Name(QualName),
    /// `root.step.step`; a missing root is a partial path such as `.name`.
    Path {
        root: Option<Box<Expr>>,
        steps: Vec<PathStep>,
    },
    Shape {
        subject: Box<Expr>,
        elements: Vec<ShapeElement>,
    },
    /// `{ a := 1, b := 2 }`
    FreeObject(Vec<ShapeElement>),
    Cast {
        ty: TypeExpr,
        expr: Box<Expr>,
    },
    /// `<T>$name` or `<optional T>$name`
    Param {
        name: String,
        ty: TypeExpr,
        optional: bool,
    },
    Detached(Box<Expr>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    IsType {
        expr: Box<Expr>,
        ty: TypeExpr,
        negated: bool,
    },
    IfElse {
        then_branch: Box<Expr>,
        condition: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Index {
        subject: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        subject: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
    },
    Call {
        func: QualName,
        args: Vec<CallArg>,
    },
    Query(Box<Query>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum PathStep {
    /// `.name`, or `.0` on tuples
    Prop(Ident),
    /// `.<name`
    BackLink(Ident),
    /// `@name`
    LinkProp(Ident),
    /// `[IS T]`
    TypeIntersect(QualName),
}

#[derive(Clone, Debug, PartialEq)]
pub enum CallArg {
    Positional(Expr),
    Named { name: Ident, value: Expr },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    Exists,
    Distinct,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Concat,

    Eq,
    Ne,
    OptEq,
    OptNe,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,
    In,
    NotIn,
    Like,
    ILike,

    Coalesce,
    Union,
}

impl BinOp {
    /// Name under which the operator is declared in `std`.
    pub fn fn_name(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::Concat => "++",
            BinOp::Eq => "=",
            BinOp::Ne => "!=",
            BinOp::OptEq => "?=",
            BinOp::OptNe => "?!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::In => "in",
            BinOp::NotIn => "not in",
            BinOp::Like => "like",
            BinOp::ILike => "ilike",
            BinOp::Coalesce => "??",
            BinOp::Union => "union",
        }
    }
}

impl UnaryOp {
    pub fn fn_name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not",
            UnaryOp::Exists => "exists",
            UnaryOp::Distinct => "distinct",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeExpr {
    pub span: Span,
    pub kind: TypeExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeExprKind {
    Name(QualName),
    Array(Box<TypeExpr>),
    Tuple(Vec<TypeExpr>),
    NamedTuple(Vec<(Ident, TypeExpr)>),
}

// ---------------------------------------------------------------------------
// Schema declarations (shared by SDL and DDL)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Schema {
    pub decls: Vec<SchemaDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SchemaDecl {
    Module(ModuleDecl),
    Type(TypeDecl),
    ScalarType(ScalarTypeDecl),
    Function(FunctionDecl),
    Cast(CastDecl),
}

/// `module m { ... }` in SDL, `CREATE MODULE m` in DDL (no body).
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleDecl {
    pub span: Span,
    pub name: Vec<String>,
    pub decls: Vec<SchemaDecl>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeDecl {
    pub span: Span,
    pub name: QualName,
    pub is_abstract: bool,
    pub extending: Vec<QualName>,
    pub pointers: Vec<PointerDecl>,
    pub constraints: Vec<ConstraintDecl>,
    pub indexes: Vec<Vec<Ident>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerCardinality {
    Single,
    Multi,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerDeclKind {
    Property,
    Link,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PointerDecl {
    pub span: Span,
    pub kind: PointerDeclKind,
    pub name: Ident,
    pub required: bool,
    pub cardinality: Option<PointerCardinality>,
    pub target: PointerTarget,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PointerTarget {
    Typed {
        ty: TypeExpr,
        link_props: Vec<PointerDecl>,
        constraints: Vec<ConstraintDecl>,
        default: Option<Expr>,
    },
    Computed(Expr),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintDecl {
    pub span: Span,
    pub name: QualName,
    /// `on (.p)`
    pub on: Option<Expr>,
    pub delegated: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScalarTypeDecl {
    pub span: Span,
    pub name: QualName,
    pub is_abstract: bool,
    pub extending: Vec<QualName>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    Singleton,
    Optional,
    SetOf,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FuncParam {
    pub span: Span,
    pub name: Ident,
    pub kind: ParamKind,
    pub ty: TypeExpr,
    pub default: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FunctionBody {
    Expr(Expr),
    Builtin,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDecl {
    pub span: Span,
    pub name: QualName,
    pub params: Vec<FuncParam>,
    pub ret_kind: ParamKind,
    pub ret: TypeExpr,
    pub body: FunctionBody,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CastKind {
    Implicit,
    Assignment,
    Explicit,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CastDecl {
    pub span: Span,
    pub from: TypeExpr,
    pub to: TypeExpr,
    pub kind: CastKind,
}
