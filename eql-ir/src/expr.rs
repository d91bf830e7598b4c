#![forbid(unsafe_code)]

use indexmap::IndexMap;

use crate::tp::{Label, QualifiedName, RawName, Tp, TpCastKind};
use crate::val::{MultiSet, Val};

/// `λvar. body`. The body refers to the binder through `Expr::BoundVar(var)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingExpr {
    pub var: String,
    pub body: Box<Expr>,
}

impl BindingExpr {
    pub fn new(var: impl Into<String>, body: Expr) -> Self {
        Self {
            var: var.into(),
            body: Box::new(body),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShapeExpr(pub IndexMap<Label, BindingExpr>);

impl ShapeExpr {
    pub fn empty() -> Self {
        Self(IndexMap::new())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EmptyOrder {
    EmptyFirst,
    EmptyLast,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    pub direction: OrderDirection,
    pub empty: EmptyOrder,
    pub key: BindingExpr,
}

/// Predicate tree pushed down to storage. `A` is `Expr` in the IR and a
/// concrete `MultiSet` once the argument has been evaluated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectFilter<A> {
    Eq { propname: String, arg: A },
    Conjunctive(Vec<SelectFilter<A>>),
    Disjunctive(Vec<SelectFilter<A>>),
    True,
}

pub type StorageFilter = SelectFilter<MultiSet>;

impl<A> SelectFilter<A> {
    pub fn try_map<B, E>(
        &self,
        f: &mut impl FnMut(&A) -> Result<B, E>,
    ) -> Result<SelectFilter<B>, E> {
        Ok(match self {
            SelectFilter::Eq { propname, arg } => SelectFilter::Eq {
                propname: propname.clone(),
                arg: f(arg)?,
            },
            SelectFilter::Conjunctive(cs) => SelectFilter::Conjunctive(
                cs.iter().map(|c| c.try_map(f)).collect::<Result<_, _>>()?,
            ),
            SelectFilter::Disjunctive(ds) => SelectFilter::Disjunctive(
                ds.iter().map(|d| d.try_map(f)).collect::<Result<_, _>>()?,
            ),
            SelectFilter::True => SelectFilter::True,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    Val(Val),
    FreeVar(String),
    BoundVar(String),
    /// A query parameter `$name`, mangled to `param~name` in the variable environment.
    Parameter {
        name: String,
        tp: Tp,
        is_required: bool,
    },
    /// Every stored object of the named type and its subtypes.
    QualifiedName(QualifiedName),
    QualifiedNameWithFilter {
        name: QualifiedName,
        filter: Box<SelectFilter<Expr>>,
    },
    FreeObject,

    ObjectProj {
        subject: Box<Expr>,
        label: String,
    },
    TupleProj {
        subject: Box<Expr>,
        label: String,
    },
    LinkPropProj {
        subject: Box<Expr>,
        linkprop: String,
    },
    BackLink {
        subject: Box<Expr>,
        label: String,
    },
    IsTp {
        subject: Box<Expr>,
        tp: RawName,
    },
    TpIntersect {
        subject: Box<Expr>,
        tp: RawName,
    },

    FunApp {
        fun: RawName,
        overloading_index: Option<usize>,
        args: Vec<Expr>,
        kwargs: IndexMap<String, Expr>,
    },
    TypeCast {
        tp: Tp,
        arg: Box<Expr>,
    },
    CheckedTypeCast {
        from: Tp,
        to: Tp,
        kind: TpCastKind,
        arg: Box<Expr>,
    },

    Union(Box<Expr>, Box<Expr>),
    MultiSet(Vec<Expr>),
    Shaped {
        expr: Box<Expr>,
        shape: ShapeExpr,
    },
    FilterOrder {
        subject: Box<Expr>,
        filter: BindingExpr,
        order: Vec<OrderKey>,
    },
    OffsetLimit {
        subject: Box<Expr>,
        offset: Box<Expr>,
        limit: Box<Expr>,
    },

    Insert {
        name: RawName,
        new: IndexMap<String, Expr>,
    },
    Update {
        subject: Box<Expr>,
        shape: ShapeExpr,
    },
    Delete {
        subject: Box<Expr>,
    },

    With {
        bound: Box<Expr>,
        next: BindingExpr,
    },
    For {
        bound: Box<Expr>,
        next: BindingExpr,
    },
    OptionalFor {
        bound: Box<Expr>,
        next: BindingExpr,
    },
    /// Bare binder, used for the bodies of defined functions.
    Binding(Box<BindingExpr>),

    Subquery(Box<Expr>),
    Detached(Box<Expr>),
    IfElse {
        then_branch: Box<Expr>,
        condition: Box<Expr>,
        else_branch: Box<Expr>,
    },
    UnnamedTuple(Vec<Expr>),
    NamedTuple(IndexMap<String, Expr>),
    Arr(Vec<Expr>),
    ConditionalDedup(Box<Expr>),
}

impl Expr {
    pub fn bool(b: bool) -> Expr {
        Expr::Val(Val::bool(b))
    }

    pub fn int(i: i64) -> Expr {
        Expr::Val(Val::int(i))
    }

    pub fn str(s: impl Into<String>) -> Expr {
        Expr::Val(Val::str(s))
    }

    pub fn empty_set() -> Expr {
        Expr::MultiSet(Vec::new())
    }

    pub fn free(name: impl Into<String>) -> Expr {
        Expr::FreeVar(name.into())
    }

    pub fn proj(subject: Expr, label: impl Into<String>) -> Expr {
        Expr::ObjectProj {
            subject: Box::new(subject),
            label: label.into(),
        }
    }

    pub fn app(fun: &str, args: Vec<Expr>) -> Expr {
        Expr::FunApp {
            fun: RawName::Unqualified(fun.to_string()),
            overloading_index: None,
            args,
            kwargs: IndexMap::new(),
        }
    }

    pub fn std_app(fun: &str, args: Vec<Expr>) -> Expr {
        Expr::FunApp {
            fun: RawName::Qualified(QualifiedName::std(fun)),
            overloading_index: None,
            args,
            kwargs: IndexMap::new(),
        }
    }

    pub fn with(bound: Expr, next: BindingExpr) -> Expr {
        Expr::With {
            bound: Box::new(bound),
            next,
        }
    }

    pub fn for_each(bound: Expr, next: BindingExpr) -> Expr {
        Expr::For {
            bound: Box::new(bound),
            next,
        }
    }

    pub fn optional_for(bound: Expr, next: BindingExpr) -> Expr {
        Expr::OptionalFor {
            bound: Box::new(bound),
            next,
        }
    }

    pub fn shaped(expr: Expr, shape: ShapeExpr) -> Expr {
        Expr::Shaped {
            expr: Box::new(expr),
            shape,
        }
    }

    pub fn filter_order(subject: Expr, filter: BindingExpr, order: Vec<OrderKey>) -> Expr {
        Expr::FilterOrder {
            subject: Box::new(subject),
            filter,
            order,
        }
    }

    pub fn is_true_literal(&self) -> bool {
        matches!(self, Expr::Val(v) if v.as_bool() == Some(true))
    }
}
