#![forbid(unsafe_code)]

use std::fmt;

use indexmap::IndexMap;

use crate::card::CMMode;
use crate::expr::BindingExpr;

/// Module path such as `["default"]` or `["std"]`.
pub type ModuleName = Vec<String>;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName(pub Vec<String>);

impl QualifiedName {
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn std(name: &str) -> Self {
        Self(vec!["std".to_string(), name.to_string()])
    }

    pub fn in_module(module: &[String], name: &str) -> Self {
        let mut parts = module.to_vec();
        parts.push(name.to_string());
        Self(parts)
    }

    pub fn module(&self) -> &[String] {
        &self.0[..self.0.len().saturating_sub(1)]
    }

    pub fn last(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    pub fn is(&self, module: &str, name: &str) -> bool {
        self.0.len() == 2 && self.0[0] == module && self.0[1] == name
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("::"))
    }
}

/// A name as written by the user, before resolution.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RawName {
    Unqualified(String),
    Qualified(QualifiedName),
}

impl RawName {
    pub fn last(&self) -> &str {
        match self {
            RawName::Unqualified(n) => n,
            RawName::Qualified(q) => q.last(),
        }
    }
}

impl fmt::Display for RawName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawName::Unqualified(n) => write!(f, "{n}"),
            RawName::Qualified(q) => write!(f, "{q}"),
        }
    }
}

/// Field key of an object value. Link properties live in their own namespace
/// so that `.x` and `@x` never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    Str(String),
    LinkProp(String),
}

impl Label {
    pub fn name(&self) -> &str {
        match self {
            Label::Str(s) | Label::LinkProp(s) => s,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Str(s) => write!(f, "{s}"),
            Label::LinkProp(s) => write!(f, "@{s}"),
        }
    }
}

/// Whether a stored field shows up in projections and output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Marker {
    Visible,
    Invisible,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectTp(pub IndexMap<String, ResultTp>);

impl ObjectTp {
    pub fn empty() -> Self {
        Self(IndexMap::new())
    }

    pub fn get(&self, label: &str) -> Option<&ResultTp> {
        self.0.get(label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompositeKind {
    Array,
    Tuple,
    Enum,
    Range,
    MultiRange,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tp {
    Object(ObjectTp),
    Scalar(QualifiedName),
    Composite {
        kind: CompositeKind,
        tps: Vec<Tp>,
        labels: Vec<String>,
    },
    /// Operands are never identical; build through `type_ops::union`.
    Union(Box<Tp>, Box<Tp>),
    Intersect(Box<Tp>, Box<Tp>),
    /// Object type reference before its definition is inlined.
    NamedNominalLink { name: RawName, linkprop: ObjectTp },
    NominalLink {
        subject: ObjectTp,
        name: QualifiedName,
        linkprop: ObjectTp,
    },
    UncheckedName(RawName),
    Computable { expr: Box<BindingExpr>, tp: Box<Tp> },
    /// Computed field whose type has not been inferred yet.
    UncheckedComputable(Box<BindingExpr>),
    /// Placeholder for a link whose target is inherited from a base type.
    OverloadedTarget { linkprop: Option<ObjectTp> },
    Default { expr: Box<BindingExpr>, tp: Box<Tp> },
    Any(Option<String>),
    /// The `some` placeholder instantiated during overload resolution.
    Existential(usize),
}

impl Tp {
    pub fn scalar(name: &str) -> Tp {
        Tp::Scalar(QualifiedName::std(name))
    }

    pub fn bool_tp() -> Tp {
        Tp::scalar("bool")
    }

    pub fn str_tp() -> Tp {
        Tp::scalar("str")
    }

    pub fn int_tp() -> Tp {
        Tp::scalar("int64")
    }

    pub fn float_tp() -> Tp {
        Tp::scalar("float64")
    }

    pub fn uuid_tp() -> Tp {
        Tp::scalar("uuid")
    }

    pub fn arr(elem: Tp) -> Tp {
        Tp::Composite {
            kind: CompositeKind::Array,
            tps: vec![elem],
            labels: Vec::new(),
        }
    }

    pub fn unnamed_tuple(tps: Vec<Tp>) -> Tp {
        Tp::Composite {
            kind: CompositeKind::Tuple,
            tps,
            labels: Vec::new(),
        }
    }

    pub fn named_tuple(fields: Vec<(String, Tp)>) -> Tp {
        let (labels, tps) = fields.into_iter().unzip();
        Tp::Composite {
            kind: CompositeKind::Tuple,
            tps,
            labels,
        }
    }

    pub fn named_link(name: QualifiedName) -> Tp {
        Tp::NamedNominalLink {
            name: RawName::Qualified(name),
            linkprop: ObjectTp::empty(),
        }
    }

    pub fn free_object() -> Tp {
        Tp::NominalLink {
            subject: ObjectTp::empty(),
            name: QualifiedName::std("FreeObject"),
            linkprop: ObjectTp::empty(),
        }
    }

    pub fn is_scalar_named(&self, name: &str) -> bool {
        matches!(self, Tp::Scalar(q) if q.is("std", name))
    }

    /// Unified view over both nominal-link variants.
    pub fn link_name(&self) -> Option<QualifiedName> {
        match self {
            Tp::NamedNominalLink {
                name: RawName::Qualified(q),
                ..
            } => Some(q.clone()),
            Tp::NominalLink { name, .. } => Some(name.clone()),
            _ => None,
        }
    }

    pub fn link_props(&self) -> Option<&ObjectTp> {
        match self {
            Tp::NamedNominalLink { linkprop, .. } | Tp::NominalLink { linkprop, .. } => Some(linkprop),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultTp {
    pub tp: Tp,
    pub mode: CMMode,
}

impl ResultTp {
    pub fn new(tp: Tp, mode: CMMode) -> Self {
        Self { tp, mode }
    }

    pub fn one(tp: Tp) -> Self {
        Self::new(tp, CMMode::ONE)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamModifier {
    Singleton,
    Optional,
    SetOf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunArgRetType {
    pub args_tp: Vec<Tp>,
    pub args_mod: Vec<ParamModifier>,
    pub args_label: Vec<String>,
    pub ret_tp: ResultTp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TpCastKind {
    /// Also usable where an assignment cast is accepted.
    Implicit,
    Assignment,
    Explicit,
}
