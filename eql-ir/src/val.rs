#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

use crate::tp::{Label, Marker, QualifiedName};

pub type EdgeId = i64;

/// Raw payload of a scalar. Floats compare with `total_cmp` so values can be
/// hashed, deduplicated and sorted.
#[derive(Clone, Debug)]
pub enum Prim {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Prim {
    fn rank(&self) -> u8 {
        match self {
            Prim::Bool(_) => 0,
            Prim::Int(_) | Prim::Float(_) => 1,
            Prim::Str(_) => 2,
        }
    }
}

impl PartialEq for Prim {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Prim {}

impl PartialOrd for Prim {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prim {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Prim::Int(a), Prim::Int(b)) => a.cmp(b),
            (Prim::Float(a), Prim::Float(b)) => a.total_cmp(b),
            (Prim::Int(a), Prim::Float(b)) => (*a as f64).total_cmp(b),
            (Prim::Float(a), Prim::Int(b)) => a.total_cmp(&(*b as f64)),
            (Prim::Str(a), Prim::Str(b)) => a.cmp(b),
            (Prim::Bool(a), Prim::Bool(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Prim {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            // ints and floats that compare equal must hash equal
            Prim::Int(i) => (*i as f64).to_bits().hash(state),
            Prim::Float(f) => f.to_bits().hash(state),
            Prim::Str(s) => s.hash(state),
            Prim::Bool(b) => b.hash(state),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScalarVal {
    pub tp: QualifiedName,
    pub val: Prim,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectVal(pub IndexMap<Label, (Marker, MultiSet)>);

impl ObjectVal {
    pub fn empty() -> Self {
        Self(IndexMap::new())
    }

    pub fn get(&self, label: &Label) -> Option<&MultiSet> {
        self.0.get(label).map(|(_, v)| v)
    }

    /// Right-biased union of two field maps.
    pub fn combine(&self, other: &ObjectVal) -> ObjectVal {
        let mut out = self.0.clone();
        for (k, v) in &other.0 {
            out.insert(k.clone(), v.clone());
        }
        ObjectVal(out)
    }

    pub fn link_props_only(&self) -> ObjectVal {
        ObjectVal(
            self.0
                .iter()
                .filter(|(k, _)| matches!(k, Label::LinkProp(_)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn without_link_props(&self) -> ObjectVal {
        ObjectVal(
            self.0
                .iter()
                .filter(|(k, _)| matches!(k, Label::Str(_)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn visible_link_props(&self) -> Vec<(&Label, &MultiSet)> {
        self.0
            .iter()
            .filter(|(k, (m, _))| matches!(k, Label::LinkProp(_)) && *m == Marker::Visible)
            .map(|(k, (_, v))| (k, v))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefVal {
    pub id: EdgeId,
    pub tpname: QualifiedName,
    pub val: ObjectVal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Val {
    Scalar(ScalarVal),
    Ref(RefVal),
    /// Result of shaping `std::FreeObject`; has no identity.
    Free(ObjectVal),
    UnnamedTuple(Vec<Val>),
    NamedTuple(IndexMap<String, Val>),
    Arr(Vec<Val>),
}

/// Ordered, duplicate-permitting sequence of values.
pub type MultiSet = Vec<Val>;

impl Val {
    pub fn scalar(tp: QualifiedName, val: Prim) -> Val {
        Val::Scalar(ScalarVal { tp, val })
    }

    pub fn int(i: i64) -> Val {
        Val::scalar(QualifiedName::std("int64"), Prim::Int(i))
    }

    pub fn float(f: f64) -> Val {
        Val::scalar(QualifiedName::std("float64"), Prim::Float(f))
    }

    pub fn str(s: impl Into<String>) -> Val {
        Val::scalar(QualifiedName::std("str"), Prim::Str(s.into()))
    }

    pub fn bool(b: bool) -> Val {
        Val::scalar(QualifiedName::std("bool"), Prim::Bool(b))
    }

    pub fn uuid(id: EdgeId) -> Val {
        Val::scalar(QualifiedName::std("uuid"), Prim::Int(id))
    }

    pub fn reference(id: EdgeId, tpname: QualifiedName) -> Val {
        Val::Ref(RefVal {
            id,
            tpname,
            val: ObjectVal::empty(),
        })
    }

    pub fn as_prim(&self) -> Option<&Prim> {
        match self {
            Val::Scalar(s) => Some(&s.val),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.as_prim() {
            Some(Prim::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self.as_prim() {
            Some(Prim::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self.as_prim() {
            Some(Prim::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> Option<&RefVal> {
        match self {
            Val::Ref(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Val::Ref(_) | Val::Free(_))
    }

    /// Field map of a reference or free object.
    pub fn object_val(&self) -> Option<&ObjectVal> {
        match self {
            Val::Ref(r) => Some(&r.val),
            Val::Free(o) => Some(o),
            _ => None,
        }
    }

    /// Drops every link-property entry of a reference.
    pub fn remove_link_props(&self) -> Val {
        match self {
            Val::Ref(r) => Val::Ref(RefVal {
                id: r.id,
                tpname: r.tpname.clone(),
                val: r.val.without_link_props(),
            }),
            other => other.clone(),
        }
    }
}

/// Total order used by ORDER BY and by deterministic output.
/// References order by id; composite values lexicographically.
pub fn compare_vals(a: &Val, b: &Val) -> Ordering {
    match (a, b) {
        (Val::Scalar(x), Val::Scalar(y)) => x.val.cmp(&y.val),
        (Val::Ref(x), Val::Ref(y)) => x.id.cmp(&y.id),
        (Val::Free(x), Val::Free(y)) => compare_seqs(
            x.0.values().flat_map(|(_, vs)| vs.iter()),
            y.0.values().flat_map(|(_, vs)| vs.iter()),
        ),
        (Val::UnnamedTuple(xs), Val::UnnamedTuple(ys)) | (Val::Arr(xs), Val::Arr(ys)) => {
            compare_seqs(xs.iter(), ys.iter())
        }
        (Val::NamedTuple(xs), Val::NamedTuple(ys)) => compare_seqs(xs.values(), ys.values()),
        _ => val_rank(a).cmp(&val_rank(b)),
    }
}

fn compare_seqs<'a>(
    mut xs: impl Iterator<Item = &'a Val>,
    mut ys: impl Iterator<Item = &'a Val>,
) -> Ordering {
    loop {
        match (xs.next(), ys.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match compare_vals(x, y) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

fn val_rank(v: &Val) -> u8 {
    match v {
        Val::Scalar(_) => 0,
        Val::Ref(_) => 1,
        Val::Free(_) => 2,
        Val::UnnamedTuple(_) => 3,
        Val::NamedTuple(_) => 4,
        Val::Arr(_) => 5,
    }
}

/// Merges references that share an id unless their visible link properties
/// tell them apart. Non-reference values pass through untouched.
pub fn object_dedup(vals: MultiSet) -> MultiSet {
    let mut out: MultiSet = Vec::with_capacity(vals.len());
    for v in vals {
        let Val::Ref(r) = &v else {
            out.push(v);
            continue;
        };
        let existing = out.iter_mut().find_map(|o| match o {
            Val::Ref(o) if o.id == r.id && same_visible_link_props(&o.val, &r.val) => Some(o),
            _ => None,
        });
        match existing {
            Some(o) => {
                let merged = merge_fields(&o.val, &r.val);
                o.val = merged;
            }
            None => out.push(v),
        }
    }
    out
}

fn same_visible_link_props(a: &ObjectVal, b: &ObjectVal) -> bool {
    let mut xs = a.visible_link_props();
    let mut ys = b.visible_link_props();
    xs.sort_by(|l, r| l.0.cmp(r.0));
    ys.sort_by(|l, r| l.0.cmp(r.0));
    xs == ys
}

/// Union of two field maps; a field visible in either copy stays visible.
fn merge_fields(a: &ObjectVal, b: &ObjectVal) -> ObjectVal {
    let mut out = a.0.clone();
    for (k, (m, v)) in &b.0 {
        match out.get_mut(k) {
            Some((existing, _)) => {
                if *m == Marker::Visible {
                    *existing = Marker::Visible;
                }
            }
            None => {
                out.insert(k.clone(), (*m, v.clone()));
            }
        }
    }
    ObjectVal(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> QualifiedName {
        QualifiedName::new(["default", "Person"])
    }

    #[test]
    fn ints_and_floats_compare_numerically() {
        assert_eq!(compare_vals(&Val::int(2), &Val::float(2.5)), Ordering::Less);
        assert_eq!(Prim::Int(3), Prim::Float(3.0));
    }

    #[test]
    fn dedup_merges_same_id_without_visible_link_props() {
        let mut a = ObjectVal::empty();
        a.0.insert(Label::LinkProp("lp".into()), (Marker::Invisible, vec![Val::int(1)]));
        let mut b = ObjectVal::empty();
        b.0.insert(Label::LinkProp("lp".into()), (Marker::Invisible, vec![Val::int(2)]));
        let vals = vec![
            Val::Ref(RefVal { id: 7, tpname: person(), val: a }),
            Val::Ref(RefVal { id: 7, tpname: person(), val: b }),
        ];
        assert_eq!(object_dedup(vals).len(), 1);
    }

    #[test]
    fn dedup_keeps_links_told_apart_by_visible_link_props() {
        let mut a = ObjectVal::empty();
        a.0.insert(Label::LinkProp("lp".into()), (Marker::Visible, vec![Val::int(1)]));
        let mut b = ObjectVal::empty();
        b.0.insert(Label::LinkProp("lp".into()), (Marker::Visible, vec![Val::int(2)]));
        let vals = vec![
            Val::Ref(RefVal { id: 7, tpname: person(), val: a }),
            Val::Ref(RefVal { id: 7, tpname: person(), val: b }),
        ];
        assert_eq!(object_dedup(vals).len(), 2);
    }

    #[test]
    fn dedup_leaves_scalars_alone() {
        let vals = vec![Val::int(1), Val::int(1)];
        assert_eq!(object_dedup(vals).len(), 2);
    }
}
