use eql_ir::{Tp, TpCastKind};

use crate::schema::DBSchema;
use crate::subtype::{ancestors, is_subtype};

/// Weakest cast kind converting `from` into `to`, if any. Subtypes convert
/// implicitly; scalar casts fall back to the casts declared on supertypes of
/// the source.
pub fn check_castable(schema: &DBSchema, from: &Tp, to: &Tp) -> Option<TpCastKind> {
    if is_subtype(schema, from, to) {
        return Some(TpCastKind::Implicit);
    }
    match (from, to) {
        (Tp::Scalar(a), Tp::Scalar(b)) => std::iter::once(a.clone())
            .chain(ancestors(schema, a))
            .find_map(|src| schema.casts.get(&(src, b.clone())).copied()),
        (
            Tp::Composite {
                kind: k1, tps: t1, ..
            },
            Tp::Composite {
                kind: k2, tps: t2, ..
            },
        ) if k1 == k2 && t1.len() == t2.len() => t1
            .iter()
            .zip(t2)
            .map(|(a, b)| check_castable(schema, a, b))
            .try_fold(TpCastKind::Implicit, |acc, k| k.map(|k| acc.max(k))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eql_ir::QualifiedName;

    fn schema() -> DBSchema {
        let mut s = DBSchema::new();
        let int = QualifiedName::std("int64");
        let float = QualifiedName::std("float64");
        let str_ = QualifiedName::std("str");
        let anyint = QualifiedName::std("anyint");
        s.subtyping.insert(int.clone(), vec![anyint.clone()]);
        s.casts.insert((int.clone(), float.clone()), TpCastKind::Implicit);
        s.casts.insert((anyint, str_.clone()), TpCastKind::Explicit);
        s.casts.insert((str_, int), TpCastKind::Explicit);
        s
    }

    #[test]
    fn direct_cast_entries_are_used() {
        let s = schema();
        assert_eq!(
            check_castable(&s, &Tp::int_tp(), &Tp::float_tp()),
            Some(TpCastKind::Implicit)
        );
        assert_eq!(check_castable(&s, &Tp::float_tp(), &Tp::int_tp()), None);
    }

    #[test]
    fn supertype_casts_apply_to_subtypes() {
        let s = schema();
        assert_eq!(
            check_castable(&s, &Tp::int_tp(), &Tp::str_tp()),
            Some(TpCastKind::Explicit)
        );
    }

    #[test]
    fn array_casts_take_the_strongest_element_cast() {
        let s = schema();
        assert_eq!(
            check_castable(&s, &Tp::arr(Tp::str_tp()), &Tp::arr(Tp::int_tp())),
            Some(TpCastKind::Explicit)
        );
    }
}
