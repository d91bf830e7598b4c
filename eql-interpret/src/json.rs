use serde_json::{Map, Number, Value};

use eql_ir::{
    CompositeKind, Label, Marker, MultiSet, ObjectTp, ObjectVal, Prim, QualifiedName, ResultTp,
    Tp, Val,
};

use crate::error::{EvalError, Result};
use crate::eval::Variables;

/// Renders a statement result. Singular results render bare unless
/// `top_level_array` asks for an array every time.
pub fn multiset_to_json(vals: &MultiSet, rt: &ResultTp, top_level_array: bool) -> Value {
    if rt.mode.is_singular() && !top_level_array {
        return vals
            .first()
            .map_or(Value::Null, |v| render(v, Some(&rt.tp)));
    }
    Value::Array(vals.iter().map(|v| render(v, Some(&rt.tp))).collect())
}

/// Renders a value without type information. Fields holding exactly one
/// value render bare.
pub fn val_to_json(v: &Val) -> Value {
    render(v, None)
}

fn render(v: &Val, tp: Option<&Tp>) -> Value {
    match v {
        Val::Scalar(s) => match &s.val {
            Prim::Int(i) => Value::from(*i),
            Prim::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Prim::Bool(b) => Value::Bool(*b),
            Prim::Str(text) if s.tp.is("std", "json") => {
                serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone()))
            }
            Prim::Str(text) => Value::String(text.clone()),
        },
        Val::Arr(items) => {
            let elem = tp.and_then(|t| match t {
                Tp::Composite {
                    kind: CompositeKind::Array,
                    tps,
                    ..
                } => tps.first(),
                _ => None,
            });
            Value::Array(items.iter().map(|i| render(i, elem)).collect())
        }
        Val::UnnamedTuple(items) => {
            let tps = tuple_tps(tp);
            Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| render(item, tps.and_then(|t| t.get(i))))
                    .collect(),
            )
        }
        Val::NamedTuple(items) => {
            let tps = tuple_tps(tp);
            Value::Object(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, (k, item))| (k.clone(), render(item, tps.and_then(|t| t.get(i)))))
                    .collect(),
            )
        }
        Val::Ref(r) => render_object(&r.val, Some(r.id), tp.and_then(|t| shape_of(t, &r.tpname))),
        Val::Free(o) => render_object(
            o,
            None,
            tp.and_then(|t| shape_of(t, &QualifiedName::std("FreeObject"))),
        ),
    }
}

fn tuple_tps(tp: Option<&Tp>) -> Option<&Vec<Tp>> {
    match tp? {
        Tp::Composite {
            kind: CompositeKind::Tuple,
            tps,
            ..
        } => Some(tps),
        _ => None,
    }
}

/// Field and link property types of the object type `name` inside `tp`.
/// Falls back to the first object type found when none is named `name`.
fn shape_of<'t>(tp: &'t Tp, name: &QualifiedName) -> Option<(&'t ObjectTp, &'t ObjectTp)> {
    exact_shape(tp, name).or_else(|| any_shape(tp))
}

fn exact_shape<'t>(tp: &'t Tp, name: &QualifiedName) -> Option<(&'t ObjectTp, &'t ObjectTp)> {
    match tp {
        Tp::NominalLink {
            subject,
            name: n,
            linkprop,
        } if n == name => Some((subject, linkprop)),
        Tp::Union(a, b) => exact_shape(a, name).or_else(|| exact_shape(b, name)),
        _ => None,
    }
}

fn any_shape(tp: &Tp) -> Option<(&ObjectTp, &ObjectTp)> {
    match tp {
        Tp::NominalLink { subject, linkprop, .. } => Some((subject, linkprop)),
        Tp::Union(a, b) => any_shape(a).or_else(|| any_shape(b)),
        _ => None,
    }
}

fn render_object(
    obj: &ObjectVal,
    id: Option<i64>,
    shape: Option<(&ObjectTp, &ObjectTp)>,
) -> Value {
    let mut out = Map::new();
    for (label, (marker, vals)) in &obj.0 {
        if *marker != Marker::Visible {
            continue;
        }
        let (key, field) = match label {
            Label::Str(s) => (s.clone(), shape.and_then(|(fields, _)| fields.get(s))),
            Label::LinkProp(s) => (format!("@{s}"), shape.and_then(|(_, lps)| lps.get(s))),
        };
        out.insert(key, render_field(vals, field));
    }
    if let Some(id) = id.filter(|_| out.is_empty()) {
        out.insert("id".to_string(), Value::from(id));
    }
    Value::Object(out)
}

fn render_field(vals: &MultiSet, field: Option<&ResultTp>) -> Value {
    let singular = match field {
        Some(rt) => rt.mode.is_singular(),
        None => vals.len() == 1,
    };
    let tp = field.map(|rt| &rt.tp);
    if singular {
        vals.first().map_or(Value::Null, |v| render(v, tp))
    } else {
        Value::Array(vals.iter().map(|v| render(v, tp)).collect())
    }
}

/// Converts bound variables. An object binds parameters by name, an array
/// binds them by position (`$0`, `$1`, ...). `null` binds an empty set.
pub fn json_to_variables(json: &Value) -> Result<Variables> {
    let pairs: Vec<(String, &Value)> = match json {
        Value::Null => Vec::new(),
        Value::Object(m) => m.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        other => {
            return Err(EvalError::runtime(format!(
                "variables must be an object or an array, got {other}"
            )));
        }
    };
    let mut out = Variables::new();
    for (name, v) in pairs {
        let vals = match v {
            Value::Null => Vec::new(),
            other => vec![json_to_val(other)?],
        };
        out.insert(name, vals);
    }
    Ok(out)
}

fn json_to_val(v: &Value) -> Result<Val> {
    Ok(match v {
        Value::Bool(b) => Val::bool(*b),
        Value::String(s) => Val::str(s.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Val::int(i),
            None => Val::float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::Array(items) => Val::Arr(items.iter().map(json_to_val).collect::<Result<_>>()?),
        Value::Null | Value::Object(_) => {
            return Err(EvalError::runtime(format!("unsupported variable value {v}")));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use eql_ir::{CMMode, RefVal};
    use indexmap::IndexMap;
    use serde_json::json;

    fn person() -> QualifiedName {
        QualifiedName::new(["default", "Person"])
    }

    fn shaped(fields: Vec<(&str, CMMode)>) -> Tp {
        Tp::NominalLink {
            subject: ObjectTp(
                fields
                    .into_iter()
                    .map(|(k, m)| (k.to_string(), ResultTp::new(Tp::str_tp(), m)))
                    .collect(),
            ),
            name: person(),
            linkprop: ObjectTp::empty(),
        }
    }

    fn object(fields: Vec<(Label, Marker, MultiSet)>) -> Val {
        let mut m = IndexMap::new();
        for (l, mk, v) in fields {
            m.insert(l, (mk, v));
        }
        Val::Ref(RefVal {
            id: 7,
            tpname: person(),
            val: ObjectVal(m),
        })
    }

    #[test]
    fn objects_render_visible_fields_only() {
        let v = object(vec![
            (Label::Str("name".into()), Marker::Visible, vec![Val::str("Alice")]),
            (Label::Str("age".into()), Marker::Invisible, vec![Val::int(30)]),
        ]);
        let tp = shaped(vec![("name", CMMode::ONE)]);
        let rt = ResultTp::new(tp, CMMode::ANY);
        assert_eq!(multiset_to_json(&vec![v], &rt, false), json!([{"name": "Alice"}]));
    }

    #[test]
    fn objects_without_visible_fields_render_their_id() {
        let v = object(vec![]);
        let rt = ResultTp::new(Tp::named_link(person()), CMMode::ONE);
        assert_eq!(multiset_to_json(&vec![v.clone()], &rt, false), json!({"id": 7}));
        assert_eq!(multiset_to_json(&vec![v], &rt, true), json!([{"id": 7}]));
    }

    #[test]
    fn field_cardinality_decides_between_bare_and_array() {
        let v = object(vec![
            (Label::Str("nick".into()), Marker::Visible, vec![Val::str("Al")]),
            (Label::Str("middle".into()), Marker::Visible, vec![]),
            (Label::LinkProp("since".into()), Marker::Visible, vec![Val::int(3)]),
        ]);
        let tp = shaped(vec![("nick", CMMode::ANY), ("middle", CMMode::AT_MOST_ONE)]);
        let rt = ResultTp::new(tp, CMMode::ONE);
        assert_eq!(
            multiset_to_json(&vec![v], &rt, false),
            json!({"nick": ["Al"], "middle": null, "@since": 3})
        );
    }

    #[test]
    fn json_scalars_embed_their_document() {
        let doc = Val::scalar(QualifiedName::std("json"), Prim::Str("{\"a\":[1,2]}".into()));
        assert_eq!(val_to_json(&doc), json!({"a": [1, 2]}));
    }

    #[test]
    fn variables_bind_by_name_or_position() {
        let named = json_to_variables(&json!({"name": "x", "tags": ["a"], "skip": null})).unwrap();
        assert_eq!(named["name"], vec![Val::str("x")]);
        assert_eq!(named["tags"], vec![Val::Arr(vec![Val::str("a")])]);
        assert!(named["skip"].is_empty());
        let positional = json_to_variables(&json!([1, 2.5])).unwrap();
        assert_eq!(positional["0"], vec![Val::int(1)]);
        assert_eq!(positional["1"], vec![Val::float(2.5)]);
        assert!(json_to_variables(&json!("nope")).is_err());
    }
}
