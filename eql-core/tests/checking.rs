use eql_core::{DBSchema, DEFAULT_MODULE, Prepared, add_sdl, factor_paths, is_subtype, lower_query, prepare, std_schema};
use eql_ir::{CMMode, Cardinal, NameGen, QualifiedName, Tp, alpha_equivalent};
use proptest::{
    prelude::prop,
    test_runner::{Config, TestCaseError, TestRunner},
};

const PEOPLE: &str = r#"
type Person {
    required name: str;
    age: int64;
    multi friends: Person;
    shout := .name ++ '!';
}
type User {
    required email: str { constraint exclusive; }
    name: str;
}
type Draft {
    a: str { default := .b ++ 'a' }
    b: str { default := .a ++ 'b' }
}
"#;

fn module() -> Vec<String> {
    vec![DEFAULT_MODULE.to_string()]
}

fn schema(names: &NameGen) -> DBSchema {
    let mut s = std_schema(names).unwrap();
    add_sdl(&mut s, names, &module(), PEOPLE).unwrap();
    s
}

fn prep(src: &str) -> Result<Prepared, String> {
    let names = NameGen::new();
    let s = schema(&names);
    let q = eql_parse::parse_query(src).map_err(|e| e.to_string())?;
    prepare(&s, &names, &module(), true, &q).map_err(|e| e.message().to_string())
}

#[test]
fn subtyping_is_reflexive_and_transitive() {
    let mut runner = TestRunner::new(Config {
        cases: 64,
        ..Config::default()
    });
    runner
        .run(&prop::collection::vec(0usize..8, 8), |parents| {
            let mut s = DBSchema::new();
            let name = |i: usize| QualifiedName::new(["default".to_string(), format!("T{i}")]);
            for (i, p) in parents.iter().enumerate().skip(1) {
                s.subtyping.insert(name(i), vec![name(p % i)]);
            }
            let tp = |i: usize| Tp::Scalar(name(i));
            for a in 0..parents.len() {
                if !is_subtype(&s, &tp(a), &tp(a)) {
                    return Err(TestCaseError::fail(format!("T{a} is not a subtype of itself")));
                }
                for b in 0..parents.len() {
                    for c in 0..parents.len() {
                        if is_subtype(&s, &tp(a), &tp(b))
                            && is_subtype(&s, &tp(b), &tp(c))
                            && !is_subtype(&s, &tp(a), &tp(c))
                        {
                            return Err(TestCaseError::fail(format!(
                                "T{a} <: T{b} <: T{c} but not T{a} <: T{c}"
                            )));
                        }
                    }
                }
            }
            Ok(())
        })
        .unwrap();
}

#[test]
fn equality_on_an_exclusive_field_selects_at_most_one() {
    let p = prep("SELECT User FILTER .email = 'a@example.com'").unwrap();
    assert_eq!(p.tp.mode, CMMode::AT_MOST_ONE);
}

#[test]
fn equality_on_a_plain_field_keeps_the_upper_bound() {
    let p = prep("SELECT User FILTER .name = 'a'").unwrap();
    assert_eq!(p.tp.mode, CMMode::new(Cardinal::Zero, Cardinal::Inf));
}

#[test]
fn computed_fields_project_with_their_inferred_type() {
    let p = prep("SELECT Person.shout").unwrap();
    assert_eq!(p.tp.tp, Tp::str_tp());
}

#[test]
fn literals_widen_through_implicit_casts() {
    let p = prep("SELECT 1 + 2.5").unwrap();
    assert_eq!(p.tp.tp, Tp::float_tp());
    assert_eq!(p.tp.mode, CMMode::ONE);
}

#[test]
fn set_literals_and_unions_join_numeric_members() {
    for src in ["SELECT {1, 2.5}", "SELECT 1 UNION 2.5"] {
        let p = prep(src).unwrap();
        assert_eq!(p.tp.tp, Tp::float_tp(), "{src}");
    }
    assert_eq!(prep("SELECT {1, 2}").unwrap().tp.tp, Tp::int_tp());
}

#[test]
fn mismatched_operands_report_the_candidates() {
    let err = prep("SELECT 1 + 'a'").unwrap_err();
    assert!(err.contains("no overload"), "{err}");
}

#[test]
fn missing_required_fields_are_rejected() {
    let err = prep("INSERT Person { age := 3 }").unwrap_err();
    assert!(err.contains("name"), "{err}");
}

#[test]
fn cyclic_defaults_are_rejected_at_insert() {
    let err = prep("INSERT Draft").unwrap_err();
    assert!(err.contains("circular"), "{err}");
}

#[test]
fn supplying_one_field_breaks_the_default_cycle() {
    assert!(prep("INSERT Draft { a := 'x' }").is_ok());
}

#[test]
fn path_factoring_reaches_a_fixed_point() {
    let names = NameGen::new();
    let s = schema(&names);
    for src in [
        "SELECT Person { name, n := count(Person.friends) } FILTER Person.age > 3",
        "SELECT (Person.name ++ Person.friends.name, Person.age)",
        "SELECT Person { name } ORDER BY len(.name) THEN .age",
        "WITH p := Person SELECT p.name ++ p.name",
    ] {
        let q = eql_parse::parse_query(src).unwrap();
        let lowered = lower_query(&names, &q).unwrap().expr;
        let once = factor_paths(&s, &module(), &names, &lowered);
        let twice = factor_paths(&s, &module(), &names, &once);
        assert!(alpha_equivalent(&once, &twice), "{src}: {once} vs {twice}");
    }
}

#[test]
fn factored_queries_still_type_check() {
    for src in [
        "SELECT Person { name, n := count(Person.friends) } FILTER Person.age > 3",
        "SELECT Person.name ++ Person.name",
        "SELECT Person { name } ORDER BY len(.name) DESC",
    ] {
        assert!(prep(src).is_ok(), "{src}: {:?}", prep(src).err());
    }
}
