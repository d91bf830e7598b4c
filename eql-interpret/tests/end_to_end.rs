use eql_interpret::{InterpreterConfig, Session, StorageConfig};
use eql_ir::Val;
use serde_json::{Value, json};

fn session(sdl: &str) -> Session {
    Session::new(InterpreterConfig::default(), Some(sdl)).unwrap()
}

fn run_json(s: &mut Session, src: &str) -> Vec<Value> {
    s.run_str_json(src, &Value::Null).unwrap()
}

fn last(s: &mut Session, src: &str) -> Value {
    run_json(s, src).pop().unwrap()
}

#[test]
fn inserted_people_are_selected_by_name() {
    let mut s = session("type Person { name: str; age: int64; }");
    let out = run_json(
        &mut s,
        r#"
        INSERT Person { name := "Alice", age := 30 };
        SELECT Person { name, age } FILTER .name = "Alice";
        "#,
    );
    assert_eq!(out[1], json!([{"name": "Alice", "age": 30}]));
}

#[test]
fn insert_then_select_round_trips() {
    let mut s = session("type Foo { x: str; }");
    s.run_str("INSERT Foo { x := 'a' };").unwrap();
    assert_eq!(last(&mut s, "SELECT Foo { x };"), json!([{"x": "a"}]));
    assert_eq!(last(&mut s, "SELECT Foo.x;"), json!(["a"]));
}

#[test]
fn updates_leave_other_fields_alone() {
    let mut s = session("type Foo { x: str; y: str; }");
    s.run_str("INSERT Foo { x := 'a', y := 'keep' };").unwrap();
    s.run_str("UPDATE Foo SET { x := 'b' };").unwrap();
    assert_eq!(last(&mut s, "SELECT Foo { x, y };"), json!([{"x": "b", "y": "keep"}]));
}

#[test]
fn deleted_objects_are_gone() {
    let mut s = session("type Foo { x: str; }");
    let inserted = s.run_str("INSERT Foo { x := 'a' };").unwrap();
    let id = inserted[0][0].as_ref().unwrap().id;
    let deleted = s.run_str("DELETE Foo;").unwrap();
    assert_eq!(deleted[0].len(), 1);
    assert!(s.run_str("SELECT Foo;").unwrap()[0].is_empty());
    assert!(!s.database().check_id_present(id).unwrap());
}

#[test]
fn repeated_links_to_one_object_collapse() {
    let mut s = session("type B { name: str; } type A { multi bs: B { w: int64; }; }");
    s.run_str("INSERT B { name := 'b' };").unwrap();
    s.run_str("INSERT A { bs := {(SELECT B), (SELECT B)} };").unwrap();
    assert_eq!(last(&mut s, "SELECT A { bs };"), json!([{"bs": [{"id": 1}]}]));
    assert_eq!(last(&mut s, "SELECT A { bs: { name } };"), json!([{"bs": [{"name": "b"}]}]));
}

#[test]
fn link_properties_keep_links_apart() {
    let mut s = session("type B { name: str; } type A { multi bs: B { w: int64; }; }");
    s.run_str("INSERT B { name := 'b' };").unwrap();
    s.run_str("INSERT A { bs := {(SELECT B { @w := 1 }), (SELECT B { @w := 2 })} };")
        .unwrap();
    let out = last(&mut s, "SELECT A { bs: { @w } };");
    let mut ws: Vec<i64> = out[0]["bs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["@w"].as_i64().unwrap())
        .collect();
    ws.sort();
    assert_eq!(ws, vec![1, 2]);
}

#[test]
fn ordering_offset_and_limit() {
    let mut s = session("type N { v: int64; }");
    s.run_str("FOR x IN {3, 1, 2, 5, 4} UNION (INSERT N { v := x });").unwrap();
    assert_eq!(
        last(&mut s, "SELECT N { v } ORDER BY .v DESC OFFSET 1 LIMIT 3;"),
        json!([{"v": 4}, {"v": 3}, {"v": 2}])
    );
    assert_eq!(last(&mut s, "SELECT count(N);"), json!(5));
    assert_eq!(last(&mut s, "SELECT sum(N.v);"), json!(15));
}

#[test]
fn computed_fields_are_evaluated_on_read() {
    let mut s = session("type Person { required name: str; shout := .name ++ '!'; }");
    s.run_str("INSERT Person { name := 'hey' };").unwrap();
    assert_eq!(last(&mut s, "SELECT Person { shout };"), json!([{"shout": "hey!"}]));
}

#[test]
fn parameters_bind_from_json() {
    let mut s = session("type Person { name: str; }");
    s.run_str("INSERT Person { name := 'Alice' }; INSERT Person { name := 'Bob' };")
        .unwrap();
    let out = s
        .run_str_json(
            "SELECT Person { name } FILTER .name = <str>$who;",
            &json!({"who": "Bob"}),
        )
        .unwrap();
    assert_eq!(out[0], json!([{"name": "Bob"}]));
    assert!(
        s.run_str_json("SELECT <str>$who;", &Value::Null).is_err(),
        "a required parameter without a value must fail"
    );
}

#[test]
fn failed_statements_commit_nothing() {
    let mut s = session("type Foo { x: str; }");
    let err = s.run_str("FOR i IN {1, 0} UNION (INSERT Foo { x := 'a' IF 1 // i > 0 ELSE 'b' });");
    assert!(err.is_err());
    assert!(s.run_str("SELECT Foo;").unwrap()[0].is_empty());
}

#[test]
fn scalar_expressions() {
    let mut s = session("type Foo;");
    assert_eq!(last(&mut s, "SELECT 1 + 2.5;"), json!(3.5));
    assert_eq!(last(&mut s, "SELECT 'abc'[1:];"), json!("bc"));
    assert_eq!(last(&mut s, "SELECT 'x' IF false ELSE 'y';"), json!("y"));
    assert_eq!(last(&mut s, "SELECT (a := 1, b := 'z').b;"), json!("z"));
    assert_eq!(last(&mut s, "SELECT [1, 2] ++ [3];"), json!([1, 2, 3]));
}

#[test]
fn sqlite_sessions_persist_committed_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eql.sqlite");
    let config = || InterpreterConfig {
        storage: StorageConfig::Sqlite { path: path.clone() },
        ..Default::default()
    };
    {
        let mut s = Session::new(config(), Some("type Person { name: str; }")).unwrap();
        s.run_str("INSERT Person { name := 'Ada' };").unwrap();
    }
    let mut s = Session::new(config(), None).unwrap();
    assert_eq!(last(&mut s, "SELECT Person { name };"), json!([{"name": "Ada"}]));
    assert_eq!(s.run_str("SELECT Person.name;").unwrap()[0], vec![Val::str("Ada")]);
}

#[test]
fn ddl_directories_load_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.edgeql"), "CREATE MODULE shop;").unwrap();
    std::fs::write(
        dir.path().join("b.edgeql"),
        "CREATE TYPE shop::Item { CREATE PROPERTY name -> std::str; };",
    )
    .unwrap();
    std::fs::write(dir.path().join("_skip.edgeql"), "this is not ddl").unwrap();
    let mut s = Session::new(InterpreterConfig::default(), None).unwrap();
    s.add_ddl_dir(dir.path()).unwrap();
    s.run_str("INSERT shop::Item { name := 'pen' };").unwrap();
    assert_eq!(last(&mut s, "SELECT shop::Item.name;"), json!(["pen"]));
}

#[test]
fn object_keys_follow_the_shape() {
    let mut s = session("type Person { name: str; age: int64; }");
    s.run_str("INSERT Person { name := 'z', age := 1 };").unwrap();
    let out = last(&mut s, "SELECT Person { name, age };");
    assert_eq!(out.to_string(), r#"[{"name":"z","age":1}]"#);
    let out = last(&mut s, "SELECT Person { age, name };");
    assert_eq!(out.to_string(), r#"[{"age":1,"name":"z"}]"#);
}

#[test]
fn mixed_numeric_sets_come_out_as_floats() {
    let mut s = session("type Foo;");
    assert_eq!(last(&mut s, "SELECT {1, 2.5};"), json!([1.0, 2.5]));
}
