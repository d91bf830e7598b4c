use eql_core::{DBSchema, DEFAULT_MODULE, add_sdl, std_schema};
use eql_ir::{Label, Marker, NameGen, ObjectVal, QualifiedName, RefVal, SelectFilter, Val};
use eql_storage::{EdgeDatabase, Fields, SqliteStorage, StorageError, StorageProvider};

const SDL: &str = r#"
type Person {
    required name: str;
    age: int64;
    multi nicknames: str;
    multi friends: Person { since: int64; };
    best_friend: Person;
}
"#;

fn schema(sdl: &str) -> DBSchema {
    let names = NameGen::new();
    let mut s = std_schema(&names).unwrap();
    add_sdl(&mut s, &names, &[DEFAULT_MODULE.to_string()], sdl).unwrap();
    s
}

fn person() -> QualifiedName {
    QualifiedName::new(["default", "Person"])
}

fn open(path: &std::path::Path) -> SqliteStorage {
    SqliteStorage::open(path, Some(SDL))
        .unwrap()
        .finish(&schema(SDL))
        .unwrap()
}

fn fields(pairs: Vec<(&str, Vec<Val>)>) -> Fields {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn friend(id: i64, since: i64) -> Val {
    let mut lp = ObjectVal::empty();
    lp.0.insert(Label::LinkProp("since".into()), (Marker::Invisible, vec![Val::int(since)]));
    Val::Ref(RefVal {
        id,
        tpname: person(),
        val: lp,
    })
}

#[test]
fn ids_start_at_the_seed_and_increase() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = open(&dir.path().join("db.sqlite"));
    let a = s.next_id().unwrap();
    let b = s.next_id().unwrap();
    assert_eq!(a, 101);
    assert_eq!(b, 102);
}

#[test]
fn fields_round_trip_through_tables() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = open(&dir.path().join("db.sqlite"));
    s.insert(101, &person(), &fields(vec![("name", vec![Val::str("Bob")])]))
        .unwrap();
    s.insert(
        102,
        &person(),
        &fields(vec![
            ("name", vec![Val::str("Alice")]),
            ("age", vec![Val::int(30)]),
            ("nicknames", vec![Val::str("Al"), Val::str("Ally")]),
            ("friends", vec![friend(101, 2020)]),
            ("best_friend", vec![Val::reference(101, person())]),
        ]),
    )
    .unwrap();

    assert_eq!(s.project(102, &person(), "age").unwrap(), vec![Val::int(30)]);
    assert_eq!(s.project(101, &person(), "age").unwrap(), Vec::<Val>::new());
    assert_eq!(
        s.project(102, &person(), "nicknames").unwrap(),
        vec![Val::str("Al"), Val::str("Ally")]
    );
    assert_eq!(s.project(102, &person(), "friends").unwrap(), vec![friend(101, 2020)]);
    assert_eq!(
        s.project(102, &person(), "best_friend").unwrap(),
        vec![Val::reference(101, person())]
    );

    let back = s.reverse_project(&[101], "friends").unwrap();
    let mut lp = ObjectVal::empty();
    lp.0.insert(Label::LinkProp("since".into()), (Marker::Invisible, vec![Val::int(2020)]));
    assert_eq!(
        back,
        vec![Val::Ref(RefVal {
            id: 102,
            tpname: person(),
            val: lp,
        })]
    );
    assert_eq!(
        s.reverse_project(&[101], "best_friend").unwrap(),
        vec![Val::reference(102, person())]
    );
}

#[test]
fn filters_compile_to_where_clauses() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = open(&dir.path().join("db.sqlite"));
    for (id, name, nick) in [(101, "a", "x"), (102, "b", "y"), (103, "c", "x")] {
        s.insert(
            id,
            &person(),
            &fields(vec![("name", vec![Val::str(name)]), ("nicknames", vec![Val::str(nick)])]),
        )
        .unwrap();
    }
    let by_name = SelectFilter::Eq {
        propname: "name".into(),
        arg: vec![Val::str("a"), Val::str("b")],
    };
    assert_eq!(s.query_ids_for_a_type(&person(), &by_name).unwrap(), vec![101, 102]);
    let both = SelectFilter::Conjunctive(vec![
        SelectFilter::Eq {
            propname: "nicknames".into(),
            arg: vec![Val::str("x")],
        },
        SelectFilter::Disjunctive(vec![
            SelectFilter::Eq {
                propname: "id".into(),
                arg: vec![Val::uuid(103)],
            },
            SelectFilter::Eq {
                propname: "name".into(),
                arg: vec![],
            },
        ]),
    ]);
    assert_eq!(s.query_ids_for_a_type(&person(), &both).unwrap(), vec![103]);
}

#[test]
fn updates_rewrite_link_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = open(&dir.path().join("db.sqlite"));
    s.insert(101, &person(), &fields(vec![("name", vec![Val::str("a")])]))
        .unwrap();
    s.insert(
        102,
        &person(),
        &fields(vec![("name", vec![Val::str("b")]), ("friends", vec![friend(101, 1)])]),
    )
    .unwrap();
    s.update(102, &person(), &fields(vec![("friends", vec![friend(101, 2)])]))
        .unwrap();
    assert_eq!(s.project(102, &person(), "friends").unwrap(), vec![friend(101, 2)]);
    assert_eq!(s.project(102, &person(), "name").unwrap(), vec![Val::str("b")]);
}

#[test]
fn committed_data_survives_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.sqlite");
    {
        let mut db = EdgeDatabase::new(Box::new(open(&path)));
        let id = db.next_id().unwrap();
        db.insert(id, person(), Fields::new());
        db.update(id, person(), fields(vec![("name", vec![Val::str("kept")])]));
        db.commit_dml().unwrap();
        let lost = db.next_id().unwrap();
        db.insert(lost, person(), Fields::new());
    }
    let opener = SqliteStorage::open(&path, None).unwrap();
    assert_eq!(opener.sdl(), SDL);
    let s = opener.finish(&schema(SDL)).unwrap();
    let ids = s.query_ids_for_a_type(&person(), &SelectFilter::True).unwrap();
    assert_eq!(ids, vec![101]);
    assert_eq!(s.project(101, &person(), "name").unwrap(), vec![Val::str("kept")]);
}

#[test]
fn a_different_schema_is_rejected_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.sqlite");
    drop(open(&path));
    let err = SqliteStorage::open(&path, Some("type Other;")).err().unwrap();
    assert!(matches!(err, StorageError::SchemaMismatch));
}

#[test]
fn snapshots_undo_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = open(&dir.path().join("db.sqlite"));
    s.insert(101, &person(), &fields(vec![("name", vec![Val::str("a")])]))
        .unwrap();
    let snap = s.dump_state().unwrap();
    s.delete(101, &person()).unwrap();
    assert!(!s.check_id_present(101).unwrap());
    s.restore_state(&snap).unwrap();
    assert!(s.check_id_present(101).unwrap());
    assert_eq!(s.project(101, &person(), "name").unwrap(), vec![Val::str("a")]);
}

#[test]
fn a_failing_flush_is_rolled_back_and_never_committed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.sqlite");
    let (lost, kept) = {
        let mut db = EdgeDatabase::new(Box::new(open(&path)));
        let lost = db.next_id().unwrap();
        db.insert(lost, person(), Fields::new());
        db.update(lost, person(), fields(vec![("name", vec![Val::str("lost")])]));
        db.update(lost, person(), fields(vec![("no_such_field", vec![Val::int(1)])]));
        let err = db.commit_dml().unwrap_err();
        assert!(matches!(err, StorageError::UnknownField { .. }));
        assert!(!db.check_id_present(lost).unwrap());

        let kept = db.next_id().unwrap();
        assert!(kept > lost);
        db.insert(kept, person(), Fields::new());
        db.update(kept, person(), fields(vec![("name", vec![Val::str("kept")])]));
        db.commit_dml().unwrap();
        (lost, kept)
    };
    let s = SqliteStorage::open(&path, None)
        .unwrap()
        .finish(&schema(SDL))
        .unwrap();
    assert!(!s.check_id_present(lost).unwrap());
    let ids = s.query_ids_for_a_type(&person(), &SelectFilter::True).unwrap();
    assert_eq!(ids, vec![kept]);
}
