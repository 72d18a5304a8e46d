//! Statement ordering and key propagation across cascaded relationships.

use ormlink::prelude::*;
use ormlink::{CascadeState, MappingErrorKind};
use std::sync::Mutex;

fn catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog
        .register_entity(
            EntityMapping::new("Dept", "dept")
                .expect("dept mapping")
                .with_column("deptno", "id")
                .expect("deptno")
                .with_column("dname", "name")
                .expect("dname")
                .with_primary_key(&["deptno"])
                .expect("dept key")
                .with_unique(&["dname"])
                .expect("dept unique"),
        )
        .expect("register dept");
    catalog
        .register_entity(
            EntityMapping::new("Employee", "emp")
                .expect("emp mapping")
                .with_column("empno", "id")
                .expect("empno")
                .with_column("ename", "name")
                .expect("ename")
                .with_column("deptno", "dept_id")
                .expect("deptno")
                .with_primary_key(&["empno"])
                .expect("emp key"),
        )
        .expect("register emp");
    catalog
        .register_relationship(
            Relationship::to_one(
                "Employee",
                "dept",
                AttributeDescriptor::new("dept").associated("Dept"),
            )
            .expect("dept relationship")
            .cascade(Cascade::All),
        )
        .expect("register dept relationship");
    catalog
        .register_relationship(
            Relationship::one_to_many(
                "Dept",
                "employees",
                AttributeDescriptor::new("employees").associated("Employee"),
            )
            .expect("employees relationship")
            .cascade(Cascade::All),
        )
        .expect("register employees relationship");
    catalog
}

#[test]
fn department_is_written_before_employee() {
    let conn = MemoryConnection::new()
        .with_primary_key("dept", &["deptno"])
        .with_primary_key("emp", &["empno"]);
    let mut session = Session::new(Arc::new(catalog()), &conn);

    let dept = session
        .build("Dept", Row::new().with("id", 50_i64).with("name", "dept50"))
        .expect("build dept");
    let emp = session
        .build("Employee", Row::new().with("id", 21_i64).with("name", "emp21"))
        .expect("build emp");
    emp.set_one("dept", Some(dept));

    let report = session.insert(&emp).expect("insert");
    assert_eq!(report.inserted, 2);
    assert_eq!(report.state, CascadeState::Committed);

    let statements = conn.statements();
    let dept_at = statements
        .iter()
        .position(|s| s.starts_with("INSERT INTO dept"))
        .expect("dept insert");
    let emp_at = statements
        .iter()
        .position(|s| s.starts_with("INSERT INTO emp"))
        .expect("emp insert");
    assert!(dept_at < emp_at);

    let stored = &conn.rows("emp")[0];
    assert_eq!(stored.get_or_null("deptno"), Value::BigInt(50));
    assert_eq!(stored.get_or_null("ename"), Value::from("emp21"));
}

#[test]
fn existing_department_is_merged_not_duplicated() {
    let conn = MemoryConnection::new()
        .with_primary_key("dept", &["deptno"])
        .with_row("dept", Row::new().with("deptno", 50_i64).with("dname", "old name"));
    let mut session = Session::new(Arc::new(catalog()), &conn);

    let dept = session
        .build("Dept", Row::new().with("id", 50_i64).with("name", "dept50"))
        .expect("build dept");
    let emp = session
        .build("Employee", Row::new().with("id", 21_i64).with("name", "emp21"))
        .expect("build emp");
    emp.set_one("dept", Some(dept));

    let report = session.insert(&emp).expect("insert");
    assert_eq!((report.inserted, report.updated), (1, 1));
    assert_eq!(conn.rows("dept").len(), 1);
    assert_eq!(conn.rows("dept")[0].get_or_null("dname"), Value::from("dept50"));
    assert!(conn.statements()[0].starts_with("UPDATE dept"));
}

#[test]
fn insert_triggers_bracket_the_statement() {
    let conn = Arc::new(MemoryConnection::new());
    let seen: Arc<Mutex<Vec<(&'static str, usize)>>> = Arc::new(Mutex::new(Vec::new()));

    let mut catalog = catalog();
    let mapping = catalog.entity_mut("Employee").expect("emp mapping");
    for event in [TriggerEvent::BeforeInsert, TriggerEvent::AfterInsert] {
        let conn = Arc::clone(&conn);
        let seen = Arc::clone(&seen);
        mapping
            .register_trigger(
                event.as_str(),
                Arc::new(move |_obj: &mut Object| -> std::result::Result<(), String> {
                    let written = conn.rows("emp").len();
                    seen.lock().expect("lock poisoned").push((event.as_str(), written));
                    Ok(())
                }),
            )
            .expect("register trigger");
    }

    let mut session = Session::new(Arc::new(catalog), &*conn);
    let emp = session
        .build("Employee", Row::new().with("id", 21_i64).with("name", "emp21"))
        .expect("build emp");
    session.insert(&emp).expect("insert");

    assert_eq!(
        *seen.lock().expect("lock poisoned"),
        [("before_insert", 0), ("after_insert", 1)]
    );
}

#[test]
fn trigger_error_aborts_and_rolls_back() {
    let conn = MemoryConnection::new();
    let mut catalog = catalog();
    catalog
        .entity_mut("Employee")
        .expect("emp mapping")
        .on(
            TriggerEvent::AfterInsert,
            Arc::new(|_obj: &mut Object| -> std::result::Result<(), String> {
                Err("payroll closed".to_string())
            }),
        );
    let mut session = Session::new(Arc::new(catalog), &conn);

    let dept = session
        .build("Dept", Row::new().with("id", 50_i64).with("name", "dept50"))
        .expect("build dept");
    let emp = session
        .build("Employee", Row::new().with("id", 21_i64).with("name", "emp21"))
        .expect("build emp");
    emp.set_one("dept", Some(dept));

    let err = session.insert(&emp).expect_err("trigger should fail");
    assert!(matches!(err, Error::Trigger { event: "after_insert", .. }));
    assert!(err.to_string().contains("payroll closed"));
    assert!(conn.rows("dept").is_empty());
    assert!(conn.rows("emp").is_empty());
    assert_eq!(conn.log().last().map(String::as_str), Some("ROLLBACK"));
}

#[test]
fn non_atomic_sessions_leave_completed_statements() {
    let conn = MemoryConnection::new();
    conn.fail_next("insert", "emp");
    let config = SessionConfig {
        atomic_cascades: false,
        ..SessionConfig::default()
    };
    let mut session = Session::with_config(Arc::new(catalog()), &conn, config);

    let dept = session
        .build("Dept", Row::new().with("id", 50_i64).with("name", "dept50"))
        .expect("build dept");
    let emp = session
        .build("Employee", Row::new().with("id", 21_i64).with("name", "emp21"))
        .expect("build emp");
    emp.set_one("dept", Some(dept));

    assert!(session.insert(&emp).is_err());
    assert_eq!(conn.rows("dept").len(), 1);
    assert!(!conn.log().iter().any(|line| line == "BEGIN"));
}

#[test]
fn delete_cascades_to_children_first() {
    let conn = MemoryConnection::new()
        .with_row("dept", Row::new().with("deptno", 50_i64).with("dname", "dept50"))
        .with_row(
            "emp",
            Row::new().with("empno", 21_i64).with("ename", "a").with("deptno", 50_i64),
        )
        .with_row(
            "emp",
            Row::new().with("empno", 22_i64).with("ename", "b").with("deptno", 50_i64),
        );
    let mut catalog = Catalog::new();
    for mapping in [
        EntityMapping::new("Dept", "dept")
            .and_then(|m| m.with_column("deptno", "id"))
            .and_then(|m| m.with_column("dname", "name"))
            .and_then(|m| m.with_primary_key(&["deptno"])),
        EntityMapping::new("Employee", "emp")
            .and_then(|m| m.with_column("empno", "id"))
            .and_then(|m| m.with_column("ename", "name"))
            .and_then(|m| m.with_column("deptno", "dept_id"))
            .and_then(|m| m.with_primary_key(&["empno"])),
    ] {
        catalog
            .register_entity(mapping.expect("mapping"))
            .expect("register");
    }
    catalog
        .register_relationship(
            Relationship::one_to_many(
                "Dept",
                "employees",
                AttributeDescriptor::new("employees").associated("Employee"),
            )
            .expect("employees")
            .cascade(Cascade::OnDelete),
        )
        .expect("register employees");
    let mut session = Session::new(Arc::new(catalog), &conn);

    let dept = session
        .find("Dept", &[Value::BigInt(50)])
        .expect("find")
        .expect("dept 50");
    let report = session.delete(&dept).expect("delete");
    assert_eq!(report.deleted, 3);

    let statements = conn.statements();
    assert_eq!(statements.len(), 3);
    assert!(statements[0].starts_with("DELETE FROM emp"));
    assert!(statements[1].starts_with("DELETE FROM emp"));
    assert_eq!(statements[2], "DELETE FROM dept WHERE deptno = ?");
    assert!(conn.rows("emp").is_empty());
}

#[test]
fn update_without_resolvable_key_fails() {
    let conn = MemoryConnection::new();
    let mut session = Session::new(Arc::new(catalog()), &conn);
    let emp = session
        .build("Employee", Row::new().with("name", "nobody"))
        .expect("build emp");
    let err = session.update(&emp, None).expect_err("no key");
    assert_eq!(err.mapping_kind(), Some(MappingErrorKind::PrimaryKeyUnresolvable));
    assert!(err.to_string().contains("emp"));
    assert!(conn.statements().is_empty());
}

fn staffed() -> MemoryConnection {
    let emp = |empno: i64, deptno: i64| {
        Row::new()
            .with("empno", empno)
            .with("ename", format!("emp{empno}"))
            .with("deptno", deptno)
    };
    MemoryConnection::new()
        .with_row("dept", Row::new().with("deptno", 50_i64).with("dname", "dept50"))
        .with_row("emp", emp(21, 50))
        .with_row("emp", emp(22, 50))
        .with_row("emp", emp(23, 60))
}

fn employee_numbers(conn: &MemoryConnection) -> Vec<i64> {
    let mut numbers: Vec<i64> = conn
        .rows("emp")
        .iter()
        .map(|r| r.get_named::<i64>("empno").expect("empno"))
        .collect();
    numbers.sort_unstable();
    numbers
}

#[test]
fn merging_children_keeps_a_parent_that_cascades_both_ways() {
    let conn = staffed();
    let mut session = Session::new(Arc::new(catalog()), &conn);

    let report = session
        .relationship_merge(
            "Dept",
            "employees",
            Row::new().with("deptno", 50_i64),
            vec![Target::Raw(Row::new().with("empno", 21_i64).with("ename", "emp21"))],
        )
        .expect("merge");
    assert_eq!(report.deleted, 1);
    assert_eq!(conn.rows("dept").len(), 1);
    assert_eq!(employee_numbers(&conn), [21, 23]);
    assert!(!conn.statements().iter().any(|s| s.starts_with("DELETE FROM dept")));
}

#[test]
fn updating_a_cyclic_graph_removes_orphans_only() {
    let conn = staffed();
    let mut session = Session::new(Arc::new(catalog()), &conn);
    let dept = session
        .find("Dept", &[Value::BigInt(50)])
        .expect("find")
        .expect("dept 50");
    let emp = session
        .find("Employee", &[Value::BigInt(21)])
        .expect("find")
        .expect("emp 21");
    emp.set_one("dept", Some(dept.clone()));
    dept.set_many("employees", vec![emp.clone()]);
    emp.set_field("name", "renamed");

    let report = session.update(&emp, None).expect("update");
    assert_eq!((report.updated, report.deleted), (2, 1));
    assert_eq!(conn.rows("dept").len(), 1);
    assert_eq!(employee_numbers(&conn), [21, 23]);
    let renamed = conn
        .rows("emp")
        .into_iter()
        .find(|r| r.get_or_null("empno") == Value::BigInt(21))
        .expect("emp 21");
    assert_eq!(renamed.get_or_null("ename"), Value::from("renamed"));
}

#[test]
fn delete_through_a_two_way_cascade_removes_each_row_once() {
    let conn = staffed();
    let mut session = Session::new(Arc::new(catalog()), &conn);
    // not tracked by the session, so children load their own copy of it
    let dept = session
        .build("Dept", Row::new().with("id", 50_i64).with("name", "dept50"))
        .expect("build dept");

    let report = session.delete(&dept).expect("delete");
    assert_eq!(report.deleted, 3);
    let dept_deletes = conn
        .statements()
        .iter()
        .filter(|s| s.starts_with("DELETE FROM dept"))
        .count();
    assert_eq!(dept_deletes, 1);
    assert!(conn.rows("dept").is_empty());
    assert_eq!(employee_numbers(&conn), [23]);
}

#[test]
fn merging_a_cyclic_graph_writes_each_object_once() {
    let conn = MemoryConnection::new();
    let mut session = Session::new(Arc::new(catalog()), &conn);
    let dept = session
        .build("Dept", Row::new().with("id", 50_i64).with("name", "dept50"))
        .expect("build dept");
    let emp = session
        .build("Employee", Row::new().with("id", 21_i64).with("name", "emp21"))
        .expect("build emp");
    emp.set_one("dept", Some(dept.clone()));
    dept.set_many("employees", vec![emp.clone()]);

    let report = session.merge(&emp).expect("merge");
    assert_eq!(report.inserted, 2);
    assert_eq!(conn.rows("dept").len(), 1);
    assert_eq!(employee_numbers(&conn), [21]);
    assert_eq!(conn.rows("emp")[0].get_or_null("deptno"), Value::BigInt(50));
}
