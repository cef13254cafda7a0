use chrono::Utc;
use fractaldb::{
    condition, Config, Database, DeleteMode, Field, Fields, FractalError, Reference, Schema,
    SortDirection, Value, Violation,
};

fn people(db: &Database) -> fractaldb::Result<fractaldb::Collection> {
    db.collection(
        "people",
        Schema::build(vec![
            Field::text("name").not_null(),
            Field::integer("age").not_null(),
        ])?,
    )
}

fn names(records: Vec<fractaldb::Record>) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
        .collect()
}

#[test]
fn test_alice_and_bob() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::in_memory()?;
    let people = people(&db)?;
    people.insert(Fields::new().with("name", "Alice").with("age", 25))?;
    people.insert(Fields::new().with("name", "Bob").with("age", 30))?;

    let both = condition("name").any_of(["Alice", "Bob"]).and(condition("age").between(20, 40));
    assert_eq!(names(people.query().filter(both).exec()?), vec!["Alice", "Bob"]);

    let twenties = condition("age").between(20, 29);
    assert_eq!(names(people.query().filter(twenties).exec()?), vec!["Alice"]);
    Ok(())
}

#[test]
fn test_round_trip_through_all() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::in_memory()?;
    let people = people(&db)?;

    let before = Utc::now();
    let key = people.insert(Fields::new().with("name", "Alice").with("age", 25))?;

    let records: Vec<_> = people.all().collect::<fractaldb::Result<_>>()?;
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.key, key);
    assert!(!record.key.as_str().is_empty());
    assert!(record.created_at >= before);
    assert_eq!(
        record.fields,
        Fields::new().with("name", "Alice").with("age", 25)
    );
    Ok(())
}

#[test]
fn test_batch_atomicity_names_record() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::in_memory()?;
    let people = people(&db)?;

    let result = people.insert_many(vec![
        Fields::new().with("name", "Alice").with("age", 25),
        Fields::new().with("name", "Bob").with("age", "thirty"),
    ]);
    match result {
        Err(FractalError::Constraint { record, field, violation }) => {
            assert_eq!(record, 1);
            assert_eq!(field, "age");
            assert!(matches!(violation, Violation::TypeMismatch { .. }));
        }
        other => panic!("expected constraint error, got {:?}", other),
    }
    assert_eq!(people.all().count(), 0);
    Ok(())
}

#[test]
fn test_referential_integrity_and_cascade() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::in_memory()?;
    let users = db.collection("users", Schema::build(vec![Field::text("name").not_null()])?)?;
    let orders = db.collection(
        "orders",
        Schema::build(vec![
            Field::text("user").not_null().references(Reference::to("users")),
            Field::float("total"),
        ])?,
    )?;
    let lines = db.collection(
        "lines",
        Schema::build(vec![
            Field::text("order").not_null().references(Reference::to("orders")),
            Field::text("sku"),
        ])?,
    )?;

    let alice = users.insert(Fields::new().with("name", "Alice"))?;
    let order = orders.insert(Fields::new().with("user", alice.as_str()).with("total", 9.5))?;
    lines.insert(Fields::new().with("order", order.as_str()).with("sku", "A-1"))?;

    match orders.insert(Fields::new().with("user", "nobody")) {
        Err(FractalError::Reference { field, target_collection, .. }) => {
            assert_eq!(field, "user");
            assert_eq!(target_collection, "users");
        }
        other => panic!("expected reference error, got {:?}", other),
    }

    assert!(matches!(
        users.delete(&alice),
        Err(FractalError::ReferentialIntegrity { .. })
    ));
    assert_eq!(users.count()?, 1);

    assert!(users.delete_with(&alice, DeleteMode::Cascade)?);
    assert_eq!(users.count()?, 0);
    assert_eq!(orders.count()?, 0);
    assert_eq!(lines.count()?, 0);
    Ok(())
}

#[test]
fn test_non_finite_float_is_a_constraint_error() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::in_memory()?;
    let readings = db.collection("readings", Schema::build(vec![Field::float("v")])?)?;

    match readings.insert(Fields::new().with("v", f64::NAN)) {
        Err(FractalError::Constraint { record, field, violation }) => {
            assert_eq!(record, 0);
            assert_eq!(field, "v");
            assert!(matches!(violation, Violation::TypeMismatch { .. }));
        }
        other => panic!("expected constraint error, got {:?}", other),
    }
    assert_eq!(readings.count()?, 0);

    let key = readings.insert(Fields::new().with("v", 0.5))?;
    assert_eq!(readings.get(&key)?.get("v"), Some(&Value::Float(0.5)));
    Ok(())
}

#[test]
fn test_between_is_inclusive() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::in_memory()?;
    let people = people(&db)?;
    for age in [19, 20, 25, 30, 31] {
        people.insert(Fields::new().with("name", format!("p{}", age)).with("age", age))?;
    }

    let found = people.query().between("age", 20, 30).exec()?;
    assert_eq!(names(found), vec!["p20", "p25", "p30"]);
    Ok(())
}

#[test]
fn test_any_of_edge_cases() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::in_memory()?;
    let people = people(&db)?;
    people.insert(Fields::new().with("name", "Alice").with("age", 25))?;
    people.insert(Fields::new().with("name", "Bob").with("age", 30))?;

    let nothing: Vec<&str> = Vec::new();
    assert!(people.query().any_of("name", nothing).exec()?.is_empty());

    let single = people.query().any_of("name", ["Bob"]).exec()?;
    let equal = people.query().equals("name", "Bob").exec()?;
    assert_eq!(single, equal);
    Ok(())
}

#[test]
fn test_and_binds_tighter_than_or() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::in_memory()?;
    let people = people(&db)?;
    people.insert_many(vec![
        Fields::new().with("name", "Alice").with("age", 25),
        Fields::new().with("name", "Bob").with("age", 30),
        Fields::new().with("name", "Carol").with("age", 35),
    ])?;

    let a = || condition("name").equals("Alice");
    let b = || condition("age").gt(100);
    let c = || condition("name").equals("Carol");

    // a AND b OR c
    let chained = a().and(b()).or(c());
    let operators = a() & b() | c();
    let explicit = a().and(b()).group().or(c());
    let other_grouping = a().and(b().or(c()));

    let run = |cond| people.query().filter(cond).exec().map(names);
    assert_eq!(run(chained)?, vec!["Carol"]);
    assert_eq!(run(operators)?, vec!["Carol"]);
    assert_eq!(run(explicit)?, vec!["Carol"]);
    assert!(run(other_grouping)?.is_empty());

    // c OR a AND b groups the AND on the right
    let mixed = c().or(a()).and(b());
    assert_eq!(run(mixed)?, vec!["Carol"]);

    // operator results are parenthesized units
    let either = || condition("age").equals(25) | condition("age").equals(30);
    assert!(run(either().and(condition("age").equals(35)))?.is_empty());
    assert_eq!(run(either().and(condition("name").equals("Bob")))?, vec!["Bob"]);
    Ok(())
}

#[test]
fn test_pattern_matching_is_case_sensitive_and_literal() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::in_memory()?;
    let people = people(&db)?;
    for name in ["a*b", "axb", "Abc", "abc", "50%_off", "[x]"] {
        people.insert(Fields::new().with("name", name).with("age", 1))?;
    }

    assert_eq!(names(people.query().starts_with("name", "a*").exec()?), vec!["a*b"]);
    assert_eq!(names(people.query().starts_with("name", "A").exec()?), vec!["Abc"]);
    assert_eq!(names(people.query().substring("name", "%_").exec()?), vec!["50%_off"]);
    assert_eq!(names(people.query().ends_with("name", "x]").exec()?), vec!["[x]"]);
    assert_eq!(names(people.query().substring("name", "b").exec()?), vec!["a*b", "axb", "Abc", "abc"]);
    assert_eq!(names(people.query().substring("name", "B").exec()?), Vec::<String>::new());
    Ok(())
}

#[test]
fn test_query_chain_and_ordering() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::in_memory()?;
    let people = people(&db)?;
    people.insert_many(vec![
        Fields::new().with("name", "Rachel").with("age", 41),
        Fields::new().with("name", "Rob").with("age", 19),
        Fields::new().with("name", "Ruth").with("age", 28),
        Fields::new().with("name", "Alice").with("age", 25),
    ])?;

    let found = people
        .query()
        .starts_with("name", "R")
        .lt("age", 30)
        .order_by("age", SortDirection::Desc)
        .exec()?;
    assert_eq!(names(found), vec!["Ruth", "Rob"]);

    let page = people
        .query()
        .order_by("name", SortDirection::Asc)
        .limit(2)
        .offset(1)
        .exec()?;
    assert_eq!(names(page), vec!["Rachel", "Rob"]);
    Ok(())
}

#[test]
fn test_unknown_field_names_the_field() -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::in_memory()?;
    let people = people(&db)?;
    let err = people
        .query()
        .filter(condition("name").equals("x") | condition("email").equals("y"))
        .exec()
        .unwrap_err();
    assert!(matches!(err, FractalError::UnknownField(ref f) if f == "email"));
    Ok(())
}

#[test]
fn test_reopen_file_database() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let config = Config::default_for_path("data/people.db");
    config.save(dir.path())?;

    {
        let db = Database::from_config(&Config::load(dir.path())?, dir.path())?;
        let people = people(&db)?;
        people.insert(Fields::new().with("name", "Alice").with("age", 25))?;
    }

    let db = Database::from_config(&Config::load(dir.path())?, dir.path())?;
    assert_eq!(db.collections(), vec!["people".to_string()]);

    let people = people(&db)?;
    assert_eq!(names(people.all().collect::<fractaldb::Result<_>>()?), vec!["Alice"]);

    let divergent = Schema::build(vec![Field::text("name").not_null()])?;
    assert!(matches!(
        db.collection("people", divergent),
        Err(FractalError::Schema(_))
    ));
    Ok(())
}
