use fractaldb::{compile, condition, Collection, Condition, Database, Field, Fields, Schema, Value};
use proptest::prelude::*;

#[derive(Clone, Debug)]
struct Row {
    x: i64,
    y: i64,
    z: i64,
}

/// Leaf predicate evaluated both in storage and in memory
#[derive(Clone, Debug)]
enum Leaf {
    XAtLeast(i64),
    YBelow(i64),
    ZIs(i64),
    XBetween(i64, i64),
    YAnyOf(Vec<i64>),
}

impl Leaf {
    fn condition(&self) -> Condition {
        match self {
            Leaf::XAtLeast(v) => condition("x").gte(*v),
            Leaf::YBelow(v) => condition("y").lt(*v),
            Leaf::ZIs(v) => condition("z").equals(*v),
            Leaf::XBetween(lo, hi) => condition("x").between(*lo, *hi),
            Leaf::YAnyOf(vs) => condition("y").any_of(vs.clone()),
        }
    }

    fn eval(&self, row: &Row) -> bool {
        match self {
            Leaf::XAtLeast(v) => row.x >= *v,
            Leaf::YBelow(v) => row.y < *v,
            Leaf::ZIs(v) => row.z == *v,
            Leaf::XBetween(lo, hi) => *lo <= row.x && row.x <= *hi,
            Leaf::YAnyOf(vs) => vs.contains(&row.y),
        }
    }
}

fn arb_row() -> impl Strategy<Value = Row> {
    (0i64..6, 0i64..6, 0i64..6).prop_map(|(x, y, z)| Row { x, y, z })
}

fn arb_leaf() -> impl Strategy<Value = Leaf> {
    prop_oneof![
        (0i64..6).prop_map(Leaf::XAtLeast),
        (0i64..6).prop_map(Leaf::YBelow),
        (0i64..6).prop_map(Leaf::ZIs),
        (0i64..6, 0i64..6).prop_map(|(a, b)| Leaf::XBetween(a.min(b), a.max(b))),
        prop::collection::vec(0i64..6, 0..4).prop_map(Leaf::YAnyOf),
    ]
}

fn schema() -> Schema {
    Schema::build(vec![
        Field::integer("x").not_null(),
        Field::integer("y").not_null(),
        Field::integer("z").not_null(),
    ])
    .unwrap()
}

fn seeded(db: &Database, rows: &[Row]) -> Collection {
    let points = db.collection("points", schema()).unwrap();
    points
        .insert_many(
            rows.iter()
                .map(|r| Fields::new().with("x", r.x).with("y", r.y).with("z", r.z)),
        )
        .unwrap();
    points
}

/// Matched rows as `x*100 + y*10 + z`, in insertion order
fn matched(points: &Collection, cond: Condition) -> Vec<i64> {
    points
        .query()
        .filter(cond)
        .exec()
        .unwrap()
        .iter()
        .map(|r| r.get("x").and_then(Value::as_i64).unwrap() * 100
            + r.get("y").and_then(Value::as_i64).unwrap() * 10
            + r.get("z").and_then(Value::as_i64).unwrap())
        .collect()
}

fn expected(rows: &[Row], keep: impl Fn(&Row) -> bool) -> Vec<i64> {
    rows.iter()
        .filter(|r| keep(r))
        .map(|r| r.x * 100 + r.y * 10 + r.z)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn and_binds_tighter_than_or(
        rows in prop::collection::vec(arb_row(), 0..12),
        a in arb_leaf(),
        b in arb_leaf(),
        c in arb_leaf(),
    ) {
        let db = Database::in_memory().unwrap();
        let points = seeded(&db, &rows);

        let chained = a.condition().and(b.condition()).or(c.condition());
        let grouped = a.condition().and(b.condition()).group().or(c.condition());
        let operators = a.condition() & b.condition() | c.condition();

        let truth = expected(&rows, |r| (a.eval(r) && b.eval(r)) || c.eval(r));
        prop_assert_eq!(matched(&points, chained), truth.clone());
        prop_assert_eq!(matched(&points, grouped), truth.clone());
        prop_assert_eq!(matched(&points, operators), truth);

        let trailing = c.condition().or(a.condition()).and(b.condition());
        let truth = expected(&rows, |r| c.eval(r) || (a.eval(r) && b.eval(r)));
        prop_assert_eq!(matched(&points, trailing), truth);
    }

    #[test]
    fn leaves_match_their_definition(
        rows in prop::collection::vec(arb_row(), 0..12),
        leaf in arb_leaf(),
    ) {
        let db = Database::in_memory().unwrap();
        let points = seeded(&db, &rows);
        prop_assert_eq!(matched(&points, leaf.condition()), expected(&rows, |r| leaf.eval(r)));
        prop_assert_eq!(
            matched(&points, leaf.condition().negate()),
            expected(&rows, |r| !leaf.eval(r))
        );
    }

    #[test]
    fn single_any_of_equals_equals(
        rows in prop::collection::vec(arb_row(), 0..12),
        v in 0i64..6,
    ) {
        let db = Database::in_memory().unwrap();
        let points = seeded(&db, &rows);
        prop_assert_eq!(
            matched(&points, condition("z").any_of([v])),
            matched(&points, condition("z").equals(v))
        );
    }

    #[test]
    fn compilation_is_deterministic(a in arb_leaf(), b in arb_leaf(), c in arb_leaf()) {
        let tree = (a.condition() | b.condition()) & !c.condition();
        let schema = schema();
        let first = compile(&tree, &schema).unwrap();
        let second = compile(&tree.clone(), &schema).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert!(!first.expression.contains('\''));
    }
}
