#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{all_products, init_tracing, northwind_dispatcher};
use proptest::prelude::*;
use refract::{
    provider::SqliteSink,
    query::{
        ast::Expr,
        metadata::{DeclaredType, EntityShape, FieldDef, InMemoryMetadata},
        CapabilityProfile, ClientEvaluator, Dispatcher, QueryBuilder,
    },
    Value,
};
use time::{Date, Month, PrimitiveDateTime, Time};

const SAMPLES: &str = "CREATE TABLE Samples (
    Id INTEGER PRIMARY KEY,
    Label TEXT NOT NULL,
    Ratio REAL NOT NULL,
    Flag INTEGER NOT NULL,
    Stamp TEXT NOT NULL
)";

const MEMBERS: [&str; 5] = ["Id", "Label", "Ratio", "Flag", "Stamp"];

fn samples_dispatcher() -> (Dispatcher, SqliteSink) {
    init_tracing();
    let sink = SqliteSink::open_in_memory().unwrap().with_name("samples");
    sink.execute_batch(SAMPLES).unwrap();
    let metadata = InMemoryMetadata::new().with_entity(
        EntityShape::new("Sample")
            .table("Samples")
            .field(FieldDef::new("Id", DeclaredType::Int32))
            .field(FieldDef::new("Label", DeclaredType::unicode(64)))
            .field(FieldDef::new("Ratio", DeclaredType::Float64))
            .field(FieldDef::new("Flag", DeclaredType::Bool))
            .field(FieldDef::new("Stamp", DeclaredType::DateTime)),
    );
    let dispatcher = Dispatcher::new(
        CapabilityProfile::sqlite(),
        Arc::new(metadata),
        Arc::new(sink.clone()),
    );
    (dispatcher, sink)
}

fn arb_stamp() -> impl Strategy<Value = PrimitiveDateTime> {
    (1900i32..2100, 1u8..=12, 1u8..=28, 0u8..24, 0u8..60, 0u8..60, 0u16..1000).prop_map(
        |(year, month, day, hour, minute, second, milli)| {
            let month = Month::try_from(month).unwrap();
            PrimitiveDateTime::new(
                Date::from_calendar_date(year, month, day).unwrap(),
                Time::from_hms_milli(hour, minute, second, milli).unwrap(),
            )
        },
    )
}

fn arb_record() -> impl Strategy<Value = Vec<Value>> {
    (
        any::<i32>(),
        "\\PC{0,24}",
        prop::num::f64::NORMAL | prop::num::f64::ZERO,
        any::<bool>(),
        arb_stamp(),
    )
        .prop_map(|(id, label, ratio, flag, stamp)| {
            vec![
                Value::Int(i64::from(id)),
                Value::from(label),
                Value::Float(ratio),
                Value::Bool(flag),
                Value::DateTime(stamp),
            ]
        })
}

fn filtered(k: i64, n: u64, descending: bool) -> QueryBuilder {
    let base = all_products("p").filter(Expr::member("p", "UnitsInStock").gt(Expr::lit(k)));
    let ordered = if descending {
        base.order_by_desc(Expr::member("p", "ProductName"))
    } else {
        base.order_by(Expr::member("p", "ProductName"))
    };
    ordered.take(n)
}

#[derive(Clone, Copy, Debug)]
enum Predicate {
    Gt,
    Eq,
    Ne,
    NotGt,
    NotEq,
    Between,
    Outside,
    IsNull,
}

fn predicate(kind: Predicate, k: i64) -> Expr {
    let units = || Expr::member("p", "UnitsInStock");
    match kind {
        Predicate::Gt => units().gt(Expr::lit(k)),
        Predicate::Eq => units().eq(Expr::lit(k)),
        Predicate::Ne => units().ne(Expr::lit(k)),
        Predicate::NotGt => units().gt(Expr::lit(k)).not(),
        Predicate::NotEq => units().eq(Expr::lit(k)).not(),
        Predicate::Between => units().ge(Expr::lit(k)).and(units().lt(Expr::lit(k + 40))),
        Predicate::Outside => units()
            .lt(Expr::lit(k))
            .or(units().ge(Expr::lit(k + 40)))
            .not(),
        Predicate::IsNull => units().eq(Expr::lit(Value::Null)).or(units().eq(Expr::lit(k))),
    }
}

fn arb_predicate() -> impl Strategy<Value = Predicate> {
    prop_oneof![
        Just(Predicate::Gt),
        Just(Predicate::Eq),
        Just(Predicate::Ne),
        Just(Predicate::NotGt),
        Just(Predicate::NotEq),
        Just(Predicate::Between),
        Just(Predicate::Outside),
        Just(Predicate::IsNull),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn stored_values_read_back_unchanged(record in arb_record()) {
        let (dispatcher, sink) = samples_dispatcher();
        sink.execute("INSERT INTO Samples VALUES (?1, ?2, ?3, ?4, ?5)", &record).unwrap();

        let query = QueryBuilder::from_entity("Sample", "s")
            .filter(Expr::member("s", "Id").eq(Expr::lit(record[0].clone())))
            .select("r", MEMBERS.map(|member| (member, Expr::member("s", member))))
            .build()
            .unwrap();
        let rows = dispatcher.execute(&query, None).unwrap().into_rows().unwrap();
        prop_assert_eq!(rows.len(), 1);
        prop_assert_eq!(&rows.rows[0][..4], &record[..4]);
        prop_assert_eq!(&rows.rows[0][4], &record[4]);
        if let (Value::Float(read), Value::Float(written)) = (&rows.rows[0][2], &record[2]) {
            prop_assert_eq!(read.to_bits(), written.to_bits());
        }
    }

    #[test]
    fn composed_raw_text_matches_client_evaluation(
        k in -1i64..130,
        n in 0u64..20,
        descending in any::<bool>(),
    ) {
        let dispatcher = northwind_dispatcher();
        let source = dispatcher
            .execute(&all_products("p").build().unwrap(), None)
            .unwrap()
            .into_rows()
            .unwrap();
        let client = ClientEvaluator::new().bind("p", source);

        let query = filtered(k, n, descending).build().unwrap();
        let server = dispatcher.execute(&query, None).unwrap();
        prop_assert_eq!(server, client.evaluate(&query).unwrap());

        let predicate = || Expr::member("p", "UnitsInStock").gt(Expr::lit(k));
        for aggregate in [
            all_products("p").filter(predicate()).count(),
            all_products("p").filter(predicate()).sum(Expr::member("p", "UnitsInStock")),
            all_products("p").filter(predicate()).max(Expr::member("p", "ProductName")),
        ] {
            let query = aggregate.build().unwrap();
            let server = dispatcher.execute(&query, None).unwrap();
            prop_assert_eq!(server, client.evaluate(&query).unwrap());
        }
    }

    #[test]
    fn nullable_predicates_match_client_evaluation(
        kind in arb_predicate(),
        k in prop_oneof![Just(0i64), Just(17), Just(20), -1i64..130],
    ) {
        let dispatcher = northwind_dispatcher();
        let source = dispatcher
            .execute(&all_products("p").build().unwrap(), None)
            .unwrap()
            .into_rows()
            .unwrap();
        let client = ClientEvaluator::new().bind("p", source);

        let rows = all_products("p")
            .filter(predicate(kind, k))
            .order_by(Expr::member("p", "ProductID"))
            .build()
            .unwrap();
        let count = all_products("p").filter(predicate(kind, k)).count().build().unwrap();
        for query in [rows, count] {
            let server = dispatcher.execute(&query, None).unwrap();
            prop_assert_eq!(server, client.evaluate(&query).unwrap(), "{:?} with k = {}", kind, k);
        }
    }
}
