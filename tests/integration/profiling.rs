#![allow(missing_docs)]

mod common;

use common::{northwind_dispatcher, ten_most_expensive};
use refract::query::{ast::Expr, profile::profile_snapshot, QueryBuilder};
use rust_decimal::Decimal;

// Profiling is latched on first use, so this binary holds a single test that
// enables it before any dispatch.
#[test]
fn dispatch_phases_are_counted_when_enabled() {
    std::env::set_var("REFRACT_PROFILE", "1");
    let dispatcher = northwind_dispatcher();
    profile_snapshot(true).expect("profiling enabled");

    let result = ten_most_expensive("mep").execute(&dispatcher).unwrap().into_rows().unwrap();
    assert_eq!(result.len(), 10);

    let snapshot = profile_snapshot(true).unwrap();
    assert_eq!(snapshot.validate_count, 1);
    assert_eq!(snapshot.translate_count, 1);
    assert_eq!(snapshot.round_trip_count, 1);
    assert_eq!(snapshot.materialize_count, 1);
    assert!(snapshot.round_trip_ns > 0);

    let cleared = profile_snapshot(false).unwrap();
    assert_eq!(cleared.round_trip_count, 0);
    assert_eq!(cleared.materialize_ns, 0);

    let err = QueryBuilder::from_entity("Product", "p")
        .filter(Expr::member("p", "UnitPrice").gt(Expr::lit(Decimal::new(50, 0))))
        .execute(&dispatcher)
        .unwrap_err();
    assert_eq!(err.code(), "TranslationFailed");
    let snapshot = profile_snapshot(true).unwrap();
    assert_eq!(snapshot.validate_count, 1);
    assert_eq!(snapshot.translate_count, 1);
    assert_eq!(snapshot.round_trip_count, 0);
    assert_eq!(snapshot.materialize_count, 0);
}
