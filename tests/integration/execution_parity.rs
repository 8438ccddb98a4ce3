#![allow(missing_docs)]

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use common::{
    all_products, dispatcher_with, northwind_dispatcher, run, run_with, ten_most_expensive,
    MODES, TEN_MOST_EXPENSIVE,
};
use refract::{
    provider::ScriptedSink,
    query::{
        ast::Expr,
        materialize::RawRecord,
        CapabilityProfile, ProviderError, QueryBuilder, QueryError, ShapedResult,
    },
    Value,
};
use rust_decimal::Decimal;

fn both_modes(
    dispatcher: &refract::query::Dispatcher,
    builder: impl Fn() -> QueryBuilder,
) -> (Result<ShapedResult, QueryError>, Result<ShapedResult, QueryError>) {
    let [blocking, suspending] = MODES.map(|is_async| run(dispatcher, builder(), is_async));
    (blocking, suspending)
}

#[test]
fn blocking_and_suspending_results_agree() {
    let dispatcher = northwind_dispatcher();
    let queries: Vec<Box<dyn Fn() -> QueryBuilder>> = vec![
        Box::new(|| {
            QueryBuilder::from_entity("Product", "p")
                .filter(Expr::member("p", "UnitsInStock").gt(Expr::lit(20i64)))
                .order_by(Expr::member("p", "ProductName"))
                .take(5)
        }),
        Box::new(|| {
            QueryBuilder::from_entity("Product", "a")
                .join(
                    QueryBuilder::from_entity("Product", "b"),
                    Expr::member("a", "ProductName").eq(Expr::member("b", "ProductName")),
                )
                .count()
        }),
        Box::new(|| QueryBuilder::from_entity("Product", "p").sum(Expr::member("p", "UnitsInStock"))),
        Box::new(|| QueryBuilder::from_entity("Order", "o").max(Expr::member("o", "OrderDate"))),
        Box::new(|| {
            all_products("p")
                .filter(Expr::member("p", "ProductName").contains(Expr::lit("ö")))
                .select("x", [("Name", Expr::member("p", "ProductName"))])
        }),
        Box::new(|| ten_most_expensive("mep")),
    ];
    for query in &queries {
        let (blocking, suspending) = both_modes(&dispatcher, query);
        assert_eq!(blocking.unwrap(), suspending.unwrap());
    }

    let (count, _) = both_modes(&dispatcher, &queries[1]);
    assert_eq!(count.unwrap(), ShapedResult::Scalar(Value::Int(17)));
    let (sum, _) = both_modes(&dispatcher, &queries[2]);
    assert_eq!(sum.unwrap(), ShapedResult::Scalar(Value::Int(523)));
}

#[test]
fn blocking_and_suspending_errors_agree() {
    let dispatcher = northwind_dispatcher();
    let failing: Vec<Box<dyn Fn() -> QueryBuilder>> = vec![
        Box::new(|| ten_most_expensive("mep").take(1)),
        Box::new(|| {
            QueryBuilder::from_entity("Product", "p")
                .filter(Expr::member("p", "UnitPrice").le(Expr::lit(Decimal::new(1000, 2))))
        }),
        Box::new(|| QueryBuilder::from_entity("Supplier", "s")),
        Box::new(|| {
            QueryBuilder::from_entity("Product", "p")
                .filter(Expr::member("p", "Discontinued").eq(Expr::lit(true)))
        }),
        Box::new(|| QueryBuilder::from_sql("Product", "p", "SELECT * FROM Missing", Vec::<Value>::new())),
    ];
    for query in &failing {
        let (blocking, suspending) = both_modes(&dispatcher, query);
        let (blocking, suspending) = (blocking.unwrap_err(), suspending.unwrap_err());
        assert_eq!(blocking.code(), suspending.code());
        assert_eq!(blocking, suspending);
    }
}

fn scripted_dispatcher(sink: &ScriptedSink) -> refract::query::Dispatcher {
    dispatcher_with(CapabilityProfile::sqlite(), Arc::new(sink.clone()))
}

#[test]
fn wrong_arity_records_are_shape_mismatches() {
    let sink = ScriptedSink::new("scripted").respond(
        TEN_MOST_EXPENSIVE,
        vec![
            RawRecord::Row(vec![Value::from("Côte de Blaye"), Value::Float(263.5)]),
            RawRecord::Row(vec![Value::from("Thüringer Rostbratwurst")]),
        ],
    );
    let dispatcher = scripted_dispatcher(&sink);
    for is_async in MODES {
        match run(&dispatcher, ten_most_expensive("mep"), is_async).unwrap_err() {
            QueryError::ShapeMismatch { row, detail } => {
                assert_eq!(row, 1);
                assert_eq!(detail, "expected 2 columns, found 1");
            }
            other => panic!("async = {is_async}: expected ShapeMismatch, got {other:?}"),
        }
    }
}

#[test]
fn documents_are_aligned_by_field_name() {
    let document = BTreeMap::from([
        ("UnitPrice".to_string(), Value::Float(18.0)),
        ("TenMostExpensiveProducts".to_string(), Value::from("Chai")),
    ]);
    let sink = ScriptedSink::new("documents")
        .respond(TEN_MOST_EXPENSIVE, vec![RawRecord::Document(document)]);
    let dispatcher = scripted_dispatcher(&sink);
    for is_async in MODES {
        let rows = run(&dispatcher, ten_most_expensive("mep"), is_async)
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(
            rows.rows,
            vec![vec![Value::from("Chai"), Value::Decimal(Decimal::new(1800, 2))]]
        );
    }
}

#[test]
fn provider_failures_pass_through_unchanged() {
    let sink = ScriptedSink::new("scripted")
        .fail(TEN_MOST_EXPENSIVE, ProviderError::Timeout { after_ms: 30_000 });
    let dispatcher = scripted_dispatcher(&sink);
    for is_async in MODES {
        let err = run(&dispatcher, ten_most_expensive("mep"), is_async).unwrap_err();
        assert_eq!(
            err,
            QueryError::Provider(ProviderError::Timeout { after_ms: 30_000 })
        );
        assert_eq!(err.to_string(), "provider timed out after 30000 ms");
    }
    assert_eq!(sink.invocations().len(), 2);
}

#[test]
fn cancellation_prevents_the_round_trip() {
    let sink = ScriptedSink::new("scripted").respond_to_all(Vec::new());
    let dispatcher = scripted_dispatcher(&sink);
    let token = Arc::new(AtomicBool::new(true));
    for is_async in MODES {
        let err = run_with(
            &dispatcher,
            ten_most_expensive("mep"),
            is_async,
            Some(token.clone()),
        )
        .unwrap_err();
        assert_eq!(err, QueryError::Cancelled);
    }
    assert!(sink.invocations().is_empty());

    let idle = Arc::new(AtomicBool::new(false));
    for is_async in MODES {
        run_with(&dispatcher, ten_most_expensive("mep"), is_async, Some(idle.clone())).unwrap();
    }
    assert_eq!(sink.invocations().len(), 2);
}

#[test]
fn both_modes_send_the_same_plan() {
    let sink = ScriptedSink::new("scripted").respond_to_all(Vec::new());
    let dispatcher = scripted_dispatcher(&sink);
    let query = || {
        QueryBuilder::from_entity("Product", "p")
            .filter(Expr::member("p", "ProductName").ne(Expr::param("__name_0")))
            .param("__name_0", "Chai")
            .order_by(Expr::member("p", "ProductID"))
            .take(3)
    };
    for is_async in MODES {
        run(&dispatcher, query(), is_async).unwrap();
    }
    let plans = sink.invocations();
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0], plans[1]);
    assert_eq!(plans[0].plan_hash, query().prepare(&dispatcher).unwrap().plan_hash);
    assert_eq!(
        plans[0].parameters.iter().map(|p| p.value.clone()).collect::<Vec<_>>(),
        vec![Value::from("Chai"), Value::Int(3)]
    );
}
