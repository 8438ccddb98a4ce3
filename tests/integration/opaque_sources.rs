#![allow(missing_docs)]

mod common;

use common::{
    all_products, customer_order_history, decimal, northwind_dispatcher, rows, run,
    ten_most_expensive, MODES, TEN_MOST_EXPENSIVE,
};
use refract::query::{
    ast::{Expr, OperatorKind},
    ClientEvaluator, QueryBuilder, QueryError, ShapedResult,
};
use refract::Value;

fn expect_non_composable(builder: impl Fn() -> QueryBuilder, operator: OperatorKind, repeated: bool) {
    let dispatcher = northwind_dispatcher();
    let mut messages = Vec::new();
    for is_async in MODES {
        let err = run(&dispatcher, builder(), is_async).unwrap_err();
        messages.push(err.to_string());
        match err {
            QueryError::NonComposableSource {
                command,
                operator: found,
                repeated: found_repeated,
            } => {
                assert_eq!(command, TEN_MOST_EXPENSIVE);
                assert_eq!(found, operator, "async = {is_async}");
                assert_eq!(found_repeated, repeated, "async = {is_async}");
            }
            other => panic!("async = {is_async}: expected NonComposableSource, got {other:?}"),
        }
    }
    assert_eq!(messages[0], messages[1]);
}

fn price(var: &str) -> Expr {
    Expr::member(var, "UnitPrice")
}

fn name(var: &str) -> Expr {
    Expr::member(var, "TenMostExpensiveProducts")
}

#[test]
fn stored_procedure_returns_ten_rows() {
    let dispatcher = northwind_dispatcher();
    for is_async in MODES {
        let rows = rows(&dispatcher, ten_most_expensive("mep"), is_async);
        assert_eq!(rows.len(), 10);
        let idx_name = rows.index_of("TenMostExpensiveProducts").unwrap();
        let idx_price = rows.index_of("UnitPrice").unwrap();
        assert!(rows.rows.iter().any(|row| {
            row[idx_name] == Value::from("Côte de Blaye") && row[idx_price] == decimal(26350, 2)
        }));
    }
}

#[test]
fn stored_procedure_member_pick() {
    let dispatcher = northwind_dispatcher();
    for is_async in MODES {
        let rows = rows(
            &dispatcher,
            ten_most_expensive("mep").select("x", [("Name", name("mep"))]),
            is_async,
        );
        assert_eq!(rows.len(), 10);
        assert_eq!(rows.columns.len(), 1);
        assert!(rows.column("Name").unwrap().contains(&&Value::from("Côte de Blaye")));
    }
}

#[test]
fn stored_procedure_with_parameter() {
    let dispatcher = northwind_dispatcher();
    for is_async in MODES {
        let rows = rows(&dispatcher, customer_order_history("coh", "ALFKI"), is_async);
        assert_eq!(rows.len(), 11);
        assert_eq!(rows.rows[0], vec![Value::from("Aniseed Syrup"), Value::Int(6)]);
    }
}

#[test]
fn composing_over_stored_procedure_fails_before_round_trip() {
    expect_non_composable(
        || {
            ten_most_expensive("mep")
                .filter(name("mep").contains(Expr::lit("C")))
                .order_by(price("mep"))
        },
        OperatorKind::Filter,
        false,
    );
    expect_non_composable(
        || ten_most_expensive("mep").order_by_desc(price("mep")).take(2),
        OperatorKind::OrderBy,
        false,
    );
    expect_non_composable(|| ten_most_expensive("mep").take(2), OperatorKind::Take, false);
    expect_non_composable(|| ten_most_expensive("mep").min(price("mep")), OperatorKind::Aggregate, false);
    expect_non_composable(
        || {
            ten_most_expensive("mep").select(
                "x",
                [
                    ("TenMostExpensiveProducts", Expr::lit("Foo")),
                    ("UnitPrice", price("mep")),
                ],
            )
        },
        OperatorKind::Project,
        false,
    );
}

#[test]
fn composing_over_parameterized_procedure_fails() {
    let dispatcher = northwind_dispatcher();
    for is_async in MODES {
        let err = run(
            &dispatcher,
            customer_order_history("coh", "ALFKI")
                .filter(Expr::member("coh", "ProductName").contains(Expr::lit("C")))
                .order_by(Expr::member("coh", "Total")),
            is_async,
        )
        .unwrap_err();
        assert_eq!(err.code(), "NonComposableSource");
        assert!(err.to_string().starts_with("Filter cannot be composed over 'CustOrderHist'"));
    }
}

#[test]
fn composed_on_client() {
    let dispatcher = northwind_dispatcher();
    let query = ten_most_expensive("mep")
        .filter(name("mep").contains(Expr::lit("C")))
        .order_by(price("mep"))
        .build()
        .unwrap();
    for is_async in MODES {
        let source = rows(&dispatcher, ten_most_expensive("mep"), is_async);
        let result = ClientEvaluator::new()
            .bind("mep", source)
            .evaluate(&query)
            .unwrap()
            .into_rows()
            .unwrap();
        let prices = result.column("UnitPrice").unwrap();
        assert_eq!(prices.len(), 4);
        assert_eq!(*prices[0], decimal(4600, 2));
        assert_eq!(*prices[3], decimal(26350, 2));
    }
}

#[test]
fn parameterized_procedure_composed_on_client() {
    let dispatcher = northwind_dispatcher();
    let query = customer_order_history("coh", "ALFKI")
        .filter(Expr::member("coh", "ProductName").contains(Expr::lit("C")))
        .order_by(Expr::member("coh", "Total"))
        .build()
        .unwrap();
    for is_async in MODES {
        let source = rows(&dispatcher, customer_order_history("coh", "ALFKI"), is_async);
        let result = ClientEvaluator::new()
            .bind("coh", source)
            .evaluate(&query)
            .unwrap()
            .into_rows()
            .unwrap();
        let totals = result.column("Total").unwrap();
        assert_eq!(totals, vec![&Value::Int(15), &Value::Int(21)]);
    }
}

#[test]
fn take_on_client_orders_by_decimal() {
    let dispatcher = northwind_dispatcher();
    let query = ten_most_expensive("mep")
        .order_by_desc(price("mep"))
        .take(2)
        .build()
        .unwrap();
    for is_async in MODES {
        let source = rows(&dispatcher, ten_most_expensive("mep"), is_async);
        let result = ClientEvaluator::new()
            .bind("mep", source)
            .evaluate(&query)
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(
            result.column("UnitPrice").unwrap(),
            vec![&decimal(26350, 2), &decimal(12379, 2)]
        );
    }
}

#[test]
fn min_and_re_projection_on_client() {
    let dispatcher = northwind_dispatcher();
    for is_async in MODES {
        let source = rows(&dispatcher, ten_most_expensive("mep"), is_async);
        let evaluator = ClientEvaluator::new().bind("mep", source);

        let min = ten_most_expensive("mep").min(price("mep")).build().unwrap();
        assert_eq!(
            evaluator.evaluate(&min).unwrap(),
            ShapedResult::Scalar(decimal(4560, 2))
        );

        let reprojected = ten_most_expensive("mep")
            .select(
                "x",
                [
                    ("TenMostExpensiveProducts", Expr::lit("Foo")),
                    ("UnitPrice", price("mep")),
                ],
            )
            .build()
            .unwrap();
        let result = evaluator.evaluate(&reprojected).unwrap().into_rows().unwrap();
        assert_eq!(result.len(), 10);
        assert!(result
            .column("TenMostExpensiveProducts")
            .unwrap()
            .iter()
            .all(|value| **value == Value::from("Foo")));
    }
}

#[test]
fn self_join_of_procedure_is_repeated_invocation() {
    expect_non_composable(
        || {
            ten_most_expensive("a")
                .cross_join(ten_most_expensive("b"))
                .filter(name("a").eq(name("b")))
        },
        OperatorKind::Join,
        true,
    );
}

#[test]
fn self_join_on_client_yields_ten_pairs() {
    let dispatcher = northwind_dispatcher();
    let query = ten_most_expensive("a")
        .cross_join(ten_most_expensive("b"))
        .filter(name("a").eq(name("b")))
        .build()
        .unwrap();
    for is_async in MODES {
        let first = rows(&dispatcher, ten_most_expensive("a"), is_async);
        let second = rows(&dispatcher, ten_most_expensive("b"), is_async);
        let result = ClientEvaluator::new()
            .bind("a", first)
            .bind("b", second)
            .evaluate(&query)
            .unwrap()
            .into_rows()
            .unwrap();
        assert_eq!(result.len(), 10);
        assert_eq!(result.columns.len(), 4);
    }
}

#[test]
fn procedure_joined_with_raw_text_fails_either_way_round() {
    let procedure_first = || {
        ten_most_expensive("mep")
            .cross_join(all_products("p"))
            .filter(name("mep").eq(Expr::member("p", "ProductName")))
    };
    expect_non_composable(procedure_first, OperatorKind::Join, false);

    let text_first = || {
        all_products("p")
            .cross_join(ten_most_expensive("mep"))
            .filter(name("mep").eq(Expr::member("p", "ProductName")))
    };
    expect_non_composable(text_first, OperatorKind::Join, false);
}

#[test]
fn procedure_joined_with_raw_text_on_client() {
    let dispatcher = northwind_dispatcher();
    let procedure_first = ten_most_expensive("mep")
        .cross_join(all_products("p"))
        .filter(name("mep").eq(Expr::member("p", "ProductName")))
        .build()
        .unwrap();
    let text_first = all_products("p")
        .cross_join(ten_most_expensive("mep"))
        .filter(name("mep").eq(Expr::member("p", "ProductName")))
        .build()
        .unwrap();
    for is_async in MODES {
        let evaluator = ClientEvaluator::new()
            .bind("mep", rows(&dispatcher, ten_most_expensive("mep"), is_async))
            .bind("p", rows(&dispatcher, all_products("p"), is_async));
        for query in [&procedure_first, &text_first] {
            let result = evaluator.evaluate(query).unwrap().into_rows().unwrap();
            assert_eq!(result.len(), 10);
        }
    }
}
