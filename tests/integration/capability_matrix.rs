#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use common::{dispatcher_with, northwind, northwind_dispatcher, rows, run, MODES, SCHEMA};
use refract::{
    config::ProviderConfig,
    provider::{ScriptedSink, SqliteSink},
    query::{
        ast::{DatePart, Expr},
        metadata::DeclaredType,
        plan::PlanWarning,
        CapabilityProfile, QueryBuilder, QueryError,
    },
    Value,
};
use rust_decimal::Decimal;
use time::macros::datetime;

fn translation_failure(err: QueryError) -> String {
    match err {
        QueryError::TranslationFailed { expression } => expression,
        other => panic!("expected TranslationFailed, got {other:?}"),
    }
}

fn products_over_fifty() -> QueryBuilder {
    QueryBuilder::from_entity("Product", "p")
        .filter(Expr::member("p", "UnitPrice").gt(Expr::lit(Decimal::new(50, 0))))
}

fn scripted(profile: CapabilityProfile) -> (refract::query::Dispatcher, ScriptedSink) {
    let sink = ScriptedSink::new("scripted").respond_to_all(Vec::new());
    (dispatcher_with(profile, Arc::new(sink.clone())), sink)
}

#[test]
fn decimal_comparison_fails_with_lambda_echo_on_sqlite() {
    let dispatcher = northwind_dispatcher();
    for is_async in MODES {
        let err = run(&dispatcher, products_over_fifty(), is_async).unwrap_err();
        assert_eq!(
            err.to_string(),
            "The query expression '(p) => p.UnitPrice > 50m' could not be translated. Either \
             rewrite the query in a form that can be translated, or materialize the source and \
             evaluate the expression on the client."
        );
    }
}

#[test]
fn decimal_comparison_translates_where_declared() {
    let (dispatcher, sink) = scripted(CapabilityProfile::sql_server());
    let plan = dispatcher.prepare(&products_over_fifty().build().unwrap()).unwrap();
    assert!(plan.sql().unwrap().ends_with("WHERE (t0.\"UnitPrice\" > @p0)"));
    assert_eq!(plan.parameters[0].value, Value::Decimal(Decimal::new(50, 0)));
    assert!(sink.invocations().is_empty());

    let result = products_over_fifty().execute(&dispatcher).unwrap().into_rows().unwrap();
    assert!(result.is_empty());
    assert_eq!(sink.invocations().len(), 1);
}

#[test]
fn configured_override_enables_decimal_comparison_on_sqlite() {
    let config = ProviderConfig::parse(
        r#"
        default_provider = "northwind"

        [providers.northwind]
        preset = "sqlite"
        busy_timeout_ms = 250
        supports_decimal_comparisons = true
        "#,
    )
    .unwrap();
    let settings = config.default_provider().unwrap();
    let sink = SqliteSink::from_settings(settings).unwrap();
    sink.execute_batch(SCHEMA).unwrap();
    let dispatcher = dispatcher_with(settings.profile.clone(), Arc::new(sink));
    for is_async in MODES {
        let result = rows(&dispatcher, products_over_fifty(), is_async);
        assert_eq!(result.len(), 7);
    }
}

#[test]
fn ordering_by_decimal_is_allowed_without_comparison_support() {
    let dispatcher = northwind_dispatcher();
    for is_async in MODES {
        let result = rows(
            &dispatcher,
            QueryBuilder::from_entity("Product", "p")
                .order_by_desc(Expr::member("p", "UnitPrice"))
                .take(2),
            is_async,
        );
        assert_eq!(
            result.column("ProductName").unwrap(),
            vec![&Value::from("Côte de Blaye"), &Value::from("Thüringer Rostbratwurst")]
        );
    }
}

fn correlated_lookup() -> QueryBuilder {
    QueryBuilder::from_entity("Order", "o").cross_join(
        QueryBuilder::from_entity("Product", "p")
            .filter(Expr::member("p", "ProductID").eq(Expr::member("o", "OrderID")))
            .take(1),
    )
}

#[test]
fn correlated_join_needs_apply_support() {
    let dispatcher = northwind_dispatcher();
    for is_async in MODES {
        let err = run(&dispatcher, correlated_lookup(), is_async).unwrap_err();
        assert_eq!(err.code(), "UnsupportedShape");
        assert_eq!(
            err.to_string(),
            "provider 'sqlite' does not support a correlated join whose inner source \
             references the outer binding 'o'"
        );
    }

    let (dispatcher, _) = scripted(CapabilityProfile::sql_server());
    let plan = dispatcher.prepare(&correlated_lookup().build().unwrap()).unwrap();
    assert!(plan.sql().unwrap().contains("CROSS APPLY (SELECT"));
}

#[test]
fn offset_temporals_echo_the_enclosing_lambda() {
    let dispatcher = northwind_dispatcher();
    let now = || {
        QueryBuilder::from_entity("Order", "o")
            .filter(Expr::member("o", "OrderDate").cast(DeclaredType::DateTimeOffset).lt(Expr::now()))
    };
    let unbound = || {
        QueryBuilder::from_entity("Order", "o").filter(
            Expr::member("o", "OrderDate")
                .part(DatePart::Date)
                .gt(Expr::param("__Date_0")),
        )
    };
    for is_async in MODES {
        let err = run(&dispatcher, now(), is_async).unwrap_err();
        assert_eq!(err.code(), "TranslationFailed");

        let expression = translation_failure(run(&dispatcher, unbound(), is_async).unwrap_err());
        assert_eq!(expression, "(o) => o.OrderDate.Date > (Unhandled parameter: __Date_0)");
    }
}

fn missions_within(dates: Option<Vec<Value>>) -> QueryBuilder {
    let timeline = || Expr::member("m", "Timeline");
    let builder = QueryBuilder::from_entity("Mission", "m")
        .filter(
            Expr::param("__start_0")
                .le(timeline().part(DatePart::Date).cast(DeclaredType::DateTimeOffset))
                .and(timeline().lt(Expr::param("__end_1")))
                .and(timeline().in_param("__dates_2")),
        )
        .param("__start_0", datetime!(1997-08-25 00:00 UTC))
        .param("__end_1", datetime!(2001-01-01 00:00 UTC));
    match dates {
        Some(dates) => builder.list_param("__dates_2", dates),
        None => builder,
    }
}

#[test]
fn captured_list_echo_names_the_member_type() {
    let expected = "(m) => (Unhandled parameter: __start_0) <= (DateTimeOffset)m.Timeline.Date && \
                    m.Timeline < (Unhandled parameter: __end_1) && \
                    Contains<DateTimeOffset>(    source: (Unhandled parameter: __dates_2),     \
                    value: m.Timeline)";
    let dispatcher = northwind_dispatcher();
    for is_async in MODES {
        let err = run(&dispatcher, missions_within(None), is_async).unwrap_err();
        assert_eq!(translation_failure(err), expected);
    }

    let (sql_server, sink) = scripted(CapabilityProfile::sql_server());
    let expression = translation_failure(
        sql_server.prepare(&missions_within(None).build().unwrap()).unwrap_err(),
    );
    assert_eq!(expression, expected);

    let dates = vec![Value::DateTimeOffset(datetime!(1999-12-31 00:00 UTC))];
    let plan = sql_server.prepare(&missions_within(Some(dates)).build().unwrap()).unwrap();
    assert!(plan.sql().unwrap().contains("(t0.\"Timeline\" IN (@p2))"));
    assert_eq!(plan.parameters.len(), 3);
    assert!(sink.invocations().is_empty());
}

#[test]
fn date_parts_of_plain_date_times_run_on_sqlite() {
    let dispatcher = northwind_dispatcher();
    for is_async in MODES {
        let result = rows(
            &dispatcher,
            QueryBuilder::from_entity("Order", "o")
                .filter(Expr::member("o", "OrderDate").part(DatePart::Year).eq(Expr::lit(1997i64)))
                .order_by(Expr::member("o", "OrderID")),
            is_async,
        );
        assert_eq!(
            result.column("OrderID").unwrap(),
            vec![&Value::Int(10643), &Value::Int(10692)]
        );
    }
}

#[test]
fn temporal_null_comparison_matches_sentinel_and_null() {
    let dispatcher = northwind_dispatcher();
    let unshipped = || {
        QueryBuilder::from_entity("Order", "o")
            .filter(Expr::member("o", "ShippedDate").eq(Expr::lit(Value::Null)))
    };
    let shipped = || {
        QueryBuilder::from_entity("Order", "o")
            .filter(Expr::member("o", "ShippedDate").ne(Expr::lit(Value::Null)))
    };
    for is_async in MODES {
        let result = rows(&dispatcher, unshipped(), is_async);
        assert_eq!(result.column("OrderID").unwrap(), vec![&Value::Int(11011)]);
        assert_eq!(result.column("ShippedDate").unwrap(), vec![&Value::Null]);

        assert_eq!(rows(&dispatcher, shipped(), is_async).len(), 3);
    }

    let plan = dispatcher.prepare(&unshipped().build().unwrap()).unwrap();
    assert_eq!(
        plan.parameters[0].value,
        Value::DateTime(CapabilityProfile::sqlite().default_date_time())
    );
}

#[test]
fn integer_literals_respect_declared_precision() {
    let big = 1i64 << 40;
    let query = QueryBuilder::from_entity("Product", "p")
        .filter(Expr::member("p", "ProductID").eq(Expr::lit(big)))
        .build()
        .unwrap();

    let (narrow, _) = scripted(CapabilityProfile::conservative("narrow"));
    let expression = translation_failure(narrow.prepare(&query).unwrap_err());
    assert_eq!(expression, format!("(p) => p.ProductID == {big}"));

    let plan = northwind_dispatcher().prepare(&query).unwrap();
    assert!(plan.sql().unwrap().ends_with(&format!("= {big})")));
}

#[test]
fn ansi_members_bind_by_profile() {
    let query = || {
        QueryBuilder::from_entity("Order", "o")
            .filter(Expr::member("o", "CustomerID").eq(Expr::lit("ALFKI")))
    };

    let plan = northwind_dispatcher().prepare(&query().build().unwrap()).unwrap();
    assert_eq!(plan.parameters[0].ty, DeclaredType::unicode(5));

    let (sql_server, _) = scripted(CapabilityProfile::sql_server());
    let plan = sql_server.prepare(&query().build().unwrap()).unwrap();
    assert_eq!(plan.parameters[0].ty, DeclaredType::ansi(5));
    assert!(plan.warnings.is_empty());

    let accented = QueryBuilder::from_entity("Order", "o")
        .filter(Expr::member("o", "CustomerID").eq(Expr::lit("ÄLFKI")))
        .build()
        .unwrap();
    let plan = sql_server.prepare(&accented).unwrap();
    assert!(matches!(
        plan.warnings.as_slice(),
        [PlanWarning::AnsiLiteral { member, .. }] if member == "CustomerID"
    ));

    let dispatcher = northwind_dispatcher();
    for is_async in MODES {
        assert_eq!(rows(&dispatcher, query(), is_async).len(), 3);
    }
}

#[test]
fn strict_equality_casts_mixed_numeric_operands() {
    let query = QueryBuilder::from_entity("Product", "p")
        .filter(Expr::member("p", "ProductID").eq(Expr::lit(1.5)))
        .build()
        .unwrap();

    let (cosmos, _) = scripted(CapabilityProfile::cosmos());
    let plan = cosmos.prepare(&query).unwrap();
    assert!(plan.sql().unwrap().contains("CAST(t0.\"ProductID\" AS REAL)"));

    let plan = northwind_dispatcher().prepare(&query).unwrap();
    assert!(!plan.sql().unwrap().contains("CAST"));
}

#[test]
fn same_query_different_profiles() {
    let sink = Arc::new(northwind());
    let permissive = CapabilityProfile::sqlite()
        .extend("permissive")
        .flag(refract::query::CapabilityFlag::SupportsDecimalComparisons, true)
        .build();
    let dispatcher = dispatcher_with(permissive, sink.clone());
    let count = products_over_fifty()
        .count()
        .execute(&dispatcher)
        .unwrap()
        .into_scalar()
        .unwrap();
    assert_eq!(count, Value::Int(7));

    let strict = dispatcher_with(CapabilityProfile::sqlite(), sink);
    assert_eq!(
        products_over_fifty().count().execute(&strict).unwrap_err().code(),
        "TranslationFailed"
    );
}
