//! Northwind-style fixture shared by the integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Once};

use refract::{
    provider::SqliteSink,
    query::{
        metadata::{DeclaredType, EntityShape, FieldDef, InMemoryMetadata},
        CancelToken, CapabilityProfile, Dispatcher, ProviderSink, QueryBuilder, Rows,
        ShapedResult,
    },
    QueryError, Value,
};

pub const TEN_MOST_EXPENSIVE: &str = "[Ten Most Expensive Products]";
pub const CUST_ORDER_HIST: &str = "CustOrderHist";
pub const ALL_PRODUCTS: &str = "SELECT * FROM Products";

/// Both execution entry points, blocking first.
pub const MODES: [bool; 2] = [false, true];

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub const SCHEMA: &str = "
CREATE TABLE Products (
    ProductID INTEGER PRIMARY KEY,
    ProductName TEXT NOT NULL,
    UnitPrice REAL,
    UnitsInStock INTEGER
);
INSERT INTO Products VALUES (1, 'Chai', 18.00, 39);
INSERT INTO Products VALUES (3, 'Aniseed Syrup', 10.00, 13);
INSERT INTO Products VALUES (9, 'Mishi Kobe Niku', 97.00, 29);
INSERT INTO Products VALUES (13, 'Konbu', 6.00, 24);
INSERT INTO Products VALUES (14, 'Tofu', 23.25, 35);
INSERT INTO Products VALUES (18, 'Carnarvon Tigers', 62.50, 42);
INSERT INTO Products VALUES (20, 'Sir Rodney''s Marmalade', 81.00, 40);
INSERT INTO Products VALUES (29, 'Thüringer Rostbratwurst', 123.79, 0);
INSERT INTO Products VALUES (38, 'Côte de Blaye', 263.50, 17);
INSERT INTO Products VALUES (43, 'Ipoh Coffee', 46.00, 17);
INSERT INTO Products VALUES (51, 'Manjimup Dried Apples', 53.00, 20);
INSERT INTO Products VALUES (59, 'Raclette Courdavault', 55.00, 79);
INSERT INTO Products VALUES (62, 'Tarte au sucre', 49.30, 17);
INSERT INTO Products VALUES (63, 'Vegie-spread', 43.90, NULL);
INSERT INTO Products VALUES (75, 'Rhönbräu Klosterbier', 7.75, 125);
INSERT INTO Products VALUES (77, 'Original Frankfurter grüne Soße', 13.00, NULL);
INSERT INTO Products VALUES (40, 'Rössle Sauerkraut', 45.60, 26);

CREATE TABLE CustomerOrderHistory (
    CustomerID TEXT NOT NULL,
    ProductName TEXT NOT NULL,
    Total INTEGER NOT NULL
);
INSERT INTO CustomerOrderHistory VALUES ('ALFKI', 'Aniseed Syrup', 6);
INSERT INTO CustomerOrderHistory VALUES ('ALFKI', 'Chartreuse verte', 21);
INSERT INTO CustomerOrderHistory VALUES ('ALFKI', 'Escargots de Bourgogne', 40);
INSERT INTO CustomerOrderHistory VALUES ('ALFKI', 'Flotemysost', 20);
INSERT INTO CustomerOrderHistory VALUES ('ALFKI', 'Grandma''s Boysenberry Spread', 16);
INSERT INTO CustomerOrderHistory VALUES ('ALFKI', 'Lakkalikööri', 15);
INSERT INTO CustomerOrderHistory VALUES ('ALFKI', 'Original Frankfurter grüne Soße', 2);
INSERT INTO CustomerOrderHistory VALUES ('ALFKI', 'Raclette Courdavault', 15);
INSERT INTO CustomerOrderHistory VALUES ('ALFKI', 'Rössle Sauerkraut', 17);
INSERT INTO CustomerOrderHistory VALUES ('ALFKI', 'Spegesild', 2);
INSERT INTO CustomerOrderHistory VALUES ('ALFKI', 'Vegie-spread', 20);
INSERT INTO CustomerOrderHistory VALUES ('ANATR', 'Chai', 3);

CREATE TABLE Orders (
    OrderID INTEGER PRIMARY KEY,
    CustomerID TEXT NOT NULL,
    OrderDate TEXT NOT NULL,
    ShippedDate TEXT
);
INSERT INTO Orders VALUES (10643, 'ALFKI', '1997-08-25 00:00:00', '1997-09-02 00:00:00');
INSERT INTO Orders VALUES (10692, 'ALFKI', '1997-10-03 00:00:00', '1997-10-13 00:00:00');
INSERT INTO Orders VALUES (11011, 'ALFKI', '1998-04-09 00:00:00', NULL);
INSERT INTO Orders VALUES (10308, 'ANATR', '1996-09-18 00:00:00', '1996-09-24 00:00:00');
";

/// A fresh in-memory store with the fixture rows and procedures.
pub fn northwind() -> SqliteSink {
    init_tracing();
    let sink = SqliteSink::open_in_memory()
        .expect("open in-memory store")
        .with_name("northwind");
    sink.execute_batch(SCHEMA).expect("seed fixture");
    sink.register_procedure(
        TEN_MOST_EXPENSIVE,
        "SELECT ProductName AS TenMostExpensiveProducts, UnitPrice \
         FROM Products ORDER BY UnitPrice DESC LIMIT 10",
    );
    sink.register_procedure(
        CUST_ORDER_HIST,
        "SELECT ProductName, Total FROM CustomerOrderHistory \
         WHERE CustomerID = ?1 ORDER BY ProductName",
    );
    sink
}

pub fn metadata() -> InMemoryMetadata {
    InMemoryMetadata::new()
        .with_entity(
            EntityShape::new("Product")
                .table("Products")
                .field(FieldDef::new("ProductID", DeclaredType::Int32))
                .field(FieldDef::new("ProductName", DeclaredType::unicode(40)))
                .field(FieldDef::new("UnitPrice", DeclaredType::Decimal { scale: 2 }).nullable())
                .field(FieldDef::new("UnitsInStock", DeclaredType::Int32).nullable()),
        )
        .with_entity(
            EntityShape::new("MostExpensiveProduct")
                .field(FieldDef::new("TenMostExpensiveProducts", DeclaredType::unicode(40)))
                .field(FieldDef::new("UnitPrice", DeclaredType::Decimal { scale: 2 }).nullable()),
        )
        .with_entity(
            EntityShape::new("CustomerOrderHistory")
                .field(FieldDef::new("ProductName", DeclaredType::unicode(40)))
                .field(FieldDef::new("Total", DeclaredType::Int32)),
        )
        .with_entity(
            EntityShape::new("Order")
                .table("Orders")
                .field(FieldDef::new("OrderID", DeclaredType::Int32))
                .field(FieldDef::new("CustomerID", DeclaredType::ansi(5)))
                .field(FieldDef::new("OrderDate", DeclaredType::DateTime))
                .field(FieldDef::new("ShippedDate", DeclaredType::DateTime).nullable()),
        )
        .with_entity(
            EntityShape::new("Mission")
                .table("Missions")
                .field(FieldDef::new("Id", DeclaredType::Int32))
                .field(FieldDef::new("Timeline", DeclaredType::DateTimeOffset)),
        )
}

pub fn dispatcher_with(profile: CapabilityProfile, sink: Arc<dyn ProviderSink>) -> Dispatcher {
    Dispatcher::new(profile, Arc::new(metadata()), sink)
}

pub fn northwind_dispatcher() -> Dispatcher {
    dispatcher_with(CapabilityProfile::sqlite(), Arc::new(northwind()))
}

pub fn ten_most_expensive(var: &str) -> QueryBuilder {
    QueryBuilder::from_procedure("MostExpensiveProduct", var, TEN_MOST_EXPENSIVE, Vec::<Value>::new())
}

pub fn customer_order_history(var: &str, customer: &str) -> QueryBuilder {
    QueryBuilder::from_procedure("CustomerOrderHistory", var, CUST_ORDER_HIST, [customer])
}

pub fn all_products(var: &str) -> QueryBuilder {
    QueryBuilder::from_sql("Product", var, ALL_PRODUCTS, Vec::<Value>::new())
}

/// Runs `builder` through the blocking or the suspending entry point.
pub fn run(dispatcher: &Dispatcher, builder: QueryBuilder, is_async: bool) -> Result<ShapedResult, QueryError> {
    run_with(dispatcher, builder, is_async, None)
}

pub fn run_with(
    dispatcher: &Dispatcher,
    builder: QueryBuilder,
    is_async: bool,
    cancel: Option<CancelToken>,
) -> Result<ShapedResult, QueryError> {
    let query = builder.build()?;
    if is_async {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime")
            .block_on(dispatcher.execute_async(&query, cancel))
    } else {
        dispatcher.execute(&query, cancel)
    }
}

pub fn rows(dispatcher: &Dispatcher, builder: QueryBuilder, is_async: bool) -> Rows {
    run(dispatcher, builder, is_async)
        .and_then(ShapedResult::into_rows)
        .expect("query succeeds")
}

pub fn decimal(units: i64, scale: u32) -> Value {
    Value::Decimal(rust_decimal::Decimal::new(units, scale))
}
