//! SQLite-backed provider sink.
//!
//! Text plans run as prepared statements with positional bindings. Opaque
//! plans resolve the command against registered procedures, whose bodies use
//! `?1`-style placeholders. Temporals travel as text, decimals as `REAL`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode};
use rust_decimal::prelude::ToPrimitive;
use rustc_hash::FxHashMap;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::PrimitiveDateTime;
use tracing::{debug, trace};

use crate::config::ProviderSettings;
use crate::query::{
    errors::ProviderError,
    executor::{FetchFuture, ProviderSink},
    materialize::{RawRecord, RawResult},
    plan::{Command, TranslatedPlan},
    Value,
};

/// Lock wait applied when none is configured.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Provider sink over one SQLite connection.
#[derive(Clone)]
pub struct SqliteSink {
    name: String,
    conn: Arc<Mutex<Connection>>,
    procedures: Arc<RwLock<FxHashMap<String, String>>>,
    busy_timeout_ms: u64,
}

impl std::fmt::Debug for SqliteSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSink")
            .field("name", &self.name)
            .field("procedures", &self.procedures.read().len())
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .finish()
    }
}

impl SqliteSink {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let conn = Connection::open(path).map_err(|err| ProviderError::Connection(err.to_string()))?;
        Self::from_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, ProviderError> {
        let conn =
            Connection::open_in_memory().map_err(|err| ProviderError::Connection(err.to_string()))?;
        Self::from_connection(conn)
    }

    /// Opens the database named by configured provider settings.
    ///
    /// Settings without a database path get an in-memory store.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let sink = match &settings.database {
            Some(path) => Self::open(path)?,
            None => Self::open_in_memory()?,
        };
        sink.with_busy_timeout(settings.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS))
            .map(|sink| sink.with_name(settings.name.clone()))
    }

    /// Wraps an existing connection.
    pub fn from_connection(conn: Connection) -> Result<Self, ProviderError> {
        Self {
            name: "sqlite".to_string(),
            conn: Arc::new(Mutex::new(conn)),
            procedures: Arc::new(RwLock::new(FxHashMap::default())),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
        .with_busy_timeout(DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Renames the sink for diagnostics.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets how long a statement waits on a locked database.
    pub fn with_busy_timeout(mut self, millis: u64) -> Result<Self, ProviderError> {
        self.conn
            .lock()
            .busy_timeout(Duration::from_millis(millis))
            .map_err(|err| ProviderError::Connection(err.to_string()))?;
        self.busy_timeout_ms = millis;
        Ok(self)
    }

    /// Runs setup statements (schema, seed data).
    pub fn execute_batch(&self, sql: &str) -> Result<(), ProviderError> {
        self.conn
            .lock()
            .execute_batch(sql)
            .map_err(|err| command_error("<batch>", err, self.busy_timeout_ms))
    }

    /// Runs one statement with `?N` parameters, returning the changed row count.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, ProviderError> {
        let values = params
            .iter()
            .map(to_sql)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|message| ProviderError::Command {
                command: sql.to_string(),
                message,
            })?;
        self.conn
            .lock()
            .execute(sql, rusqlite::params_from_iter(values))
            .map_err(|err| command_error(sql, err, self.busy_timeout_ms))
    }

    /// Registers a procedure body under `name`.
    pub fn register_procedure(&self, name: impl Into<String>, body: impl Into<String>) {
        self.procedures.write().insert(name.into(), body.into());
    }

    fn run(&self, plan: &TranslatedPlan) -> Result<RawResult, ProviderError> {
        let (text, label) = match &plan.command {
            Command::Text { sql } => (sql.clone(), sql.as_str()),
            Command::Opaque { command } => {
                let body = self.procedures.read().get(command).cloned().ok_or_else(|| {
                    ProviderError::Command {
                        command: command.clone(),
                        message: "no such procedure".to_string(),
                    }
                })?;
                (body, command.as_str())
            }
        };
        let fail = |err: rusqlite::Error| command_error(label, err, self.busy_timeout_ms);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&text).map_err(fail)?;
        if stmt.parameter_count() != plan.parameters.len() {
            return Err(ProviderError::Command {
                command: label.to_string(),
                message: format!(
                    "statement expects {} parameters, plan binds {}",
                    stmt.parameter_count(),
                    plan.parameters.len()
                ),
            });
        }
        for binding in &plan.parameters {
            let value = to_sql(&binding.value).map_err(|message| ProviderError::Command {
                command: label.to_string(),
                message,
            })?;
            stmt.raw_bind_parameter(binding.position + 1, value)
                .map_err(fail)?;
        }

        let width = stmt.column_count();
        let mut rows = stmt.raw_query();
        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(fail)? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                let value = from_sql(row.get_ref(idx).map_err(fail)?).map_err(|message| {
                    ProviderError::Command {
                        command: label.to_string(),
                        message,
                    }
                })?;
                values.push(value);
            }
            records.push(RawRecord::Row(values));
        }
        trace!(records = records.len(), "sqlite statement finished");
        Ok(records)
    }
}

impl ProviderSink for SqliteSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, plan: &TranslatedPlan) -> Result<RawResult, ProviderError> {
        debug!(
            provider = %self.name,
            plan_hash = plan.plan_hash,
            bindings = plan.parameters.len(),
            "sqlite round-trip"
        );
        self.run(plan)
    }

    fn fetch_async<'a>(&'a self, plan: &'a TranslatedPlan) -> FetchFuture<'a> {
        let sink = self.clone();
        let plan = plan.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || sink.fetch(&plan))
                .await
                .map_err(|err| ProviderError::Connection(format!("round-trip task failed: {err}")))?
        })
    }
}

fn command_error(command: &str, err: rusqlite::Error, busy_timeout_ms: u64) -> ProviderError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => ProviderError::Timeout {
            after_ms: busy_timeout_ms,
        },
        Some(ErrorCode::CannotOpen | ErrorCode::NotADatabase) => {
            ProviderError::Connection(err.to_string())
        }
        _ => ProviderError::Command {
            command: command.to_string(),
            message: err.to_string(),
        },
    }
}

fn to_sql(value: &Value) -> Result<SqlValue, String> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(v) => SqlValue::Integer(i64::from(*v)),
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Float(v) => SqlValue::Real(*v),
        Value::Decimal(d) => SqlValue::Real(
            d.to_f64()
                .ok_or_else(|| format!("decimal {d} has no REAL representation"))?,
        ),
        Value::String(v) => SqlValue::Text(v.clone()),
        Value::Bytes(v) => SqlValue::Blob(v.clone()),
        Value::DateTime(v) => SqlValue::Text(format_datetime(v)?),
        Value::DateTimeOffset(v) => SqlValue::Text(v.format(&Rfc3339).map_err(|err| err.to_string())?),
    })
}

fn format_datetime(value: &PrimitiveDateTime) -> Result<String, String> {
    let formatted = if value.nanosecond() == 0 {
        value.format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
    } else {
        value.format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
        ))
    };
    formatted.map_err(|err| err.to_string())
}

fn from_sql(value: ValueRef<'_>) -> Result<Value, String> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) => Value::String(
            std::str::from_utf8(bytes)
                .map_err(|err| format!("column text is not UTF-8: {err}"))?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    })
}
