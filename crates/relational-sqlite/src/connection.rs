//! SQLite connection and statement implementation.
//!
//! Safe wrappers around SQLite's C API implementing the `Connection` and
//! `Statement` traits from relational-core.

// Casts in FFI code need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)]

use crate::config::SqliteConfig;
use crate::ffi;
use crate::types;
use relational_core::{
    ColumnInfo, ColumnMeta, Connection, ConnectionError, ConnectionErrorKind, Error, QueryError,
    QueryErrorKind, Result, Row, Statement, TransactionError, TransactionErrorKind, Value,
};
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard};

struct SqliteInner {
    db: *mut ffi::sqlite3,
    in_transaction: bool,
}

// SAFETY: the handle is only used while holding the connection mutex.
unsafe impl Send for SqliteInner {}

/// A connection to a SQLite database.
pub struct SqliteConnection {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl SqliteConnection {
    /// Open a connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.bits();

        // SAFETY: valid pointers; the return value is checked
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is a valid handle even though open failed
                unsafe {
                    let msg = last_message(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database {}: {msg}", config.path),
                source: None,
            }));
        }

        let ms = config.busy_timeout_ms();
        if ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, ms);
            }
        }

        tracing::debug!(path = %config.path, flags, "Opened SQLite database");
        Ok(Self {
            inner: Mutex::new(SqliteInner {
                db,
                in_transaction: false,
            }),
            path: config.path.clone(),
        })
    }

    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run one or more statements without preparing (DDL, scripts).
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let inner = self.lock()?;
        exec(inner.db, sql)
    }

    pub fn last_insert_rowid(&self) -> Result<i64> {
        let inner = self.lock()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(inner.db) })
    }

    /// Rows changed by the most recent statement.
    pub fn changes(&self) -> Result<i32> {
        let inner = self.lock()?;
        // SAFETY: db is valid
        Ok(unsafe { ffi::sqlite3_changes(inner.db) })
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().is_ok_and(|inner| inner.in_transaction)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SqliteInner>> {
        self.inner.lock().map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: "connection mutex poisoned".to_string(),
                source: None,
            })
        })
    }

    fn end_transaction(&self, sql: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.in_transaction {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::NotActive,
                message: format!("{sql} without an open transaction"),
            }));
        }
        let result = exec(inner.db, sql);
        // SAFETY: db is valid
        inner.in_transaction = unsafe { ffi::sqlite3_get_autocommit(inner.db) } == 0;
        tracing::trace!(statement = sql, ok = result.is_ok(), "Transaction finished");
        result
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.lock() {
            if !inner.db.is_null() {
                // SAFETY: db is valid; close_v2 defers until statements finalize
                unsafe {
                    ffi::sqlite3_close_v2(inner.db);
                }
            }
        }
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

impl Connection for SqliteConnection {
    fn prepare(&self, sql: &str) -> Result<Box<dyn Statement + '_>> {
        let inner = self.lock()?;
        let stmt = prepare_stmt(inner.db, sql)?;

        // SAFETY: stmt is valid
        let count = unsafe { ffi::sqlite3_column_count(stmt) };
        let columns = (0..count)
            .map(|i| {
                // SAFETY: stmt is valid and i < count
                let (name, table) = unsafe { (types::column_name(stmt, i), types::column_table(stmt, i)) };
                ColumnMeta {
                    name: name.unwrap_or_else(|| format!("col{i}")),
                    source_table: table,
                }
            })
            .collect();

        Ok(Box::new(SqliteStatement {
            conn: self,
            stmt,
            sql: sql.to_string(),
            columns: Arc::new(ColumnInfo::new(columns)),
            buffered: None,
            done: true,
        }))
    }

    fn begin(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.in_transaction {
            return Err(Error::Transaction(TransactionError {
                kind: TransactionErrorKind::AlreadyActive,
                message: "a transaction is already open on this connection".to_string(),
            }));
        }
        exec(inner.db, "BEGIN")?;
        inner.in_transaction = true;
        tracing::trace!("Transaction started");
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.end_transaction("COMMIT")
    }

    fn rollback(&self) -> Result<()> {
        self.end_transaction("ROLLBACK")
    }

    fn last_insert_id(&self) -> Result<Value> {
        self.last_insert_rowid().map(Value::BigInt)
    }
}

/// A prepared statement; finalized on drop.
pub struct SqliteStatement<'c> {
    conn: &'c SqliteConnection,
    stmt: *mut ffi::sqlite3_stmt,
    sql: String,
    columns: Arc<ColumnInfo>,
    /// Row produced by the step inside `execute`.
    buffered: Option<Row>,
    done: bool,
}

impl SqliteStatement<'_> {
    fn step(&mut self, db: *mut ffi::sqlite3) -> Result<Option<Row>> {
        // SAFETY: stmt is valid for the life of self
        match unsafe { ffi::sqlite3_step(self.stmt) } {
            ffi::SQLITE_ROW => {
                let values = (0..self.columns.len())
                    // SAFETY: the last step returned a row
                    .map(|i| unsafe { types::read_column(self.stmt, i as c_int) })
                    .collect();
                Ok(Some(Row::with_columns(Arc::clone(&self.columns), values)))
            }
            ffi::SQLITE_DONE => {
                self.done = true;
                Ok(None)
            }
            _ => {
                self.done = true;
                Err(db_error(db, &self.sql))
            }
        }
    }
}

impl Statement for SqliteStatement<'_> {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn execute(&mut self, params: &[Value]) -> Result<bool> {
        let conn = self.conn;
        let inner = conn.lock()?;
        self.buffered = None;
        // SAFETY: stmt is valid
        unsafe {
            ffi::sqlite3_reset(self.stmt);
            ffi::sqlite3_clear_bindings(self.stmt);
        }

        // SAFETY: stmt is valid
        let expected = unsafe { ffi::sqlite3_bind_parameter_count(self.stmt) } as usize;
        if expected != params.len() {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Binding,
                sql: Some(self.sql.clone()),
                code: None,
                message: format!("expected {expected} parameters, got {}", params.len()),
                source: None,
            }));
        }
        for (i, param) in params.iter().enumerate() {
            // SAFETY: stmt is valid, index is 1-based and within range
            let rc = unsafe { types::bind_value(self.stmt, (i + 1) as c_int, param) };
            if rc != ffi::SQLITE_OK {
                let mut err = db_error(inner.db, &self.sql);
                if let Error::Query(q) = &mut err {
                    q.kind = QueryErrorKind::Binding;
                    q.message = format!("Failed to bind parameter {}: {}", i + 1, q.message);
                }
                return Err(err);
            }
        }

        tracing::trace!(sql = %self.sql, params = params.len(), "Executing statement");
        self.done = false;
        self.buffered = self.step(inner.db)?;
        Ok(true)
    }

    fn fetch_row(&mut self) -> Result<Option<Row>> {
        if let Some(row) = self.buffered.take() {
            return Ok(Some(row));
        }
        if self.done {
            return Ok(None);
        }
        let conn = self.conn;
        let inner = conn.lock()?;
        self.step(inner.db)
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_meta(&self, index: usize) -> Option<ColumnMeta> {
        self.columns.meta(index).cloned()
    }
}

impl Drop for SqliteStatement<'_> {
    fn drop(&mut self) {
        // SAFETY: stmt came from sqlite3_prepare_v2 and is finalized once
        unsafe {
            ffi::sqlite3_finalize(self.stmt);
        }
    }
}

fn prepare_stmt(db: *mut ffi::sqlite3, sql: &str) -> Result<*mut ffi::sqlite3_stmt> {
    let c_sql = c_string(sql)?;
    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

    // SAFETY: all pointers are valid
    let rc = unsafe {
        ffi::sqlite3_prepare_v2(
            db,
            c_sql.as_ptr(),
            c_sql.as_bytes().len() as c_int,
            &mut stmt,
            ptr::null_mut(),
        )
    };
    if rc != ffi::SQLITE_OK {
        return Err(db_error(db, sql));
    }
    if stmt.is_null() {
        return Err(Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some(sql.to_string()),
            code: None,
            message: "empty statement".to_string(),
            source: None,
        }));
    }
    Ok(stmt)
}

fn exec(db: *mut ffi::sqlite3, sql: &str) -> Result<()> {
    let c_sql = c_string(sql)?;
    let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

    // SAFETY: all pointers are valid
    let rc = unsafe { ffi::sqlite3_exec(db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg) };
    if rc == ffi::SQLITE_OK {
        return Ok(());
    }

    let message = if errmsg.is_null() {
        ffi::error_string(rc).to_string()
    } else {
        // SAFETY: errmsg was allocated by SQLite and is freed exactly once
        unsafe {
            let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
            ffi::sqlite3_free(errmsg.cast());
            msg
        }
    };
    Err(Error::Query(QueryError {
        kind: error_code_to_kind(rc),
        sql: Some(sql.to_string()),
        code: Some(rc),
        message,
        source: None,
    }))
}

fn c_string(sql: &str) -> Result<CString> {
    CString::new(sql).map_err(|_| {
        Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some(sql.to_string()),
            code: None,
            message: "SQL contains null byte".to_string(),
            source: None,
        })
    })
}

/// Error for the most recent failure on `db`.
fn db_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    // SAFETY: db is valid
    let (message, code) = unsafe { (last_message(db), ffi::sqlite3_errcode(db)) };
    Error::Query(QueryError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        code: Some(code),
        message,
        source: None,
    })
}

unsafe fn last_message(db: *mut ffi::sqlite3) -> String {
    // SAFETY: caller guarantees db; errmsg never returns null for a handle
    unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)) }
        .to_string_lossy()
        .into_owned()
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    // Extended codes carry the primary code in the low byte.
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_RANGE | ffi::SQLITE_MISMATCH => QueryErrorKind::Binding,
        ffi::SQLITE_ERROR => QueryErrorKind::Syntax,
        _ => QueryErrorKind::Database,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenFlags;
    use std::time::Duration;

    fn memory() -> SqliteConnection {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)")
            .unwrap();
        conn
    }

    #[test]
    fn open_memory() {
        let conn = SqliteConnection::open_memory().unwrap();
        assert_eq!(conn.path(), ":memory:");
        assert!(!conn.in_transaction());
    }

    #[test]
    fn execute_raw_and_counters() {
        let conn = memory();
        conn.execute_raw("INSERT INTO test (name) VALUES ('Alice')").unwrap();
        assert_eq!(conn.changes().unwrap(), 1);
        assert_eq!(conn.last_insert_rowid().unwrap(), 1);
        assert_eq!(conn.last_insert_id().unwrap(), Value::BigInt(1));
    }

    #[test]
    fn parameterized_query() {
        let conn = memory();
        conn.execute(
            "INSERT INTO test (name, age) VALUES (?, ?)",
            &[Value::Text("Alice".to_string()), Value::Int(30)],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO test (name, age) VALUES (?, ?)",
            &[Value::Text("Bob".to_string()), Value::Null],
        )
        .unwrap();

        let rows = conn
            .query("SELECT * FROM test WHERE name = ?", &[Value::Text("Alice".to_string())])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_named::<String>("name").unwrap(), "Alice");
        assert_eq!(rows[0].get_named::<i32>("age").unwrap(), 30);

        let rows = conn.query("SELECT * FROM test ORDER BY id", &[]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get_named::<Option<i64>>("age").unwrap(), None);
    }

    #[test]
    fn rows_are_fetched_lazily() {
        let conn = memory();
        conn.execute_raw("INSERT INTO test (name) VALUES ('a'), ('b'), ('c')").unwrap();
        let mut stmt = conn.prepare("SELECT name FROM test ORDER BY id").unwrap();
        assert_eq!(stmt.column_count(), 1);

        assert!(stmt.execute(&[]).unwrap());
        let first = stmt.fetch_row().unwrap().unwrap();
        assert_eq!(first.get_named::<String>("name").unwrap(), "a");
        assert_eq!(stmt.fetch_all().unwrap().len(), 2);
        assert!(stmt.fetch_row().unwrap().is_none());

        // Re-executing starts over.
        stmt.execute(&[]).unwrap();
        assert_eq!(stmt.fetch_all().unwrap().len(), 3);
    }

    #[test]
    fn column_meta_reports_source_tables() {
        let conn = memory();
        conn.execute_raw(
            "CREATE TABLE pet (id INTEGER PRIMARY KEY, test_id INTEGER);
             INSERT INTO test (name) VALUES ('a');
             INSERT INTO pet (test_id) VALUES (1);",
        )
        .unwrap();
        let stmt = conn
            .prepare("SELECT pet.*, owner.* FROM pet INNER JOIN test AS owner ON pet.test_id = owner.id")
            .unwrap();
        let tables: Vec<_> = (0..stmt.column_count())
            .map(|i| stmt.column_meta(i).unwrap())
            .map(|m| (m.source_table.unwrap_or_default(), m.name))
            .collect();
        assert_eq!(
            tables,
            vec![
                ("pet".to_string(), "id".to_string()),
                ("pet".to_string(), "test_id".to_string()),
                ("test".to_string(), "id".to_string()),
                ("test".to_string(), "name".to_string()),
                ("test".to_string(), "age".to_string()),
            ]
        );

        let expr = conn.prepare("SELECT COUNT(*) AS n FROM test").unwrap();
        assert_eq!(expr.column_meta(0).unwrap().table(), None);
    }

    #[test]
    fn transactions() {
        let conn = memory();

        conn.begin().unwrap();
        assert!(conn.in_transaction());
        conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::from("Alice")])
            .unwrap();
        conn.rollback().unwrap();
        assert!(conn.query("SELECT * FROM test", &[]).unwrap().is_empty());

        conn.begin().unwrap();
        conn.execute("INSERT INTO test (name) VALUES (?)", &[Value::from("Bob")])
            .unwrap();
        conn.commit().unwrap();
        let rows = conn.query("SELECT * FROM test", &[]).unwrap();
        assert_eq!(rows[0].get_named::<String>("name").unwrap(), "Bob");
    }

    #[test]
    fn transaction_misuse() {
        let conn = memory();
        assert!(matches!(
            conn.commit(),
            Err(Error::Transaction(TransactionError { kind: TransactionErrorKind::NotActive, .. }))
        ));
        conn.begin().unwrap();
        assert!(matches!(
            conn.begin(),
            Err(Error::Transaction(TransactionError { kind: TransactionErrorKind::AlreadyActive, .. }))
        ));
        conn.rollback().unwrap();
        assert!(conn.rollback().is_err());
    }

    #[test]
    #[allow(clippy::approx_constant)]
    fn type_conversions() {
        let conn = SqliteConnection::open_memory().unwrap();
        conn.execute_raw("CREATE TABLE types (b BOOLEAN, i INTEGER, f REAL, t TEXT, bl BLOB, j TEXT)")
            .unwrap();
        conn.execute(
            "INSERT INTO types VALUES (?, ?, ?, ?, ?, ?)",
            &[
                Value::Bool(true),
                Value::BigInt(42),
                Value::Double(3.14),
                Value::Text("hello".to_string()),
                Value::Bytes(vec![1, 2, 3]),
                Value::Json(serde_json::json!({"a": 1})),
            ],
        )
        .unwrap();

        let rows = conn.query("SELECT * FROM types", &[]).unwrap();
        let row = &rows[0];
        assert_eq!(row.get_named::<i32>("b").unwrap(), 1);
        assert_eq!(row.get_named::<i64>("i").unwrap(), 42);
        assert!((row.get_named::<f64>("f").unwrap() - 3.14).abs() < 0.001);
        assert_eq!(row.get_named::<String>("t").unwrap(), "hello");
        assert_eq!(row.get_named::<Vec<u8>>("bl").unwrap(), vec![1, 2, 3]);
        assert_eq!(row.get_named::<String>("j").unwrap(), r#"{"a":1}"#);
    }

    #[test]
    fn errors_carry_sql_and_kind() {
        let conn = memory();
        let err = conn.prepare("SELEC nonsense").err().unwrap();
        assert_eq!(err.sql(), Some("SELEC nonsense"));
        assert!(matches!(err, Error::Query(QueryError { kind: QueryErrorKind::Syntax, .. })));

        conn.execute_raw("CREATE TABLE uniq (v TEXT UNIQUE)").unwrap();
        conn.execute("INSERT INTO uniq VALUES (?)", &[Value::from("x")]).unwrap();
        let err = conn
            .execute("INSERT INTO uniq VALUES (?)", &[Value::from("x")])
            .unwrap_err();
        assert!(matches!(err, Error::Query(QueryError { kind: QueryErrorKind::Constraint, .. })));

        let err = conn.execute("INSERT INTO uniq VALUES (?)", &[]).unwrap_err();
        assert!(matches!(err, Error::Query(QueryError { kind: QueryErrorKind::Binding, .. })));
    }

    #[test]
    fn open_flags() {
        let tmp = std::env::temp_dir().join(format!("relational_flags_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&tmp);
        let path = tmp.to_string_lossy().to_string();

        let conn = SqliteConnection::open(&SqliteConfig::file(path.clone())).unwrap();
        conn.execute_raw("CREATE TABLE test (id INTEGER)").unwrap();
        drop(conn);

        let read_only = SqliteConfig::file(path.clone()).flags(OpenFlags::read_only());
        let conn = SqliteConnection::open(&read_only).unwrap();
        assert!(conn.query("SELECT * FROM test", &[]).unwrap().is_empty());
        assert!(conn.execute_raw("INSERT INTO test VALUES (1)").is_err());
        drop(conn);
        let _ = std::fs::remove_file(&tmp);

        let missing = SqliteConfig::file(path)
            .flags(OpenFlags::read_write())
            .busy_timeout(Duration::from_millis(10));
        assert!(matches!(SqliteConnection::open(&missing), Err(Error::Connection(_))));
    }
}
