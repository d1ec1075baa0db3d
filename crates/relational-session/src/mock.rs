//! Recording connection used by the session tests.

use relational_core::{
    ColumnInfo, ColumnMeta, Connection, Error, QueryError, QueryErrorKind, Result, Row, Statement,
    Value,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// Every executed statement with its params.
    pub executed: Vec<(String, Vec<Value>)>,
    /// Result sets handed out to SELECTs, in order.
    pub results: VecDeque<Vec<Row>>,
    /// Fail the n-th execute (1-based).
    pub fail_on_execute: Option<usize>,
    pub execute_calls: usize,
    pub last_insert_id: Option<i64>,
    pub insert_ids_unsupported: bool,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

impl MockState {
    pub fn statements(&self) -> Vec<&str> {
        self.executed.iter().map(|(sql, _)| sql.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnection {
    pub state: Rc<RefCell<MockState>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the rows the next SELECT returns.
    pub fn push_result(&self, rows: Vec<Row>) {
        self.state.borrow_mut().results.push_back(rows);
    }
}

/// A row whose columns carry their source tables.
pub(crate) fn row(columns: &[(&str, &str)], values: Vec<Value>) -> Row {
    let info = ColumnInfo::new(
        columns
            .iter()
            .map(|(table, name)| ColumnMeta::with_table(*name, *table))
            .collect(),
    );
    Row::with_columns(Arc::new(info), values)
}

struct MockStatement {
    state: Rc<RefCell<MockState>>,
    sql: String,
    pending: VecDeque<Row>,
}

impl Statement for MockStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn execute(&mut self, params: &[Value]) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        state.execute_calls += 1;
        if state.fail_on_execute == Some(state.execute_calls) {
            return Err(Error::Query(QueryError {
                kind: QueryErrorKind::Constraint,
                sql: Some(self.sql.clone()),
                code: None,
                message: "injected failure".to_string(),
                source: None,
            }));
        }
        state.executed.push((self.sql.clone(), params.to_vec()));
        if self.sql.starts_with("SELECT") {
            self.pending = state.results.pop_front().unwrap_or_default().into();
        } else if self.sql.starts_with("INSERT") {
            let next = state.last_insert_id.unwrap_or(0) + 1;
            state.last_insert_id = Some(next);
        }
        Ok(true)
    }

    fn fetch_row(&mut self) -> Result<Option<Row>> {
        Ok(self.pending.pop_front())
    }

    fn column_count(&self) -> usize {
        self.pending.front().map_or(0, Row::len)
    }

    fn column_meta(&self, index: usize) -> Option<ColumnMeta> {
        self.pending
            .front()
            .and_then(|row| row.column_meta(index).cloned())
    }
}

impl Connection for MockConnection {
    fn prepare(&self, sql: &str) -> Result<Box<dyn Statement + '_>> {
        Ok(Box::new(MockStatement {
            state: Rc::clone(&self.state),
            sql: sql.to_string(),
            pending: VecDeque::new(),
        }))
    }

    fn begin(&self) -> Result<()> {
        self.state.borrow_mut().begins += 1;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.state.borrow_mut().commits += 1;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.state.borrow_mut().rollbacks += 1;
        Ok(())
    }

    fn last_insert_id(&self) -> Result<Value> {
        let state = self.state.borrow();
        if state.insert_ids_unsupported {
            return Err(Error::Unsupported("last insert id".to_string()));
        }
        Ok(state.last_insert_id.map_or(Value::Null, Value::BigInt))
    }
}
