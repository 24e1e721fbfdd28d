//! Transaction-scoped session handed to every engine operation.
//!
//! A `Session` wraps the connection of one open `BEGIN IMMEDIATE`
//! transaction. It never commits or rolls back; the broker owns that.
//! Row locks taken through it are recorded so lock ordering can be enforced
//! and inspected.

use crate::core::config::BrokerConfig;
use crate::core::error::AquilonError;
use rusqlite::{Connection, params};
use std::cell::RefCell;
use tracing::trace;

/// Tables whose row locks must be taken in this order within one session.
/// Tables not listed are unordered.
pub const LOCK_ORDER: &[&str] = &["dns_domain", "network"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockedRow {
    pub table: &'static str,
    pub id: i64,
}

pub struct Session<'a> {
    conn: &'a Connection,
    config: &'a BrokerConfig,
    locks: RefCell<Vec<LockedRow>>,
}

impl<'a> Session<'a> {
    pub fn new(conn: &'a Connection, config: &'a BrokerConfig) -> Self {
        Self {
            conn,
            config,
            locks: RefCell::new(Vec::new()),
        }
    }

    pub fn conn(&self) -> &Connection {
        self.conn
    }

    pub fn config(&self) -> &BrokerConfig {
        self.config
    }

    /// Registers write intent on one row. Re-locking a held row is a no-op.
    pub fn lock_row(&self, table: &'static str, id: i64) -> Result<(), AquilonError> {
        let row = LockedRow { table, id };
        if self.locks.borrow().contains(&row) {
            return Ok(());
        }
        self.check_lock_order(table)?;

        // SQLite has no SELECT ... FOR UPDATE; an identity update claims the row.
        let sql = format!("UPDATE {table} SET id = id WHERE id = ?1");
        let changed = self.conn.execute(&sql, params![id])?;
        if changed == 0 {
            return Err(AquilonError::NotFound(format!(
                "Cannot lock {table} row {id}: it no longer exists."
            )));
        }
        trace!(table, id, "row locked");
        self.locks.borrow_mut().push(row);
        Ok(())
    }

    /// Locks several rows of one table in ascending primary key order.
    pub fn lock_rows(&self, rows: &[(&'static str, i64)]) -> Result<(), AquilonError> {
        let Some((table, _)) = rows.first() else {
            return Ok(());
        };
        if let Some((other, _)) = rows.iter().find(|(t, _)| t != table) {
            return Err(AquilonError::InternalError(format!(
                "lock_rows() needs rows from a single table, got both {table} and {other}"
            )));
        }
        let mut ids: Vec<i64> = rows.iter().map(|(_, id)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        for id in ids {
            self.lock_row(table, id)?;
        }
        Ok(())
    }

    pub fn is_locked(&self, table: &str, id: i64) -> bool {
        self.locks
            .borrow()
            .iter()
            .any(|row| row.table == table && row.id == id)
    }

    /// Rows locked so far, in acquisition order.
    pub fn locked_rows(&self) -> Vec<LockedRow> {
        self.locks.borrow().clone()
    }

    fn check_lock_order(&self, table: &str) -> Result<(), AquilonError> {
        let Some(rank) = LOCK_ORDER.iter().position(|t| *t == table) else {
            return Ok(());
        };
        let held = self.locks.borrow();
        if let Some(later) = held.iter().find(|row| {
            LOCK_ORDER
                .iter()
                .position(|t| *t == row.table)
                .is_some_and(|r| r > rank)
        }) {
            return Err(AquilonError::InternalError(format!(
                "lock order violation: {table} locked after {} row {}",
                later.table, later.id
            )));
        }
        Ok(())
    }
}
