use crate::core::config::BrokerConfig;
use crate::core::error::{self, AquilonError};
use crate::core::schemas;
use rusqlite::{Connection, Params, params};
use std::time::Duration;
use tracing::debug;

pub fn db_connect(db_path: &str, busy_timeout_secs: u64) -> Result<Connection, AquilonError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(busy_timeout_secs))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

/// Creates every table and seeds the fixed rows. Safe to run repeatedly.
pub fn initialize_db(conn: &Connection, config: &BrokerConfig) -> Result<(), AquilonError> {
    for statement in schemas::ALL_SCHEMAS {
        conn.execute_batch(statement)?;
    }

    for tag in schemas::DNS_RECORD_TYPES {
        insert_ignoring_duplicate(
            conn,
            "INSERT INTO dns_record_type(name) VALUES(?1)",
            params![tag],
        )?;
    }
    for tag in schemas::CLUSTER_TYPES {
        insert_ignoring_duplicate(conn, "INSERT INTO cluster_type(name) VALUES(?1)", params![tag])?;
    }
    for tag in schemas::FEATURE_TYPES {
        insert_ignoring_duplicate(conn, "INSERT INTO feature_type(name) VALUES(?1)", params![tag])?;
    }

    insert_ignoring_duplicate(
        conn,
        "INSERT INTO dns_environment(name, comments) VALUES(?1, 'default DNS environment')",
        params![config.default_dns_environment],
    )?;
    insert_ignoring_duplicate(
        conn,
        "INSERT INTO network_environment(name, dns_environment_id, comments)
         SELECT ?1, id, 'default network environment' FROM dns_environment WHERE name = ?2",
        params![
            config.default_network_environment,
            config.default_dns_environment
        ],
    )?;
    Ok(())
}

/// Best-effort idempotent insert for fixed rows: a constraint violation means
/// the row is already there. Returns whether a row was written.
pub fn insert_ignoring_duplicate<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<bool, AquilonError> {
    match conn.execute(sql, params) {
        Ok(changed) => Ok(changed > 0),
        Err(e) if error::is_constraint_violation(&e) => {
            debug!(sql, "fixed row already present");
            Ok(false)
        }
        Err(e) => Err(AquilonError::RusqliteError(e)),
    }
}
