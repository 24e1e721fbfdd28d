use crate::core::config::BrokerConfig;
use crate::core::db;
use crate::core::error::AquilonError;
use crate::core::session::Session;
use crate::core::time;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// The broker is the single entry point for state access.
///
/// It is constructed once per process (or per test) and passed explicitly to
/// whatever drives the engines. Every `with_session` call runs its closure in
/// one `BEGIN IMMEDIATE` transaction: `Ok` commits, `Err` rolls back.
pub struct Broker {
    root: PathBuf,
    db_path: PathBuf,
    audit_log_path: PathBuf,
    config: BrokerConfig,
    write_lock: Mutex<()>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl Broker {
    /// Opens (creating if needed) the database under `root` and applies the schema.
    pub fn open(root: &Path, config: BrokerConfig) -> Result<Self, AquilonError> {
        fs::create_dir_all(root)?;
        let broker = Self {
            root: root.to_path_buf(),
            db_path: root.join(&config.database),
            audit_log_path: root.join("broker.events.jsonl"),
            config,
            write_lock: Mutex::new(()),
        };
        let conn = broker.connect()?;
        db::initialize_db(&conn, &broker.config)?;
        info!(db = %broker.db_path.display(), "broker database ready");
        Ok(broker)
    }

    /// Opens with `<root>/aquilon.toml` if present.
    pub fn open_with_root_config(root: &Path) -> Result<Self, AquilonError> {
        let config = BrokerConfig::load_or_default(root)?;
        Self::open(root, config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Raw connection, for inspection in tooling and tests.
    pub fn connect(&self) -> Result<Connection, AquilonError> {
        db::db_connect(
            &self.db_path.to_string_lossy(),
            self.config.busy_timeout_secs,
        )
    }

    /// Execute a closure inside one write transaction.
    pub fn with_session<F, R>(&self, actor: &str, op_name: &str, f: F) -> Result<R, AquilonError>
    where
        F: FnOnce(&Session<'_>) -> Result<R, AquilonError>,
    {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AquilonError::InternalError("broker write lock poisoned".to_string()))?;

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        debug!(actor, op = op_name, "transaction opened");

        let result = {
            let session = Session::new(&tx, &self.config);
            f(&session)
        };

        let status = match &result {
            Ok(_) => {
                if let Err(e) = tx.commit() {
                    let err = AquilonError::from(e);
                    self.record_event(actor, op_name, "error");
                    return Err(err);
                }
                debug!(actor, op = op_name, "transaction committed");
                "success"
            }
            Err(e) => {
                // The closure's error is what the caller needs to see.
                if let Err(rb) = tx.rollback() {
                    warn!(actor, op = op_name, error = %rb, "rollback failed");
                }
                debug!(actor, op = op_name, error = %e, "transaction rolled back");
                "error"
            }
        };
        self.record_event(actor, op_name, status);

        result
    }

    /// Execute a read-only closure. Nothing it does is committed.
    pub fn with_read<F, R>(&self, f: F) -> Result<R, AquilonError>
    where
        F: FnOnce(&Session<'_>) -> Result<R, AquilonError>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let result = {
            let session = Session::new(&tx, &self.config);
            f(&session)
        };
        tx.rollback()?;
        result
    }

    /// Appends the audit line. The transaction outcome is already settled,
    /// so a failed write is logged and does not change the result.
    fn record_event(&self, actor: &str, op: &str, status: &str) {
        if let Err(e) = self.log_event(actor, op, status) {
            warn!(
                actor,
                op,
                status,
                error = %e,
                path = %self.audit_log_path.display(),
                "could not append broker event"
            );
        }
    }

    fn log_event(&self, actor: &str, op: &str, status: &str) -> Result<(), AquilonError> {
        use std::fs::OpenOptions;
        use std::io::Write;

        if !self.config.audit_log {
            return Ok(());
        }

        let db_id = self
            .db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id,
            status: status.to_string(),
        };

        let line = serde_json::to_string(&ev).map_err(|e| {
            warn!(error = %e, "could not serialize broker event");
            AquilonError::InternalError(format!("broker event serialization: {e}"))
        })?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;
        writeln!(f, "{}", line)?;
        Ok(())
    }

    pub fn audit_log_path(&self) -> &Path {
        &self.audit_log_path
    }
}

/// Reads every event from a broker audit log.
pub fn read_events(path: &Path) -> Result<Vec<BrokerEvent>, AquilonError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| AquilonError::InternalError(format!("malformed broker event: {e}")))
        })
        .collect()
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "broker",
        "version": "0.1.0",
        "description": "Transactional session broker and audit trail",
        "commands": [
            { "name": "audit", "description": "Show the session audit log" }
        ],
        "storage": ["aquilon.db", "broker.events.jsonl"]
    })
}
