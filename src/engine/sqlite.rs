//! SQLite engine backed by `rusqlite`.
//!
//! Every call opens its own connection on tokio's blocking pool, so
//! concurrent verifications never share a connection.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DeploymentError, EngineError, Result, SchemaflowError};
use crate::plan::{Change, IdHasher};

use super::contract::{Engine, VerifyOutcome};
use super::layout::{ScriptKind, ScriptLayout};

/// Registry table name.
pub const REGISTRY_TABLE: &str = "schemaflow_changes";

/// How long a connection waits on a locked database.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_REGISTRY: &str = "
CREATE TABLE IF NOT EXISTS schemaflow_changes (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    change_id     TEXT NOT NULL UNIQUE,
    change        TEXT NOT NULL,
    project       TEXT NOT NULL,
    note          TEXT NOT NULL DEFAULT '',
    committed_at  TEXT NOT NULL,
    planner_name  TEXT NOT NULL,
    planner_email TEXT NOT NULL,
    planned_at    TEXT NOT NULL
);
";

/// SQLite implementation of [`Engine`].
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    /// Database file.
    database: PathBuf,
    /// Project recorded with each deployed change.
    project: String,
    /// Script locations.
    layout: ScriptLayout,
}

impl SqliteEngine {
    /// Creates an engine for a database file and project.
    #[must_use]
    pub fn new(database: impl Into<PathBuf>, project: impl Into<String>, layout: ScriptLayout) -> Self {
        Self {
            database: database.into(),
            project: project.into(),
            layout,
        }
    }

    /// Database file path.
    #[must_use]
    pub fn database(&self) -> &Path {
        &self.database
    }

    /// Runs `f` on a fresh connection on the blocking pool.
    async fn with_connection<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let database = self.database.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let mut conn = open(&database)?;
            f(&mut conn)
        });

        handle.await.map_err(|e| {
            if e.is_panic() {
                SchemaflowError::internal(format!("SQLite task panicked: {e}"))
            } else {
                EngineError::task(format!("SQLite task was cancelled: {e}")).into()
            }
        })?
    }

    fn read_script(&self, kind: ScriptKind, change: &Change) -> Result<String> {
        let path = self.layout.script(kind, &change.name);
        std::fs::read_to_string(&path).map_err(|_| {
            DeploymentError::ScriptNotFound {
                change: change.name.clone(),
                operation: kind.to_string(),
                path,
            }
            .into()
        })
    }
}

fn open(database: &Path) -> Result<Connection> {
    let conn = Connection::open(database).map_err(|e| EngineError::Connection {
        target: database.display().to_string(),
        message: e.to_string(),
    })?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(|e| EngineError::Connection {
        target: database.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(conn)
}

fn registry_exists(conn: &Connection) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![REGISTRY_TABLE],
        |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
}

/// Returns true when the first statement of a script is `BEGIN`.
///
/// Such scripts manage their own transaction and run outside the one the
/// engine would otherwise open around them.
fn opens_transaction(sql: &str) -> bool {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(comment) = rest.strip_prefix("--") {
            rest = comment.split_once('\n').map_or("", |(_, after)| after);
        } else if let Some(comment) = rest.strip_prefix("/*") {
            rest = comment.split_once("*/").map_or("", |(_, after)| after);
        } else {
            break;
        }
    }

    let keyword: String = rest.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    keyword.eq_ignore_ascii_case("begin")
}

/// Rolls back a transaction a script left open.
fn rollback_open(conn: &Connection) {
    if !conn.is_autocommit() {
        if let Err(e) = conn.execute_batch("ROLLBACK") {
            warn!("Cannot roll back script transaction: {e}");
        }
    }
}

/// Runs a script that issues its own `BEGIN`, then the registry update.
///
/// The update joins a transaction the script left open and is committed
/// with it; otherwise it runs on its own.
fn run_self_managed(
    conn: &Connection,
    sql: &str,
    name: &str,
    operation: &str,
    bookkeeping: impl FnOnce(&Connection) -> Result<()>,
) -> Result<()> {
    conn.execute_batch(sql).map_err(|e| {
        rollback_open(conn);
        DeploymentError::script_failed(name, operation, e.to_string())
    })?;

    if let Err(e) = bookkeeping(conn) {
        rollback_open(conn);
        return Err(e);
    }

    if !conn.is_autocommit() {
        conn.execute_batch("COMMIT")
            .map_err(|e| EngineError::registry(format!("cannot commit {name}: {e}")))?;
    }
    Ok(())
}

fn record_deployed(conn: &Connection, record: &RegistryRecord, project: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schemaflow_changes
            (change_id, change, project, note, committed_at, planner_name, planner_email, planned_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id,
            record.name,
            project,
            record.note,
            IdHasher::format_timestamp(&Utc::now()),
            record.planner_name,
            record.planner_email,
            record.planned_at,
        ],
    )
    .map_err(|e| EngineError::registry(format!("cannot record {}: {e}", record.name)))?;
    Ok(())
}

fn record_reverted(conn: &Connection, id: &str, name: &str) -> Result<()> {
    conn.execute("DELETE FROM schemaflow_changes WHERE change_id = ?1", params![id])
        .map_err(|e| EngineError::registry(format!("cannot unrecord {name}: {e}")))?;
    Ok(())
}

/// Registry row for a change.
struct RegistryRecord {
    id: String,
    name: String,
    note: String,
    planner_name: String,
    planner_email: String,
    planned_at: String,
}

impl RegistryRecord {
    fn from_change(change: &Change) -> Self {
        Self {
            id: change.id(),
            name: change.name.clone(),
            note: change.note.clone(),
            planner_name: change.planner_name.clone(),
            planner_email: change.planner_email.clone(),
            planned_at: IdHasher::format_timestamp(&change.timestamp),
        }
    }
}

#[async_trait]
impl Engine for SqliteEngine {
    async fn ensure_registry(&self) -> Result<()> {
        debug!("Ensuring registry in {}", self.database.display());
        self.with_connection(|conn| {
            conn.execute_batch(CREATE_REGISTRY)
                .map_err(|e| EngineError::registry(format!("cannot create registry: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn get_deployed_changes(&self) -> Result<Vec<String>> {
        let project = self.project.clone();
        self.with_connection(move |conn| {
            if !registry_exists(conn).map_err(|e| EngineError::registry(e.to_string()))? {
                return Ok(Vec::new());
            }

            let mut stmt = conn
                .prepare("SELECT change_id FROM schemaflow_changes WHERE project = ?1 ORDER BY seq")
                .map_err(|e| EngineError::registry(e.to_string()))?;
            let ids = stmt
                .query_map(params![project], |row| row.get::<_, String>(0))
                .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
                .map_err(|e| EngineError::registry(e.to_string()))?;
            Ok(ids)
        })
        .await
    }

    async fn deploy_change(&self, change: &Change) -> Result<()> {
        let sql = self.read_script(ScriptKind::Deploy, change)?;
        let record = RegistryRecord::from_change(change);
        let project = self.project.clone();

        info!("Deploying {} to {}", change.name, self.database.display());
        self.with_connection(move |conn| {
            if opens_transaction(&sql) {
                return run_self_managed(conn, &sql, &record.name, "deploy", |conn| {
                    record_deployed(conn, &record, &project)
                });
            }

            let tx = conn
                .transaction()
                .map_err(|e| EngineError::registry(e.to_string()))?;

            tx.execute_batch(&sql)
                .map_err(|e| DeploymentError::script_failed(&record.name, "deploy", e.to_string()))?;

            record_deployed(&tx, &record, &project)?;

            tx.commit()
                .map_err(|e| EngineError::registry(format!("cannot commit {}: {e}", record.name)))?;
            Ok(())
        })
        .await
    }

    async fn revert_change(&self, change: &Change) -> Result<()> {
        let sql = self.read_script(ScriptKind::Revert, change)?;
        let id = change.id();
        let name = change.name.clone();

        info!("Reverting {} from {}", change.name, self.database.display());
        self.with_connection(move |conn| {
            if opens_transaction(&sql) {
                return run_self_managed(conn, &sql, &name, "revert", |conn| {
                    record_reverted(conn, &id, &name)
                });
            }

            let tx = conn
                .transaction()
                .map_err(|e| EngineError::registry(e.to_string()))?;

            tx.execute_batch(&sql)
                .map_err(|e| DeploymentError::script_failed(&name, "revert", e.to_string()))?;

            record_reverted(&tx, &id, &name)?;

            tx.commit()
                .map_err(|e| EngineError::registry(format!("cannot commit {name}: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn verify_change(&self, change: &Change) -> Result<VerifyOutcome> {
        let sql = self.read_script(ScriptKind::Verify, change)?;

        debug!("Verifying {}", change.name);
        self.with_connection(move |conn| {
            if opens_transaction(&sql) {
                let outcome = match conn.execute_batch(&sql) {
                    Ok(()) => VerifyOutcome::passed(),
                    Err(e) => VerifyOutcome::failed(e.to_string()),
                };
                rollback_open(conn);
                return Ok(outcome);
            }

            let tx = conn
                .transaction()
                .map_err(|e| EngineError::registry(e.to_string()))?;

            let outcome = match tx.execute_batch(&sql) {
                Ok(()) => VerifyOutcome::passed(),
                Err(e) => VerifyOutcome::failed(e.to_string()),
            };

            tx.rollback()
                .map_err(|e| EngineError::registry(format!("cannot roll back verify: {e}")))?;
            Ok(outcome)
        })
        .await
    }

    fn engine_type(&self) -> &'static str {
        "sqlite"
    }
}
