//! Connection bootstrap utilities for SQLite.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON`.
//! - Returned connections carry the host table for the given definition.

use super::schema::apply_host_schema;
use super::DbResult;
use crate::schema::host::HostDefinition;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens a SQLite database file and applies the host schema.
///
/// # Side effects
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>, host: &HostDefinition) -> DbResult<Connection> {
    open_with("file", host, || Connection::open(path))
}

/// Opens an in-memory SQLite database and applies the host schema.
pub fn open_db_in_memory(host: &HostDefinition) -> DbResult<Connection> {
    open_with("memory", host, Connection::open_in_memory)
}

fn open_with(
    mode: &'static str,
    host: &HostDefinition,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match open() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, host) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} table={} duration_ms={}",
                host.table,
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, host: &HostDefinition) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_host_schema(conn, host)?;
    Ok(())
}
